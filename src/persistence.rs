use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::config::{STATE_FILE_NAME, Settings};
use crate::model::{
    CaseList, GroupingMethod, NodeId, NodeKind, Problem, ProblemTree, TestCase,
    externalize_large_cases,
};

/// On-disk shape of the workspace state file
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StateFile {
    #[serde(default)]
    pub problems: Vec<NodeRecord>,
    #[serde(default)]
    pub grouping_method: GroupingMethod,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub folder: bool,
    #[serde(default)]
    pub collapsed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<NodeRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cases: Option<Vec<CaseRecord>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaseRecord {
    pub name: String,
    /// Only written when it differs from `name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub external: bool,
    /// The text itself, or a file path when `external`
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub expected_output: String,
}

fn default_enabled() -> bool {
    true
}

impl CaseRecord {
    fn from_case(case: &TestCase) -> Self {
        Self {
            name: case.name().to_string(),
            label: (case.label() != case.name()).then(|| case.label().to_string()),
            enabled: case.enabled,
            external: case.is_external(),
            input: case.input_field().stored_value(),
            expected_output: case.expected_field().stored_value(),
        }
    }

    fn into_case(self) -> TestCase {
        let mut case = if self.external {
            TestCase::external(
                self.name,
                PathBuf::from(self.input),
                PathBuf::from(self.expected_output),
            )
        } else {
            TestCase::new(self.name, self.input, self.expected_output)
        };
        if let Some(label) = self.label {
            case.set_label(label);
        }
        case.enabled = self.enabled;
        case
    }
}

impl StateFile {
    pub fn from_tree(tree: &ProblemTree) -> Self {
        Self {
            problems: tree
                .children(tree.root())
                .iter()
                .filter_map(|&id| node_record(tree, id))
                .collect(),
            grouping_method: tree.grouping,
        }
    }

    pub fn into_tree(self) -> anyhow::Result<ProblemTree> {
        let mut tree = ProblemTree::new();
        tree.grouping = self.grouping_method;
        let root = tree.root();
        for record in self.problems {
            insert_record(&mut tree, root, record)?;
        }
        Ok(tree)
    }
}

fn node_record(tree: &ProblemTree, id: NodeId) -> Option<NodeRecord> {
    let node = tree.node(id)?;
    let record = match node.kind() {
        NodeKind::Folder(folder) => NodeRecord {
            label: node.label().to_string(),
            group: None,
            url: None,
            folder: true,
            collapsed: folder.collapsed,
            children: Some(
                folder
                    .children()
                    .iter()
                    .filter_map(|&child| node_record(tree, child))
                    .collect(),
            ),
            cases: None,
        },
        NodeKind::Problem(problem) => NodeRecord {
            label: node.label().to_string(),
            group: problem.group.clone(),
            url: problem.url.clone(),
            folder: false,
            collapsed: false,
            children: None,
            cases: Some(problem.cases.iter().map(CaseRecord::from_case).collect()),
        },
    };
    Some(record)
}

fn insert_record(tree: &mut ProblemTree, parent: NodeId, record: NodeRecord) -> anyhow::Result<()> {
    if record.folder {
        let id = tree.add_folder(parent, record.label)?;
        if let Some(folder) = tree.folder_mut(id) {
            folder.collapsed = record.collapsed;
        }
        for child in record.children.unwrap_or_default() {
            insert_record(tree, id, child)?;
        }
    } else {
        let cases = record
            .cases
            .unwrap_or_default()
            .into_iter()
            .map(CaseRecord::into_case)
            .collect();
        let problem = Problem {
            group: record.group,
            url: record.url,
            cases: CaseList::from_cases(cases),
        };
        tree.add_problem(parent, record.label, problem)?;
    }
    Ok(())
}

pub fn state_path(workspace: &Path) -> PathBuf {
    workspace.join(STATE_FILE_NAME)
}

/// Reads the state file; a missing file is an empty tree
pub fn load(path: &Path) -> anyhow::Result<ProblemTree> {
    if !path.exists() {
        log::info!("No state file at {}, starting empty", path.display());
        return Ok(ProblemTree::new());
    }
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open state file {}", path.display()))?;
    let state: StateFile = serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("Failed to parse state file {}", path.display()))?;
    state.into_tree()
}

/// Writes the tree next to `path` first and renames it into place
pub fn save(tree: &ProblemTree, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&StateFile::from_tree(tree))?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("Failed to replace {}", path.display()))?;
    log::debug!("Saved state to {}", path.display());
    Ok(())
}

/// Moves oversized cases out of line, then saves the workspace state file
pub fn save_workspace(tree: &mut ProblemTree, settings: &Settings, workspace: &Path) -> anyhow::Result<()> {
    externalize_large_cases(
        tree,
        settings.external_case_threshold,
        &settings.cases_base(workspace),
    )?;
    save(tree, &state_path(workspace))
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model::CaseField;
    use crate::test_support::TestDir;

    fn sample_tree() -> ProblemTree {
        let mut tree = ProblemTree::new();
        tree.grouping = GroupingMethod::Group;
        let a = tree.ensure_problem("Round 1/A").unwrap();
        {
            let cases = &mut tree.problem_mut(a).unwrap().cases;
            cases.push(TestCase::new("Case 1", "1 2\n", "3\n"));
            let second = cases.push(TestCase::new("Case 2", "5 5\n", "10\n"));
            second.rename("equal operands");
            second.enabled = false;
        }
        let b = tree.ensure_problem("B").unwrap();
        tree.problem_mut(b).unwrap().url = Some("https://example.com/b".to_string());
        tree
    }

    #[test]
    fn test_state_file_shape() {
        let state = StateFile::from_tree(&sample_tree());
        let value = serde_json::to_value(&state).unwrap();
        assert_json_eq!(
            value,
            json!({
                "groupingMethod": "Group",
                "problems": [
                    {
                        "label": "Round 1",
                        "folder": true,
                        "collapsed": false,
                        "children": [
                            {
                                "label": "A",
                                "folder": false,
                                "collapsed": false,
                                "cases": [
                                    {
                                        "name": "Case 1",
                                        "enabled": true,
                                        "external": false,
                                        "input": "1 2\n",
                                        "expectedOutput": "3\n"
                                    },
                                    {
                                        "name": "Case 2",
                                        "label": "equal operands",
                                        "enabled": false,
                                        "external": false,
                                        "input": "5 5\n",
                                        "expectedOutput": "10\n"
                                    }
                                ]
                            }
                        ]
                    },
                    {
                        "label": "B",
                        "url": "https://example.com/b",
                        "folder": false,
                        "collapsed": false,
                        "cases": []
                    }
                ]
            })
        );
    }

    #[test]
    fn test_round_trip() {
        let dir = TestDir::new("persist-round-trip");
        let path = state_path(dir.path());
        let tree = sample_tree();
        save(&tree, &path).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(StateFile::from_tree(&loaded), StateFile::from_tree(&tree));
        let a = loaded.find_by_path("Round 1/A").unwrap();
        let case = loaded.problem(a).unwrap().cases.get("Case 2").unwrap();
        assert_eq!(case.label(), "equal operands");
        assert!(!case.enabled);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TestDir::new("persist-missing");
        let tree = load(&dir.path().join("nothing.json")).unwrap();
        assert!(tree.children(tree.root()).is_empty());
    }

    #[test]
    fn test_external_cases_keep_paths() {
        let dir = TestDir::new("persist-external");
        let mut settings = Settings::default();
        settings.external_case_threshold = 8;
        settings.cases_dir = "cases".to_string();

        let mut tree = ProblemTree::new();
        let id = tree.ensure_problem("P").unwrap();
        tree.problem_mut(id)
            .unwrap()
            .cases
            .push(TestCase::new("big", "0123456789", "ok\n"));
        save_workspace(&mut tree, &settings, dir.path()).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(state_path(dir.path())).unwrap()).unwrap();
        let record = &raw["problems"][0]["cases"][0];
        assert_eq!(record["external"], json!(true));
        let input_path = dir.path().join("cases").join("P").join("big.in");
        assert_eq!(record["input"], json!(input_path.to_string_lossy()));

        let loaded = load(&state_path(dir.path())).unwrap();
        let case = loaded.problem(loaded.find_by_path("P").unwrap()).unwrap().cases.get("big").unwrap();
        assert!(case.is_external());
        assert_eq!(case.input(), "0123456789");
        assert_eq!(case.input_field(), &CaseField::File(input_path));
    }

    #[test]
    fn test_legacy_records_default() {
        let state: StateFile = serde_json::from_value(json!({
            "problems": [{ "label": "X", "cases": [{ "name": "1", "input": "a", "expectedOutput": "b" }] }]
        }))
        .unwrap();
        let tree = state.into_tree().unwrap();
        assert_eq!(tree.grouping, GroupingMethod::None);
        let case = tree.problem(tree.find_by_path("X").unwrap()).unwrap().cases.get("1").unwrap();
        assert!(case.enabled);
        assert_eq!(case.expected_output(), "b");
    }
}
