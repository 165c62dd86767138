use std::cmp::Ordering;

use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};

use super::case::CaseList;

/// Handle of a node inside a `ProblemTree`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// How problems pushed by the listener are filed
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupingMethod {
    /// Everything at the root
    #[default]
    None,
    /// One folder per contest group
    Group,
}

#[derive(Debug, Clone, Default)]
pub struct Problem {
    pub group: Option<String>,
    pub url: Option<String>,
    pub cases: CaseList,
}

#[derive(Debug, Clone, Default)]
pub struct Folder {
    pub collapsed: bool,
    children: Vec<NodeId>,
}

impl Folder {
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Problem(Problem),
    Folder(Folder),
}

#[derive(Debug, Clone)]
pub struct Node {
    label: String,
    /// Back-reference for path reconstruction, `None` only for the root
    parent: Option<NodeId>,
    kind: NodeKind,
}

impl Node {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder(_))
    }
}

/// Folders and problems in an arena; removed slots stay empty
#[derive(Debug, Clone)]
pub struct ProblemTree {
    nodes: Vec<Option<Node>>,
    root: NodeId,
    pub grouping: GroupingMethod,
}

impl Default for ProblemTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ProblemTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(Node {
                label: String::new(),
                parent: None,
                kind: NodeKind::Folder(Folder::default()),
            })],
            root: NodeId(0),
            grouping: GroupingMethod::default(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn label(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(Node::label)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.node(id).map(Node::kind) {
            Some(NodeKind::Folder(folder)) => &folder.children,
            _ => &[],
        }
    }

    pub fn problem(&self, id: NodeId) -> Option<&Problem> {
        match self.node(id)?.kind() {
            NodeKind::Problem(problem) => Some(problem),
            NodeKind::Folder(_) => None,
        }
    }

    pub fn problem_mut(&mut self, id: NodeId) -> Option<&mut Problem> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Problem(problem) => Some(problem),
            NodeKind::Folder(_) => None,
        }
    }

    pub fn folder_mut(&mut self, id: NodeId) -> Option<&mut Folder> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Folder(folder) => Some(folder),
            NodeKind::Problem(_) => None,
        }
    }

    /// Adds a node under `parent` and re-sorts the parent's children
    pub fn push(&mut self, parent: NodeId, label: impl Into<String>, kind: NodeKind) -> anyhow::Result<NodeId> {
        if self.folder_mut(parent).is_none() {
            bail!("Node {parent:?} is not a folder");
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Some(Node {
            label: label.into(),
            parent: Some(parent),
            kind,
        }));
        if let Some(folder) = self.folder_mut(parent) {
            folder.children.push(id);
        }
        self.sort_children(parent);
        Ok(id)
    }

    pub fn add_problem(&mut self, parent: NodeId, label: impl Into<String>, problem: Problem) -> anyhow::Result<NodeId> {
        self.push(parent, label, NodeKind::Problem(problem))
    }

    pub fn add_folder(&mut self, parent: NodeId, label: impl Into<String>) -> anyhow::Result<NodeId> {
        self.push(parent, label, NodeKind::Folder(Folder::default()))
    }

    /// The child folder called `label`, created if missing
    pub fn folder_or_create(&mut self, parent: NodeId, label: &str) -> anyhow::Result<NodeId> {
        let existing = self.children(parent).iter().copied().find(|&child| {
            self.node(child)
                .is_some_and(|node| node.is_folder() && node.label == label)
        });
        match existing {
            Some(id) => Ok(id),
            None => self.add_folder(parent, label),
        }
    }

    /// Folders first, then problems, each group ordered by label
    fn sort_children(&mut self, parent: NodeId) {
        let Some(folder) = self.folder_mut(parent) else {
            return;
        };
        let mut children = std::mem::take(&mut folder.children);
        children.sort_by(|&a, &b| self.compare_nodes(a, b));
        if let Some(folder) = self.folder_mut(parent) {
            folder.children = children;
        }
    }

    fn compare_nodes(&self, a: NodeId, b: NodeId) -> Ordering {
        match (self.node(a), self.node(b)) {
            (Some(a), Some(b)) => b
                .is_folder()
                .cmp(&a.is_folder())
                .then_with(|| a.label.cmp(&b.label)),
            _ => Ordering::Equal,
        }
    }

    pub fn rename(&mut self, id: NodeId, label: impl Into<String>) -> anyhow::Result<()> {
        let node = self
            .node_mut(id)
            .ok_or_else(|| anyhow!("Node {id:?} does not exist"))?;
        node.label = label.into();
        if let Some(parent) = node.parent {
            self.sort_children(parent);
        }
        Ok(())
    }

    /// Removes a node together with its subtree; the root cannot be removed
    pub fn remove(&mut self, id: NodeId) -> anyhow::Result<()> {
        if id == self.root {
            bail!("The root folder cannot be removed");
        }
        let parent = self
            .node(id)
            .ok_or_else(|| anyhow!("Node {id:?} does not exist"))?
            .parent;
        if let Some(folder) = parent.and_then(|p| self.folder_mut(p)) {
            folder.children.retain(|&child| child != id);
        }

        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            stack.extend_from_slice(self.children(next));
            if let Some(slot) = self.nodes.get_mut(next.0) {
                *slot = None;
            }
        }
        Ok(())
    }

    /// Labels from the root (excluded) down to `id`
    pub fn path_of(&self, id: NodeId) -> Vec<String> {
        let mut labels = Vec::new();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(node) = self.node(current) else {
                break;
            };
            if current != self.root {
                labels.push(node.label.clone());
            }
            cursor = node.parent;
        }
        labels.reverse();
        labels
    }

    /// Resolves a `/`-separated label path, e.g. `"CF Round 1/A"`
    pub fn find_by_path(&self, path: &str) -> Option<NodeId> {
        path.split('/')
            .filter(|segment| !segment.is_empty())
            .try_fold(self.root, |current, segment| {
                self.children(current)
                    .iter()
                    .copied()
                    .find(|&child| self.label(child) == Some(segment))
            })
    }

    /// The problem at `path`, creating missing folders and the problem itself
    pub fn ensure_problem(&mut self, path: &str) -> anyhow::Result<NodeId> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let Some((problem_label, folders)) = segments.split_last() else {
            bail!("Empty problem path");
        };
        let mut parent = self.root;
        for folder in folders {
            parent = self.folder_or_create(parent, folder)?;
        }
        let existing = self
            .children(parent)
            .iter()
            .copied()
            .find(|&child| self.label(child) == Some(*problem_label));
        match existing {
            Some(id) if self.problem(id).is_some() => Ok(id),
            Some(_) => bail!("`{path}` is a folder, not a problem"),
            None => self.add_problem(parent, *problem_label, Problem::default()),
        }
    }

    /// Every problem, depth-first in display order
    pub fn problem_ids(&self) -> Vec<NodeId> {
        let mut ids = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            match self.node(id).map(Node::kind) {
                Some(NodeKind::Problem(_)) => ids.push(id),
                Some(NodeKind::Folder(folder)) => stack.extend(folder.children.iter().rev()),
                None => {}
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TestCase;

    fn labels(tree: &ProblemTree, id: NodeId) -> Vec<&str> {
        tree.children(id)
            .iter()
            .map(|&child| tree.label(child).unwrap())
            .collect()
    }

    #[test]
    fn test_push_sorts_folders_first() {
        let mut tree = ProblemTree::new();
        let root = tree.root();
        tree.add_problem(root, "b", Problem::default()).unwrap();
        tree.add_folder(root, "z-folder").unwrap();
        tree.add_problem(root, "a", Problem::default()).unwrap();
        tree.add_folder(root, "c-folder").unwrap();
        assert_eq!(labels(&tree, root), vec!["c-folder", "z-folder", "a", "b"]);

        let a = tree.find_by_path("a").unwrap();
        tree.rename(a, "zz").unwrap();
        assert_eq!(labels(&tree, root), vec!["c-folder", "z-folder", "b", "zz"]);
    }

    #[test]
    fn test_push_into_problem_fails() {
        let mut tree = ProblemTree::new();
        let p = tree.add_problem(tree.root(), "p", Problem::default()).unwrap();
        assert!(tree.add_folder(p, "nope").is_err());
    }

    #[test]
    fn test_paths() {
        let mut tree = ProblemTree::new();
        let p = tree.ensure_problem("Contest/Div 2/A").unwrap();
        assert_eq!(tree.path_of(p), vec!["Contest", "Div 2", "A"]);
        assert_eq!(tree.find_by_path("Contest/Div 2/A"), Some(p));
        assert_eq!(tree.ensure_problem("Contest/Div 2/A").unwrap(), p);
        assert!(tree.ensure_problem("Contest/Div 2").is_err());
        assert!(tree.find_by_path("Contest/B").is_none());

        let folder = tree.find_by_path("Contest").unwrap();
        assert_eq!(tree.node(p).unwrap().parent(), tree.find_by_path("Contest/Div 2"));
        assert_eq!(tree.path_of(folder), vec!["Contest"]);
    }

    #[test]
    fn test_remove_subtree() {
        let mut tree = ProblemTree::new();
        let p = tree.ensure_problem("F/P").unwrap();
        let folder = tree.find_by_path("F").unwrap();
        tree.problem_mut(p)
            .unwrap()
            .cases
            .push(TestCase::new("1", "", ""));

        tree.remove(folder).unwrap();
        assert!(tree.node(p).is_none());
        assert!(tree.children(tree.root()).is_empty());
        assert!(tree.remove(tree.root()).is_err());
        assert!(tree.problem_ids().is_empty());
    }

    #[test]
    fn test_problem_ids_in_display_order() {
        let mut tree = ProblemTree::new();
        let b = tree.ensure_problem("b").unwrap();
        let inner = tree.ensure_problem("x/inner").unwrap();
        let a = tree.ensure_problem("a").unwrap();
        assert_eq!(tree.problem_ids(), vec![inner, a, b]);
    }
}
