use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{HttpRequest, HttpResponse, Responder, post, web};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::model::{CaseList, GroupingMethod, NodeId, Problem, ProblemTree, TestCase};

/// Problem as pushed by the Competitive Companion browser extension
#[derive(Deserialize, Debug, Clone)]
pub struct ProblemPayload {
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub tests: Vec<TestPayload>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct TestPayload {
    pub input: String,
    pub output: String,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct IngestResponse {
    pub path: Vec<String>,
    pub cases: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    reason: &'static str,
    code: u32,
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    log::warn!("Rejected problem payload: {err}");
    let response = HttpResponse::BadRequest().json(ErrorResponse {
        reason: "ERR_INVALID_ARGUMENT",
        code: 1,
    });
    InternalError::from_response(err, response).into()
}

/// Files a pushed problem into the tree as a new problem.
///
/// With `GroupingMethod::Group` the problem goes into a folder named after its
/// group. A label already taken in that folder gets a ` (N)` suffix, so
/// earlier pushes and the user's edits to them stay intact.
pub fn ingest(tree: &mut ProblemTree, payload: ProblemPayload) -> anyhow::Result<NodeId> {
    let root = tree.root();
    let parent = match (tree.grouping, payload.group.as_deref()) {
        (GroupingMethod::Group, Some(group)) if !group.trim().is_empty() => {
            tree.folder_or_create(root, group.trim())?
        }
        _ => root,
    };

    let cases: Vec<TestCase> = payload
        .tests
        .into_iter()
        .enumerate()
        .map(|(i, test)| TestCase::new(format!("Case {}", i + 1), test.input, test.output))
        .collect();

    let label = free_label(tree, parent, &payload.name);
    if label != payload.name {
        log::info!("Problem `{}` already present, adding as `{label}`", payload.name);
    }
    tree.add_problem(
        parent,
        label,
        Problem {
            group: payload.group,
            url: payload.url,
            cases: CaseList::from_cases(cases),
        },
    )
}

fn free_label(tree: &ProblemTree, parent: NodeId, name: &str) -> String {
    let taken = |label: &str| {
        tree.children(parent)
            .iter()
            .any(|&id| tree.label(id) == Some(label))
    };
    if !taken(name) {
        return name.to_string();
    }
    (2..)
        .map(|n| format!("{name} ({n})"))
        .find(|label| !taken(label.as_str()))
        .unwrap_or_else(|| name.to_string())
}

#[post("/")]
pub async fn post_problem_handler(
    tree: web::Data<Mutex<ProblemTree>>,
    body: web::Json<ProblemPayload>,
) -> impl Responder {
    let payload = body.into_inner();
    let name = payload.name.clone();
    let mut tree = tree.lock();
    match ingest(&mut tree, payload) {
        Ok(id) => {
            let response = IngestResponse {
                path: tree.path_of(id),
                cases: tree.problem(id).map_or(0, |p| p.cases.len()),
            };
            log::info!("Received problem `{name}` with {} cases", response.cases);
            HttpResponse::Ok().json(response)
        }
        Err(e) => {
            log::error!("Failed to add problem `{name}`: {e:#}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_INTERNAL",
                code: 6,
            })
        }
    }
}
