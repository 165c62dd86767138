mod case;
mod import;
mod problem;

pub use case::{CaseField, CaseList, TestCase, Verdict};
pub use import::{
    ANSWER_EXTENSIONS, INPUT_EXTENSION, externalize_large_cases, find_answer_file, import_cases,
};
pub use problem::{Folder, GroupingMethod, Node, NodeId, NodeKind, Problem, ProblemTree};
