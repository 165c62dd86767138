use std::sync::Arc;

use actix_web::{App, test, web};
use assert_json_diff::assert_json_include;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::json;

use mirai::model::{GroupingMethod, ProblemTree, TestCase};
use mirai::web_server::configure;

#[actix_web::test]
async fn test_post_problem_creates_cases() {
    let mut tree = ProblemTree::new();
    tree.grouping = GroupingMethod::Group;
    let tree = Arc::new(Mutex::new(tree));
    let app = test::init_service(App::new().configure(configure(web::Data::from(tree.clone())))).await;

    let request_body = json!({
        "name": "A. Two Sums",
        "group": "Codeforces Round 1",
        "url": "https://codeforces.com/contest/1/problem/A",
        "interactive": false,
        "memoryLimit": 256,
        "timeLimit": 1000,
        "tests": [
            { "input": "1 2\n", "output": "3\n" },
            { "input": "5 5\n", "output": "10\n" }
        ]
    });
    let req = test::TestRequest::post()
        .uri("/")
        .set_json(&request_body)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);

    let response_body: serde_json::Value = test::read_body_json(resp).await;
    assert_json_include!(
        actual: response_body,
        expected: json!({ "path": ["Codeforces Round 1", "A. Two Sums"], "cases": 2 })
    );

    let tree = tree.lock();
    let id = tree.find_by_path("Codeforces Round 1/A. Two Sums").unwrap();
    let problem = tree.problem(id).unwrap();
    assert_eq!(problem.url.as_deref(), Some("https://codeforces.com/contest/1/problem/A"));
    let names: Vec<&str> = problem.cases.iter().map(TestCase::name).collect();
    assert_eq!(names, vec!["Case 1", "Case 2"]);
    assert_eq!(problem.cases.get("Case 2").unwrap().input(), "5 5\n");
}

#[actix_web::test]
async fn test_malformed_payload_rejected() {
    let tree = Arc::new(Mutex::new(ProblemTree::new()));
    let app = test::init_service(App::new().configure(configure(web::Data::from(tree.clone())))).await;

    let req = test::TestRequest::post()
        .uri("/")
        .set_json(json!({ "tests": "not a list" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);

    let response_body: serde_json::Value = test::read_body_json(resp).await;
    assert_eq!(response_body, json!({ "reason": "ERR_INVALID_ARGUMENT", "code": 1 }));
    assert!(tree.lock().problem_ids().is_empty());
}
