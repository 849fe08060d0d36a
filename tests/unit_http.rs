//! Unit tests for the HTTP task boundary
//!
//! Exercises the task and status endpoints over real sockets and the
//! leader-side dispatcher's join semantics.

use std::net::SocketAddr;

use flock_core::error::FlockError;
use flock_core::http::{TaskDispatcher, TaskServer};

async fn start_server() -> (TaskServer, SocketAddr) {
    let server = TaskServer::new(([127, 0, 0, 1], 0).into());
    let addr = server.start().await.unwrap();
    (server, addr)
}

#[tokio::test]
async fn test_status_endpoint_reports_liveness() {
    let (_server, addr) = start_server().await;
    let body = reqwest::get(format!("http://{}/status", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "Server is alive");
}

#[tokio::test]
async fn test_task_endpoint_multiplies() {
    let (_server, addr) = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/task", addr))
        .body("3,4,5")
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());
    assert_eq!(
        response.text().await.unwrap(),
        "Result of multiplication is 60\n"
    );
}

#[tokio::test]
async fn test_task_endpoint_handles_arbitrary_precision() {
    let (_server, addr) = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/task", addr))
        .body("99999999999999999999,88888888888888888888")
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.text().await.unwrap(),
        "Result of multiplication is 8888888888888888888711111111111111111112\n"
    );
}

#[tokio::test]
async fn test_task_endpoint_rejects_malformed_input() {
    let (_server, addr) = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/task", addr))
        .body("12,potato")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 500);
}

#[tokio::test]
async fn test_debug_header_reports_latency() {
    let (_server, addr) = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/task", addr))
        .header("X-Debug", "true")
        .body("6,7")
        .send()
        .await
        .unwrap();
    let timing = response
        .headers()
        .get("X-Debug-Info")
        .expect("debug header must be present")
        .to_str()
        .unwrap()
        .to_string();
    assert!(timing.starts_with("Operation took "));
    assert!(timing.ends_with(" ns"));
    assert_eq!(
        response.text().await.unwrap(),
        "Result of multiplication is 42\n"
    );
}

#[tokio::test]
async fn test_test_header_short_circuits() {
    let (_server, addr) = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/task", addr))
        .header("X-Test", "true")
        .body("anything")
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "Test passed 123\n");
}

#[tokio::test]
async fn test_double_start_is_caller_error() {
    let (server, _addr) = start_server().await;
    let err = server.start().await.unwrap_err();
    assert!(matches!(err, FlockError::EndpointAlreadyRunning { .. }));
    assert!(err.is_caller_error());
}

#[tokio::test]
async fn test_dispatch_joins_results_in_order() {
    let (_first, first_addr) = start_server().await;
    let (_second, second_addr) = start_server().await;

    let dispatcher = TaskDispatcher::new();
    let addresses = vec![
        format!("http://{}", first_addr),
        format!("http://{}", second_addr),
    ];
    let tasks = vec!["2,3".to_string(), "4,5".to_string()];

    let results = dispatcher.dispatch(&addresses, &tasks).await.unwrap();
    assert_eq!(
        results,
        vec![
            "Result of multiplication is 6\n",
            "Result of multiplication is 20\n"
        ]
    );
}

#[tokio::test]
async fn test_dispatch_aborts_on_first_failure() {
    let (_server, addr) = start_server().await;

    let dispatcher = TaskDispatcher::new();
    let addresses = vec![
        format!("http://{}", addr),
        // Nothing listens here; the join must abort.
        "http://127.0.0.1:9".to_string(),
    ];
    let tasks = vec!["2,3".to_string(), "4,5".to_string()];

    let err = dispatcher.dispatch(&addresses, &tasks).await.unwrap_err();
    assert!(matches!(err, FlockError::DispatchFailed { .. }));
    assert!(err.is_retryable());
}
