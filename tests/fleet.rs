//! Several workers sharing one live coordinator

use std::sync::Arc;
use std::time::Duration;

use testfleet::coordinator::{Coordinator, CoordinatorClient};
use testfleet::host::{LocalRunSummary, PlanExecutor, TestPlan};
use testfleet::models::{ExecutionId, Granularity, OwnerId};
use testfleet::registry::{Backend, BackendTarget, DEFAULT_TTL};
use testfleet::results::aggregate_all;
use testfleet::worker::WorkerAgent;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const PLAN: &str = r#"
suites:
  - title: Checkout
    tests:
      - title: pays by card
        run: "true"
      - title: rejects expired card
        run: "exit 3"
      - title: applies coupon
        run: "true"
  - title: Search
    suites:
      - title: Filters
        tests:
          - title: by price
            run: "true"
          - title: by brand
            run: "true"
  - title: "[serial:db] Migrations"
    tests:
      - title: up
        run: "true"
      - title: down
        run: "true"
"#;

type ServerHandle = tokio::task::JoinHandle<anyhow::Result<()>>;

async fn start_coordinator() -> (String, oneshot::Sender<()>, ServerHandle) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let coordinator = Coordinator::in_memory(ExecutionId::new("default"), DEFAULT_TTL);
    let server = tokio::spawn(coordinator.serve(listener, async move {
        let _ = stop_rx.await;
    }));
    (addr, stop_tx, server)
}

async fn run_fleet(
    addr: &str,
    execution: &str,
    granularity: Granularity,
    workers: usize,
) -> Vec<LocalRunSummary> {
    let tests = TestPlan::from_yaml(PLAN).unwrap().collect().unwrap();

    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let backend = Backend::connect(
                BackendTarget::Coordinator(addr.to_string()),
                Duration::from_secs(5),
            )
            .unwrap();
            let agent = WorkerAgent::new(
                &backend,
                ExecutionId::new(execution),
                OwnerId::new(format!("worker-{i}")),
            )
            .with_granularity(granularity);
            let executor = PlanExecutor::new(Arc::new(agent), granularity).with_jobs(3);
            let tests = tests.clone();
            tokio::spawn(async move { executor.run(tests).await })
        })
        .collect();

    let mut summaries = Vec::new();
    for handle in handles {
        summaries.push(handle.await.unwrap());
    }
    summaries
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_test_runs_exactly_once() {
    let (addr, stop, server) = start_coordinator().await;

    let summaries = run_fleet(&addr, "build-1", Granularity::Test, 3).await;

    let executed: usize = summaries.iter().map(|s| s.executed().count()).sum();
    let skipped: usize = summaries.iter().map(|s| s.skipped()).sum();
    assert_eq!(executed, 7);
    assert_eq!(skipped, 7 * 2);
    assert!(summaries.iter().all(|s| s.not_run() == 0));

    let mut paths: Vec<String> = summaries
        .iter()
        .flat_map(|s| s.executed().map(|r| r.joined_path()))
        .collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), executed);

    let client = CoordinatorClient::new(&addr, Duration::from_secs(5)).unwrap();
    let reports = client.reports(Some(&ExecutionId::new("build-1"))).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].passed_count, 6);
    assert_eq!(reports[0].failed_count, 1);
    assert_eq!(reports[0].results.len(), 7);
    assert!(reports[0].results.iter().all(|r| r.runner.is_some()));

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_serial_group_runs_on_one_worker() {
    let (addr, stop, server) = start_coordinator().await;

    let summaries = run_fleet(&addr, "build-2", Granularity::Test, 2).await;

    let owners: Vec<usize> = summaries
        .iter()
        .enumerate()
        .filter(|(_, s)| {
            s.executed()
                .any(|r| r.path.first().map(String::as_str) == Some("[serial:db] Migrations"))
        })
        .map(|(i, _)| i)
        .collect();
    assert_eq!(owners.len(), 1);

    let migrations = summaries[owners[0]]
        .executed()
        .filter(|r| r.path[0] == "[serial:db] Migrations")
        .count();
    assert_eq!(migrations, 2);

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_suite_granularity_and_execution_scoping() {
    let (addr, stop, server) = start_coordinator().await;

    let first = run_fleet(&addr, "build-3", Granularity::Suite, 2).await;
    let second = run_fleet(&addr, "build-4", Granularity::Suite, 1).await;

    for summary in &first {
        let suites: Vec<&str> = summary
            .executed()
            .map(|r| r.path[0].as_str())
            .collect();
        for suite in ["Checkout", "Search"] {
            let ran = suites.iter().filter(|s| **s == suite).count();
            assert!(ran == 0 || ran == if suite == "Checkout" { 3 } else { 2 });
        }
    }
    let executed: usize = first.iter().map(|s| s.executed().count()).sum();
    assert_eq!(executed, 7);

    // A new execution id starts from an empty registry view
    assert_eq!(second[0].executed().count(), 7);

    let client = CoordinatorClient::new(&addr, Duration::from_secs(5)).unwrap();
    let stored = client.reports(None).await.unwrap();
    assert_eq!(stored.len(), 2);

    let reports = aggregate_all(
        stored
            .into_iter()
            .map(|r| (r.execution_id, r.results))
            .collect(),
    );
    assert!(reports.iter().all(|r| r.total() == 7));

    stop.send(()).unwrap();
    server.await.unwrap().unwrap();
}
