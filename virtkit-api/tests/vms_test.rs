// Integration tests for the VM endpoints, backed by the in-memory
// hypervisor and datastore doubles.

use std::sync::Arc;

use axum_test::TestServer;
use serde_json::{json, Value};

use virtkit_api::app::AppState;
use virtkit_api::routes::create_router;
use virtkit_hypervisor::mock::MockHypervisor;
use virtkit_hypervisor::xml::build_domain_xml;
use virtkit_manager::mock::{MemoryDatastore, StubStager};
use virtkit_manager::{Datastore, VmManager, VmManagerConfig};

struct TestEnv {
    server: TestServer,
    hypervisor: Arc<MockHypervisor>,
    store: Arc<MemoryDatastore>,
}

fn test_env() -> TestEnv {
    test_env_with_stager(Arc::new(StubStager::new()))
}

fn test_env_with_stager(stager: Arc<StubStager>) -> TestEnv {
    let hypervisor = Arc::new(MockHypervisor::new());
    let store = Arc::new(MemoryDatastore::new());
    let manager = Arc::new(VmManager::new(
        hypervisor.clone(),
        stager,
        VmManagerConfig::default(),
    ));
    let state = AppState::new(manager, store.clone());
    let server = TestServer::new(create_router(state)).unwrap();
    TestEnv {
        server,
        hypervisor,
        store,
    }
}

fn seed_domain(hypervisor: &MockHypervisor, name: &str) -> i32 {
    let xml = build_domain_xml(name, 2048, 1, "/images/d.img", "/images/d.iso", "default");
    hypervisor.add_domain(name, &xml, 1).id
}

#[tokio::test]
async fn test_ping() {
    let env = test_env();
    let response = env.server.get("/ping").await;

    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["message"], "pong");
}

#[tokio::test]
async fn test_list_vms() {
    let env = test_env();
    seed_domain(&env.hypervisor, "web-1");
    seed_domain(&env.hypervisor, "web-2");

    let response = env.server.get("/vms").await;

    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    let vms = body["data"]["vms"].as_array().unwrap();
    assert_eq!(vms.len(), 2);
    assert_eq!(vms[0]["name"], "web-1");
    assert_eq!(vms[0]["state"], "running");
    assert_eq!(vms[0]["mac"], "pending");
}

#[tokio::test]
async fn test_get_vm() {
    let env = test_env();
    let id = seed_domain(&env.hypervisor, "web-1");

    let response = env.server.get(&format!("/vms/{id}")).await;

    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["data"]["vm"]["name"], "web-1");
    assert_eq!(body["data"]["vm"]["domain_id"], id);
}

#[tokio::test]
async fn test_get_unknown_vm_is_404() {
    let env = test_env();

    let response = env.server.get("/vms/42").await;

    assert_eq!(response.status_code(), 404);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("42"));
}

#[tokio::test]
async fn test_create_vm() {
    let env = test_env();

    let response = env
        .server
        .post("/vms")
        .json(&json!({ "machine_type": "ubuntu-noble", "memory_gib": 4, "vcpus": 2 }))
        .await;

    assert_eq!(response.status_code(), 201);
    let body: Value = response.json();
    let vm = &body["data"]["vm"];
    assert!(vm["name"].as_str().unwrap().starts_with("ubuntu-noble-"));
    assert_eq!(vm["memory_mib"], 4096);
    assert_eq!(vm["vcpus"], 2);

    // The datastore registered the VM under a surrogate id.
    let registered = env.store.registered_vms();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].0, body["data"]["id"].as_i64().unwrap());
    assert_eq!(registered[0].1, vm["name"].as_str().unwrap());
}

#[tokio::test]
async fn test_create_vm_defaults_shape() {
    let env = test_env();

    let response = env
        .server
        .post("/vms")
        .json(&json!({ "machine_type": "ubuntu-noble" }))
        .await;

    assert_eq!(response.status_code(), 201);
    let body: Value = response.json();
    assert_eq!(body["data"]["vm"]["memory_mib"], 2048);
    assert_eq!(body["data"]["vm"]["vcpus"], 1);
}

#[tokio::test]
async fn test_create_vm_staging_failure_is_400() {
    let env = test_env_with_stager(Arc::new(StubStager::failing()));

    let response = env
        .server
        .post("/vms")
        .json(&json!({ "machine_type": "ubuntu-noble" }))
        .await;

    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("image host"));
    assert!(env.hypervisor.created_domains().is_empty());
    assert!(env.store.registered_vms().is_empty());
}

#[tokio::test]
async fn test_vm_memory_history() {
    let env = test_env();
    let id = seed_domain(&env.hypervisor, "web-1");
    env.store.create_vm("web-1", id).await.unwrap();
    env.store.record_usage(id, 10.3).await.unwrap();
    env.store.record_usage(id, 11.8).await.unwrap();

    let response = env.server.get(&format!("/vms/{id}/memory")).await;

    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    let usage = body["data"]["usage"].as_array().unwrap();
    assert_eq!(usage.len(), 2);
    // Newest first.
    assert_eq!(usage[0]["usage"], 11.8);
    assert_eq!(usage[1]["usage"], 10.3);
}

#[tokio::test]
async fn test_vm_memory_returns_at_most_twelve_samples() {
    let env = test_env();
    let id = seed_domain(&env.hypervisor, "web-1");
    env.store.create_vm("web-1", id).await.unwrap();
    for i in 0..13 {
        env.store.record_usage(id, f64::from(i)).await.unwrap();
    }

    let response = env.server.get(&format!("/vms/{id}/memory")).await;

    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    let usage = body["data"]["usage"].as_array().unwrap();
    assert_eq!(usage.len(), 12);
    // Newest first; the oldest sample falls off.
    assert_eq!(usage[0]["usage"], 12.0);
    assert_eq!(usage[11]["usage"], 1.0);
}

#[tokio::test]
async fn test_serve_drains_after_shutdown_resolves() {
    let hypervisor = Arc::new(MockHypervisor::new());
    let store = Arc::new(MemoryDatastore::new());
    let manager = Arc::new(VmManager::new(
        hypervisor,
        Arc::new(StubStager::new()),
        VmManagerConfig::default(),
    ));
    let router = create_router(AppState::new(manager, store));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(virtkit_api::app::serve(listener, router, async {
        let _ = shutdown_rx.await;
    }));

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(std::time::Duration::from_secs(5), server)
        .await
        .expect("server did not stop after shutdown resolved")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_vm_memory_for_unregistered_domain_is_404() {
    let env = test_env();
    let id = seed_domain(&env.hypervisor, "web-1");

    let response = env.server.get(&format!("/vms/{id}/memory")).await;

    assert_eq!(response.status_code(), 404);
}
