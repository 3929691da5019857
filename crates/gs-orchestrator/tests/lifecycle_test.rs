//! Lifecycle integration tests
//!
//! Drives create, provision and runtime operations against fake backends.

mod common;

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::atomic::Ordering;

use gs_core::error::{InstallError, LifecycleError, RemoteError};
use gs_core::traits::WorkloadStore;
use gs_core::types::{Flavor, LiveStatus, WorkloadStatus};
use gs_orchestrator::store::MemoryStore;
use gs_orchestrator::CreateRequest;

use common::{command_failed, output, unreachable, workload, FakeHypervisor, Harness};

fn request(name: &str) -> CreateRequest {
    CreateRequest {
        name: name.to_string(),
        flavor: Some(Flavor::Paper),
        game_version: Some("1.20.1".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_commits_record_and_container() {
    let h = Harness::new();

    let w = h.state.lifecycle.create(request("survival")).await.unwrap();

    assert_eq!(w.status, WorkloadStatus::Creating);
    assert_eq!(w.container_id, 500);
    assert_eq!(w.address, Ipv4Addr::new(172, 16, 0, 10));
    assert_eq!(w.node, "pve1");
    assert!(w.hostname.starts_with("PGSM-MCJAV-"));

    let created = h.hypervisor.created.lock().unwrap().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].id, 500);
    assert_eq!(created[0].prefix_len, 24);
    assert_eq!(created[0].gateway, Ipv4Addr::new(172, 16, 0, 1));
    assert_eq!(created[0].public_key, common::PUBLIC_KEY);

    let stored = h.store.get(&w.id).await.unwrap().unwrap();
    assert_eq!(stored, w);
}

#[tokio::test]
async fn test_create_hypervisor_failure_marks_error() {
    let h = Harness::new();
    h.hypervisor.fail_create.store(true, Ordering::SeqCst);

    let err = h.state.lifecycle.create(request("broken")).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Hypervisor(_)));

    let records = h.store.list().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, WorkloadStatus::Error);
}

#[tokio::test]
async fn test_create_rejects_offline_node_and_bad_settings() {
    let h = Harness::new();

    let mut req = request("x");
    req.node = Some("pve9".to_string());
    assert!(matches!(
        h.state.lifecycle.create(req).await,
        Err(LifecycleError::InvalidRequest(_))
    ));

    let mut req = request("x");
    req.settings = BTreeMap::from([("server-port".to_string(), "1".to_string())]);
    assert!(matches!(
        h.state.lifecycle.create(req).await,
        Err(LifecycleError::InvalidRequest(_))
    ));

    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_provision_success_runs_every_step_in_order() {
    let h = Harness::new();
    let lifecycle = &h.state.lifecycle;
    let w = lifecycle.create(request("survival")).await.unwrap();

    lifecycle.spawn_provision(w.id).await.unwrap().unwrap();

    let commands = h.remote.commands();
    assert_eq!(commands[0], "echo ready");
    assert_eq!(
        commands[1],
        "bash '/tmp/pgsm_install.sh' serverfilelink='https://example.invalid/paper/1.20.1/server.jar' type=paper java=17"
    );
    assert_eq!(commands[2], "systemctl start 'PGSM'");
    assert_eq!(commands.len(), 3);

    assert_eq!(
        h.remote.uploads.lock().unwrap().clone(),
        vec![("/tmp/pgsm_install.sh".to_string(), 0o755)]
    );
    let properties = h.remote.written("/PGSM/server.properties").unwrap();
    assert!(properties.starts_with("server-port=25565\n"));

    let route = std::fs::read_to_string(h.route_file(500)).unwrap();
    assert!(route.contains("172.16.0.10:25565"));
    assert_eq!(h.reloader.reloads.load(Ordering::SeqCst), 1);

    assert_eq!(lifecycle.workload(&w.id).await.unwrap().status, WorkloadStatus::Running);
}

#[tokio::test]
async fn test_install_failure_stops_pipeline() {
    let h = Harness::new();
    let lifecycle = &h.state.lifecycle;
    h.remote
        .fail_when("bash ", command_failed("", "E: Unable to locate package openjdk"));
    let w = lifecycle.create(request("survival")).await.unwrap();

    let err = lifecycle.provision(&w.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::InstallFailed(InstallError::Remote(RemoteError::CommandFailed { .. }))));

    assert_eq!(lifecycle.workload(&w.id).await.unwrap().status, WorkloadStatus::Error);
    assert!(h.remote.writes.lock().unwrap().is_empty());
    assert_eq!(h.remote.count("systemctl"), 0);
    assert!(!h.route_file(500).exists());
    assert_eq!(h.reloader.reloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_create_refuses_flavor_without_artifact() {
    let h = Harness::new();

    let mut req = request("island");
    req.flavor = Some(Flavor::Bedrock);
    req.game_version = None;
    let err = h.state.lifecycle.create(req).await.unwrap_err();

    assert!(matches!(err, LifecycleError::InvalidRequest(_)));
    assert!(h.hypervisor.created.lock().unwrap().is_empty());
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_artifact_lookup_failure_is_install_failure() {
    let h = Harness::new();
    let lifecycle = &h.state.lifecycle;
    let w = lifecycle.create(request("survival")).await.unwrap();
    h.artifacts.unavailable.store(true, Ordering::SeqCst);

    let err = lifecycle.provision(&w.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::InstallFailed(InstallError::Artifact(_))));

    assert_eq!(lifecycle.workload(&w.id).await.unwrap().status, WorkloadStatus::Error);
    assert_eq!(h.remote.count("bash "), 0);
    assert!(h.remote.writes.lock().unwrap().is_empty());
    assert_eq!(h.remote.count("systemctl"), 0);
    assert!(!h.route_file(500).exists());
}

#[tokio::test]
async fn test_boot_wait_gives_up_after_exact_attempts() {
    let h = Harness::new();
    let lifecycle = &h.state.lifecycle;
    let w = lifecycle.create(request("survival")).await.unwrap();
    h.remote.fail_when("echo ready", unreachable(w.address));

    let err = lifecycle.provision(&w.id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::BootTimeout { attempts: 3, .. }));

    assert_eq!(h.remote.count("echo ready"), 3);
    assert!(h.remote.uploads.lock().unwrap().is_empty());
    assert_eq!(lifecycle.workload(&w.id).await.unwrap().status, WorkloadStatus::Error);
}

#[tokio::test]
async fn test_service_start_failure_leaves_stopped() {
    let h = Harness::new();
    let lifecycle = &h.state.lifecycle;
    h.remote
        .fail_when("systemctl start", command_failed("", "Job for PGSM.service failed"));
    let w = lifecycle.create(request("survival")).await.unwrap();

    lifecycle.provision(&w.id).await.unwrap();

    assert_eq!(lifecycle.workload(&w.id).await.unwrap().status, WorkloadStatus::Stopped);
    assert!(h.remote.written("/PGSM/server.properties").is_some());
}

#[tokio::test]
async fn test_provision_requires_creating() {
    let h = Harness::with(
        FakeHypervisor::with_containers(&[500]),
        MemoryStore::with_workloads([workload(500, Ipv4Addr::new(172, 16, 0, 10), WorkloadStatus::Running)]),
    );
    let id = h.store.list().await.unwrap()[0].id;

    assert!(matches!(
        h.state.lifecycle.provision(&id).await,
        Err(LifecycleError::InvalidRequest(_))
    ));
    assert!(h.remote.commands().is_empty());
}

#[tokio::test]
async fn test_start_stop_restart_transitions() {
    let h = Harness::with(
        FakeHypervisor::with_containers(&[500]),
        MemoryStore::with_workloads([workload(500, Ipv4Addr::new(172, 16, 0, 10), WorkloadStatus::Error)]),
    );
    let lifecycle = &h.state.lifecycle;
    let id = h.store.list().await.unwrap()[0].id;

    assert_eq!(lifecycle.stop(&id).await.unwrap().status, WorkloadStatus::Stopped);
    assert_eq!(lifecycle.start(&id).await.unwrap().status, WorkloadStatus::Running);
    assert_eq!(lifecycle.restart(&id).await.unwrap().status, WorkloadStatus::Running);
    assert_eq!(
        h.remote.commands(),
        vec![
            "systemctl stop 'PGSM'",
            "systemctl start 'PGSM'",
            "systemctl restart 'PGSM'"
        ]
    );
}

#[tokio::test]
async fn test_failed_action_keeps_status() {
    let h = Harness::with(
        FakeHypervisor::with_containers(&[500]),
        MemoryStore::with_workloads([workload(500, Ipv4Addr::new(172, 16, 0, 10), WorkloadStatus::Running)]),
    );
    let id = h.store.list().await.unwrap()[0].id;
    h.remote.fail_when("systemctl stop", unreachable(Ipv4Addr::new(172, 16, 0, 10)));

    let err = h.state.lifecycle.stop(&id).await.unwrap_err();
    assert!(matches!(err, LifecycleError::Remote(RemoteError::Unreachable { .. })));
    assert_eq!(
        h.state.lifecycle.workload(&id).await.unwrap().status,
        WorkloadStatus::Running
    );
}

#[tokio::test]
async fn test_actions_refused_while_creating() {
    let h = Harness::new();
    let w = h.state.lifecycle.create(request("survival")).await.unwrap();

    assert!(matches!(
        h.state.lifecycle.start(&w.id).await,
        Err(LifecycleError::InvalidRequest(_))
    ));
    assert_eq!(h.remote.count("systemctl"), 0);
}

#[tokio::test]
async fn test_live_status_mapping() {
    let h = Harness::with(
        FakeHypervisor::with_containers(&[500]),
        MemoryStore::with_workloads([workload(500, Ipv4Addr::new(172, 16, 0, 10), WorkloadStatus::Running)]),
    );
    let lifecycle = &h.state.lifecycle;
    let id = h.store.list().await.unwrap()[0].id;

    h.remote.respond_when("is-active", Ok(output("active\n")));
    assert_eq!(lifecycle.live_status(&id).await.unwrap(), LiveStatus::Running);
}

#[tokio::test]
async fn test_live_status_reads_stdout_of_failed_probe() {
    let h = Harness::with(
        FakeHypervisor::with_containers(&[500]),
        MemoryStore::with_workloads([workload(500, Ipv4Addr::new(172, 16, 0, 10), WorkloadStatus::Running)]),
    );
    let id = h.store.list().await.unwrap()[0].id;

    h.remote.fail_when("is-active", command_failed("inactive\n", ""));
    assert_eq!(h.state.lifecycle.live_status(&id).await.unwrap(), LiveStatus::Stopped);
}

#[tokio::test]
async fn test_live_status_unreachable_is_unknown() {
    let h = Harness::with(
        FakeHypervisor::with_containers(&[500]),
        MemoryStore::with_workloads([workload(500, Ipv4Addr::new(172, 16, 0, 10), WorkloadStatus::Running)]),
    );
    let id = h.store.list().await.unwrap()[0].id;

    h.remote.fail_when("is-active", unreachable(Ipv4Addr::new(172, 16, 0, 10)));
    assert_eq!(h.state.lifecycle.live_status(&id).await.unwrap(), LiveStatus::Unknown);
    // the stored status is untouched
    assert_eq!(
        h.state.lifecycle.workload(&id).await.unwrap().status,
        WorkloadStatus::Running
    );
}

#[tokio::test]
async fn test_send_command_goes_through_terminal_session() {
    let h = Harness::with(
        FakeHypervisor::with_containers(&[500]),
        MemoryStore::with_workloads([workload(500, Ipv4Addr::new(172, 16, 0, 10), WorkloadStatus::Running)]),
    );
    let id = h.store.list().await.unwrap()[0].id;

    h.state.lifecycle.send_command(&id, "say hello").await.unwrap();

    let commands = h.remote.commands();
    assert_eq!(commands.len(), 1);
    assert!(commands[0].contains("tmux send-keys"));
    assert!(commands[0].contains("say hello"));
}

#[tokio::test]
async fn test_update_settings_rewrites_config() {
    let h = Harness::with(
        FakeHypervisor::with_containers(&[500]),
        MemoryStore::with_workloads([workload(500, Ipv4Addr::new(172, 16, 0, 10), WorkloadStatus::Stopped)]),
    );
    let id = h.store.list().await.unwrap()[0].id;

    let updated = h
        .state
        .lifecycle
        .update_settings(&id, BTreeMap::from([("difficulty".to_string(), "hard".to_string())]))
        .await
        .unwrap();

    assert_eq!(updated.settings.get("difficulty").map(String::as_str), Some("hard"));
    let properties = h.remote.written("/PGSM/server.properties").unwrap();
    assert!(properties.contains("difficulty=hard\n"));
}

#[tokio::test]
async fn test_delete_is_best_effort() {
    let h = Harness::new();
    let lifecycle = &h.state.lifecycle;
    let w = lifecycle.create(request("survival")).await.unwrap();
    lifecycle.provision(&w.id).await.unwrap();
    assert!(h.route_file(500).exists());

    h.remote.fail_when("systemctl stop", unreachable(w.address));
    let deleted = lifecycle.delete(&w.id).await.unwrap();

    assert_eq!(deleted.id, w.id);
    assert!(h.store.get(&w.id).await.unwrap().is_none());
    assert!(!h.route_file(500).exists());
    assert_eq!(h.hypervisor.deleted.lock().unwrap().clone(), vec![500]);
    assert!(h.hypervisor.container_ids().is_empty());
}

#[tokio::test]
async fn test_delete_unknown_workload() {
    let h = Harness::new();
    let id = gs_core::types::WorkloadId::new();
    assert!(matches!(
        h.state.lifecycle.delete(&id).await,
        Err(LifecycleError::NotFound(missing)) if missing == id
    ));
}

#[tokio::test]
async fn test_file_operations() {
    let h = Harness::with(
        FakeHypervisor::with_containers(&[500]),
        MemoryStore::with_workloads([workload(500, Ipv4Addr::new(172, 16, 0, 10), WorkloadStatus::Running)]),
    );
    let lifecycle = &h.state.lifecycle;
    let id = h.store.list().await.unwrap()[0].id;

    let local = h.dir.path().join("ops.json");
    std::fs::write(&local, "[]").unwrap();
    lifecycle.upload_file(&id, &local, "/PGSM/ops.json").await.unwrap();
    assert_eq!(lifecycle.read_file(&id, "/PGSM/ops.json").await.unwrap(), b"[]");

    let entries = lifecycle.list_files(&id, "/PGSM").await.unwrap();
    assert_eq!(entries[0].path, "/PGSM/server.properties");

    lifecycle.remove_file(&id, "/PGSM/ops.json").await.unwrap();
    assert_eq!(h.remote.removed.lock().unwrap().clone(), vec!["/PGSM/ops.json"]);
}
