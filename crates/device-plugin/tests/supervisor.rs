mod common;

use common::plugin_client;
use common::plugin_config;
use common::FakeKubelet;
use common::WAIT;
use device_plugin::api::AllocateRequest;
use device_plugin::api::ContainerAllocateRequest;
use device_plugin::api::Empty;
use device_plugin::Exit;
use device_plugin::LifecycleSignal;
use device_plugin::Supervisor;
use similar_asserts::assert_eq;
use tempfile::TempDir;
use tokio::sync::mpsc;

#[test_log::test(tokio::test)]
async fn reset_replaces_the_plugin_at_the_same_socket() {
    let dir = TempDir::new().expect("temp dir");
    let mut kubelet = FakeKubelet::start(&common::kubelet_socket(dir.path()));
    let config = plugin_config(dir.path());
    let socket = config.socket_path();

    let (signals, rx) = mpsc::channel(4);
    let supervisor = tokio::spawn(Supervisor::new(config).run(rx));

    assert_eq!(kubelet.next_registration().await.endpoint, "sequix-dp.sock");

    let mut client = plugin_client(&socket).await;
    let mut stream = client
        .list_and_watch(Empty {})
        .await
        .expect("open device stream")
        .into_inner();
    let snapshot = stream.message().await.expect("snapshot").expect("open");
    assert_eq!(snapshot.devices.len(), 5);

    signals
        .send(LifecycleSignal::Reset)
        .await
        .expect("supervisor listening");

    // the old instance ends its stream, then the new one registers again
    let end = tokio::time::timeout(WAIT, stream.message())
        .await
        .expect("old stream ends on reset")
        .expect("old stream ends cleanly");
    assert!(end.is_none());
    assert_eq!(kubelet.next_registration().await.endpoint, "sequix-dp.sock");

    let mut client = plugin_client(&socket).await;
    let mut stream = client
        .list_and_watch(Empty {})
        .await
        .expect("open device stream on new instance")
        .into_inner();
    let snapshot = stream.message().await.expect("snapshot").expect("open");
    assert!(snapshot.devices.iter().all(|d| d.health == "Healthy"));

    let allocation = client
        .allocate(AllocateRequest {
            container_requests: vec![ContainerAllocateRequest {
                devices_ids: vec!["dev000".to_string()],
            }],
        })
        .await
        .expect("allocate on new instance")
        .into_inner();
    assert_eq!(allocation.container_responses.len(), 1);

    signals
        .send(LifecycleSignal::Terminate("SIGTERM"))
        .await
        .expect("supervisor listening");
    let exit = tokio::time::timeout(WAIT, supervisor)
        .await
        .expect("supervisor exits")
        .expect("supervisor task")
        .expect("clean shutdown");

    assert_eq!(exit, Exit::Terminated("SIGTERM"));
    assert!(!socket.exists());

    kubelet.stop().await;
}

#[test_log::test(tokio::test)]
async fn initial_registration_failure_is_fatal() {
    let dir = TempDir::new().expect("temp dir");
    let config = plugin_config(dir.path());
    let socket = config.socket_path();

    let (_signals, rx) = mpsc::channel(1);
    let result = tokio::time::timeout(WAIT, Supervisor::new(config).run(rx))
        .await
        .expect("supervisor gives up in time");

    assert!(result.is_err());
    assert!(!socket.exists());
}

#[test_log::test(tokio::test)]
async fn closed_signal_source_stops_the_plugin() {
    let dir = TempDir::new().expect("temp dir");
    let mut kubelet = FakeKubelet::start(&common::kubelet_socket(dir.path()));
    let config = plugin_config(dir.path());
    let socket = config.socket_path();

    let (signals, rx) = mpsc::channel(1);
    let supervisor = tokio::spawn(Supervisor::new(config).run(rx));
    kubelet.next_registration().await;
    assert!(socket.exists());

    drop(signals);
    let exit = tokio::time::timeout(WAIT, supervisor)
        .await
        .expect("supervisor exits")
        .expect("supervisor task")
        .expect("clean shutdown");

    assert_eq!(exit, Exit::SignalsClosed);
    assert!(!socket.exists());

    kubelet.stop().await;
}
