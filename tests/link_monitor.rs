use std::time::Duration;

use camsync::adapters::simulated::simulated_link;
use camsync::core::{LinkEventMonitor, LinkSignal, MonitorExit};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

async fn wait_for_link(signal: &LinkSignal, up: bool) {
    let mut rx = signal.subscribe();
    timeout(Duration::from_secs(1), rx.wait_for(|state| *state == up))
        .await
        .expect("timeout waiting for link state")
        .expect("signal dropped");
}

#[tokio::test]
async fn test_follows_connect_and_disconnect() {
    let signal = LinkSignal::new();
    let (simulator, events) = simulated_link("wlan0");
    let cancel = CancellationToken::new();

    let monitor = LinkEventMonitor::new(signal.clone());
    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move { monitor.run(events, &task_cancel).await });

    simulator.up().await.unwrap();
    wait_for_link(&signal, true).await;

    simulator.down().await.unwrap();
    wait_for_link(&signal, false).await;

    cancel.cancel();
    let exit = task.await.unwrap().unwrap();
    assert_eq!(exit, MonitorExit::Cancelled);
}

#[tokio::test]
async fn test_latest_event_wins() {
    let signal = LinkSignal::new();
    let (simulator, events) = simulated_link("wlan0");

    simulator.up().await.unwrap();
    simulator
        .emit("wlan0 (phy #0): scan started\n".to_string())
        .await
        .unwrap();
    simulator.down().await.unwrap();
    simulator.up().await.unwrap();
    simulator.close().await.unwrap();

    let monitor = LinkEventMonitor::new(signal.clone());
    let exit = monitor
        .run(events, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(exit, MonitorExit::EndOfStream);
    assert!(signal.is_up());
}

#[tokio::test]
async fn test_noise_does_not_change_state() {
    let signal = LinkSignal::new();
    let (simulator, events) = simulated_link("wlan0");

    simulator
        .emit("wlan0 (phy #0): auth: status 0\n".to_string())
        .await
        .unwrap();
    simulator
        .emit("phy #0: reg_change: set to world roaming\n".to_string())
        .await
        .unwrap();
    simulator.close().await.unwrap();

    let monitor = LinkEventMonitor::new(signal.clone());
    monitor
        .run(events, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!signal.is_up());
}

#[tokio::test]
async fn test_unterminated_last_line_is_applied() {
    let signal = LinkSignal::new();
    let (simulator, events) = simulated_link("wlan0");

    simulator
        .emit("wlan0 (phy #0): connected to 02:00:00:00:00:01".to_string())
        .await
        .unwrap();
    simulator.close().await.unwrap();

    let monitor = LinkEventMonitor::new(signal.clone());
    monitor
        .run(events, &CancellationToken::new())
        .await
        .unwrap();

    assert!(signal.is_up());
}
