//! Integration tests for the loopback transport through the enum wrapper.

use std::time::Duration;

use gstream_core::Config;
use gstream_hardware::{AnyDevice, ConnectionState, DeviceAdapter};
use gstream_protocol::AckDetector;
use tokio::time::Instant;

fn loopback_config() -> Config {
    Config {
        port: "/dev/null".to_string(),
        ..Config::default()
    }
}

/// The synthesized response must be recognized by the acknowledgment detector.
#[tokio::test(start_paused = true)]
async fn test_loopback_response_matches_detector() {
    let config = loopback_config();
    let mut device = AnyDevice::from_config(&config);
    device.open(&config).await.unwrap();

    device.write(b"M104 S200\n").await.unwrap();
    let response = device.recv().await.unwrap();

    assert!(AckDetector::new().on_response(&response));
    assert_eq!(
        AckDetector::format_response(&response),
        "<-ok\r\n".to_string()
    );
}

#[tokio::test(start_paused = true)]
async fn test_acknowledgments_follow_write_order() {
    let (mut device, handle) = AnyDevice::loopback();
    device.open(&loopback_config()).await.unwrap();
    let start = Instant::now();

    for command in ["G28\n", "G90\n", "G21\n"] {
        device.write(command.as_bytes()).await.unwrap();
        device.recv().await.unwrap();
    }

    assert_eq!(handle.written(), vec!["G28\n", "G90\n", "G21\n"]);
    assert_eq!(handle.acks_delivered(), 3);
    assert_eq!(handle.max_outstanding(), 1);
    assert!(start.elapsed() >= Duration::from_millis(30));
}

#[tokio::test]
async fn test_lifecycle_states() {
    let (mut device, _handle) = AnyDevice::loopback();
    assert_eq!(device.state(), ConnectionState::Unopened);

    device.open(&loopback_config()).await.unwrap();
    assert_eq!(device.state(), ConnectionState::Open);

    device.close().await.unwrap();
    assert_eq!(device.state(), ConnectionState::Closed);
    assert!(device.write(b"G28\n").await.unwrap_err().is_not_open());
}
