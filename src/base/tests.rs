use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use std::io;
use std::sync::Arc;

#[test]
fn test_net_error_codes() {
    assert_eq!(NetError::RequestCanceled.as_i32(), -3);
    let failed = NetError::NameResolutionFailure { host: "a".into() };
    assert_eq!(failed.as_i32(), -137);
    assert_eq!(NetError::NameNotResolved.as_i32(), -105);
    assert_eq!(NetError::SocketIsConnected.as_i32(), -23);

    let connect = NetError::ConnectFailure {
        host: "example.test".into(),
        port: 80,
        source: Arc::new(io::Error::from(io::ErrorKind::ConnectionRefused)),
    };
    assert_eq!(connect.as_i32(), -104);
}

#[test]
fn test_proxy_and_direct_resolution_are_distinct() {
    let direct = NetError::NameResolutionFailure {
        host: "origin.test".into(),
    };
    let proxy = NetError::ProxyNameResolutionFailure {
        host: "proxy.test".into(),
    };

    assert!(direct.is_name_resolution());
    assert!(proxy.is_name_resolution());
    assert_ne!(direct.as_i32(), proxy.as_i32());
    assert!(!NetError::RequestCanceled.is_name_resolution());
}

#[test]
fn test_connect_failure_keeps_cause() {
    use std::error::Error;

    let err = NetError::ConnectFailure {
        host: "example.test".into(),
        port: 443,
        source: Arc::new(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
    };
    let cause = err.source().expect("cause");
    assert_eq!(cause.to_string(), "timed out");
    assert!(err.to_string().contains("example.test:443"));
}

#[test]
fn test_load_state_terminal() {
    assert!(LoadState::Connected.is_terminal());
    assert!(LoadState::Failed.is_terminal());
    assert!(!LoadState::Connecting { index: 0 }.is_terminal());
    assert!(!LoadState::Exhausted { pass: 1 }.is_terminal());
    assert_eq!(LoadState::default(), LoadState::Idle);
}
