// transport/tests/transport.rs

use mockito::Server;
use serde_json::json;
use std::time::Duration;
use transport::{Transport, TransportError};

#[test]
fn send_request_success() {
    let mut server = Server::new();
    let _m = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"jsonrpc":"2.0","result":123,"id":1}"#)
        .create();

    let tx = Transport::new(server.url());

    let rt = tokio::runtime::Runtime::new().unwrap();
    let result = rt.block_on(tx.send_request("foo", &[] as &[u8])).unwrap();

    assert_eq!(result, json!(123));
}

#[test]
fn send_request_rpc_error() {
    let mut server = Server::new();
    let _m = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"jsonrpc":"2.0","error":{"code":-1,"message":"oops"},"id":1}"#)
        .create();

    let tx = Transport::new(server.url());
    let rt = tokio::runtime::Runtime::new().unwrap();
    let err = rt
        .block_on(tx.send_request("bar", &[] as &[u8]))
        .unwrap_err();

    match err {
        TransportError::Rpc(v) => {
            assert!(v.to_string().contains("oops"));
        }
        other => panic!("expected Rpc error, got {:?}", other),
    }
}

#[test]
fn test_connection_error() {
    let tx = Transport::new("http://127.0.0.1:0");
    let rt = tokio::runtime::Runtime::new().unwrap();

    let err = rt
        .block_on(tx.send_request("foo", &[] as &[u8]))
        .unwrap_err();

    match err {
        TransportError::Http(0, _) => {}
        other => panic!("expected Http(0, _) error, got {:?}", other),
    }
}

#[test]
fn call_method_with_type_deserialization() {
    let mut server = Server::new();
    let _m = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"jsonrpc":"2.0","result":{"name":"test","value":42},"id":1}"#)
        .create();

    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct TestResult {
        name: String,
        value: u32,
    }

    let tx = Transport::new(server.url());
    let rt = tokio::runtime::Runtime::new().unwrap();
    let result: TestResult = rt.block_on(tx.call("test_method", &[] as &[u8])).unwrap();

    assert_eq!(
        result,
        TestResult {
            name: "test".to_string(),
            value: 42,
        }
    );
}

#[test]
fn missing_result_error() {
    let mut server = Server::new();
    let _m = server
        .mock("POST", "/")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"jsonrpc":"2.0","id":1}"#)
        .create();

    let tx = Transport::new(server.url());
    let rt = tokio::runtime::Runtime::new().unwrap();
    let err = rt
        .block_on(tx.send_request("foo", &[] as &[u8]))
        .unwrap_err();

    assert!(matches!(err, TransportError::MissingResult));
}

#[test]
fn slow_response_times_out() {
    let mut server = Server::new();
    let _m = server
        .mock("POST", "/")
        .with_status(200)
        .with_chunked_body(|_| {
            std::thread::sleep(Duration::from_millis(200));
            Ok(())
        })
        .create();

    let tx = Transport::new_with_auth(server.url(), "user", "pass", Duration::from_millis(20));
    let rt = tokio::runtime::Runtime::new().unwrap();
    let err = rt
        .block_on(tx.send_request("foo", &[] as &[u8]))
        .unwrap_err();

    assert!(matches!(err, TransportError::Timeout(_, _)));
}
