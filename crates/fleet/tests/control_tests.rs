//! Requests served over the monitor control socket, in-process

use async_net::unix::UnixStream;
use fleet::client::ControlClient;
use fleet::daemon::{ControlServer, Host, socket_path};
use fleet::protocol::{Request, Response};
use fleet::runtime::Runtime;
use fleet_config::parser;
use fleet_orchestration::{PollOutcome, UnitStatus, shutdown_channel};
use futures::io::BufReader;
use futures::{AsyncBufReadExt, AsyncWriteExt};
use std::net::TcpListener;
use std::sync::Arc;

fn config_in(dir: &std::path::Path, port: u16) -> fleet_config::Config {
    let dir = dir.display();
    parser::parse_str(&format!(
        r#"version: "1.0"
name: control-test
settings:
  probe_interval: 1
  state_dir: "{dir}/state"
runtime:
  start: "touch {dir}/{{unit}}.running"
  stop: "rm -f {dir}/{{unit}}.running"
  status: "test -f {dir}/{{unit}}.running"
units:
  db:
    health_check: {{ kind: connectivity, host: 127.0.0.1, port: {port} }}
    startup_timeout: 2
"#
    ))
    .unwrap()
}

#[smol_potat::test]
async fn test_requests_round_trip_over_socket() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let config = config_in(dir.path(), listener.local_addr().unwrap().port());
    let socket = socket_path(&config.state_dir());

    let runtime = Runtime::open(config).await.unwrap();
    let (trigger, shutdown) = shutdown_channel();
    let host = Arc::new(Host::new(&runtime, shutdown.clone()));
    let server = ControlServer::bind(&socket).unwrap();
    let serving = smol::spawn(async move { server.serve(host, &shutdown).await });

    let mut client = ControlClient::connect(&socket).await.unwrap();

    match client.send_request(&Request::StartUnit { id: "db".to_string() }).await.unwrap() {
        Response::Run { summary } => assert_eq!(summary.succeeded, vec!["db".to_string()]),
        other => panic!("unexpected response: {:?}", other),
    }
    assert!(dir.path().join("db.running").exists());

    let request = Request::TriggerRecovery {
        id: "db".to_string(),
        reset: true,
    };
    match client.send_request(&request).await.unwrap() {
        Response::Recovery { outcome, reset, .. } => {
            assert_eq!(outcome, PollOutcome::Healthy);
            assert!(reset);
        }
        other => panic!("unexpected response: {:?}", other),
    }

    match client.send_request(&Request::Status).await.unwrap() {
        Response::Status { snapshot } => assert_eq!(snapshot.units[0].status, UnitStatus::Healthy),
        other => panic!("unexpected response: {:?}", other),
    }

    let request = Request::StopUnit {
        id: "ghost".to_string(),
        force: false,
        timeout: None,
    };
    match client.send_request(&request).await.unwrap() {
        Response::Error { message } => assert!(message.contains("ghost")),
        other => panic!("unexpected response: {:?}", other),
    }

    trigger.trigger();
    drop(client);
    serving.await;
    assert!(!socket.exists());
    assert_eq!(runtime.context.store.status("db").await, UnitStatus::Healthy);
}

#[smol_potat::test]
async fn test_malformed_request_gets_error_response() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 1);
    let socket = socket_path(&config.state_dir());

    let runtime = Runtime::open(config).await.unwrap();
    let (trigger, shutdown) = shutdown_channel();
    let host = Arc::new(Host::new(&runtime, shutdown.clone()));
    let server = ControlServer::bind(&socket).unwrap();
    let serving = smol::spawn(async move { server.serve(host, &shutdown).await });

    let mut stream = UnixStream::connect(&socket).await.unwrap();
    stream.write_all(b"{\"type\":\"explode\"}\n").await.unwrap();
    let mut reply = String::new();
    BufReader::new(stream.clone())
        .read_line(&mut reply)
        .await
        .unwrap();

    let response: Response = serde_json::from_str(&reply).unwrap();
    assert!(matches!(response, Response::Error { message } if message.contains("Invalid request")));

    drop(stream);
    trigger.trigger();
    serving.await;
}

#[smol_potat::test]
async fn test_stale_socket_is_ignored_and_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("stale.sock");

    // a socket file nobody listens on
    drop(std::os::unix::net::UnixListener::bind(&socket).unwrap());
    assert!(socket.exists());
    assert!(ControlClient::find(&socket).await.is_none());

    let server = ControlServer::bind(&socket).unwrap();
    let (trigger, shutdown) = shutdown_channel();
    trigger.trigger();

    let config = config_in(dir.path(), 1);
    let runtime = Runtime::open(config).await.unwrap();
    let host = Arc::new(Host::new(&runtime, shutdown.clone()));
    server.serve(host, &shutdown).await;
    assert!(!socket.exists());
}
