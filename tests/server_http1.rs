//! End-to-end HTTP/1.1 over loopback TCP.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockSessionFactory, Script, TestPipeline};
use muxd::config::{ListenConfig, ServerConfig};
use muxd::http1::Http1Parser;
use muxd::lifecycle::Shutdown;
use muxd::net::{Listen, Listener};
use muxd::server::driver::serve;
use muxd::server::Server;
use muxd::worker::{Components, Worker};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::LocalSet;

fn components() -> Components {
    let (pipeline, _) = TestPipeline::new(Script::body(200, "hello"));
    let (sessions, _) = MockSessionFactory::new();
    Components {
        pipeline: Box::new(pipeline),
        http1: Box::new(Http1Parser::new()),
        sessions: Box::new(sessions),
    }
}

fn loopback_listener(config: ListenConfig) -> Listener {
    let listen = Arc::new(Listen::plain(config));
    Listener::bind(listen, "127.0.0.1:0".parse().unwrap()).expect("bind loopback")
}

async fn read_all(client: &mut TcpStream) -> Vec<u8> {
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut response))
        .await
        .expect("response within timeout")
        .expect("read response");
    response
}

#[tokio::test]
async fn serves_request_and_closes_on_request() {
    LocalSet::new()
        .run_until(async {
            let listener = loopback_listener(ListenConfig::default());
            let addr = listener.local_addr().unwrap();
            let shutdown = Shutdown::new();
            let server = tokio::task::spawn_local(serve(
                vec![listener],
                Worker::new(components()),
                shutdown.subscribe(),
            ));

            let mut client = TcpStream::connect(addr).await.unwrap();
            client
                .write_all(b"GET /hi HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();

            let response = read_all(&mut client).await;
            assert_eq!(
                response,
                b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello"
            );

            shutdown.trigger();
            server.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn keeps_connection_alive_between_requests() {
    LocalSet::new()
        .run_until(async {
            let listener = loopback_listener(ListenConfig::default());
            let addr = listener.local_addr().unwrap();
            let shutdown = Shutdown::new();
            let server = tokio::task::spawn_local(serve(
                vec![listener],
                Worker::new(components()),
                shutdown.subscribe(),
            ));

            let mut client = TcpStream::connect(addr).await.unwrap();
            let expected = b"HTTP/1.1 200 OK\r\ncontent-length: 5\r\n\r\nhello";

            client.write_all(b"GET /one HTTP/1.1\r\n\r\n").await.unwrap();
            let mut first = vec![0u8; expected.len()];
            tokio::time::timeout(Duration::from_secs(5), client.read_exact(&mut first))
                .await
                .expect("first response within timeout")
                .unwrap();
            assert_eq!(first, expected);

            client
                .write_all(b"GET /two HTTP/1.1\r\nConnection: close\r\n\r\n")
                .await
                .unwrap();
            assert_eq!(read_all(&mut client).await, expected);

            shutdown.trigger();
            server.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn idle_connection_times_out() {
    LocalSet::new()
        .run_until(async {
            let mut config = ListenConfig::default();
            config.network.recv_timeout_ms = 200;
            let listener = loopback_listener(config);
            let addr = listener.local_addr().unwrap();
            let shutdown = Shutdown::new();
            let server = tokio::task::spawn_local(serve(
                vec![listener],
                Worker::new(components()),
                shutdown.subscribe(),
            ));

            let mut client = TcpStream::connect(addr).await.unwrap();
            assert!(read_all(&mut client).await.is_empty());

            shutdown.trigger();
            server.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn shutdown_closes_open_connections() {
    LocalSet::new()
        .run_until(async {
            let listener = loopback_listener(ListenConfig::default());
            let addr = listener.local_addr().unwrap();
            let shutdown = Shutdown::new();
            let server = tokio::task::spawn_local(serve(
                vec![listener],
                Worker::new(components()),
                shutdown.subscribe(),
            ));

            let mut client = TcpStream::connect(addr).await.unwrap();
            // let the accept loop pick the connection up
            tokio::time::sleep(Duration::from_millis(50)).await;

            shutdown.trigger();
            server.await.unwrap();
            assert!(read_all(&mut client).await.is_empty());
        })
        .await;
}

#[test]
fn server_runs_worker_threads_until_shutdown() {
    let mut config = ServerConfig::default();
    config.runtime.workers = 2;
    config.listens[0].addresses = vec!["127.0.0.1:38471".to_string()];

    let server = Server::new(config, components).unwrap();
    let shutdown = Shutdown::new();
    let handle = {
        let shutdown = shutdown.clone();
        std::thread::spawn(move || server.run(&shutdown))
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    let response = runtime.block_on(async {
        let mut client = None;
        for _ in 0..50 {
            match TcpStream::connect("127.0.0.1:38471").await {
                Ok(stream) => {
                    client = Some(stream);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        let mut client = client.expect("server accepting");
        client
            .write_all(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        read_all(&mut client).await
    });
    assert!(response.starts_with(b"HTTP/1.1 200 OK\r\n"));
    assert!(response.ends_with(b"hello"));

    shutdown.trigger();
    handle.join().unwrap().unwrap();
}
