//! End-to-end runs against loopback WebSocket servers.

use beespeed::{
    run_latency_probe, run_transfer_phase, Error, ServerEndpoints, Speedtest, TestConfiguration,
    WorkerKind,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

const ECHO_DELAY: Duration = Duration::from_millis(20);

/// Spawns a server that hands every accepted WebSocket to `serve`.
async fn spawn_server<F, Fut>(serve: F) -> SocketAddr
where
    F: Fn(WebSocketStream<TcpStream>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let serve = Arc::new(serve);
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let serve = serve.clone();
            tokio::spawn(async move {
                if let Ok(ws) = accept_async(stream).await {
                    serve(ws).await;
                }
            });
        }
    });
    addr
}

async fn echo_server(probes: Arc<AtomicUsize>) -> SocketAddr {
    spawn_server(move |mut ws| {
        let probes = probes.clone();
        async move {
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    probes.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(ECHO_DELAY).await;
                    if ws.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
    .await
}

async fn streaming_server(sent: Arc<AtomicU64>) -> SocketAddr {
    spawn_server(move |mut ws| {
        let sent = sent.clone();
        async move {
            let chunk = Bytes::from(vec![0x5a; 32 * 1024]);
            while ws.send(Message::Binary(chunk.clone())).await.is_ok() {
                sent.fetch_add(chunk.len() as u64, Ordering::SeqCst);
            }
        }
    })
    .await
}

async fn sink_server(received: Arc<AtomicU64>) -> SocketAddr {
    spawn_server(move |mut ws| {
        let received = received.clone();
        async move {
            while let Some(Ok(message)) = ws.next().await {
                match message {
                    Message::Binary(data) => {
                        received.fetch_add(data.len() as u64, Ordering::SeqCst);
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    })
    .await
}

fn endpoints(ping: SocketAddr, download: SocketAddr, upload: SocketAddr) -> ServerEndpoints {
    ServerEndpoints::new(
        &format!("ws://{}/ws/ping", ping),
        &format!("ws://{}/ws/download", download),
        &format!("ws://{}/ws/upload", upload),
        "Loopback (127.0.0.1)",
    )
    .unwrap()
}

fn quick_config() -> TestConfiguration {
    TestConfiguration::default()
        .with_ping_count(5)
        .with_duration(Duration::from_millis(600))
        .with_concurrency(3)
        .with_poll_interval(Duration::from_millis(100))
}

async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn latency_probe_sends_exactly_the_requested_probes() {
    let probes = Arc::new(AtomicUsize::new(0));
    let addr = echo_server(probes.clone()).await;
    let endpoints = endpoints(addr, addr, addr);

    let latency = run_latency_probe(&endpoints, &quick_config()).await.unwrap();

    assert_eq!(latency.samples, 5);
    assert_eq!(probes.load(Ordering::SeqCst), 5);
    assert!(
        (19.0..60.0).contains(&latency.mean_latency_ms),
        "mean latency {} ms",
        latency.mean_latency_ms
    );
    assert!(
        (0.0..5.0).contains(&latency.jitter_ms),
        "jitter {} ms",
        latency.jitter_ms
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn download_phase_counts_what_arrives() {
    let sent = Arc::new(AtomicU64::new(0));
    let addr = streaming_server(sent.clone()).await;
    let endpoints = endpoints(addr, addr, addr);
    let samples = Arc::new(AtomicUsize::new(0));
    let seen = samples.clone();

    let result = run_transfer_phase(WorkerKind::Download, &endpoints, &quick_config(), move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    })
    .await
    .unwrap();

    assert!(result.bytes_total > 0);
    assert!(result.bytes_total <= sent.load(Ordering::SeqCst));
    assert!(result.elapsed >= Duration::from_millis(600));
    assert!(samples.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn upload_phase_pushes_binary_messages() {
    let received = Arc::new(AtomicU64::new(0));
    let addr = sink_server(received.clone()).await;
    let endpoints = endpoints(addr, addr, addr);

    let result = run_transfer_phase(WorkerKind::Upload, &endpoints, &quick_config(), |_| {})
        .await
        .unwrap();

    assert!(result.bytes_total > 0);
    assert_eq!(result.bytes_total % 64_500, 0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(received.load(Ordering::SeqCst) > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn full_test_fills_every_field() {
    let probes = Arc::new(AtomicUsize::new(0));
    let ping = echo_server(probes).await;
    let download = streaming_server(Arc::new(AtomicU64::new(0))).await;
    let upload = sink_server(Arc::new(AtomicU64::new(0))).await;

    let mut speedtest = Speedtest::new(endpoints(ping, download, upload), quick_config()).unwrap();
    speedtest.test_ping().await.unwrap();
    speedtest.test_speed(WorkerKind::Download, |_| {}).await.unwrap();
    assert!(speedtest.result().upload.is_none());
    speedtest.test_speed(WorkerKind::Upload, |_| {}).await.unwrap();

    let result = speedtest.result();
    assert!(result.ping_millis > 0.0);
    assert!(result.download.unwrap().mbps() > 0.0);
    assert!(result.upload.unwrap().mbps() > 0.0);
}

#[tokio::test]
async fn unreachable_server_is_a_connectivity_error() {
    let addr = closed_port().await;
    let endpoints = endpoints(addr, addr, addr);
    let config = quick_config().with_connect_timeout(Duration::from_secs(2));

    assert!(matches!(
        run_latency_probe(&endpoints, &config).await,
        Err(Error::Connectivity(_))
    ));
    assert!(matches!(
        run_transfer_phase(WorkerKind::Download, &endpoints, &config, |_| {}).await,
        Err(Error::Connectivity(_))
    ));
}
