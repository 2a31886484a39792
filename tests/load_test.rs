//! End-to-end load test: real listener, async file sink, graceful shutdown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqlog::config::{LogSettings, RequestConfig, RuntimeConfig};
use reqlog::{AppServer, FileSink, Shutdown, Sink, SinkMode};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_request_is_persisted_across_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("access.log");

    // Inline dispatch into an async sink: the request path only enqueues.
    let runtime = Arc::new(
        RuntimeConfig::new(LogSettings {
            async_mode: false,
            ..LogSettings::default()
        })
        .unwrap(),
    );
    let sink: Arc<dyn Sink> = Arc::new(
        FileSink::open(&log_path, SinkMode::Async { capacity: 4096 })
            .await
            .unwrap(),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = AppServer::new(&RequestConfig::default(), runtime, sink, None);
    let server_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move { server.run(listener, &server_shutdown).await });

    let concurrency = 20;
    let requests_per_task = 25;
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let start = Instant::now();

    let mut handles = Vec::new();
    for t in 0..concurrency {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            for i in 0..requests_per_task {
                let res = client
                    .get(format!("http://{addr}/load/{t}/{i}"))
                    .send()
                    .await
                    .unwrap();
                assert!(res.status().is_success());
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    println!("served {} requests in {:?}", concurrency * requests_per_task, start.elapsed());
    drop(client);

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(10), server_task)
        .await
        .expect("server did not shut down")
        .unwrap()
        .unwrap();

    let content = std::fs::read_to_string(&log_path).unwrap();
    let lines: Vec<serde_json::Value> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), concurrency * requests_per_task);
    assert!(lines.iter().all(|l| l["path"].as_str().unwrap().starts_with("/load/")));
    assert!(lines.iter().all(|l| l["client_ip"] == "127.0.0.1"));
}
