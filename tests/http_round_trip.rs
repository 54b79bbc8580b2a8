use sequent::{server, Log, LogConfig};
use serde_json::Value;
use tempfile::tempdir;

#[tokio::test]
async fn message_status_and_health_round_trip() {
    let dir = tempdir().expect("tempdir");
    let log = Log::open(LogConfig::new(dir.path())).await.expect("open");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let serving = tokio::spawn(server::serve(listener, log.writer(), async {
        let _ = stop_rx.await;
    }));

    let client = reqwest::Client::new();
    let base = format!("http://{addr}");

    let response = client
        .post(format!("{base}/message"))
        .body("hello")
        .send()
        .await
        .expect("post");
    assert_eq!(response.status(), 200);
    let ack: Value = response.json().await.expect("json");
    assert_eq!(ack["sequence"], 1);
    assert_eq!(ack["hash"], "9XLTlvrpIGYocU+yzgD3LpTyJY8=");

    let empty = client
        .post(format!("{base}/message"))
        .body("")
        .send()
        .await
        .expect("post empty");
    assert_eq!(empty.status(), 400);

    let status: Value = client
        .get(format!("{base}/status"))
        .send()
        .await
        .expect("get status")
        .json()
        .await
        .expect("json");
    assert_eq!(status["version"], 1);
    assert_eq!(status["next_sequence"], 2);
    assert_eq!(status["max_queue_depth"], 1000);

    let health: Value = client
        .get(format!("{base}/health"))
        .send()
        .await
        .expect("get health")
        .json()
        .await
        .expect("json");
    assert_eq!(health["status"], "ok");
    assert_eq!(health["records_appended"], 1);
    assert_eq!(health["append_errors"], 0);

    let missing = client
        .get(format!("{base}/missing"))
        .send()
        .await
        .expect("get missing");
    assert_eq!(missing.status(), 404);

    let _ = stop_tx.send(());
    serving.await.expect("join").expect("serve");
    log.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn oversize_body_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let mut config = LogConfig::new(dir.path());
    config.max_body_size = 16;
    let log = Log::open(config).await.expect("open");

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let serving = tokio::spawn(server::serve(listener, log.writer(), async {
        let _ = stop_rx.await;
    }));

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{addr}/message"))
        .body(vec![b'a'; 17])
        .send()
        .await
        .expect("post");
    assert_eq!(response.status(), 413);

    let _ = stop_tx.send(());
    serving.await.expect("join").expect("serve");
    log.shutdown().await.expect("shutdown");
}
