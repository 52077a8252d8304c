//! HTTP viewer tests: start the router on a free port and talk to it with
//! `reqwest`.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use filer::config::Config;
use filer::core::digest::Digest;
use filer::core::store::MetadataStore;
use filer::ingest::Ingestor;
use filer::server::router;
use tempfile::TempDir;

async fn start(ingestor: &Ingestor) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(Arc::clone(ingestor.store()), ingestor.blobs().clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn seeded(tmp: &Path) -> (Ingestor, Digest) {
    let ingestor = Ingestor::from_config(&Config::rooted_at(tmp)).await.unwrap();
    let dir = tmp.join("in/reports");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("q1.json"), br#"{"total": 1}"#).unwrap();
    std::fs::write(dir.join("q2.json"), br#"{"total": 1}"#).unwrap();
    std::fs::write(dir.join("notes.bin"), b"opaque").unwrap();

    let first = ingestor
        .ingest_file(&dir.join("q1.json"), "laptop", &[])
        .await;
    ingestor.ingest_file(&dir.join("q2.json"), "nas", &[]).await;
    ingestor.ingest_file(&dir.join("notes.bin"), "laptop", &[]).await;
    (ingestor, first.digest.unwrap())
}

#[tokio::test]
async fn health_reports_version() {
    let tmp = TempDir::new().unwrap();
    let (ingestor, _) = seeded(tmp.path()).await;
    let addr = start(&ingestor).await;

    let body: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn files_are_filtered_by_source_and_tag() {
    let tmp = TempDir::new().unwrap();
    let (ingestor, digest) = seeded(tmp.path()).await;
    let addr = start(&ingestor).await;

    let all: serde_json::Value = reqwest::get(format!("http://{}/api/files", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all["count"], 2);

    let nas: serde_json::Value = reqwest::get(format!("http://{}/api/files?source=nas&tag=", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(nas["count"], 1);
    assert_eq!(nas["files"][0]["digest"], digest.as_str());
    assert_eq!(nas["files"][0]["locations"].as_array().unwrap().len(), 2);

    let tagged: serde_json::Value = reqwest::get(format!("http://{}/api/files?tag=REPORT", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tagged["count"], 2);
}

#[tokio::test]
async fn stats_and_info() {
    let tmp = TempDir::new().unwrap();
    let (ingestor, digest) = seeded(tmp.path()).await;
    let addr = start(&ingestor).await;

    let stats: serde_json::Value = reqwest::get(format!("http://{}/api/stats", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["unique_count"], 2);
    assert_eq!(stats["total_locations"], 3);

    let info: serde_json::Value =
        reqwest::get(format!("http://{}/api/file/{}/info", addr, &digest.as_str()[..10]))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
    assert_eq!(info["digest"], digest.as_str());
    assert_eq!(info["mime_type"], "application/json");
}

#[tokio::test]
async fn content_is_streamed_with_content_type() {
    let tmp = TempDir::new().unwrap();
    let (ingestor, digest) = seeded(tmp.path()).await;
    let addr = start(&ingestor).await;

    let resp = reqwest::get(format!("http://{}/file/{}", addr, digest))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    assert_eq!(resp.bytes().await.unwrap().as_ref(), br#"{"total": 1}"#);
}

#[tokio::test]
async fn errors_follow_the_json_contract() {
    let tmp = TempDir::new().unwrap();
    let (ingestor, digest) = seeded(tmp.path()).await;
    let addr = start(&ingestor).await;

    let check = |status: u16, code: &'static str, url: String| async move {
        let resp = reqwest::get(url).await.unwrap();
        assert_eq!(resp.status(), status);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], code);
        assert!(body["error"]["message"].as_str().is_some());
    };

    check(400, "bad_request", format!("http://{}/api/file/zz/info", addr)).await;
    check(
        404,
        "not_found",
        format!("http://{}/file/{}", addr, Digest::of_bytes(b"absent")),
    )
    .await;
    check(409, "ambiguous_prefix", format!("http://{}/api/file/{}/info", addr, ambiguous_prefix(&ingestor).await)).await;

    std::fs::remove_file(ingestor.blobs().locate(&digest)).unwrap();
    check(500, "integrity_fault", format!("http://{}/file/{}", addr, digest)).await;
}

/// Ingest distinct files until two digests share a first character.
async fn ambiguous_prefix(ingestor: &Ingestor) -> String {
    let tmp = TempDir::new().unwrap();
    let mut seen = std::collections::HashSet::new();
    for d in ingestor.store().all_digests().await.unwrap() {
        seen.insert(d.as_str()[..1].to_string());
    }
    for i in 0..17 {
        let path = tmp.path().join(format!("extra{}", i));
        std::fs::write(&path, format!("extra {}", i)).unwrap();
        let digest = ingestor.ingest_file(&path, "laptop", &[]).await.digest.unwrap();
        let first = digest.as_str()[..1].to_string();
        if !seen.insert(first.clone()) {
            return first;
        }
    }
    unreachable!("17 digests always share a leading hex character")
}
