//! Integration tests for flat checkpoint downloads against a mock hub

use std::collections::BTreeMap;
use std::fs;

use assert_fs::prelude::*;
use predicates::prelude::*;
use preflight_core::{
    ArtifactDescriptor, ArtifactFetcher, EndpointConfig, FetchErrorKind, PrimaryRepositoryFetcher,
};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REPO: &str = "IndexTeam/IndexTTS-2";

// sha256("hello")
const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

fn fetcher(server: &MockServer, token: Option<&str>) -> PrimaryRepositoryFetcher {
    PrimaryRepositoryFetcher::new(&EndpointConfig {
        endpoint: server.uri(),
        token: token.map(ToString::to_string),
        connect_timeout_secs: 5,
    })
    .unwrap()
}

async fn mount_listing(server: &MockServer, files: &[&str]) {
    let siblings: Vec<_> = files.iter().map(|f| json!({ "rfilename": f })).collect();
    Mock::given(method("GET"))
        .and(path(format!("/api/models/{REPO}/revision/main")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "siblings": siblings })))
        .mount(server)
        .await;
}

async fn mount_file(server: &MockServer, file: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(format!("/{REPO}/resolve/main/{file}")))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

#[test_log::test(tokio::test)]
async fn test_downloads_listed_files() {
    let server = MockServer::start().await;
    mount_listing(&server, &["config.yaml", "gpt.pth", "qwen0.6bemo4-merge/model.safetensors"]).await;
    mount_file(&server, "config.yaml", b"model: indextts2").await;
    mount_file(&server, "gpt.pth", b"gpt weights").await;
    mount_file(&server, "qwen0.6bemo4-merge/model.safetensors", b"qwen").await;

    let ckpt = assert_fs::TempDir::new().unwrap();
    let d = ArtifactDescriptor::primary("ckpt", REPO, ckpt.path(), "gpt.pth")
        .with_expected_files(["config.yaml", "gpt.pth"]);

    fetcher(&server, None).fetch(&d).await.unwrap();

    ckpt.child("config.yaml").assert("model: indextts2");
    ckpt.child("gpt.pth").assert("gpt weights");
    ckpt.child("qwen0.6bemo4-merge/model.safetensors").assert(predicate::path::is_file());
    ckpt.child("gpt.pth.part").assert(predicate::path::missing());
}

#[tokio::test]
async fn test_present_files_are_not_downloaded_again() {
    let server = MockServer::start().await;
    mount_listing(&server, &["config.yaml", "gpt.pth"]).await;
    Mock::given(method("GET"))
        .and(path(format!("/{REPO}/resolve/main/config.yaml")))
        .respond_with(ResponseTemplate::new(200).set_body_string("fresh"))
        .expect(0)
        .mount(&server)
        .await;
    mount_file(&server, "gpt.pth", b"gpt weights").await;

    let ckpt = assert_fs::TempDir::new().unwrap();
    ckpt.child("config.yaml").write_str("from an earlier run").unwrap();
    let d = ArtifactDescriptor::primary("ckpt", REPO, ckpt.path(), "gpt.pth");

    fetcher(&server, None).fetch(&d).await.unwrap();
    ckpt.child("config.yaml").assert("from an earlier run");
    ckpt.child("gpt.pth").assert(predicate::path::is_file());
}

#[tokio::test]
async fn test_marker_is_downloaded_last() {
    let server = MockServer::start().await;
    // Listing puts the marker first; its download must still come last.
    mount_listing(&server, &["gpt.pth", "bpe.model", "s2mel.pth"]).await;
    mount_file(&server, "gpt.pth", b"gpt weights").await;
    mount_file(&server, "bpe.model", b"bpe").await;
    mount_file(&server, "s2mel.pth", b"s2mel").await;

    let ckpt = assert_fs::TempDir::new().unwrap();
    let d = ArtifactDescriptor::primary("ckpt", REPO, ckpt.path(), "gpt.pth");
    fetcher(&server, None).fetch(&d).await.unwrap();

    let downloads: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| r.url.path().to_string())
        .filter(|p| p.contains("/resolve/"))
        .collect();
    assert_eq!(downloads.last().map(String::as_str), Some("/IndexTeam/IndexTTS-2/resolve/main/gpt.pth"));
    assert_eq!(downloads.len(), 3);
}

#[tokio::test]
async fn test_missing_expected_file_removes_marker() {
    let server = MockServer::start().await;
    mount_listing(&server, &["gpt.pth"]).await;
    mount_file(&server, "gpt.pth", b"gpt weights").await;

    let ckpt = assert_fs::TempDir::new().unwrap();
    let d = ArtifactDescriptor::primary("ckpt", REPO, ckpt.path(), "gpt.pth")
        .with_expected_files(["gpt.pth", "bpe.model"]);

    let err = fetcher(&server, None).fetch(&d).await.unwrap_err();
    assert_eq!(err.descriptor, "ckpt");
    assert_eq!(
        err.kind,
        FetchErrorKind::Incomplete {
            missing: vec!["bpe.model".to_string()]
        }
    );
    ckpt.child("gpt.pth").assert(predicate::path::missing());
}

#[tokio::test]
async fn test_checksum_mismatch_is_integrity_error() {
    let server = MockServer::start().await;
    mount_listing(&server, &["bpe.model", "gpt.pth"]).await;
    mount_file(&server, "bpe.model", b"not hello").await;
    mount_file(&server, "gpt.pth", b"gpt weights").await;

    let ckpt = assert_fs::TempDir::new().unwrap();
    let d = ArtifactDescriptor::primary("ckpt", REPO, ckpt.path(), "gpt.pth")
        .with_checksums(BTreeMap::from([("bpe.model".to_string(), HELLO_SHA256.to_string())]));

    let err = fetcher(&server, None).fetch(&d).await.unwrap_err();
    assert!(matches!(err.kind, FetchErrorKind::Integrity { ref file, .. } if file == "bpe.model"));
    ckpt.child("bpe.model").assert(predicate::path::missing());
    ckpt.child("gpt.pth").assert(predicate::path::missing());
}

#[tokio::test]
async fn test_matching_checksum_passes() {
    let server = MockServer::start().await;
    mount_listing(&server, &["gpt.pth"]).await;
    mount_file(&server, "gpt.pth", b"hello").await;

    let ckpt = assert_fs::TempDir::new().unwrap();
    let d = ArtifactDescriptor::primary("ckpt", REPO, ckpt.path(), "gpt.pth")
        .with_checksums(BTreeMap::from([("gpt.pth".to_string(), HELLO_SHA256.to_uppercase())]));

    fetcher(&server, None).fetch(&d).await.unwrap();
    assert_eq!(fs::read(ckpt.path().join("gpt.pth")).unwrap(), b"hello");
}

#[tokio::test]
async fn test_unauthorized_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/api/models/{REPO}/revision/main")))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let ckpt = assert_fs::TempDir::new().unwrap();
    let d = ArtifactDescriptor::primary("ckpt", REPO, ckpt.path(), "gpt.pth");
    let err = fetcher(&server, None).fetch(&d).await.unwrap_err();
    assert_eq!(err.kind.category(), "authorization");
    ckpt.child("gpt.pth").assert(predicate::path::missing());
}

#[tokio::test]
async fn test_token_is_sent_as_bearer() {
    let server = MockServer::start().await;
    let siblings = json!({ "siblings": [{ "rfilename": "gpt.pth" }] });
    Mock::given(method("GET"))
        .and(path(format!("/api/models/{REPO}/revision/main")))
        .and(header("authorization", "Bearer hf_secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(siblings))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{REPO}/resolve/main/gpt.pth")))
        .and(header("authorization", "Bearer hf_secret"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"gpt".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let ckpt = assert_fs::TempDir::new().unwrap();
    let d = ArtifactDescriptor::primary("ckpt", REPO, ckpt.path(), "gpt.pth");
    fetcher(&server, Some("hf_secret")).fetch(&d).await.unwrap();
}

#[tokio::test]
async fn test_missing_file_is_not_found() {
    let server = MockServer::start().await;
    mount_listing(&server, &["bpe.model", "gpt.pth"]).await;
    mount_file(&server, "gpt.pth", b"gpt weights").await;
    // bpe.model has no mock: wiremock answers 404

    let ckpt = assert_fs::TempDir::new().unwrap();
    let d = ArtifactDescriptor::primary("ckpt", REPO, ckpt.path(), "gpt.pth");
    let err = fetcher(&server, None).fetch(&d).await.unwrap_err();
    assert_eq!(err.kind.category(), "not_found");
    // The marker is ordered last, so the failure happens before it lands.
    ckpt.child("gpt.pth").assert(predicate::path::missing());
    ckpt.child("bpe.model.part").assert(predicate::path::missing());
}

#[tokio::test]
async fn test_include_filter_without_match_is_not_found() {
    let server = MockServer::start().await;
    mount_listing(&server, &["gpt.pth"]).await;

    let ckpt = assert_fs::TempDir::new().unwrap();
    let d = ArtifactDescriptor::primary("ckpt", REPO, ckpt.path(), "gpt.pth").with_include(["*.onnx"]);
    let err = fetcher(&server, None).fetch(&d).await.unwrap_err();
    assert_eq!(err.kind.category(), "not_found");
}
