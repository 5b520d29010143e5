use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use crawlbridge_client::{ApiClient, Asset, AssetAcl, ClientConfig, UploadDocument, UploadPipeline};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> (watch::Sender<bool>, ApiClient) {
    let config = ClientConfig {
        endpoint: format!("{}/api", server.uri()),
        organisation_id: "org-1".into(),
        kb_id: "kb-1".into(),
        sid: "sid-1".into(),
        source_id: 7,
        ..Default::default()
    };
    let (tx, rx) = watch::channel(false);
    let api = ApiClient::new(config, None, rx).unwrap();
    (tx, api)
}

async fn mount_upload_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/crawler/external/document/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

fn staged_asset(dir: &tempfile::TempDir, content: &[u8]) -> Asset {
    let staged = dir.path().join("staged.bin");
    let mut file = std::fs::File::create(&staged).unwrap();
    file.write_all(content).unwrap();
    Asset {
        url: "\\\\fs01\\docs\\report.pdf".into(),
        mime_type: "application/pdf".into(),
        binary_size: content.len() as i64,
        filename: staged.to_string_lossy().into_owned(),
        acls: vec![AssetAcl::user("rock@example.com", "Rock", "R")],
        ..Default::default()
    }
}

#[tokio::test]
async fn small_file_uploads_as_single_part() {
    let server = MockServer::start().await;
    mount_upload_ok(&server).await;
    let (_tx, api) = client(&server);

    let dir = tempfile::tempdir().unwrap();
    let content = b"hello upload pipeline";
    let asset = staged_asset(&dir, content);
    let document = UploadDocument::from(&asset);

    UploadPipeline::new(&api)
        .upload_asset(&asset, &document, 1024 * 1024, 55)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["objectType"], "CMUploadDocument");
    assert_eq!(body["partId"], 0);
    assert_eq!(body["totalParts"], 1);
    assert_eq!(body["totalFileSize"], content.len() as i64);
    assert_eq!(body["runId"], 55);
    assert_eq!(body["url"], "\\\\fs01\\docs\\report.pdf");

    let data = body["data"].as_str().unwrap();
    let encoded = data.strip_prefix(";base64,").expect("payload marker");
    assert_eq!(STANDARD.decode(encoded).unwrap(), content);

    // jobId is a well-formed UUID shared by the (single) part.
    assert!(uuid::Uuid::parse_str(body["jobId"].as_str().unwrap()).is_ok());
}

#[tokio::test]
async fn staged_file_is_deleted_after_upload() {
    let server = MockServer::start().await;
    mount_upload_ok(&server).await;
    let (_tx, api) = client(&server);

    let dir = tempfile::tempdir().unwrap();
    let asset = staged_asset(&dir, b"bytes");
    let document = UploadDocument::from(&asset);
    let staged_path = asset.filename.clone();

    UploadPipeline::new(&api)
        .upload_asset(&asset, &document, 1024, 1)
        .await
        .unwrap();

    assert!(!Path::new(&staged_path).exists());
}

#[tokio::test]
async fn staged_file_is_deleted_even_when_upload_fails() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/crawler/external/document/upload"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "kb full"})))
        .mount(&server)
        .await;
    let (_tx, api) = client(&server);

    let dir = tempfile::tempdir().unwrap();
    let asset = staged_asset(&dir, b"bytes");
    let document = UploadDocument::from(&asset);
    let staged_path = asset.filename.clone();

    let result = UploadPipeline::new(&api)
        .upload_asset(&asset, &document, 1024, 1)
        .await;
    assert!(result.is_err());
    assert!(!Path::new(&staged_path).exists());
}

#[tokio::test]
async fn oversized_file_sends_metadata_only() {
    let server = MockServer::start().await;
    mount_upload_ok(&server).await;
    let (_tx, api) = client(&server);

    let dir = tempfile::tempdir().unwrap();
    let content = vec![0u8; 64];
    let asset = staged_asset(&dir, &content);
    let document = UploadDocument::from(&asset);

    // Ceiling below the staged size: content must not be transmitted.
    UploadPipeline::new(&api)
        .upload_asset(&asset, &document, 10, 1)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["totalParts"], 1);
    assert_eq!(body["data"], "");
    assert_eq!(body["totalFileSize"], 64);
}

#[tokio::test]
async fn missing_staged_file_sends_metadata_only() {
    let server = MockServer::start().await;
    mount_upload_ok(&server).await;
    let (_tx, api) = client(&server);

    let asset = Asset {
        url: "\\\\fs01\\docs\\inventory.bin".into(),
        mime_type: "application/octet-stream".into(),
        ..Default::default()
    };
    let document = UploadDocument::from(&asset);

    UploadPipeline::new(&api)
        .upload_asset(&asset, &document, 1024, 1)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["totalParts"], 1);
    assert_eq!(body["data"], "");
    assert_eq!(body["totalFileSize"], 0);
}

#[tokio::test]
async fn upload_document_carries_deduplicated_sorted_acls() {
    let server = MockServer::start().await;
    mount_upload_ok(&server).await;
    let (_tx, api) = client(&server);

    let asset = Asset {
        url: "u".into(),
        acls: vec![
            AssetAcl::user("zeta@example.com", "Z", "R"),
            AssetAcl::user("alpha@example.com", "A", "R"),
            AssetAcl::user("ALPHA@example.com", "a", "R"),
        ],
        ..Default::default()
    };
    let document = UploadDocument::from(&asset);

    UploadPipeline::new(&api)
        .upload_asset(&asset, &document, 1024, 1)
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    let acls = body["acls"].as_array().unwrap();
    assert_eq!(acls.len(), 2);
    assert_eq!(acls[0]["name"], "alpha@example.com");
    assert_eq!(acls[1]["name"], "zeta@example.com");
}
