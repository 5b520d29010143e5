use async_trait::async_trait;
use crawlbridge_cache::DedupCache;
use crawlbridge_client::{ApiClient, ClientConfig, Source};
use crawlbridge_engine::{
    schedule, AceAccess, AceType, AccessControlEntry, CrawlOrchestrator, CrawlState,
    DirectoryGroup, DirectoryService, DirectoryUser, EngineError, EngineResult, FileEntry,
    FileProvider, LocalFileProvider, OrchestratorConfig, StandardMimePolicy,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn source_json(schedule_slots: &str, max_items: i64) -> serde_json::Value {
    json!({
        "sourceId": 7,
        "organisationId": "org-1",
        "kbId": "kb-1",
        "name": "file share",
        "crawlerType": "file",
        "schedule": schedule_slots,
        "scheduleEnable": true,
        "isExternal": true,
        "maxItems": max_items,
        "specificJson": ""
    })
}

async fn mount_platform(server: &MockServer, source: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/api/crawler/external/crawler"))
        .respond_with(ResponseTemplate::new(200).set_body_json(source))
        .mount(server)
        .await;
    for endpoint in [
        "/api/crawler/external/crawler/start",
        "/api/crawler/external/crawler/finish",
        "/api/crawler/external/crawler/mark-file-as-seen",
        "/api/crawler/external/document/upload",
        "/api/crawler/external/document/recordfailure",
    ] {
        Mock::given(method("POST"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(server)
            .await;
    }
}

fn test_client(server: &MockServer, exit_after_run: bool) -> (watch::Sender<bool>, Arc<ApiClient>) {
    let config = ClientConfig {
        endpoint: format!("{}/api", server.uri()),
        organisation_id: "org-1".into(),
        kb_id: "kb-1".into(),
        sid: "sid-1".into(),
        source_id: 7,
        exit_after_run,
        network_retry_interval: Duration::from_millis(50),
        ..Default::default()
    };
    let (tx, rx) = watch::channel(false);
    (tx, Arc::new(ApiClient::new(config, None, rx).unwrap()))
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        wait_poll: Duration::from_millis(100),
        wait_tick: Duration::from_millis(10),
        ..Default::default()
    }
}

fn orchestrator(
    api: Arc<ApiClient>,
    cache: DedupCache,
    root: &std::path::Path,
) -> (watch::Sender<bool>, CrawlOrchestrator) {
    let (tx, rx) = watch::channel(false);
    let orch = CrawlOrchestrator::new(
        api,
        Some(cache),
        Arc::new(LocalFileProvider::new(root)),
        None,
        Arc::new(StandardMimePolicy::default()),
        fast_config(),
        rx,
    );
    (tx, orch)
}

fn build_tree(dir: &std::path::Path) {
    std::fs::write(dir.join("a.txt"), b"alpha file content").unwrap();
    std::fs::create_dir(dir.join("sub")).unwrap();
    std::fs::write(dir.join("sub").join("b.txt"), b"beta file content").unwrap();
    // Unknown extension: metadata goes up, the binary stays home.
    std::fs::write(dir.join("c.xyz"), b"opaque").unwrap();
}

fn requests_for<'a>(
    requests: &'a [wiremock::Request],
    suffix: &str,
) -> Vec<&'a wiremock::Request> {
    requests
        .iter()
        .filter(|r| r.url.path().ends_with(suffix))
        .collect()
}

#[tokio::test]
async fn first_run_uploads_everything_and_signals_lifecycle() {
    let server = MockServer::start().await;
    mount_platform(&server, source_json(&schedule::current_slot(), 0)).await;

    let tree = tempfile::tempdir().unwrap();
    build_tree(tree.path());
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = DedupCache::open(&cache_dir.path().join("cache.db")).unwrap();

    let (_client_tx, api) = test_client(&server, true);
    let (_tx, mut orch) = orchestrator(api, cache, tree.path());

    orch.run().await.unwrap();
    assert_eq!(orch.state(), CrawlState::Finished);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests_for(&requests, "/crawler/start").len(), 1);
    assert_eq!(requests_for(&requests, "/crawler/finish").len(), 1);

    let uploads = requests_for(&requests, "/document/upload");
    assert_eq!(uploads.len(), 3);

    // Content travels for the known types, not for the unknown one.
    for upload in &uploads {
        let body: serde_json::Value = serde_json::from_slice(&upload.body).unwrap();
        let url = body["url"].as_str().unwrap();
        let data = body["data"].as_str().unwrap();
        if url.ends_with("c.xyz") {
            assert_eq!(data, "", "inventory-only asset must not carry content");
        } else {
            assert!(data.starts_with(";base64,"), "{url} should carry content");
        }
        assert_eq!(body["totalParts"], 1);
        assert!(!body["changeHash"].as_str().unwrap().is_empty());
    }

    let finish: serde_json::Value =
        serde_json::from_slice(&requests_for(&requests, "/crawler/finish")[0].body).unwrap();
    assert_eq!(finish["numFilesSeen"], 3);
    assert_eq!(finish["numErrors"], 0);

    let (seen, uploaded, errors) = orch.counters();
    assert_eq!(seen, 3);
    assert_eq!(uploaded, 3);
    assert_eq!(errors, 0);
}

#[tokio::test]
async fn second_run_marks_unchanged_files_as_seen() {
    let tree = tempfile::tempdir().unwrap();
    build_tree(tree.path());
    let cache_dir = tempfile::tempdir().unwrap();
    let cache_path = cache_dir.path().join("cache.db");

    // First run populates the cache.
    {
        let server = MockServer::start().await;
        mount_platform(&server, source_json(&schedule::current_slot(), 0)).await;
        let (_client_tx, api) = test_client(&server, true);
        let cache = DedupCache::open(&cache_path).unwrap();
        let (_tx, mut orch) = orchestrator(api, cache, tree.path());
        orch.run().await.unwrap();
    }

    // Second run over the same unchanged tree.
    let server = MockServer::start().await;
    mount_platform(&server, source_json(&schedule::current_slot(), 0)).await;
    let (_client_tx, api) = test_client(&server, true);
    let cache = DedupCache::open(&cache_path).unwrap();
    let (_tx, mut orch) = orchestrator(api, cache, tree.path());
    orch.run().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests_for(&requests, "/document/upload").len(), 0);
    assert_eq!(
        requests_for(&requests, "/crawler/mark-file-as-seen").len(),
        3
    );

    let (seen, _uploaded, errors) = orch.counters();
    assert_eq!(seen, 3);
    assert_eq!(errors, 0);
}

#[tokio::test]
async fn modified_file_is_reuploaded() {
    let tree = tempfile::tempdir().unwrap();
    build_tree(tree.path());
    let cache_dir = tempfile::tempdir().unwrap();
    let cache_path = cache_dir.path().join("cache.db");

    {
        let server = MockServer::start().await;
        mount_platform(&server, source_json(&schedule::current_slot(), 0)).await;
        let (_client_tx, api) = test_client(&server, true);
        let cache = DedupCache::open(&cache_path).unwrap();
        let (_tx, mut orch) = orchestrator(api, cache, tree.path());
        orch.run().await.unwrap();
    }

    // Touch one file with new content and a new mtime.
    std::thread::sleep(Duration::from_millis(1100));
    std::fs::write(tree.path().join("a.txt"), b"alpha file content v2").unwrap();

    let server = MockServer::start().await;
    mount_platform(&server, source_json(&schedule::current_slot(), 0)).await;
    let (_client_tx, api) = test_client(&server, true);
    let cache = DedupCache::open(&cache_path).unwrap();
    let (_tx, mut orch) = orchestrator(api, cache, tree.path());
    orch.run().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let uploads = requests_for(&requests, "/document/upload");
    assert_eq!(uploads.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&uploads[0].body).unwrap();
    assert!(body["url"].as_str().unwrap().ends_with("a.txt"));
}

#[tokio::test]
async fn capacity_soft_stops_uploads_but_finishes_the_run() {
    let server = MockServer::start().await;
    mount_platform(&server, source_json(&schedule::current_slot(), 1)).await;

    let tree = tempfile::tempdir().unwrap();
    build_tree(tree.path());
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = DedupCache::open(&cache_dir.path().join("cache.db")).unwrap();

    let (_client_tx, api) = test_client(&server, true);
    let (_tx, mut orch) = orchestrator(api, cache, tree.path());

    orch.run().await.unwrap();
    assert_eq!(orch.state(), CrawlState::Finished);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests_for(&requests, "/document/upload").len(), 1);
    assert_eq!(requests_for(&requests, "/crawler/finish").len(), 1);
}

#[tokio::test]
async fn empty_schedule_waits_and_stop_is_observed() {
    let server = MockServer::start().await;
    mount_platform(&server, source_json("", 0)).await;

    let tree = tempfile::tempdir().unwrap();
    build_tree(tree.path());
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = DedupCache::open(&cache_dir.path().join("cache.db")).unwrap();

    let (_client_tx, api) = test_client(&server, false);
    let (stop_tx, mut orch) = orchestrator(api, cache, tree.path());

    let handle = tokio::spawn(async move {
        orch.run().await.unwrap();
        orch
    });
    tokio::time::sleep(Duration::from_millis(150)).await;
    stop_tx.send(true).unwrap();

    let orch = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("orchestrator must stop promptly")
        .unwrap();

    // Never entered a run: nothing was uploaded.
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests_for(&requests, "/document/upload").len(), 0);
    assert_eq!(requests_for(&requests, "/crawler/start").len(), 0);
    let (seen, uploaded, _errors) = orch.counters();
    assert_eq!(seen, 0);
    assert_eq!(uploaded, 0);
}

/// Local tree plus a fixed Allow ACE on every file, standing in for a
/// share protocol that reports real access control.
struct AclProvider {
    inner: LocalFileProvider,
}

#[async_trait]
impl FileProvider for AclProvider {
    async fn connect(&self, source: &Source) -> EngineResult<String> {
        self.inner.connect(source).await
    }
    async fn list_files(&self, dir: &str) -> EngineResult<Vec<String>> {
        self.inner.list_files(dir).await
    }
    async fn list_dirs(&self, dir: &str) -> EngineResult<Vec<String>> {
        self.inner.list_dirs(dir).await
    }
    async fn file_entry(&self, path: &str) -> EngineResult<FileEntry> {
        let mut entry = self.inner.file_entry(path).await?;
        entry.aces = vec![
            AccessControlEntry {
                identity: "SIMSAGE\\rock".into(),
                ace_type: AceType::Domain,
                access: AceAccess::Allow,
                is_inherited: false,
            },
            AccessControlEntry {
                identity: "SIMSAGE\\blocked".into(),
                ace_type: AceType::Domain,
                access: AceAccess::Deny,
                is_inherited: false,
            },
        ];
        Ok(entry)
    }
    async fn stage_file(&self, path: &str) -> EngineResult<String> {
        self.inner.stage_file(path).await
    }
}

struct FakeDirectory;

#[async_trait]
impl DirectoryService for FakeDirectory {
    async fn fetch_users(&self) -> EngineResult<Vec<DirectoryUser>> {
        Ok(vec![DirectoryUser {
            identity: "simsage\\rock".into(),
            sam_account_name: "rock".into(),
            display_name: "Rock de Vocht".into(),
            email: "rock@example.com".into(),
            ..Default::default()
        }])
    }
    async fn fetch_groups(&self) -> EngineResult<Vec<DirectoryGroup>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn uploads_carry_resolved_acls() {
    let server = MockServer::start().await;
    mount_platform(&server, source_json(&schedule::current_slot(), 0)).await;

    let tree = tempfile::tempdir().unwrap();
    std::fs::write(tree.path().join("a.txt"), b"secured content").unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = DedupCache::open(&cache_dir.path().join("cache.db")).unwrap();

    let (_client_tx, api) = test_client(&server, true);
    let (_tx, rx) = watch::channel(false);
    let mut orch = CrawlOrchestrator::new(
        api,
        Some(cache),
        Arc::new(AclProvider {
            inner: LocalFileProvider::new(tree.path()),
        }),
        Some(Arc::new(FakeDirectory)),
        Arc::new(StandardMimePolicy::default()),
        fast_config(),
        rx,
    );
    orch.run().await.unwrap();

    let requests = server.received_requests().await.unwrap();
    let uploads = requests_for(&requests, "/document/upload");
    assert_eq!(uploads.len(), 1);
    let body: serde_json::Value = serde_json::from_slice(&uploads[0].body).unwrap();
    let acls = body["acls"].as_array().unwrap();
    // The Deny entry is filtered; the Allow entry resolves to the email.
    assert_eq!(acls.len(), 1);
    assert_eq!(acls[0]["name"], "rock@example.com");
    assert_eq!(acls[0]["displayName"], "Rock de Vocht");
    assert_eq!(acls[0]["access"], "R");
    assert_eq!(acls[0]["isUser"], true);
}

#[tokio::test]
async fn non_external_source_is_a_setup_error() {
    let server = MockServer::start().await;
    let mut source = source_json(&schedule::current_slot(), 0);
    source["isExternal"] = json!(false);
    mount_platform(&server, source).await;

    let tree = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let cache = DedupCache::open(&cache_dir.path().join("cache.db")).unwrap();

    let (_client_tx, api) = test_client(&server, true);
    let (_tx, mut orch) = orchestrator(api, cache, tree.path());

    let err = orch.run().await.unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}
