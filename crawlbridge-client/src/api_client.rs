//! HTTP client for the platform crawler API.
//!
//! Every operation is a JSON command object POSTed to a
//! `/crawler/external/*` path. With encryption enabled the body is
//! wrapped in the crypto envelope under a per-call session key: a fresh
//! random i32 offset picks the key from the shared-secret buffer and is
//! carried to the server in the `/crawler/external/secure/{offset}` path
//! so it can derive the same key.
//!
//! Failure handling is part of the protocol: HTTP 401 is fatal and never
//! retried; an unreachable server is retried indefinitely at a fixed
//! interval with the cancellation flag checked on every iteration; every
//! other failure propagates wrapped with the call name and URL.

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::types::{Asset, RenameFolder, Source, UploadDocument};
use crawlbridge_crypto::{decrypt, encrypt, SharedSecrets};
use chrono::Utc;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

const SECURE_PATH: &str = "/crawler/external/secure";

/// Cached Source plus its refresh deadline.
struct SourceState {
    source: Option<Source>,
    next_refresh_at: i64,
}

/// Stateless RPC helper for the platform crawler protocol.
///
/// "Stateless" on the wire — the only held state is the cached Source
/// config and the HTTP connection pool.
pub struct ApiClient {
    client: Client,
    config: ClientConfig,
    secrets: Option<Arc<SharedSecrets>>,
    /// Stop flag: flips to true when shutdown is requested.
    stop_rx: watch::Receiver<bool>,
    state: RwLock<SourceState>,
}

impl ApiClient {
    /// Builds a client. `secrets` must be present when the config enables
    /// encryption.
    pub fn new(
        config: ClientConfig,
        secrets: Option<Arc<SharedSecrets>>,
        stop_rx: watch::Receiver<bool>,
    ) -> ClientResult<Self> {
        config.validate()?;
        if config.use_encryption && secrets.is_none() {
            return Err(ClientError::Config(
                "encryption enabled but no shared secrets supplied".into(),
            ));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Ok(Self {
            client,
            config,
            secrets,
            stop_rx,
            state: RwLock::new(SourceState {
                source: None,
                next_refresh_at: 0,
            }),
        })
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    // ── Source config ───────────────────────────────────────────

    /// Returns the cached Source, fetching it on first use.
    pub async fn source(&self) -> ClientResult<Source> {
        if let Some(source) = self.state.read().await.source.clone() {
            return Ok(source);
        }
        self.fetch_source().await
    }

    /// Replaces the cached Source (used by tests and delta updates).
    pub async fn set_source(&self, source: Source) {
        self.state.write().await.source = Some(source);
    }

    /// Re-fetches the Source when the refresh interval has elapsed.
    /// Fetch failures are logged and the stale copy kept.
    pub async fn refresh_source_if_due(&self) {
        let due = self.state.read().await.next_refresh_at < Utc::now().timestamp_millis();
        if due {
            if let Err(e) = self.fetch_source().await {
                warn!("source refresh failed: {e}");
            }
        }
    }

    /// Fetches the Source config from the platform.
    pub async fn fetch_source(&self) -> ClientResult<Source> {
        debug!("fetch_source()");
        let body = self.base_map("CMExternalCrawler");
        let value = self
            .post_call("fetch_source", "/crawler/external/crawler", body)
            .await?;
        let source: Source = serde_json::from_value(value)?;

        if source.crawler_type != self.config.crawler_type {
            return Err(ClientError::Config(format!(
                "source type incorrect, expected \"{}\" but got \"{}\"",
                self.config.crawler_type, source.crawler_type
            )));
        }

        let mut state = self.state.write().await;
        state.source = Some(source.clone());
        state.next_refresh_at = Utc::now().timestamp_millis()
            + self.config.source_refresh_interval.as_millis() as i64;
        Ok(source)
    }

    // ── Delta cursor ────────────────────────────────────────────

    /// Pushes the delta continuation token onto the Source.
    pub async fn set_delta_state(&self, delta_indicator: &str) -> ClientResult<()> {
        debug!("set_delta_state({delta_indicator})");
        let mut body = self.base_map("CMExternalCrawlerSetDeltaToken");
        body.insert("deltaToken".into(), json!(delta_indicator));
        self.post_call(
            "set_delta_state",
            "/crawler/external/crawler/delta-token",
            body,
        )
        .await?;

        if let Some(source) = self.state.write().await.source.as_mut() {
            source.delta_indicator = delta_indicator.to_string();
        }
        Ok(())
    }

    /// The current delta continuation token.
    pub async fn delta_state(&self) -> String {
        self.state
            .read()
            .await
            .source
            .as_ref()
            .map(|s| s.delta_indicator.clone())
            .unwrap_or_default()
    }

    // ── Asset reporting ─────────────────────────────────────────

    /// Marks a file as seen without re-sending its content.
    pub async fn mark_file_as_seen(&self, asset: &Asset, run_id: i64) -> ClientResult<()> {
        debug!("mark_file_as_seen(url={})", asset.url);
        // Seen files never carry data.
        let mut seen = asset.clone();
        seen.filename.clear();

        let mut body = self.base_map("CMExternalCrawlerMarkFileAsSeen");
        body.insert("runId".into(), json!(run_id));
        body.insert("asset".into(), serde_json::to_value(&seen)?);
        self.post_call(
            "mark_file_as_seen",
            "/crawler/external/crawler/mark-file-as-seen",
            body,
        )
        .await?;
        Ok(())
    }

    /// Records a per-asset failure against the current run.
    pub async fn record_exception_asset(
        &self,
        url: &str,
        error_message: &str,
        web_url: &str,
        delta_root_id: &str,
        run_id: i64,
    ) -> ClientResult<()> {
        if url.trim().is_empty() || run_id == 0 {
            return Err(ClientError::Config("invalid parameter(s)".into()));
        }
        debug!("record_exception_asset(url={url},exception={error_message},webUrl={web_url})");
        let mut body = self.base_map("CMFailedSourceDocument");
        body.insert("sourceSystemId".into(), json!(url));
        body.insert("webUrl".into(), json!(web_url));
        body.insert("deltaRootId".into(), json!(delta_root_id));
        body.insert("runId".into(), json!(run_id));
        body.insert("errorMessage".into(), json!(error_message));
        self.post_call(
            "record_exception_asset",
            "/crawler/external/document/recordfailure",
            body,
        )
        .await?;
        Ok(())
    }

    /// Deletes one document by URL.
    pub async fn delete_url(&self, url: &str) -> ClientResult<()> {
        debug!("delete_url({url})");
        let mut body = self.base_map("CMExternalCrawlerDeleteUrl");
        body.insert("url".into(), json!(url));
        self.post_call("delete_url", "/crawler/external/crawler/delete-url", body)
            .await?;
        Ok(())
    }

    /// Deletes a folder and everything beneath it.
    pub async fn delete_folder(&self, folder_url: &str) -> ClientResult<()> {
        debug!("delete_folder({folder_url})");
        let mut body = self.base_map("CMExternalCrawlerDeleteFolder");
        body.insert("folderUrl".into(), json!(folder_url));
        self.post_call(
            "delete_folder",
            "/crawler/external/crawler/delete-folder",
            body,
        )
        .await?;
        Ok(())
    }

    /// Reports renamed folders, one call per folder. Failures are logged
    /// and the batch continues; the first error is returned at the end.
    pub async fn rename_folders(&self, changed: &[RenameFolder]) -> ClientResult<()> {
        debug!("rename_folders(numFolders={})", changed.len());
        let mut first_err = None;
        for folder in changed {
            let mut body = self.base_map("CMExternalCrawlerRenameFolder");
            body.insert(
                "oldFolderNameUrl".into(),
                json!(folder.original_folder_name),
            );
            body.insert("newFolderNameUrl".into(), json!(folder.new_folder_name));
            body.insert(
                "acls".into(),
                serde_json::to_value(&folder.asset_acl_list)?,
            );
            if let Err(e) = self
                .post_call(
                    "rename_folders",
                    "/crawler/external/crawler/rename-folder",
                    body,
                )
                .await
            {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!("rename_folders({}): {e}", folder.original_folder_name);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ── Run lifecycle ───────────────────────────────────────────

    /// Signals the start of a crawl run.
    pub async fn signal_crawler_start(&self, run_id: i64) -> ClientResult<()> {
        debug!("signal_crawler_start(runId={run_id})");
        let mut body = self.base_map("CMExternalCrawlerStart");
        body.insert("runId".into(), json!(run_id));
        self.post_call(
            "signal_crawler_start",
            "/crawler/external/crawler/start",
            body,
        )
        .await?;
        Ok(())
    }

    /// Signals the end of a crawl run with its counters.
    pub async fn signal_crawler_finished(
        &self,
        run_id: i64,
        num_errors: i32,
        num_files_seen: i64,
    ) -> ClientResult<()> {
        debug!("signal_crawler_finished(runId={run_id},errors={num_errors},seen={num_files_seen})");
        let mut body = self.base_map("CMExternalCrawlerStop");
        body.insert("runId".into(), json!(run_id));
        body.insert("numErrors".into(), json!(num_errors));
        body.insert("numFilesSeen".into(), json!(num_files_seen));
        self.post_call(
            "signal_crawler_finished",
            "/crawler/external/crawler/finish",
            body,
        )
        .await?;
        Ok(())
    }

    // ── Upload ──────────────────────────────────────────────────

    /// Uploads one part of a document (or its metadata-only record).
    #[allow(clippy::too_many_arguments)]
    pub async fn upload_part(
        &self,
        document: &UploadDocument,
        part_id: u32,
        total_parts: u32,
        job_id: &str,
        total_file_size: i64,
        base64_data: &str,
        run_id: i64,
    ) -> ClientResult<()> {
        let mut body = self.base_map("CMUploadDocument");
        if let Value::Object(doc) = serde_json::to_value(document)? {
            body.extend(doc);
        }
        body.insert("runId".into(), json!(run_id));
        body.insert("partId".into(), json!(part_id));
        body.insert("totalParts".into(), json!(total_parts));
        body.insert("jobId".into(), json!(job_id));
        body.insert("totalFileSize".into(), json!(total_file_size));
        body.insert("data".into(), json!(base64_data));
        self.post_call("upload_part", "/crawler/external/document/upload", body)
            .await?;
        Ok(())
    }

    // ── Diagnostics relay ───────────────────────────────────────

    /// Relays a crawler log entry to the platform. Best effort: failures
    /// go to stderr so they cannot loop back through the logger.
    pub async fn transmit_log_entry(&self, log_entry: &str) {
        let mut body = self.base_map("CMExternalLogEntry");
        body.insert("logEntry".into(), json!(log_entry));
        if let Err(e) = self
            .post_call("transmit_log_entry", "/crawler/external/crawler/log", body)
            .await
        {
            eprintln!("transmit_log_entry(): {e}");
        }
    }

    // ── Internals ───────────────────────────────────────────────

    /// The command fields every call carries.
    fn base_map(&self, object_type: &str) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("objectType".into(), json!(object_type));
        map.insert("organisationId".into(), json!(self.config.organisation_id));
        map.insert("kbId".into(), json!(self.config.kb_id));
        map.insert("sid".into(), json!(self.config.sid));
        map.insert("sourceId".into(), json!(self.config.source_id));
        map
    }

    /// POSTs a command, retrying forever while the server is unreachable,
    /// and returns the decoded response object.
    async fn post_call(
        &self,
        call: &str,
        plain_path: &str,
        body: Map<String, Value>,
    ) -> ClientResult<Value> {
        let (url, session_key) = if self.config.use_encryption {
            let offset: i32 = rand::random();
            let secrets = self
                .secrets
                .as_ref()
                .expect("secrets presence checked at construction");
            (
                format!("{}{SECURE_PATH}/{offset}", self.config.endpoint),
                Some(secrets.session_key_for_offset(offset)),
            )
        } else {
            (format!("{}{plain_path}", self.config.endpoint), None)
        };

        let payload = serde_json::to_string(&Value::Object(body))?;
        let wire_body = match &session_key {
            Some(key) => encrypt(&payload, key)?,
            None => payload,
        };

        let text = loop {
            match self.send_once(&url, &wire_body).await {
                Ok(text) => break text,
                Err(ClientError::Connectivity(reason)) => {
                    // Keep trying until the system comes back online; the
                    // stop flag is honored on every iteration.
                    warn!(
                        "server not reachable ({reason}), trying again in {}s",
                        self.config.network_retry_interval.as_secs()
                    );
                    self.sleep_or_cancel(self.config.network_retry_interval)
                        .await?;
                }
                Err(e) => return Err(self.wrap_call_error(call, &url, e)),
            }
        };

        let decoded = match &session_key {
            Some(key) if !text.trim().is_empty() => decrypt(&text, key)
                .map_err(|e| self.wrap_call_error(call, &url, e.into()))?,
            _ => text,
        };

        let value: Value = serde_json::from_str(&decoded)
            .map_err(|e| self.wrap_call_error(call, &url, e.into()))?;
        check_error_field(&value)?;
        Ok(value)
    }

    /// One POST attempt. Connection-level failures come back as
    /// `Connectivity`; everything else is final.
    async fn send_once(&self, url: &str, body: &str) -> ClientResult<String> {
        let response = self
            .client
            .post(url)
            .header("API-Version", &self.config.api_version)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ClientError::Connectivity(e.to_string())
                } else {
                    ClientError::Http(e)
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ClientError::Auth(url.to_string()));
        }
        if !status.is_success() {
            // Error bodies may still carry a JSON error object.
            let text = response.text().await.unwrap_or_default();
            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                if let Some(err) = non_empty_error(&value) {
                    return Err(ClientError::Protocol(format!("{err}: POST {status}")));
                }
            }
            return Err(ClientError::Protocol(format!("POST error {status}")));
        }

        Ok(response.text().await?)
    }

    /// Sleeps, returning `Cancelled` the moment the stop flag flips.
    async fn sleep_or_cancel(&self, duration: Duration) -> ClientResult<()> {
        let mut stop_rx = self.stop_rx.clone();
        if *stop_rx.borrow() {
            return Err(ClientError::Cancelled);
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = stop_rx.wait_for(|stop| *stop) => Err(ClientError::Cancelled),
        }
    }

    /// Adds the call name and URL to failures that lack context of their
    /// own; the fatal and crypto classes pass through untouched.
    fn wrap_call_error(&self, call: &str, url: &str, err: ClientError) -> ClientError {
        match err {
            ClientError::Auth(_) | ClientError::Cancelled | ClientError::Crypto(_) => err,
            other => ClientError::Protocol(format!("could not POST {url} (cmd:{call}): {other}")),
        }
    }
}

/// Returns the `error` field if it is a non-empty string.
fn non_empty_error(value: &Value) -> Option<&str> {
    value
        .get("error")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Responses carrying a non-empty `error` field are protocol errors.
fn check_error_field(value: &Value) -> ClientResult<()> {
    if let Some(err) = non_empty_error(value) {
        return Err(ClientError::Protocol(err.to_string()));
    }
    Ok(())
}
