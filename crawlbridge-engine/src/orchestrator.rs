//! The crawl control loop.
//!
//! One worker owns the whole cycle: wait for the schedule window, signal
//! run start, walk the tree, short-circuit unchanged assets against the
//! dedup cache, tag the rest with resolved ACLs, hand them to the upload
//! pipeline, signal completion with counters, and go back to waiting.
//! The stop flag is observed between files, between directories, and on
//! every wait tick, so a shutdown request lands within about a second.

use crate::error::{EngineError, EngineResult};
use crate::mime::{file_extension, MimePolicy};
use crate::resolver::{convert_acls, resolve_groups, well_known_groups, DirectoryGroup,
    DirectoryService, DirectoryUser};
use crate::schedule;
use crate::walker::{FileEntry, FileProvider};
use chrono::Utc;
use crawlbridge_cache::DedupCache;
use crawlbridge_client::{ApiClient, Asset, Source, UploadDocument, UploadPipeline};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const LAST_MODIFIED_PREFIX: &str = "last-modified-";
const META_CREATED_KEY: &str = "{created}";
const META_LAST_MODIFIED_KEY: &str = "{lastmod}";

/// Crawl lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrawlState {
    Idle,
    Waiting,
    Running,
    Finished,
    Crashed,
}

/// Tunables for the control loop.
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// Recursion bound for the directory walk.
    pub max_depth: u32,
    /// Lifespan of dedup cache entries.
    pub cache_lifespan_millis: i64,
    /// How often the schedule and Source are re-evaluated while waiting.
    pub wait_poll: Duration,
    /// Granularity at which waits observe the stop flag.
    pub wait_tick: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_depth: 100,
            cache_lifespan_millis: 365 * 24 * 3_600_000,
            wait_poll: Duration::from_secs(10),
            wait_tick: Duration::from_secs(1),
        }
    }
}

/// Top-level crawl orchestrator.
pub struct CrawlOrchestrator {
    api: Arc<ApiClient>,
    cache: Option<DedupCache>,
    provider: Arc<dyn FileProvider>,
    directory: Option<Arc<dyn DirectoryService>>,
    mime: Arc<dyn MimePolicy>,
    config: OrchestratorConfig,
    stop_rx: watch::Receiver<bool>,

    state: CrawlState,
    /// True from run start until completion; gates the restart handshake.
    running: bool,
    run_id: i64,
    num_files_seen: i64,
    num_files_uploaded: i64,
    num_errors: i32,

    users: HashMap<String, DirectoryUser>,
    groups: HashMap<String, DirectoryGroup>,
}

impl CrawlOrchestrator {
    pub fn new(
        api: Arc<ApiClient>,
        cache: Option<DedupCache>,
        provider: Arc<dyn FileProvider>,
        directory: Option<Arc<dyn DirectoryService>>,
        mime: Arc<dyn MimePolicy>,
        config: OrchestratorConfig,
        stop_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            api,
            cache,
            provider,
            directory,
            mime,
            config,
            stop_rx,
            state: CrawlState::Idle,
            running: false,
            run_id: Utc::now().timestamp_millis(),
            num_files_seen: 0,
            num_files_uploaded: 0,
            num_errors: 0,
            users: HashMap::new(),
            groups: HashMap::new(),
        }
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    pub fn counters(&self) -> (i64, i64, i32) {
        (self.num_files_seen, self.num_files_uploaded, self.num_errors)
    }

    /// The crawl-and-wait cycle. Returns when stopped, after one run if
    /// the config says to exit then, or on a fatal error.
    pub async fn run(&mut self) -> EngineResult<()> {
        let source = self.api.source().await?;
        if !source.is_external {
            return Err(EngineError::Config(format!(
                "{source} is not set up as an external crawler"
            )));
        }

        loop {
            if self.stopped() {
                break;
            }

            self.state = CrawlState::Waiting;
            if !self.wait_until_ready().await? {
                break;
            }

            match self.crawl_once().await {
                Ok(true) => self.state = CrawlState::Finished,
                // A clean stop request ends the run without marking it
                // crashed; anything else that cut the walk short does.
                Ok(false) if self.stopped() => self.state = CrawlState::Finished,
                Ok(false) => self.state = CrawlState::Crashed,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!("crawl run failed: {e}");
                    self.num_errors += 1;
                    self.state = CrawlState::Crashed;
                }
            }
            self.running = false;

            // Completion state is signalled for crashed runs too.
            self.finish_run().await;

            if self.api.config().exit_after_run {
                info!("exit after run finished (exit_after_run=true)");
                break;
            }
        }
        Ok(())
    }

    // ── Run lifecycle ───────────────────────────────────────────

    /// One complete run: start signal, cache sweep, directory fetch, and
    /// the recursive walk. `Ok(false)` means the walk was cut short.
    async fn crawl_once(&mut self) -> EngineResult<bool> {
        self.state = CrawlState::Running;
        let source = self.api.source().await?;

        if let Some(cache) = &self.cache {
            cache.sweep()?;
        }

        self.run_id = Utc::now().timestamp_millis();
        info!("{source}, starting a new run for {}", self.run_id);
        self.api.signal_crawler_start(self.run_id).await?;

        self.num_files_seen = 0;
        self.num_files_uploaded = 0;
        self.num_errors = 0;
        self.running = true;

        let start_path = self.provider.connect(&source).await?;
        self.setup_directory().await?;

        info!("{}: file crawler starting", source.name);
        self.crawl_directory(&start_path, 0).await
    }

    /// Fetches users and groups and flattens group membership. A failure
    /// here is a critical setup failure that aborts the run.
    async fn setup_directory(&mut self) -> EngineResult<()> {
        let Some(service) = self.directory.clone() else {
            return Ok(());
        };
        info!("connecting to the directory service");

        let users = service.fetch_users().await?;
        let mut groups = service.fetch_groups().await?;
        groups.extend(well_known_groups());

        self.users = users
            .into_iter()
            .map(|u| (u.identity.trim().to_lowercase(), u))
            .collect();

        resolve_groups(&mut groups, &self.users);
        self.groups = groups
            .into_iter()
            .map(|g| (g.identity.trim().to_lowercase(), g))
            .collect();

        info!(
            "directory loaded: {} users, {} groups",
            self.users.len(),
            self.groups.len()
        );
        Ok(())
    }

    /// Signals run completion with the counters, best effort.
    async fn finish_run(&mut self) {
        let name = self
            .api
            .source()
            .await
            .map(|s| s.name)
            .unwrap_or_default();
        if self.num_files_seen > 0 {
            info!("{name}, finished runId {}", self.run_id);
        } else {
            warn!("crawler \"{name}\" didn't get any files, has finished run {}", self.run_id);
        }
        if let Err(e) = self
            .api
            .signal_crawler_finished(self.run_id, self.num_errors, self.num_files_seen)
            .await
        {
            error!("signal_crawler_finished(): {e}");
        }

        if let Ok(source) = self.api.source().await {
            if source.transmit_external_logs {
                let entry = format!(
                    "run {} finished: seen={} uploaded={} errors={}",
                    self.run_id, self.num_files_seen, self.num_files_uploaded, self.num_errors
                );
                self.api.transmit_log_entry(&entry).await;
            }
        }
    }

    // ── Schedule gate ───────────────────────────────────────────

    /// Waits until the schedule permits a run. Returns `Ok(false)` when
    /// stopped or when the source stops being external. Re-derives the
    /// wait whenever the Source changes mid-wait and restarts the
    /// run-signal handshake on an idle-to-active transition.
    async fn wait_until_ready(&mut self) -> EngineResult<bool> {
        let mut current_schedule = effective_schedule(&self.api.source().await?);
        let mut last_logged = String::new();

        loop {
            if self.stopped() {
                return Ok(false);
            }
            let source = self.api.source().await?;
            if !source.is_external {
                self.running = false;
                return Ok(false);
            }

            let hours = schedule::wait_hours(
                &schedule::current_slot(),
                &effective_schedule(&source),
            );
            if hours <= 0 {
                return Ok(true);
            }

            let pretty = pretty_hours(hours);
            if pretty != last_logged {
                info!("{}: waiting {pretty} as per schedule", source.name);
                last_logged = pretty;
            }

            // Observe the stop flag every tick, the Source every poll.
            let ticks = (self.config.wait_poll.as_millis()
                / self.config.wait_tick.as_millis().max(1))
            .max(1);
            for _ in 0..ticks {
                if !self.sleep_or_stop(self.config.wait_tick).await {
                    return Ok(false);
                }
            }

            self.api.refresh_source_if_due().await;
            let refreshed = effective_schedule(&self.api.source().await?);
            if refreshed != current_schedule {
                current_schedule = refreshed;
                // The schedule changed: this crawler is no longer
                // "finished"; re-open the run handshake.
                if !self.running {
                    if let Err(e) = self.api.signal_crawler_start(self.run_id).await {
                        warn!("signal_crawler_start(): {e}");
                    }
                    self.running = true;
                }
            }
        }
    }

    // ── Directory walk ──────────────────────────────────────────

    /// Recursive walk, depth-bounded against runaway symlink loops.
    /// `Ok(false)` aborts the run; per-directory access failures below
    /// the root are logged and skipped.
    fn crawl_directory<'a>(
        &'a mut self,
        dir: &'a str,
        depth: u32,
    ) -> Pin<Box<dyn Future<Output = EngineResult<bool>> + Send + 'a>> {
        Box::pin(async move {
            if depth > self.config.max_depth {
                return Ok(true);
            }

            let files = match self.provider.list_files(dir).await {
                Ok(files) => files,
                Err(e @ EngineError::FileAccess { .. }) => {
                    error!("{e}");
                    return Ok(depth != 0);
                }
                Err(e) => return Err(e),
            };
            for file in files {
                if !self.process_file(&file).await? {
                    return Ok(false);
                }
                if self.stopped() {
                    return Ok(false);
                }
            }

            let dirs = match self.provider.list_dirs(dir).await {
                Ok(dirs) => dirs,
                Err(e @ EngineError::FileAccess { .. }) => {
                    error!("{e}");
                    return Ok(depth != 0);
                }
                Err(e) => return Err(e),
            };
            for sub in dirs {
                if !self.crawl_directory(&sub, depth + 1).await? {
                    return Ok(false);
                }
                if self.stopped() {
                    return Ok(false);
                }
            }

            Ok(!self.stopped())
        })
    }

    /// One file. Per-file failures are logged, recorded against the run,
    /// and the walk continues.
    async fn process_file(&mut self, path: &str) -> EngineResult<bool> {
        match self.process_file_inner(path).await {
            Ok(keep_going) => Ok(keep_going),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                error!("process_file({path}): {e}");
                self.num_errors += 1;
                if let Err(record_err) = self
                    .api
                    .record_exception_asset(path, &e.to_string(), "", "", self.run_id)
                    .await
                {
                    warn!("record_exception_asset({path}): {record_err}");
                } else {
                    self.num_files_seen += 1;
                }
                Ok(true)
            }
        }
    }

    async fn process_file_inner(&mut self, path: &str) -> EngineResult<bool> {
        let source = self.api.source().await?;
        if self.capacity_exceeded(&source) {
            return Ok(true);
        }

        let entry = match self.provider.file_entry(path).await {
            Ok(entry) => entry,
            Err(e @ EngineError::FileAccess { .. }) => {
                error!("{e}");
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        debug!("processing file: {path}");
        let mut asset = self.convert_to_asset(&entry);

        if !self.last_modified_has_changed(&asset).await? {
            return Ok(true);
        }

        // Stage content now; whether it is transmitted is decided later.
        if entry.size > 0 && !self.is_inventory_only(&source, &asset) {
            asset.filename = self.provider.stage_file(path).await?;
        }
        self.process_asset(asset).await
    }

    /// Validation, dedup, inventory gating, and upload for one asset.
    async fn process_asset(&mut self, mut asset: Asset) -> EngineResult<bool> {
        // Capacity counts attempts, uploaded or not.
        self.num_files_uploaded += 1;

        self.api.refresh_source_if_due().await;

        if asset.url.trim().is_empty() {
            error!("process_asset: asset url is empty, ignoring");
            asset.remove_temp_file().await;
            return Ok(true);
        }

        // The schedule window may have closed mid-run.
        if !self.wait_until_ready().await? {
            asset.remove_temp_file().await;
            return Ok(false);
        }

        let source = self.api.source().await?;
        if self.capacity_exceeded(&source) {
            asset.remove_temp_file().await;
            return Ok(true);
        }

        // Rate limit: historical field, actually millis between uploads.
        if source.files_per_second > 1.0 {
            if !self
                .sleep_or_stop(Duration::from_millis(source.files_per_second as u64))
                .await
            {
                asset.remove_temp_file().await;
                return Ok(false);
            }
        }

        let change_hash = asset.change_hash().await;
        let unchanged = match &self.cache {
            Some(cache) => cache.get(&asset.url)? == change_hash,
            None => false,
        };
        if unchanged {
            // In the cache and unchanged: just mark it as processed.
            asset.remove_temp_file().await;
            self.mark_seen(&asset).await?;
            return Ok(true);
        }
        if let Some(cache) = &self.cache {
            cache.set(
                &format!("{LAST_MODIFIED_PREFIX}{}", asset.url),
                &asset.last_modified.to_string(),
                self.config.cache_lifespan_millis,
            )?;
            cache.set(&asset.url, &change_hash, self.config.cache_lifespan_millis)?;
        }

        // Inventory-only assets never transmit their binary.
        if self.is_inventory_only(&source, &asset) {
            asset.remove_temp_file().await;
        }

        self.num_files_seen += 1;
        let mut document = UploadDocument::from(&asset);
        document.change_hash = change_hash;
        document.inventory_only = self.is_inventory_only(&source, &asset);

        let max_size = self.mime.max_size_in_bytes(&asset.mime_type);
        UploadPipeline::new(&self.api)
            .upload_asset(&asset, &document, max_size, self.run_id)
            .await?;
        Ok(true)
    }

    // ── Helpers ─────────────────────────────────────────────────

    fn convert_to_asset(&self, entry: &FileEntry) -> Asset {
        let mut asset = Asset {
            url: entry.path.clone(),
            mime_type: self
                .mime
                .mime_type_for_extension(&file_extension(&entry.path)),
            binary_size: entry.size,
            created: entry.created,
            last_modified: entry.last_modified,
            ..Default::default()
        };
        asset.acls = convert_acls(&entry.aces, &self.users, &self.groups);
        asset.metadata.insert(
            META_CREATED_KEY.to_string(),
            format_timestamp(entry.created),
        );
        asset.metadata.insert(
            META_LAST_MODIFIED_KEY.to_string(),
            format_timestamp(entry.last_modified),
        );
        asset
    }

    /// The cheap staleness check on the last-modified timestamp. An
    /// unchanged asset is marked as seen and skipped.
    async fn last_modified_has_changed(&mut self, asset: &Asset) -> EngineResult<bool> {
        let key = format!("{LAST_MODIFIED_PREFIX}{}", asset.url);
        let cached = match &self.cache {
            Some(cache) => cache.get(&key)?,
            None => return Ok(true),
        };
        if cached.is_empty() {
            return Ok(true);
        }
        if cached == asset.last_modified.to_string() {
            self.mark_seen(asset).await?;
            return Ok(false);
        }
        if let Some(cache) = &self.cache {
            cache.set(
                &key,
                &asset.last_modified.to_string(),
                self.config.cache_lifespan_millis,
            )?;
        }
        Ok(true)
    }

    async fn mark_seen(&mut self, asset: &Asset) -> EngineResult<()> {
        self.api.mark_file_as_seen(asset, self.run_id).await?;
        self.num_files_seen += 1;
        Ok(())
    }

    fn is_inventory_only(&self, source: &Source, asset: &Asset) -> bool {
        if asset.binary_size > self.mime.max_size_in_bytes(&asset.mime_type) {
            return true;
        }
        if asset.binary_size <= 0 {
            return true;
        }
        if !self.mime.is_valid(&asset.mime_type) {
            return true;
        }
        source.is_inventory_only(&asset.mime_type)
    }

    fn capacity_exceeded(&self, source: &Source) -> bool {
        if source.max_items > 0 && self.num_files_uploaded >= source.max_items {
            debug!(
                "crawler \"{}\" has exceeded maximum-capacity of {}, stopping crawl",
                source.name, source.max_items
            );
            return true;
        }
        false
    }

    fn stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Sleeps for `duration`; false when the stop flag flipped instead.
    async fn sleep_or_stop(&mut self, duration: Duration) -> bool {
        if self.stopped() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.stop_rx.wait_for(|stop| *stop) => false,
        }
    }
}

fn effective_schedule(source: &Source) -> String {
    if source.schedule_enable {
        source.schedule.clone()
    } else {
        String::new()
    }
}

fn format_timestamp(epoch_millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Human-readable wait time for the schedule log line.
fn pretty_hours(hours: i64) -> String {
    match hours {
        h if h <= 0 => "less than an hour".to_string(),
        1 => "one hour".to_string(),
        h if h < 24 => format!("{h} hours"),
        h if h / 24 >= 360 => "indefinitely".to_string(),
        h if h / 24 == 1 => "one day".to_string(),
        h => format!("{} days", h / 24),
    }
}
