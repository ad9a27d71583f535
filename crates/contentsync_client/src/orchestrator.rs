//! Sync orchestrator.
//!
//! Drives one run end to end:
//!
//! ```text
//! idle → checking → fetching-delta → syncing-assets → complete
//!           │                                    └──→ error
//!           └── offline / up to date ──→ complete
//! ```
//!
//! Overlapping callers share a single in-flight run. The run slot is a
//! `watch` channel owned by the orchestrator instance: the first caller
//! creates it and publishes the outcome; later callers subscribe and wait.

use crate::cache::{AssetState, CacheManager};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::retry::retry_with_backoff;
use crate::store::{BlobStore, KeyValueStore};
use crate::transport::ContentTransport;
use crate::version::VersionManager;
use contentsync_protocol::{
    AssetDescriptor, AssetManifestEntry, Checksum, ContentItem, DeltaRequest, SignBatchRequest,
    SignedUrl, VersionPointer,
};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The current state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No run has started yet.
    Idle,
    /// Comparing local and server versions.
    Checking,
    /// Fetching and applying the item delta.
    FetchingDelta,
    /// Signing and downloading assets.
    SyncingAssets,
    /// The last run finished (possibly with per-item failures).
    Complete,
    /// The last run aborted.
    Error,
}

impl SyncState {
    /// Returns true while a run is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Checking | SyncState::FetchingDelta | SyncState::SyncingAssets
        )
    }

    /// Returns true if a new run may start.
    pub fn can_start_sync(&self) -> bool {
        !self.is_active()
    }
}

/// Progress events for UI feedback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncProgress {
    /// The run entered a new phase.
    Phase(SyncState),
    /// The asset phase started materializing an item.
    Item {
        /// Item being materialized.
        item_id: String,
        /// 0-indexed position.
        index: usize,
        /// Items with assets to fetch in this run.
        total: usize,
    },
}

/// A per-item failure recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// The item that was not committed.
    pub item_id: String,
    /// The asset that failed, if the failure was asset-specific.
    pub path: Option<String>,
    /// What went wrong.
    pub error: SyncError,
}

/// Result of a sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Identifier of the run.
    pub run_id: Uuid,
    /// The server was unreachable and cached content was served.
    pub from_cache: bool,
    /// Items committed.
    pub items_updated: usize,
    /// Items removed.
    pub items_deleted: usize,
    /// Assets downloaded and verified.
    pub assets_downloaded: usize,
    /// Assets already cached with the expected checksum.
    pub assets_skipped: usize,
    /// Assets that could not be resolved.
    pub assets_failed: usize,
    /// Corrupted or missing assets restored.
    pub assets_healed: usize,
    /// Network calls made, including retries.
    pub api_calls: u64,
    /// Per-item failures.
    pub errors: Vec<ItemFailure>,
    /// Local version pointer after the run.
    pub local_version: Option<VersionPointer>,
    /// Wall-clock duration.
    pub duration: Duration,
}

impl SyncReport {
    /// Returns true if no item failed.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Statistics about sync runs.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Runs started by this instance.
    pub runs_started: u64,
    /// Callers joined to an in-flight run.
    pub runs_joined: u64,
    /// Runs that finished without failures.
    pub runs_succeeded: u64,
    /// Runs that aborted or recorded failures.
    pub runs_failed: u64,
    /// Runs served from cache.
    pub offline_runs: u64,
    /// Total items committed.
    pub items_updated: u64,
    /// Total items removed.
    pub items_deleted: u64,
    /// Total assets downloaded.
    pub assets_downloaded: u64,
    /// Last run identifier.
    pub last_run_id: Option<Uuid>,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

type RunOutcome = Option<SyncResult<SyncReport>>;
type RunSlot = Mutex<Option<watch::Receiver<RunOutcome>>>;

enum Flight {
    Lead(watch::Sender<RunOutcome>),
    Join(watch::Receiver<RunOutcome>),
}

/// Clears the run slot if the leading future is dropped before finishing.
struct SlotGuard<'a> {
    slot: &'a RunSlot,
    armed: bool,
}

impl SlotGuard<'_> {
    fn release(mut self) {
        self.slot.lock().take();
        self.armed = false;
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.slot.lock().take();
        }
    }
}

/// Ephemeral per-run counters.
struct SyncSession {
    run_id: Uuid,
    started: Instant,
    from_cache: bool,
    items_updated: usize,
    items_deleted: usize,
    assets_downloaded: usize,
    assets_skipped: usize,
    assets_failed: usize,
    assets_healed: usize,
    api_calls: u64,
    errors: Vec<ItemFailure>,
    failed_items: BTreeSet<String>,
}

impl SyncSession {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started: Instant::now(),
            from_cache: false,
            items_updated: 0,
            items_deleted: 0,
            assets_downloaded: 0,
            assets_skipped: 0,
            assets_failed: 0,
            assets_healed: 0,
            api_calls: 0,
            errors: Vec::new(),
            failed_items: BTreeSet::new(),
        }
    }

    fn fail(&mut self, item_id: &str, path: Option<&str>, error: SyncError) {
        warn!(
            run_id = %self.run_id,
            item_id,
            path = path.unwrap_or(""),
            error = %error,
            "item not committed"
        );
        self.failed_items.insert(item_id.to_string());
        self.errors.push(ItemFailure {
            item_id: item_id.to_string(),
            path: path.map(str::to_string),
            error,
        });
    }

    fn has_failed(&self, item_id: &str) -> bool {
        self.failed_items.contains(item_id)
    }

    fn into_report(self, local_version: Option<VersionPointer>) -> SyncReport {
        SyncReport {
            run_id: self.run_id,
            from_cache: self.from_cache,
            items_updated: self.items_updated,
            items_deleted: self.items_deleted,
            assets_downloaded: self.assets_downloaded,
            assets_skipped: self.assets_skipped,
            assets_failed: self.assets_failed,
            assets_healed: self.assets_healed,
            api_calls: self.api_calls,
            errors: self.errors,
            local_version,
            duration: self.started.elapsed(),
        }
    }
}

/// Per-path outcome of the asset phase.
type AssetResults = BTreeMap<String, Result<(), SyncError>>;

/// Coordinates version checks, delta application and asset downloads.
pub struct SyncOrchestrator<T: ContentTransport, K: KeyValueStore, B: BlobStore> {
    config: SyncConfig,
    transport: Arc<T>,
    versions: VersionManager<K>,
    cache: CacheManager<K, B>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    progress: broadcast::Sender<SyncProgress>,
    in_flight: RunSlot,
}

impl<T: ContentTransport, K: KeyValueStore, B: BlobStore> SyncOrchestrator<T, K, B> {
    /// Creates an orchestrator over a transport and local stores.
    pub fn new(config: SyncConfig, transport: Arc<T>, kv: Arc<K>, blobs: Arc<B>) -> Self {
        let (progress, _) = broadcast::channel(64);
        Self {
            config,
            transport,
            versions: VersionManager::new(Arc::clone(&kv)),
            cache: CacheManager::new(kv, blobs),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            progress,
            in_flight: Mutex::new(None),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Subscribes to progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncProgress> {
        self.progress.subscribe()
    }

    /// Returns the content cache.
    pub fn cache(&self) -> &CacheManager<K, B> {
        &self.cache
    }

    /// Returns the version manager.
    pub fn versions(&self) -> &VersionManager<K> {
        &self.versions
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Runs a sync, or joins the one already in flight.
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        self.single_flight(false).await
    }

    /// Discards the local version pointer and runs a complete resync.
    ///
    /// Never joins another caller's run: it waits out any run in flight and
    /// only returns the outcome of a full run it leads itself. The pointer
    /// is reset inside that run so no other run can re-advance it.
    pub async fn force_full_sync(&self) -> SyncResult<SyncReport> {
        loop {
            match self.claim() {
                Flight::Lead(tx) => return self.lead(tx, true).await,
                Flight::Join(rx) => {
                    debug!("full resync waiting for in-flight run");
                    let _ = Self::join(rx).await;
                }
            }
        }
    }

    async fn single_flight(&self, full: bool) -> SyncResult<SyncReport> {
        match self.claim() {
            Flight::Join(rx) => {
                self.stats.write().runs_joined += 1;
                debug!("joining in-flight sync run");
                Self::join(rx).await
            }
            Flight::Lead(tx) => self.lead(tx, full).await,
        }
    }

    /// Takes the run slot if it is free, otherwise subscribes to the current run.
    fn claim(&self) -> Flight {
        let mut slot = self.in_flight.lock();
        match slot.as_ref() {
            Some(rx) => Flight::Join(rx.clone()),
            None => {
                let (tx, rx) = watch::channel(None);
                *slot = Some(rx);
                Flight::Lead(tx)
            }
        }
    }

    async fn lead(&self, tx: watch::Sender<RunOutcome>, full: bool) -> SyncResult<SyncReport> {
        let guard = SlotGuard {
            slot: &self.in_flight,
            armed: true,
        };
        let outcome = self.run(full).await;
        guard.release();
        tx.send_replace(Some(outcome.clone()));
        outcome
    }

    async fn join(mut rx: watch::Receiver<RunOutcome>) -> SyncResult<SyncReport> {
        match rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or(Err(SyncError::Cancelled)),
            Err(_) => Err(SyncError::Cancelled),
        }
    }

    async fn run(&self, full: bool) -> SyncResult<SyncReport> {
        let mut session = SyncSession::new();
        {
            let mut stats = self.stats.write();
            stats.runs_started += 1;
            stats.last_run_id = Some(session.run_id);
        }
        debug!(run_id = %session.run_id, full, "sync run started");

        let result = self.run_phases(&mut session, full).await;
        let local_version = match &result {
            Ok(()) => self.versions.local_version(),
            Err(_) => Ok(None),
        };

        match result.and(local_version) {
            Ok(local_version) => {
                self.set_phase(SyncState::Complete);
                let report = session.into_report(local_version);
                self.record_report(&report);
                info!(
                    run_id = %report.run_id,
                    from_cache = report.from_cache,
                    items_updated = report.items_updated,
                    items_deleted = report.items_deleted,
                    assets_downloaded = report.assets_downloaded,
                    assets_skipped = report.assets_skipped,
                    assets_failed = report.assets_failed,
                    assets_healed = report.assets_healed,
                    api_calls = report.api_calls,
                    errors = report.errors.len(),
                    duration_ms = report.duration.as_millis() as u64,
                    "sync run finished"
                );
                Ok(report)
            }
            Err(err) => {
                self.set_phase(SyncState::Error);
                {
                    let mut stats = self.stats.write();
                    stats.runs_failed += 1;
                    stats.last_error = Some(err.to_string());
                }
                warn!(run_id = %session.run_id, error = %err, structural = err.is_structural(), "sync run aborted");
                Err(err)
            }
        }
    }

    async fn run_phases(&self, session: &mut SyncSession, full: bool) -> SyncResult<()> {
        if full {
            self.versions.reset()?;
        }
        self.set_phase(SyncState::Checking);
        session.api_calls += 1;
        let check = self.versions.check_versions(&*self.transport).await?;

        if check.is_offline() {
            session.from_cache = true;
            return Ok(());
        }

        if !full && !check.needs_sync() {
            if self.config.validate_on_every_run {
                self.heal(session).await?;
            }
            return Ok(());
        }

        self.set_phase(SyncState::FetchingDelta);
        let request = self.delta_request(check.local, full)?;
        let mut delta = self
            .call("fetch_delta", session, || self.transport.fetch_delta(&request))
            .await?;

        let mut changed = Vec::with_capacity(delta.changed.len());
        for item in std::mem::take(&mut delta.changed) {
            match item.verify() {
                Ok(()) => changed.push(item),
                Err(err) => session.fail(item.id(), None, err.into()),
            }
        }

        let mut deleted: BTreeSet<String> = delta.deleted_ids.iter().cloned().collect();
        if request.is_full() {
            for id in self.cache.snapshot()?.ids() {
                if !delta.full_checksums.contains(id) {
                    deleted.insert(id.clone());
                }
            }
        }
        let deleted: Vec<String> = deleted.into_iter().collect();
        session.items_deleted = self.cache.remove_items(&deleted)?;

        self.set_phase(SyncState::SyncingAssets);
        if self.config.validate_on_every_run {
            self.cache.validate_all_assets()?;
        }

        let changed_ids: BTreeSet<&str> = changed.iter().map(ContentItem::id).collect();
        let cached: Vec<ContentItem> = self
            .cache
            .get_items()?
            .into_iter()
            .filter(|item| !changed_ids.contains(item.id()))
            .collect();

        let mut wanted = BTreeMap::new();
        let mut skipped = BTreeSet::new();
        for item in changed.iter().chain(cached.iter()) {
            let is_changed = changed_ids.contains(item.id());
            for path in item.asset_paths() {
                if wanted.contains_key(path) || skipped.contains(path) {
                    continue;
                }
                match delta.assets.get(path) {
                    Some(entry) => {
                        if self.cache.has_asset_with_checksum(path, &entry.checksum)? {
                            skipped.insert(path.clone());
                        } else {
                            wanted.insert(path.clone(), entry.clone());
                        }
                    }
                    None if is_changed => session.fail(
                        item.id(),
                        Some(path.as_str()),
                        SyncError::MissingAssetChecksum { path: path.clone() },
                    ),
                    None => {}
                }
            }
        }
        session.assets_skipped = skipped.len();

        let with_work: Vec<&ContentItem> = changed
            .iter()
            .chain(cached.iter())
            .filter(|item| item.asset_paths().iter().any(|p| wanted.contains_key(p)))
            .collect();
        let results = self.materialize(session, &with_work, &wanted).await?;

        let mut to_commit = Vec::new();
        for item in &changed {
            match first_failure(item, &results) {
                Some((path, err)) => session.fail(item.id(), Some(path), err),
                None if !session.has_failed(item.id()) => to_commit.push(item.clone()),
                None => {}
            }
        }
        for item in &cached {
            if let Some((path, err)) = first_failure(item, &results) {
                session.fail(item.id(), Some(path), err);
            }
        }
        session.items_updated = self.cache.update_items(&to_commit)?;

        if session.errors.is_empty() {
            self.versions.update_local_version(delta.version_pointer())?;
        } else {
            warn!(
                run_id = %session.run_id,
                failures = session.errors.len(),
                "run had failures, version pointer not advanced"
            );
        }
        Ok(())
    }

    /// Re-downloads corrupted or missing assets when versions already match.
    async fn heal(&self, session: &mut SyncSession) -> SyncResult<()> {
        let report = self.cache.validate_all_assets()?;
        if report.is_clean() {
            return Ok(());
        }

        self.set_phase(SyncState::SyncingAssets);
        let items = self.cache.get_items()?;
        let referenced: BTreeSet<&str> = items
            .iter()
            .flat_map(|item| item.asset_paths().iter().map(String::as_str))
            .collect();

        let mut wanted = BTreeMap::new();
        for path in &report.corrupted_paths {
            if !referenced.contains(path.as_str()) {
                self.cache.remove_asset(path)?;
                continue;
            }
            if let Some(record) = self.cache.asset_record(path)? {
                wanted.insert(
                    path.clone(),
                    AssetManifestEntry {
                        checksum: record.checksum,
                        size_bytes: record.size_bytes,
                    },
                );
            }
        }

        let with_work: Vec<&ContentItem> = items
            .iter()
            .filter(|item| item.asset_paths().iter().any(|p| wanted.contains_key(p)))
            .collect();
        let results = self.materialize(session, &with_work, &wanted).await?;
        for item in &with_work {
            if let Some((path, err)) = first_failure(item, &results) {
                session.fail(item.id(), Some(path), err);
            }
        }
        Ok(())
    }

    /// Checks disk space, signs `wanted` in bounded batches, and downloads
    /// each path once, item by item.
    async fn materialize(
        &self,
        session: &mut SyncSession,
        items: &[&ContentItem],
        wanted: &BTreeMap<String, AssetManifestEntry>,
    ) -> SyncResult<AssetResults> {
        let mut results = AssetResults::new();
        if wanted.is_empty() {
            return Ok(results);
        }

        let estimated: u64 = wanted.values().map(|entry| entry.size_bytes).sum::<u64>()
            + self.config.disk_headroom_bytes;
        self.cache.check_disk_space_for_sync(estimated)?;

        let healing: BTreeSet<&String> = wanted
            .keys()
            .filter(|path| {
                self.cache
                    .asset_record(path)
                    .ok()
                    .flatten()
                    .is_some_and(|record| record.state != AssetState::Valid)
            })
            .collect();

        let paths: Vec<String> = wanted.keys().cloned().collect();
        let mut signed: BTreeMap<String, SignedUrl> = BTreeMap::new();
        for chunk in paths.chunks(self.config.sign_batch_size.max(1)) {
            let request = SignBatchRequest::new(chunk.to_vec());
            match self
                .call("sign_batch", session, || self.transport.sign_batch(&request))
                .await
            {
                Ok(response) => {
                    for url in response.urls {
                        signed.insert(url.path.clone(), url);
                    }
                    for path in response.failed {
                        results.insert(path.clone(), Err(SyncError::SigningFailed { path }));
                    }
                }
                Err(err) if err.is_structural() => return Err(err),
                Err(err) => {
                    for path in chunk {
                        results.insert(path.clone(), Err(err.clone()));
                    }
                }
            }
        }

        let total = items.len();
        for (index, item) in items.iter().enumerate() {
            let _ = self.progress.send(SyncProgress::Item {
                item_id: item.id().to_string(),
                index,
                total,
            });

            for path in item.asset_paths() {
                let Some(entry) = wanted.get(path) else { continue };
                if results.contains_key(path) {
                    continue;
                }
                let outcome = match signed.get(path) {
                    Some(url) => self.fetch_asset(session, url, &entry.checksum).await,
                    None => Err(SyncError::SigningFailed { path: path.clone() }),
                };
                if let Err(err) = &outcome {
                    if err.is_structural() {
                        return Err(err.clone());
                    }
                    warn!(run_id = %session.run_id, path = %path, error = %err, "asset failed");
                }
                results.insert(path.clone(), outcome);
            }
        }

        for (path, outcome) in &results {
            match outcome {
                Ok(()) => {
                    session.assets_downloaded += 1;
                    if healing.contains(path) {
                        session.assets_healed += 1;
                    }
                }
                Err(_) => session.assets_failed += 1,
            }
        }
        Ok(results)
    }

    /// Downloads one asset with backoff, refreshing an expired URL a bounded
    /// number of times.
    async fn fetch_asset(
        &self,
        session: &mut SyncSession,
        signed: &SignedUrl,
        expected: &Checksum,
    ) -> SyncResult<()> {
        let path = signed.path.as_str();
        let mut descriptor = AssetDescriptor::new(
            path,
            expected.clone(),
            signed.signed_url.clone(),
            signed.expires_at_ms,
        );
        let mut refreshes = 0;

        loop {
            let attempt = self
                .call("download", session, || {
                    self.cache
                        .download_and_cache_asset(&*self.transport, &descriptor, None, false)
                })
                .await;

            match attempt {
                Err(SyncError::UrlExpired { .. }) if refreshes < self.config.url_refresh_attempts => {
                    refreshes += 1;
                    debug!(path, refreshes, "signed url expired, requesting a fresh one");
                    let request = SignBatchRequest::new(vec![path.to_string()]);
                    let response = self
                        .call("sign_batch", session, || self.transport.sign_batch(&request))
                        .await?;
                    let fresh = response.url_for(path).ok_or_else(|| SyncError::SigningFailed {
                        path: path.to_string(),
                    })?;
                    descriptor.signed_url = fresh.signed_url.clone();
                    descriptor.expires_at_ms = fresh.expires_at_ms;
                }
                other => return other.map(|_| ()),
            }
        }
    }

    fn delta_request(&self, local: Option<VersionPointer>, full: bool) -> SyncResult<DeltaRequest> {
        let Some(local) = local.filter(|_| !full) else {
            return Ok(DeltaRequest::full());
        };
        let snapshot = self.cache.snapshot()?;
        if snapshot.len() > self.config.max_checksum_entries {
            warn!(
                entries = snapshot.len(),
                max = self.config.max_checksum_entries,
                "checksum snapshot over request cap, falling back to full resync"
            );
            return Ok(DeltaRequest::full());
        }
        Ok(DeltaRequest::new(local.content_version, snapshot))
    }

    /// Runs a network call under the retry policy, counting every attempt.
    async fn call<R, F, Fut>(&self, label: &str, session: &mut SyncSession, mut operation: F) -> SyncResult<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<R>>,
    {
        retry_with_backoff(&self.config.retry, label, |_| {
            session.api_calls += 1;
            operation()
        })
        .await
    }

    fn set_phase(&self, state: SyncState) {
        *self.state.write() = state;
        debug!(phase = ?state, "sync phase");
        let _ = self.progress.send(SyncProgress::Phase(state));
    }

    fn record_report(&self, report: &SyncReport) {
        let mut stats = self.stats.write();
        if report.is_success() {
            stats.runs_succeeded += 1;
        } else {
            stats.runs_failed += 1;
            stats.last_error = report.errors.first().map(|f| f.error.to_string());
        }
        if report.from_cache {
            stats.offline_runs += 1;
        }
        stats.items_updated += report.items_updated as u64;
        stats.items_deleted += report.items_deleted as u64;
        stats.assets_downloaded += report.assets_downloaded as u64;
        stats.last_sync_time = Some(Instant::now());
    }
}

/// Returns the first failed asset of an item.
fn first_failure<'a>(item: &'a ContentItem, results: &AssetResults) -> Option<(&'a str, SyncError)> {
    item.asset_paths().iter().find_map(|path| match results.get(path) {
        Some(Err(err)) => Some((path.as_str(), err.clone())),
        _ => None,
    })
}
