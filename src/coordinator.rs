//! The scan coordinator: owns the adapter set, the polling timer, and the
//! latest combined result set.
//!
//! One scan pass fans out to every active adapter concurrently and joins on
//! all of them; the merged list is sorted by viewer count (stable, so
//! per-platform order survives ties), truncated to the tier's result cap,
//! and replaces the previous result set wholesale. A pass in flight
//! suppresses new pass starts, and manual triggers additionally honor a
//! short cooldown so rapid clicking cannot cause request storms.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::Error;
use crate::fetch::Fetcher;
use crate::model::{
    CredentialUpdate, LiveStream, Platform, ScanConfig, ScannerLimits, Streamer,
};
use crate::oauth::LoopbackAuthenticator;
use crate::platforms::{
    KickAdapter, PlatformAdapter, TikTokAdapter, TwitchAdapter, YouTubeAdapter,
};
use crate::store::{CredentialStore, KvStore, StreamerRegistry};

/// Manual scan triggers within this window of the last pass start are
/// dropped.
pub const SCAN_COOLDOWN: Duration = Duration::from_secs(2);

/// Outbound requests are additionally bounded by this client-level timeout,
/// on top of the retry loop's backoff budget.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// One adapter's row in the UI-facing listing.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub platform: Platform,
    pub label: String,
    pub active: bool,
    pub authenticated: bool,
}

/// Mutual exclusion for scan passes plus the manual-trigger cooldown.
struct ScanGate {
    in_flight: AtomicBool,
    last_start: std::sync::Mutex<Option<Instant>>,
}

impl ScanGate {
    fn new() -> Self {
        ScanGate {
            in_flight: AtomicBool::new(false),
            last_start: std::sync::Mutex::new(None),
        }
    }

    /// Claims the gate, or returns `None` if a pass is in flight or (when a
    /// cooldown is given) one started too recently.
    fn try_begin(&self, cooldown: Option<Duration>) -> Option<ScanGuard<'_>> {
        let now = Instant::now();
        if let Some(cooldown) = cooldown
            && let Some(last) = *self.last_start.lock().unwrap()
            && now.duration_since(last) < cooldown
        {
            return None;
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }
        *self.last_start.lock().unwrap() = Some(now);
        Some(ScanGuard { gate: self })
    }
}

/// Releases the in-flight flag on drop, so an aborted pass cannot wedge the
/// gate.
struct ScanGuard<'a> {
    gate: &'a ScanGate,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.store(false, Ordering::Release);
    }
}

/// State shared between the coordinator and its poll task.
struct Shared {
    adapters: Vec<Arc<dyn PlatformAdapter>>,
    limits: ScannerLimits,
    config: std::sync::Mutex<ScanConfig>,
    results: watch::Sender<Vec<LiveStream>>,
    gate: ScanGate,
}

struct Poller {
    handle: tokio::task::JoinHandle<()>,
    interval: watch::Sender<Duration>,
}

/// The discovery engine's public surface.
pub struct ScanCoordinator {
    shared: Arc<Shared>,
    credentials: CredentialStore,
    registry: StreamerRegistry,
    authenticator: Arc<LoopbackAuthenticator>,
    kv: Arc<dyn KvStore>,
    poller: std::sync::Mutex<Option<Poller>>,
}

impl ScanCoordinator {
    /// Builds a coordinator with the standard four adapters, loading any
    /// previously persisted configuration and credentials from `kv`.
    pub fn new(kv: Arc<dyn KvStore>, limits: ScannerLimits) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("building reqwest client should not fail");
        let fetcher = Fetcher::new(client);
        let credentials = CredentialStore::new(Arc::clone(&kv));
        let adapters: Vec<Arc<dyn PlatformAdapter>> = vec![
            Arc::new(TwitchAdapter::new(credentials.clone(), fetcher.clone())),
            Arc::new(YouTubeAdapter::new(credentials.clone(), fetcher.clone())),
            Arc::new(KickAdapter::new(credentials.clone())),
            Arc::new(TikTokAdapter::new(credentials.clone())),
        ];
        Self::assemble(kv, limits, credentials, adapters)
    }

    /// Builds a coordinator over caller-supplied adapters; used by tests and
    /// hosts that bring their own platforms.
    pub fn with_adapters(
        kv: Arc<dyn KvStore>,
        limits: ScannerLimits,
        adapters: Vec<Arc<dyn PlatformAdapter>>,
    ) -> Self {
        let credentials = CredentialStore::new(Arc::clone(&kv));
        Self::assemble(kv, limits, credentials, adapters)
    }

    fn assemble(
        kv: Arc<dyn KvStore>,
        limits: ScannerLimits,
        credentials: CredentialStore,
        adapters: Vec<Arc<dyn PlatformAdapter>>,
    ) -> Self {
        let config = crate::store::load_scan_config(&*kv).unwrap_or_default();
        // Surface the last session's platform toggles right away.
        for adapter in &adapters {
            adapter.set_active(config.platform_enabled(adapter.platform()));
        }
        let registry = StreamerRegistry::new(Arc::clone(&kv));
        let authenticator = Arc::new(LoopbackAuthenticator::new(credentials.clone()));
        let (results, _) = watch::channel(Vec::new());
        ScanCoordinator {
            shared: Arc::new(Shared {
                adapters,
                limits,
                config: std::sync::Mutex::new(config),
                results,
                gate: ScanGate::new(),
            }),
            credentials,
            registry,
            authenticator,
            kv,
            poller: std::sync::Mutex::new(None),
        }
    }

    /// Swaps in a differently configured authenticator (endpoints, timeout,
    /// browser behavior).
    pub fn with_authenticator(mut self, authenticator: LoopbackAuthenticator) -> Self {
        self.authenticator = Arc::new(authenticator);
        self
    }

    /// The adapters and their current state, in registration order.
    pub fn adapters(&self) -> Vec<AdapterInfo> {
        self.shared
            .adapters
            .iter()
            .map(|a| AdapterInfo {
                platform: a.platform(),
                label: a.label().to_string(),
                active: a.is_active(),
                authenticated: a.is_authenticated(),
            })
            .collect()
    }

    /// Includes or excludes a platform from scan passes. Credentials are
    /// untouched either way. The toggle is persisted with the config.
    pub fn toggle_adapter(&self, platform: Platform, active: bool) {
        for adapter in &self.shared.adapters {
            if adapter.platform() == platform {
                adapter.set_active(active);
            }
        }
        let mut config = self.shared.config.lock().unwrap();
        config.platforms.insert(platform, active);
        crate::store::store_scan_config(&*self.kv, &config);
    }

    /// Merges host-supplied credential fields (client id/secret, API key)
    /// into the platform's stored credentials.
    pub fn configure_credentials(&self, platform: Platform, update: CredentialUpdate) {
        self.credentials.configure(platform, update);
    }

    /// Runs the platform's interactive OAuth flow; on success the captured
    /// token is stored and the adapter authenticates on its next pass.
    pub async fn begin_oauth(&self, platform: Platform, client_id: &str) -> Result<(), Error> {
        if !client_id.is_empty() {
            self.credentials.configure(
                platform,
                CredentialUpdate {
                    client_id: Some(client_id.to_string()),
                    ..CredentialUpdate::default()
                },
            );
        }
        self.authenticator.authenticate(platform).await?;
        Ok(())
    }

    /// Cancels a pending OAuth flow, if any.
    pub async fn cancel_oauth(&self) {
        self.authenticator.cancel().await;
    }

    /// Drops the platform's tokens. Client id, secret, and API key survive
    /// so the user can re-authenticate without re-entering them.
    pub fn sign_out(&self, platform: Platform) {
        self.credentials.clear(platform);
        tracing::info!(%platform, "signed out");
    }

    pub fn saved_streamers(&self) -> Vec<Streamer> {
        self.registry.list()
    }

    /// Saves a streamer; a colliding id replaces the existing entry.
    pub fn save_streamer(&self, streamer: Streamer) {
        self.registry.upsert(streamer);
    }

    pub fn remove_streamer(&self, id: &str) -> bool {
        self.registry.remove(id)
    }

    /// Asks every active, authenticated adapter which saved streamers are
    /// live right now. Contained like a scan pass: a broken adapter
    /// contributes nothing rather than failing the check.
    pub async fn check_saved_streamers(&self) -> Vec<LiveStream> {
        let streamers = self.registry.list();
        let mut tasks = Vec::new();
        for adapter in &self.shared.adapters {
            if !adapter.is_active() || !adapter.is_authenticated() {
                continue;
            }
            let adapter = Arc::clone(adapter);
            let streamers = streamers.clone();
            tasks.push((
                adapter.platform(),
                tokio::spawn(async move { adapter.live_status(&streamers).await }),
            ));
        }
        let mut live = Vec::new();
        for (platform, task) in tasks {
            match task.await {
                Ok(streams) => live.extend(streams),
                Err(e) => {
                    tracing::error!(%platform, error = %e, "live-status check failed");
                }
            }
        }
        live.sort_by(|a, b| b.viewer_count.cmp(&a.viewer_count));
        live
    }

    /// Validates `config`, persists it, runs one immediate pass, and then
    /// polls every `poll_interval` until [`ScanCoordinator::stop_scanning`].
    ///
    /// Calling this while already scanning is a no-op; use
    /// [`ScanCoordinator::set_poll_interval`] to reschedule a live timer.
    pub async fn start_scanning(&self, config: ScanConfig) -> Result<(), Error> {
        let config = config.validated(&self.shared.limits)?;

        // Claim the running state and store the poller in one critical
        // section, before any await; a second start arriving while the
        // immediate pass is in flight must see it and back off instead of
        // spawning a second timer.
        {
            let mut poller = self.poller.lock().unwrap();
            if poller.is_some() {
                tracing::debug!("already scanning, ignoring start request");
                return Ok(());
            }

            for adapter in &self.shared.adapters {
                adapter.set_active(config.platform_enabled(adapter.platform()));
            }
            let every = config.poll_interval();
            *self.shared.config.lock().unwrap() = config.clone();
            crate::store::store_scan_config(&*self.kv, &config);
            tracing::info!(
                keywords = config.keywords.len(),
                min_viewers = config.min_viewers,
                interval_secs = config.poll_interval_secs,
                "scanning started"
            );

            let shared = Arc::clone(&self.shared);
            let (interval_tx, mut interval_rx) = watch::channel(every);
            let handle = tokio::spawn(async move {
                let mut every = *interval_rx.borrow();
                let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            match shared.gate.try_begin(None) {
                                Some(guard) => run_pass(&shared, guard).await,
                                None => tracing::debug!("skipping poll pass, scan already in flight"),
                            }
                        }
                        Ok(()) = interval_rx.changed() => {
                            every = *interval_rx.borrow();
                            tracing::debug!(secs = every.as_secs(), "poll interval rescheduled");
                            // Next tick lands one full new interval from now.
                            ticker = tokio::time::interval_at(Instant::now() + every, every);
                        }
                    }
                }
            });
            *poller = Some(Poller {
                handle,
                interval: interval_tx,
            });
        }

        if let Some(guard) = self.shared.gate.try_begin(None) {
            run_pass(&self.shared, guard).await;
        }
        Ok(())
    }

    /// Cancels the repeating timer. Idempotent.
    pub fn stop_scanning(&self) {
        if let Some(poller) = self.poller.lock().unwrap().take() {
            poller.handle.abort();
            tracing::info!("scanning stopped");
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.poller.lock().unwrap().is_some()
    }

    /// Reschedules a running timer to `every` without interrupting the
    /// scanning state, and persists the new interval either way.
    pub fn set_poll_interval(&self, every: Duration) {
        let every = every.max(Duration::from_secs(1));
        {
            let mut config = self.shared.config.lock().unwrap();
            config.poll_interval_secs = every.as_secs();
            crate::store::store_scan_config(&*self.kv, &config);
        }
        if let Some(poller) = self.poller.lock().unwrap().as_ref() {
            let _ = poller.interval.send(every);
        }
    }

    /// Runs one pass immediately, unless a pass is in flight or one started
    /// within [`SCAN_COOLDOWN`]. Returns whether a pass actually ran.
    pub async fn scan_now(&self) -> bool {
        match self.shared.gate.try_begin(Some(SCAN_COOLDOWN)) {
            Some(guard) => {
                run_pass(&self.shared, guard).await;
                true
            }
            None => {
                tracing::debug!("manual scan debounced");
                false
            }
        }
    }

    /// The most recent pass's combined results.
    pub fn latest_results(&self) -> Vec<LiveStream> {
        self.shared.results.borrow().clone()
    }

    /// A watch over the combined results; each pass replaces the value
    /// wholesale.
    pub fn subscribe_results(&self) -> watch::Receiver<Vec<LiveStream>> {
        self.shared.results.subscribe()
    }

    /// The configuration currently in effect (last validated or persisted).
    pub fn current_config(&self) -> ScanConfig {
        self.shared.config.lock().unwrap().clone()
    }
}

impl Drop for ScanCoordinator {
    fn drop(&mut self) {
        if let Some(poller) = self.poller.lock().unwrap().take() {
            poller.handle.abort();
        }
    }
}

/// One fan-out-and-join pass over the active adapters.
async fn run_pass(shared: &Shared, _guard: ScanGuard<'_>) {
    let (keywords, min_viewers) = {
        let config = shared.config.lock().unwrap();
        (config.keywords.clone(), config.min_viewers)
    };
    let mut tasks = Vec::new();
    for adapter in &shared.adapters {
        if !adapter.is_active() {
            continue;
        }
        let adapter = Arc::clone(adapter);
        let keywords = keywords.clone();
        tasks.push((
            adapter.platform(),
            tokio::spawn(async move { adapter.scan(&keywords, min_viewers).await }),
        ));
    }

    let mut combined = Vec::new();
    for (platform, task) in tasks {
        match task.await {
            Ok(streams) => {
                tracing::debug!(%platform, results = streams.len(), "adapter pass done");
                combined.extend(streams);
            }
            // An adapter is never supposed to fail its own scan, so this
            // catches panics; the pass substitutes an empty list.
            Err(e) => {
                tracing::error!(%platform, error = %e, "adapter pass failed, substituting empty");
            }
        }
    }
    // Stable sort keeps per-platform order for equal counts.
    combined.sort_by(|a, b| b.viewer_count.cmp(&a.viewer_count));
    combined.truncate(shared.limits.max_results);
    tracing::info!(results = combined.len(), "scan pass complete");
    shared.results.send_replace(combined);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct FakeAdapter {
        platform: Platform,
        active: AtomicBool,
        authenticated: bool,
        results: Vec<LiveStream>,
        live: Vec<LiveStream>,
        panics: bool,
        delay: Option<Duration>,
        scans: AtomicU32,
        seen_floor: std::sync::Mutex<Option<u32>>,
    }

    impl FakeAdapter {
        fn new(platform: Platform, results: Vec<LiveStream>) -> Arc<Self> {
            Arc::new(FakeAdapter {
                platform,
                active: AtomicBool::new(true),
                authenticated: false,
                results,
                live: Vec::new(),
                panics: false,
                delay: None,
                scans: AtomicU32::new(0),
                seen_floor: std::sync::Mutex::new(None),
            })
        }

        fn panicking(platform: Platform) -> Arc<Self> {
            Arc::new(FakeAdapter {
                panics: true,
                ..Arc::into_inner(Self::new(platform, Vec::new())).unwrap()
            })
        }

        fn slow(platform: Platform, delay: Duration) -> Arc<Self> {
            Arc::new(FakeAdapter {
                delay: Some(delay),
                ..Arc::into_inner(Self::new(platform, Vec::new())).unwrap()
            })
        }

        fn authenticated(platform: Platform, live: Vec<LiveStream>) -> Arc<Self> {
            Arc::new(FakeAdapter {
                authenticated: true,
                live,
                ..Arc::into_inner(Self::new(platform, Vec::new())).unwrap()
            })
        }
    }

    #[async_trait]
    impl PlatformAdapter for FakeAdapter {
        fn platform(&self) -> Platform {
            self.platform
        }
        fn label(&self) -> &str {
            "Fake Scanner"
        }
        fn is_active(&self) -> bool {
            self.active.load(Ordering::Relaxed)
        }
        fn set_active(&self, active: bool) {
            self.active.store(active, Ordering::Relaxed);
        }
        fn is_authenticated(&self) -> bool {
            self.authenticated
        }
        async fn scan(&self, _keywords: &[String], min_viewers: u32) -> Vec<LiveStream> {
            self.scans.fetch_add(1, Ordering::SeqCst);
            *self.seen_floor.lock().unwrap() = Some(min_viewers);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.panics {
                panic!("adapter blew up");
            }
            self.results.clone()
        }
        async fn live_status(&self, _streamers: &[Streamer]) -> Vec<LiveStream> {
            self.live.clone()
        }
    }

    fn stream(platform: Platform, username: &str, viewers: u32) -> LiveStream {
        LiveStream {
            platform,
            username: username.to_string(),
            display_name: username.to_string(),
            title: "t".into(),
            viewer_count: viewers,
            url: format!("https://example.com/{username}"),
            thumbnail_url: None,
            is_live: true,
            matched_keyword: "kw".into(),
            game: None,
        }
    }

    fn config(keywords: &[&str]) -> ScanConfig {
        ScanConfig {
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            ..ScanConfig::default()
        }
    }

    fn coordinator(adapters: Vec<Arc<dyn PlatformAdapter>>) -> ScanCoordinator {
        ScanCoordinator::with_adapters(
            Arc::new(MemoryStore::new()),
            ScannerLimits::default(),
            adapters,
        )
    }

    #[tokio::test]
    async fn empty_keyword_set_is_rejected_before_starting() {
        let coordinator = coordinator(vec![FakeAdapter::new(Platform::Twitch, Vec::new())]);
        let err = coordinator.start_scanning(ScanConfig::default()).await;
        assert!(matches!(
            err,
            Err(Error::Validation(ValidationError::NoKeywords))
        ));
        assert!(!coordinator.is_scanning());
    }

    #[tokio::test]
    async fn pass_merges_and_sorts_by_viewers_descending() {
        let a = FakeAdapter::new(
            Platform::Twitch,
            vec![
                stream(Platform::Twitch, "fifty", 50),
                stream(Platform::Twitch, "twohundred", 200),
            ],
        );
        let b = FakeAdapter::new(Platform::Kick, vec![stream(Platform::Kick, "eighty", 80)]);
        let coordinator = coordinator(vec![a, b]);

        assert!(coordinator.scan_now().await);
        let counts: Vec<u32> = coordinator
            .latest_results()
            .iter()
            .map(|s| s.viewer_count)
            .collect();
        assert_eq!(counts, vec![200, 80, 50]);
    }

    #[tokio::test]
    async fn equal_counts_keep_per_platform_order() {
        let a = FakeAdapter::new(
            Platform::Twitch,
            vec![
                stream(Platform::Twitch, "a1", 100),
                stream(Platform::Twitch, "a2", 100),
            ],
        );
        let b = FakeAdapter::new(Platform::Kick, vec![stream(Platform::Kick, "b1", 100)]);
        let coordinator = coordinator(vec![a, b]);

        coordinator.scan_now().await;
        let names: Vec<String> = coordinator
            .latest_results()
            .iter()
            .map(|s| s.username.clone())
            .collect();
        assert_eq!(names, vec!["a1", "a2", "b1"]);
    }

    #[tokio::test]
    async fn panicking_adapter_does_not_poison_the_pass() {
        let coordinator = coordinator(vec![
            FakeAdapter::new(Platform::Twitch, vec![stream(Platform::Twitch, "t", 10)]),
            FakeAdapter::panicking(Platform::YouTube),
            FakeAdapter::new(Platform::Kick, vec![stream(Platform::Kick, "k", 20)]),
            FakeAdapter::new(Platform::TikTok, vec![stream(Platform::TikTok, "d", 30)]),
        ]);

        coordinator.scan_now().await;
        let results = coordinator.latest_results();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|s| s.platform != Platform::YouTube));
    }

    #[tokio::test(start_paused = true)]
    async fn inactive_adapters_are_skipped() {
        let active = FakeAdapter::new(Platform::Twitch, vec![stream(Platform::Twitch, "t", 10)]);
        let muted = FakeAdapter::new(Platform::Kick, vec![stream(Platform::Kick, "k", 20)]);
        let coordinator = coordinator(vec![active, Arc::clone(&muted) as _]);
        coordinator.toggle_adapter(Platform::Kick, false);

        coordinator.scan_now().await;
        assert_eq!(coordinator.latest_results().len(), 1);
        assert_eq!(muted.scans.load(Ordering::SeqCst), 0);

        // Reactivation picks the adapter back up on the next pass, and the
        // cooldown is why we wait before triggering again.
        coordinator.toggle_adapter(Platform::Kick, true);
        tokio::time::sleep(SCAN_COOLDOWN + Duration::from_millis(10)).await;
        coordinator.scan_now().await;
        assert_eq!(coordinator.latest_results().len(), 2);
    }

    #[tokio::test]
    async fn results_are_truncated_to_the_tier_cap() {
        let many: Vec<LiveStream> = (0..150)
            .map(|i| stream(Platform::Twitch, &format!("s{i}"), i))
            .collect();
        let coordinator = coordinator(vec![FakeAdapter::new(Platform::Twitch, many)]);
        coordinator.scan_now().await;
        assert_eq!(coordinator.latest_results().len(), 100);
        // The cap keeps the top of the ranking, not the bottom.
        assert_eq!(coordinator.latest_results()[0].viewer_count, 149);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_triggers_are_debounced() {
        let adapter = FakeAdapter::new(Platform::Twitch, Vec::new());
        let coordinator = coordinator(vec![Arc::clone(&adapter) as _]);

        assert!(coordinator.scan_now().await);
        assert!(!coordinator.scan_now().await);
        assert_eq!(adapter.scans.load(Ordering::SeqCst), 1);

        tokio::time::sleep(SCAN_COOLDOWN + Duration::from_millis(10)).await;
        assert!(coordinator.scan_now().await);
        assert_eq!(adapter.scans.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_scanning_runs_immediately_then_polls() {
        let adapter = FakeAdapter::new(Platform::Twitch, Vec::new());
        let coordinator = coordinator(vec![Arc::clone(&adapter) as _]);

        let mut config = config(&["rust"]);
        config.poll_interval_secs = 60;
        config.min_viewers = 7;
        coordinator.start_scanning(config).await.unwrap();
        assert!(coordinator.is_scanning());
        assert_eq!(adapter.scans.load(Ordering::SeqCst), 1);
        assert_eq!(*adapter.seen_floor.lock().unwrap(), Some(7));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(adapter.scans.load(Ordering::SeqCst), 2);

        coordinator.stop_scanning();
        assert!(!coordinator.is_scanning());
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(adapter.scans.load(Ordering::SeqCst), 2);
        // Stopping twice is fine.
        coordinator.stop_scanning();
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_reschedules_without_restart() {
        let adapter = FakeAdapter::new(Platform::Twitch, Vec::new());
        let coordinator = coordinator(vec![Arc::clone(&adapter) as _]);

        let mut config = config(&["rust"]);
        config.poll_interval_secs = 600;
        coordinator.start_scanning(config).await.unwrap();
        assert_eq!(adapter.scans.load(Ordering::SeqCst), 1);

        coordinator.set_poll_interval(Duration::from_secs(5));
        assert!(coordinator.is_scanning());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(adapter.scans.load(Ordering::SeqCst), 2);
        coordinator.stop_scanning();
    }

    #[tokio::test(start_paused = true)]
    async fn start_during_the_immediate_pass_does_not_leak_a_timer() {
        let adapter = FakeAdapter::slow(Platform::Twitch, Duration::from_secs(5));
        let coordinator = Arc::new(coordinator(vec![Arc::clone(&adapter) as _]));

        let first = tokio::spawn({
            let coordinator = Arc::clone(&coordinator);
            async move { coordinator.start_scanning(config(&["rust"])).await }
        });
        // Let the first call claim the running state and enter its pass.
        tokio::task::yield_now().await;
        assert!(coordinator.is_scanning());

        // A second start while the immediate pass is still in flight must
        // back off, not spawn a second timer.
        coordinator.start_scanning(config(&["other"])).await.unwrap();
        first.await.unwrap().unwrap();
        assert_eq!(coordinator.current_config().keywords, vec!["rust"]);

        coordinator.stop_scanning();
        let scans = adapter.scans.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(adapter.scans.load(Ordering::SeqCst), scans);
    }

    #[tokio::test]
    async fn start_while_running_is_a_no_op() {
        let adapter = FakeAdapter::new(Platform::Twitch, Vec::new());
        let coordinator = coordinator(vec![Arc::clone(&adapter) as _]);

        coordinator.start_scanning(config(&["rust"])).await.unwrap();
        coordinator
            .start_scanning(config(&["other", "words"]))
            .await
            .unwrap();
        // The original config stayed in effect.
        assert_eq!(coordinator.current_config().keywords, vec!["rust"]);
        coordinator.stop_scanning();
    }

    #[tokio::test]
    async fn config_round_trips_through_the_kv_store() {
        let kv = Arc::new(MemoryStore::new());
        {
            let coordinator = ScanCoordinator::with_adapters(
                Arc::clone(&kv) as _,
                ScannerLimits::default(),
                vec![FakeAdapter::new(Platform::Twitch, Vec::new())],
            );
            let mut config = config(&["rust", "chess"]);
            config.min_viewers = 25;
            coordinator.start_scanning(config).await.unwrap();
            coordinator.stop_scanning();
        }

        let reloaded = ScanCoordinator::with_adapters(
            kv as _,
            ScannerLimits::default(),
            vec![FakeAdapter::new(Platform::Twitch, Vec::new())],
        );
        let config = reloaded.current_config();
        assert_eq!(config.keywords, vec!["rust", "chess"]);
        assert_eq!(config.min_viewers, 25);
    }

    #[tokio::test]
    async fn saved_streamer_checks_only_ask_authenticated_adapters() {
        let silent = FakeAdapter::new(Platform::Kick, Vec::new());
        let live = FakeAdapter::authenticated(
            Platform::Twitch,
            vec![stream(Platform::Twitch, "ferris", 120)],
        );
        let coordinator = coordinator(vec![Arc::clone(&live) as _, silent]);
        coordinator.save_streamer(Streamer::new(
            Platform::Twitch,
            "ferris",
            "Ferris",
            "https://twitch.tv/ferris",
        ));

        let checked = coordinator.check_saved_streamers().await;
        assert_eq!(checked.len(), 1);
        assert_eq!(checked[0].username, "ferris");
    }

    #[tokio::test]
    async fn adapter_listing_reflects_toggles() {
        let coordinator = coordinator(vec![
            FakeAdapter::new(Platform::Twitch, Vec::new()),
            FakeAdapter::new(Platform::Kick, Vec::new()),
        ]);
        coordinator.toggle_adapter(Platform::Kick, false);
        let listing = coordinator.adapters();
        assert_eq!(listing.len(), 2);
        assert!(listing.iter().find(|a| a.platform == Platform::Twitch).unwrap().active);
        assert!(!listing.iter().find(|a| a.platform == Platform::Kick).unwrap().active);
    }
}
