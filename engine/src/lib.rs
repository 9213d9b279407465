//! # Recommendation rail engine
//!
//! Client-side orchestration for the storefront home view's personalized
//! recommendation rail.
//!
//! ## Responsibilities
//!
//! - Decide whether the rail renders at all: signed-in non-admin identity,
//!   server-confirmed tracking data, and a non-empty product list are all
//!   required, computed in one place ([`gate`]).
//! - Track which product cards were actually seen and report each one at
//!   most once per mount ([`visibility`], [`reporter`]).
//! - Refresh recommendations after cart adds, completed orders, and
//!   tab-visible signals without flooding the backend: a burst of triggers
//!   collapses into one fetch after a quiet period ([`scheduler`]).
//! - Stay consistent across tabs and login/logout: identity is re-derived
//!   from storage on every external signal, and logout tears the rail down
//!   synchronously ([`identity`]).
//!
//! ## Shape
//!
//! One spawned task owns all mutable state and serializes every mutation;
//! the rest of the app talks to it through a [`RailHandle`] and reads the
//! current [`Gate`] from a watch channel. Fetches run as child tasks tagged
//! with a generation number; a completion whose generation is no longer
//! live is discarded, which makes "last fetch wins" and "nothing commits
//! after logout" the same check.
//!
//! ## Failure posture
//!
//! Everything degrades, nothing propagates: failed fetches read as "no
//! recommendations", telemetry failures are dropped after a debug log, a
//! missing visibility primitive just means no impressions. The rail not
//! rendering is the worst case.
pub mod config;
pub mod fetcher;
pub mod gate;
pub mod identity;
pub mod reporter;
pub mod scheduler;
pub mod visibility;

pub use config::EngineConfig;
pub use fetcher::{Backend, RecommendationSet};
pub use gate::Gate;
pub use identity::{
    FileIdentityStore, IDENTITY_KEY, IdentityStore, MemoryIdentityStore, Role, SessionIdentity,
};
pub use visibility::{ChannelVisibility, NoVisibility, Region, VisibilityEvent, VisibilitySource};

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time;
use tracing::debug;

use reporter::Reporter;
use scheduler::RefreshScheduler;
use visibility::ImpressionTracker;

/// Identity-adjacent events from the rest of the application (and from
/// other tabs, relayed by the host).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalSignal {
    /// Same-tab logout. Clears the rail synchronously.
    LoggedOut,
    /// Another tab mutated client storage. `None` means the whole storage
    /// was cleared.
    StorageChanged { key: Option<String> },
    /// An order reached the completed state; the backend has fresh
    /// purchase history.
    OrderCompleted,
    /// The tab became visible again.
    TabVisible,
}

enum Command {
    CartAdded,
    Signal(ExternalSignal),
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    /// Cheap existence check before committing to a full render pass.
    Probe,
    /// The full rail fetch.
    Rail,
}

struct FetchDone {
    generation: u64,
    kind: FetchKind,
    set: RecommendationSet,
}

/// Cheap, cloneable front for the engine task. Dropping every clone (or
/// calling [`shutdown`](RailHandle::shutdown)) unmounts the engine: the
/// pending refresh dies with it and in-flight results go nowhere.
#[derive(Clone)]
pub struct RailHandle {
    tx: mpsc::UnboundedSender<Command>,
    gate: watch::Receiver<Gate>,
}

impl RailHandle {
    /// Current gate state, live. The receiver starts at [`Gate::Loading`].
    pub fn gate(&self) -> watch::Receiver<Gate> {
        self.gate.clone()
    }

    /// Something was added to the cart; schedule a debounced refresh.
    pub fn notify_cart_add(&self) {
        let _ = self.tx.send(Command::CartAdded);
    }

    /// An order completed; schedule a debounced refresh.
    pub fn notify_order_completed(&self) {
        self.signal(ExternalSignal::OrderCompleted);
    }

    pub fn signal(&self, signal: ExternalSignal) {
        let _ = self.tx.send(Command::Signal(signal));
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

/// Start the engine for one mount of the home view.
pub fn spawn(
    backend: Arc<dyn Backend>,
    store: Arc<dyn IdentityStore>,
    mut visibility: impl VisibilitySource,
    config: EngineConfig,
) -> RailHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = mpsc::unbounded_channel();
    let (gate_tx, gate_rx) = watch::channel(Gate::Loading);
    let vis_rx = visibility.subscribe();

    let engine = RailEngine {
        reporter: Reporter::new(backend.clone(), store.clone()),
        scheduler: RefreshScheduler::new(config.debounce),
        tracker: ImpressionTracker::new(config.visibility_threshold),
        backend,
        store,
        config,
        identity: SessionIdentity::anonymous(),
        set: RecommendationSet::default(),
        generation: 0,
        gate_tx,
        done_tx,
    };

    tokio::spawn(engine.run(cmd_rx, done_rx, vis_rx));

    RailHandle {
        tx: cmd_tx,
        gate: gate_rx,
    }
}

struct RailEngine {
    backend: Arc<dyn Backend>,
    store: Arc<dyn IdentityStore>,
    reporter: Reporter,
    scheduler: RefreshScheduler,
    tracker: ImpressionTracker,
    config: EngineConfig,
    identity: SessionIdentity,
    set: RecommendationSet,
    /// Live fetch generation. Bumped on every fetch start and on teardown;
    /// completions from older generations are discarded.
    generation: u64,
    gate_tx: watch::Sender<Gate>,
    done_tx: mpsc::UnboundedSender<FetchDone>,
}

impl RailEngine {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut done_rx: mpsc::UnboundedReceiver<FetchDone>,
        mut vis_rx: Option<mpsc::UnboundedReceiver<VisibilityEvent>>,
    ) {
        self.mount();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    None | Some(Command::Shutdown) => break,
                    Some(Command::CartAdded) => self.scheduler.schedule(&self.identity),
                    Some(Command::Signal(signal)) => self.on_signal(signal),
                },
                Some(done) = done_rx.recv() => self.commit(done),
                _ = time::sleep_until(self.scheduler.deadline()), if self.scheduler.is_pending() => {
                    self.scheduler.fire();
                    self.start_fetch(FetchKind::Rail);
                }
                event = next_event(&mut vis_rx) => match event {
                    Some(event) => self.on_visibility(&event),
                    None => vis_rx = None,
                },
            }
        }
    }

    fn mount(&mut self) {
        self.identity = identity::read_session(&*self.store);
        if self.identity.eligible() {
            self.start_fetch(FetchKind::Probe);
        } else {
            self.publish(Gate::Hidden);
        }
    }

    fn on_signal(&mut self, signal: ExternalSignal) {
        match signal {
            ExternalSignal::OrderCompleted | ExternalSignal::TabVisible => {
                self.scheduler.schedule(&self.identity)
            }
            ExternalSignal::LoggedOut => self.resync(),
            ExternalSignal::StorageChanged { key } => {
                if key.as_deref() == Some(IDENTITY_KEY) || key.is_none() {
                    self.resync();
                }
            }
        }
    }

    /// Re-derive identity from storage and reconcile. Idempotent: running
    /// it twice against unchanged storage settles on the same state.
    fn resync(&mut self) {
        let was_eligible = self.identity.eligible();
        self.identity = identity::read_session(&*self.store);

        if !self.identity.eligible() {
            self.clear();
        } else if !was_eligible {
            self.start_fetch(FetchKind::Probe);
        } else {
            // Still eligible but the record changed under us (say, a
            // different customer signed in from another tab). The debounced
            // path picks up the new history.
            self.scheduler.schedule(&self.identity);
        }
    }

    /// Synchronous teardown: hide the rail now, drop the pending refresh,
    /// and invalidate in-flight fetches so a late response cannot
    /// resurrect stale personalized content.
    fn clear(&mut self) {
        self.generation += 1;
        self.scheduler.cancel();
        self.set = RecommendationSet::default();
        self.tracker.attach(&[]);
        self.publish(Gate::Hidden);
    }

    fn start_fetch(&mut self, kind: FetchKind) {
        self.generation += 1;
        let generation = self.generation;
        let limit = match kind {
            FetchKind::Probe => self.config.probe_limit,
            FetchKind::Rail => self.config.rail_limit,
        };

        // A refresh of an already-visible rail is silent; only an
        // unresolved rail shows as loading.
        let rendered = self.gate_tx.borrow().should_render();
        if !rendered {
            self.publish(Gate::Loading);
        }

        let backend = self.backend.clone();
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let set = fetcher::fetch(&*backend, limit).await;
            let _ = done_tx.send(FetchDone {
                generation,
                kind,
                set,
            });
        });
    }

    fn commit(&mut self, done: FetchDone) {
        if done.generation != self.generation {
            debug!("Discarding stale recommendation response");
            return;
        }

        match done.kind {
            FetchKind::Probe => {
                if done.set.displayable() {
                    self.start_fetch(FetchKind::Rail);
                } else {
                    self.set = done.set;
                    self.publish(Gate::Hidden);
                }
            }
            FetchKind::Rail => {
                self.set = done.set;
                let gate = gate::derive(&self.identity, &self.set);
                match &gate {
                    Gate::Visible(products) => {
                        let regions: Vec<Region> = products
                            .iter()
                            .map(|p| Region {
                                product_id: p.book_id.to_string(),
                                title: p.title.clone(),
                            })
                            .collect();
                        self.tracker.attach(&regions);
                    }
                    _ => self.tracker.attach(&[]),
                }
                self.publish(gate);
            }
        }
    }

    fn on_visibility(&mut self, event: &VisibilityEvent) {
        if let Some(impression) = self.tracker.observe(event) {
            self.reporter
                .report_view(&impression.product_id, &impression.title, 0);
        }
    }

    fn publish(&self, gate: Gate) {
        self.gate_tx.send_replace(gate);
    }
}

async fn next_event(
    rx: &mut Option<mpsc::UnboundedReceiver<VisibilityEvent>>,
) -> Option<VisibilityEvent> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        // No visibility capability: park this branch forever.
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use api::ApiError;
    use api::models::{Product, ProductView, RecommendationData, RecommendationResponse};
    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;

    struct Scripted {
        delay: Duration,
        response: RecommendationResponse,
    }

    #[derive(Debug, Clone)]
    struct RecordedCall {
        limit: u32,
        at: Instant,
    }

    #[derive(Default)]
    struct MockBackend {
        plan: Mutex<VecDeque<Scripted>>,
        calls: Mutex<Vec<RecordedCall>>,
        views: Mutex<Vec<ProductView>>,
    }

    impl MockBackend {
        fn scripted(plan: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                plan: Mutex::new(plan.into()),
                ..Self::default()
            })
        }

        fn calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }

        fn rail_calls(&self) -> Vec<RecordedCall> {
            self.calls().into_iter().filter(|c| c.limit == 20).collect()
        }

        fn views(&self) -> Vec<ProductView> {
            self.views.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Backend for MockBackend {
        async fn recommendations(
            &self,
            limit: u32,
        ) -> Result<RecommendationResponse, ApiError> {
            self.calls.lock().unwrap().push(RecordedCall {
                limit,
                at: Instant::now(),
            });
            let next = self.plan.lock().unwrap().pop_front();
            match next {
                Some(scripted) => {
                    tokio::time::sleep(scripted.delay).await;
                    Ok(scripted.response)
                }
                None => Ok(RecommendationResponse::default()),
            }
        }

        async fn track_product_view(&self, view: ProductView) -> Result<(), ApiError> {
            self.views.lock().unwrap().push(view);
            Ok(())
        }
    }

    fn product(id: u64) -> Product {
        Product {
            book_id: id,
            title: format!("book {id}"),
            ..Product::default()
        }
    }

    fn response(has_tracking_data: bool, ids: &[u64]) -> RecommendationResponse {
        RecommendationResponse {
            success: true,
            data: Some(RecommendationData {
                has_tracking_data,
                products: ids.iter().copied().map(product).collect(),
            }),
        }
    }

    fn instant(response: RecommendationResponse) -> Scripted {
        Scripted {
            delay: Duration::ZERO,
            response,
        }
    }

    fn slow(delay_ms: u64, response: RecommendationResponse) -> Scripted {
        Scripted {
            delay: Duration::from_millis(delay_ms),
            response,
        }
    }

    fn customer_store() -> Arc<MemoryIdentityStore> {
        let store = MemoryIdentityStore::new();
        store.insert(IDENTITY_KEY, r#"{"user_id": 3, "role": "customer"}"#);
        Arc::new(store)
    }

    async fn wait_until(
        rx: &mut watch::Receiver<Gate>,
        accept: impl Fn(&Gate) -> bool,
    ) -> Gate {
        loop {
            let current = rx.borrow().clone();
            if accept(&current) {
                return current;
            }
            rx.changed().await.expect("engine task ended unexpectedly");
        }
    }

    fn visible_ids(gate: &Gate) -> Vec<u64> {
        match gate {
            Gate::Visible(products) => products.iter().map(|p| p.book_id).collect(),
            other => panic!("expected visible gate, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn anonymous_user_sees_nothing_and_nothing_is_fetched() {
        let backend = MockBackend::scripted(vec![]);
        let store = Arc::new(MemoryIdentityStore::new());
        let handle = spawn(
            backend.clone(),
            store,
            NoVisibility,
            EngineConfig::default(),
        );

        let mut gate = handle.gate();
        wait_until(&mut gate, |g| *g == Gate::Hidden).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(backend.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn admin_never_fetches_schedules_or_tracks() {
        let backend = MockBackend::scripted(vec![]);
        let store = MemoryIdentityStore::new();
        store.insert(IDENTITY_KEY, r#"{"user_id": 1, "role": "admin"}"#);

        let (vis_tx, vis) = ChannelVisibility::new();
        let handle = spawn(
            backend.clone(),
            Arc::new(store),
            vis,
            EngineConfig::default(),
        );

        let mut gate = handle.gate();
        wait_until(&mut gate, |g| *g == Gate::Hidden).await;

        for _ in 0..3 {
            handle.notify_cart_add();
        }
        vis_tx
            .send(VisibilityEvent {
                product_id: "1".into(),
                visible_ratio: 1.0,
            })
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(backend.calls().is_empty());
        assert!(backend.views().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn customer_rail_renders_and_each_card_reports_once() {
        let backend = MockBackend::scripted(vec![
            instant(response(true, &[1])),
            instant(response(true, &[1, 2])),
        ]);
        let (vis_tx, vis) = ChannelVisibility::new();
        let handle = spawn(
            backend.clone(),
            customer_store(),
            vis,
            EngineConfig::default(),
        );

        let mut gate = handle.gate();
        let visible = wait_until(&mut gate, Gate::should_render).await;
        assert_eq!(visible_ids(&visible), vec![1, 2]);

        // Both cards scroll into view, card 1 repeatedly; card 3 is not on
        // the rail at all.
        for (id, ratio) in [("1", 0.5), ("1", 0.9), ("2", 0.3), ("2", 0.8), ("3", 1.0)] {
            vis_tx
                .send(VisibilityEvent {
                    product_id: id.into(),
                    visible_ratio: ratio,
                })
                .unwrap();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        let views = backend.views();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].product_id, "1");
        assert_eq!(views[0].product_name, "book 1");
        assert_eq!(views[0].user_id, Some(3));
        assert_eq!(views[1].product_id, "2");
    }

    #[tokio::test(start_paused = true)]
    async fn cart_add_burst_coalesces_into_one_trailing_refresh() {
        let config = EngineConfig::default();
        let backend = MockBackend::scripted(vec![
            // Probe finds no data yet; the later refresh does.
            instant(response(true, &[])),
            instant(response(true, &[4])),
        ]);
        let handle = spawn(
            backend.clone(),
            customer_store(),
            NoVisibility,
            config.clone(),
        );

        let mut gate = handle.gate();
        wait_until(&mut gate, |g| *g == Gate::Hidden).await;

        let mut last_add = Instant::now();
        for _ in 0..5 {
            handle.notify_cart_add();
            last_add = Instant::now();
            tokio::time::advance(Duration::from_millis(100)).await;
        }

        let visible = wait_until(&mut gate, Gate::should_render).await;
        assert_eq!(visible_ids(&visible), vec![4]);

        let rail_calls = backend.rail_calls();
        assert_eq!(rail_calls.len(), 1, "five adds must produce one refresh");
        let since_last_add = rail_calls[0].at.duration_since(last_add);
        assert!(
            since_last_add >= config.debounce,
            "refresh fired {since_last_add:?} after the last add"
        );
        assert!(since_last_add <= config.debounce + Duration::from_millis(600));
        assert_eq!(backend.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_products_without_tracking_data_stay_hidden() {
        let backend = MockBackend::scripted(vec![instant(response(false, &[1]))]);
        let handle = spawn(
            backend.clone(),
            customer_store(),
            NoVisibility,
            EngineConfig::default(),
        );

        let mut gate = handle.gate();
        wait_until(&mut gate, |g| *g == Gate::Hidden).await;

        // The probe alone settles it; no rail fetch is worth it.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(backend.calls().len(), 1);
        assert!(backend.rail_calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn logout_clears_synchronously_and_late_response_is_discarded() {
        let store = customer_store();
        let backend = MockBackend::scripted(vec![
            instant(response(true, &[1])),
            instant(response(true, &[1])),
            // The refresh in flight during logout.
            slow(5_000, response(true, &[7, 8])),
        ]);
        let handle = spawn(
            backend.clone(),
            store.clone(),
            NoVisibility,
            EngineConfig::default(),
        );

        let mut gate = handle.gate();
        wait_until(&mut gate, Gate::should_render).await;

        handle.notify_cart_add();
        tokio::time::advance(Duration::from_millis(1600)).await;
        assert_eq!(backend.rail_calls().len(), 2, "refresh should be in flight");

        // Logout with the slow refresh still outstanding. The rail must
        // hide without waiting for any network resolution.
        store.remove(IDENTITY_KEY);
        handle.signal(ExternalSignal::LoggedOut);
        wait_until(&mut gate, |g| *g == Gate::Hidden).await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(*gate.borrow(), Gate::Hidden);
        assert_eq!(backend.calls().len(), 3, "no fetches after logout");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_early_fetch_never_overwrites_a_fresher_result() {
        let backend = MockBackend::scripted(vec![
            instant(response(true, &[1])),
            // First rail fetch is slow and stale by the time it lands.
            slow(3_000, response(true, &[1])),
            slow(10, response(true, &[2])),
        ]);
        let handle = spawn(
            backend.clone(),
            customer_store(),
            NoVisibility,
            EngineConfig::default(),
        );

        let mut gate = handle.gate();
        handle.notify_cart_add();

        let visible = wait_until(&mut gate, Gate::should_render).await;
        assert_eq!(visible_ids(&visible), vec![2]);

        // Let the slow first fetch finally resolve; it must change nothing.
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(visible_ids(&gate.borrow().clone()), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn login_from_another_tab_brings_the_rail_up() {
        let store = Arc::new(MemoryIdentityStore::new());
        let backend = MockBackend::scripted(vec![
            instant(response(true, &[5])),
            instant(response(true, &[5, 6])),
        ]);
        let handle = spawn(
            backend.clone(),
            store.clone(),
            NoVisibility,
            EngineConfig::default(),
        );

        let mut gate = handle.gate();
        wait_until(&mut gate, |g| *g == Gate::Hidden).await;
        assert!(backend.calls().is_empty());

        store.insert(IDENTITY_KEY, r#"{"user_id": 4, "role": "customer"}"#);
        handle.signal(ExternalSignal::StorageChanged {
            key: Some(IDENTITY_KEY.to_string()),
        });

        let visible = wait_until(&mut gate, Gate::should_render).await;
        assert_eq!(visible_ids(&visible), vec![5, 6]);

        // Unrelated keys do not resync or refetch.
        handle.signal(ExternalSignal::StorageChanged {
            key: Some("cart_4".to_string()),
        });
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(backend.calls().len(), 2);

        // A whole-storage clear from another tab logs us out.
        store.clear();
        handle.signal(ExternalSignal::StorageChanged { key: None });
        wait_until(&mut gate, |g| *g == Gate::Hidden).await;
    }

    #[tokio::test(start_paused = true)]
    async fn order_completion_refreshes_on_the_debounced_path() {
        let config = EngineConfig::default();
        let backend = MockBackend::scripted(vec![
            instant(response(true, &[1])),
            instant(response(true, &[1])),
            instant(response(true, &[9])),
        ]);
        let handle = spawn(
            backend.clone(),
            customer_store(),
            NoVisibility,
            config.clone(),
        );

        let mut gate = handle.gate();
        wait_until(&mut gate, Gate::should_render).await;

        let signalled = Instant::now();
        handle.notify_order_completed();

        let visible = wait_until(&mut gate, |g| visible_ids_or_empty(g) == [9]).await;
        assert_eq!(visible_ids(&visible), vec![9]);

        let rail_calls = backend.rail_calls();
        assert_eq!(rail_calls.len(), 2);
        assert!(rail_calls[1].at.duration_since(signalled) >= config.debounce);
    }

    #[tokio::test(start_paused = true)]
    async fn unmount_cancels_the_pending_refresh() {
        let backend = MockBackend::scripted(vec![
            instant(response(true, &[1])),
            instant(response(true, &[1])),
        ]);
        let handle = spawn(
            backend.clone(),
            customer_store(),
            NoVisibility,
            EngineConfig::default(),
        );

        let mut gate = handle.gate();
        wait_until(&mut gate, Gate::should_render).await;

        handle.notify_cart_add();
        drop(gate);
        drop(handle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(backend.calls().len(), 2, "no refresh after unmount");
    }

    fn visible_ids_or_empty(gate: &Gate) -> Vec<u64> {
        match gate {
            Gate::Visible(products) => products.iter().map(|p| p.book_id).collect(),
            _ => vec![],
        }
    }
}
