// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation view controller.
//!
//! The [`ConversationController`] is the UI-facing entry point. It owns the
//! open conversation's timeline, routes every inbound message (realtime,
//! backfill, history or an echo of our own send) through one dedup path, keeps
//! badges and the unread total current, and falls back to polling when push
//! channels cannot be re-established.
//!
//! Signals from the subscription tasks are handled one at a time by a single
//! dispatcher task, so a dedup check always happens before the badge increment
//! it guards and cache invalidation always happens before the next read.
//!
//! A second task, the link watchdog, restarts every channel when no realtime
//! event arrived for too long while the app is in the foreground.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use fairway_bus::{EngineEvent, EventBus, EventReceiver};
use fairway_config::model::FairwayConfig;
use fairway_core::{
    AuthProvider, BackfillReason, ChannelScope, Clock, ConnectivityState, ConversationId,
    FairwayError, HealthStatus, Message, MessageEvent, MessageStore, SystemClock, Timestamp,
    UserId, Visibility,
};
use fairway_resilience::CircuitState;
use fairway_store::LocalCache;
use tokio::sync::{OnceCell, mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::backfill::{BackfillOutcome, BackfillScheduler};
use crate::cursor::ReadCursors;
use crate::dedup::DedupCache;
use crate::send::SendRateLimiter;
use crate::shared::SharedSyncState;
use crate::subscription::{SubscriptionManager, SyncSignal};
use crate::timeline::Timeline;
use crate::watchdog::LinkWatchdog;
use crate::watermark::Watermarks;

/// Where an inbound message came from.
///
/// Generation-tagged origins belong to one particular open of a conversation
/// and are discarded once that conversation was closed or reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Realtime,
    History(u64),
    Backfill(Option<u64>),
    Sent(u64),
}

impl Origin {
    fn generation(self) -> Option<u64> {
        match self {
            Origin::History(g) | Origin::Sent(g) | Origin::Backfill(Some(g)) => Some(g),
            Origin::Realtime | Origin::Backfill(None) => None,
        }
    }
}

struct ActiveConversation {
    generation: u64,
    dedup: DedupCache,
    timeline: Timeline,
}

#[derive(Debug, Default)]
struct Memberships {
    member_of: HashSet<ConversationId>,
    outside: HashSet<ConversationId>,
}

/// Builder for [`ConversationController`].
pub struct ControllerBuilder {
    store: Arc<dyn MessageStore>,
    auth: Arc<dyn AuthProvider>,
    config: FairwayConfig,
    clock: Arc<dyn Clock>,
    bus: Option<EventBus>,
    shared: Option<Arc<SharedSyncState>>,
    local: Option<Arc<LocalCache>>,
}

impl ControllerBuilder {
    /// Replace the default configuration.
    pub fn config(mut self, config: FairwayConfig) -> Self {
        self.config = config;
        self
    }

    /// Time source for every timer the engine runs. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish on an existing bus instead of a private one.
    pub fn bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Reuse session state owned by the host instead of creating it.
    pub fn shared(mut self, shared: Arc<SharedSyncState>) -> Self {
        self.shared = Some(shared);
        self
    }

    /// Use an already opened device cache instead of `storage.cache_path`.
    pub fn local_cache(mut self, local: Arc<LocalCache>) -> Self {
        self.local = Some(local);
        self
    }

    /// Open the device cache, start the signal dispatcher and, when enabled,
    /// the link watchdog.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn build(self) -> Result<ConversationController, FairwayError> {
        let ControllerBuilder {
            store,
            auth,
            config,
            clock,
            bus,
            shared,
            local,
        } = self;

        let local = match local {
            Some(local) => local,
            None => Arc::new(match &config.storage.cache_path {
                Some(path) => LocalCache::open(path).await?,
                None => LocalCache::open_in_memory().await?,
            }),
        };
        let shared = shared.unwrap_or_else(|| {
            Arc::new(SharedSyncState::new(store.clone(), clock.clone(), &config))
        });

        let shutdown = CancellationToken::new();
        let (sink, signals) = mpsc::unbounded_channel();
        let subscriptions = SubscriptionManager::new(
            store.clone(),
            clock.clone(),
            &config.reconnect,
            sink.clone(),
            shutdown.clone(),
        );

        let inner = Arc::new(Inner {
            backfill: BackfillScheduler::new(store.clone(), clock.clone(), &config.backfill),
            sender: SendRateLimiter::new(store.clone(), clock.clone(), config.send.min_interval()),
            cursors: ReadCursors::new(store.clone(), local.clone()),
            watermarks: Watermarks::new(local, clock.clone(), config.backfill.default_lookback()),
            bus: bus.unwrap_or_default(),
            identity: OnceCell::new(),
            active: Mutex::new(None),
            generation: AtomicU64::new(0),
            memberships: Mutex::new(Memberships::default()),
            global: AtomicBool::new(false),
            suspended: AtomicBool::new(false),
            last_realtime: Mutex::new(None),
            failed: Mutex::new(HashSet::new()),
            polling: Mutex::new(None),
            tasks: TaskTracker::new(),
            config,
            store,
            auth,
            clock,
            shared,
            subscriptions,
            sink,
            shutdown,
        });

        inner.tasks.spawn(dispatch(Arc::clone(&inner), signals));
        if inner.config.watchdog.enabled {
            inner.tasks.spawn(watch_links(Arc::clone(&inner)));
        }
        info!(store = inner.store.name(), "sync engine started");
        Ok(ConversationController { inner })
    }
}

struct Inner {
    config: FairwayConfig,
    store: Arc<dyn MessageStore>,
    auth: Arc<dyn AuthProvider>,
    clock: Arc<dyn Clock>,
    bus: EventBus,
    shared: Arc<SharedSyncState>,
    subscriptions: SubscriptionManager,
    backfill: BackfillScheduler,
    sender: SendRateLimiter,
    cursors: ReadCursors,
    watermarks: Watermarks,
    identity: OnceCell<UserId>,
    active: Mutex<Option<ActiveConversation>>,
    generation: AtomicU64,
    memberships: Mutex<Memberships>,
    /// Set once the global badge channel has been requested.
    global: AtomicBool,
    /// Channels were torn down by `suspend` and stay down until `resume`.
    suspended: AtomicBool,
    /// When the last push event arrived, on any scope.
    last_realtime: Mutex<Option<Timestamp>>,
    /// Scopes whose retries ran out and are now served by polling.
    failed: Mutex<HashSet<ChannelScope>>,
    polling: Mutex<Option<CancellationToken>>,
    sink: mpsc::UnboundedSender<SyncSignal>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

/// UI-facing handle to the sync engine.
///
/// Dropping the controller stops its background tasks; call
/// [`shutdown`](Self::shutdown) to also wait for them.
pub struct ConversationController {
    inner: Arc<Inner>,
}

impl ConversationController {
    /// Start building a controller over `store`, acting as the user `auth` reports.
    pub fn builder(store: Arc<dyn MessageStore>, auth: Arc<dyn AuthProvider>) -> ControllerBuilder {
        ControllerBuilder {
            store,
            auth,
            config: FairwayConfig::default(),
            clock: Arc::new(SystemClock),
            bus: None,
            shared: None,
            local: None,
        }
    }

    /// Open `conversation`, closing the one currently open.
    ///
    /// Loads the read cursor and recent history, subscribes, fills the gap
    /// between the history query and the channel confirming, then marks the
    /// conversation read. A channel that cannot be established is not an
    /// error here: the conversation stays open and is served by polling.
    pub async fn open_conversation(&self, conversation: &ConversationId) -> Result<(), FairwayError> {
        let inner = &self.inner;
        let me = inner.me().await?;

        if inner.active_id().as_ref() == Some(conversation) {
            debug!(conversation = %conversation, "conversation already open");
            return Ok(());
        }
        if let Some(previous) = inner.active_id() {
            self.close_conversation(&previous).await;
        }

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *inner.lock_active() = Some(ActiveConversation {
            generation,
            dedup: DedupCache::new(inner.config.dedup.conversation_capacity),
            timeline: Timeline::new(conversation.clone()),
        });
        inner.lock_memberships().member_of.insert(conversation.clone());
        if inner.shared.clear_badge(conversation) {
            inner.publish_badge(conversation, 0);
        }

        if let Err(e) = inner.cursors.load(&me, conversation).await {
            warn!(conversation = %conversation, error = %e, "read cursor unavailable");
        }

        let history = match inner
            .store
            .query_messages(conversation, inner.config.engine.history_limit, None)
            .await
        {
            Ok(history) => history,
            Err(e) => {
                inner.deactivate(generation);
                warn!(conversation = %conversation, error = %e, "failed to load history");
                return Err(e);
            }
        };
        let loaded = history.len();
        for message in history {
            inner
                .ingest(MessageEvent::Insert(message), Origin::History(generation))
                .await;
        }
        inner.ensure_current(generation)?;

        let scope = ChannelScope::Conversation(conversation.clone());
        match inner.subscriptions.open(&scope).await {
            Ok(()) => {}
            Err(FairwayError::Cancelled) => return Err(FairwayError::Cancelled),
            Err(e) => warn!(conversation = %conversation, error = %e, "opened without a push channel"),
        }
        inner.ensure_current(generation)?;

        let since = inner.watermarks.since(conversation);
        match inner.backfill.fetch_since(conversation, since).await {
            Ok(gap) => {
                for message in gap {
                    inner
                        .ingest(MessageEvent::Insert(message), Origin::Backfill(Some(generation)))
                        .await;
                }
            }
            Err(e) => warn!(conversation = %conversation, error = %e, "gap fill failed"),
        }
        inner.ensure_current(generation)?;

        info!(conversation = %conversation, generation, history = loaded, "conversation opened");
        self.mark_read().await
    }

    /// Close `conversation` if it is the open one.
    pub async fn close_conversation(&self, conversation: &ConversationId) {
        let closed = {
            let mut active = self.inner.lock_active();
            match active.as_ref() {
                Some(current) if current.timeline.conversation() == conversation => active.take(),
                _ => None,
            }
        };
        if closed.is_none() {
            return;
        }
        let scope = ChannelScope::Conversation(conversation.clone());
        self.inner.lock_failed().remove(&scope);
        self.inner.subscriptions.close(&scope).await;
        info!(conversation = %conversation, "conversation closed");
    }

    /// Send `body` to the open conversation and render it.
    pub async fn send_current(&self, body: &str) -> Result<Message, FairwayError> {
        let inner = &self.inner;
        let me = inner.me().await?;
        let (conversation, generation) = {
            let active = inner.lock_active();
            match active.as_ref() {
                Some(a) => (a.timeline.conversation().clone(), a.generation),
                None => return Err(FairwayError::Validation("no conversation is open".into())),
            }
        };
        let message = inner.sender.send(&conversation, &me, body).await?;
        inner
            .ingest(MessageEvent::Insert(message.clone()), Origin::Sent(generation))
            .await;
        Ok(message)
    }

    /// Move the open conversation's read cursor to its newest message.
    pub async fn mark_read(&self) -> Result<(), FairwayError> {
        let inner = &self.inner;
        let me = inner.me().await?;
        let (conversation, newest) = {
            let active = inner.lock_active();
            match active.as_ref() {
                Some(a) => (
                    a.timeline.conversation().clone(),
                    a.timeline.newest().map(|m| m.created_at),
                ),
                None => return Ok(()),
            }
        };

        let at = match newest {
            Some(at) => at,
            None => match inner.store.query_messages(&conversation, 1, None).await {
                Ok(latest) => latest.last().map_or_else(|| inner.clock.now(), |m| m.created_at),
                Err(e) => {
                    warn!(conversation = %conversation, error = %e, "newest message lookup failed");
                    inner.clock.now()
                }
            },
        };

        inner.cursors.advance(&me, &conversation, at).await;
        if inner.shared.clear_badge(&conversation) {
            inner.publish_badge(&conversation, 0);
        }
        inner.shared.unread().invalidate();
        inner.refresh_total().await;
        Ok(())
    }

    /// Record an app visibility change. Coming back to the foreground catches
    /// up every subscribed scope.
    pub async fn set_visibility(&self, visibility: Visibility) -> Result<(), FairwayError> {
        let inner = &self.inner;
        let previous = inner.backfill.set_visibility(visibility);
        debug!(%previous, %visibility, "visibility changed");
        if previous == Visibility::Background && visibility == Visibility::Foreground {
            inner.me().await?;
            inner.catch_up(BackfillReason::Foreground).await;
            if inner.active_id().is_some() {
                return self.mark_read().await;
            }
            inner.shared.unread().invalidate();
            inner.refresh_total().await;
        }
        Ok(())
    }

    /// Pull-to-refresh: backfill the open conversation, or every membership
    /// when none is open. Ignores the visibility throttle.
    pub async fn refresh(&self) -> Result<BackfillOutcome, FairwayError> {
        let inner = &self.inner;
        inner.me().await?;
        let scope = match inner.active_id() {
            Some(conversation) => ChannelScope::Conversation(conversation),
            None => ChannelScope::Global,
        };
        let outcome = inner.backfill_scope(&scope, BackfillReason::PullToRefresh).await?;
        inner.shared.unread().invalidate();
        inner.refresh_total().await;
        Ok(outcome)
    }

    /// Subscribe to the global channel that drives badges for conversations
    /// that are not open. Returns the unread total.
    pub async fn start_global(&self) -> Result<u64, FairwayError> {
        let inner = &self.inner;
        let me = inner.me().await?;
        let memberships = inner.refresh_memberships().await?;
        inner.global.store(true, Ordering::SeqCst);

        match inner.subscriptions.open(&ChannelScope::Global).await {
            Ok(()) => {}
            Err(FairwayError::Cancelled) => return Err(FairwayError::Cancelled),
            Err(e) => warn!(error = %e, "global channel unavailable, badges rely on polling"),
        }

        let total = inner.refresh_total().await;
        let active = inner.active_id();
        for conversation in &memberships {
            if active.as_ref() == Some(conversation) {
                continue;
            }
            // Served from the batch results just cached; only a miss reaches the store.
            let count = inner
                .shared
                .unread()
                .conversation_unread(&me, conversation, inner.cursors.get(conversation))
                .await;
            if inner.shared.seed_badge(conversation, count) && count > 0 {
                inner.publish_badge(conversation, count);
            }
        }
        info!(conversations = memberships.len(), total, "global channel started");
        Ok(total)
    }

    /// Unread total across every membership.
    pub async fn total_unread(&self) -> Result<u64, FairwayError> {
        self.inner.me().await?;
        Ok(self.inner.refresh_total().await)
    }

    /// Tear down every push channel, subscribe the open conversation and the
    /// global scope again, then catch up on what the old link missed.
    pub async fn restart_realtime(&self) -> Result<(), FairwayError> {
        self.inner.me().await?;
        self.inner.restart_realtime().await
    }

    /// The host regained network access. Re-establishes any channel that is
    /// down and catches up. Ignored while suspended.
    pub async fn network_online(&self) -> Result<(), FairwayError> {
        let inner = &self.inner;
        inner.me().await?;
        if inner.suspended.load(Ordering::SeqCst) {
            debug!("network back while suspended, waiting for resume");
            return Ok(());
        }
        info!("network online, re-establishing channels");
        inner.reopen_channels().await?;
        inner.catch_up(BackfillReason::NetworkOnline).await;
        inner.shared.unread().invalidate();
        inner.refresh_total().await;
        Ok(())
    }

    /// Tear down every push channel and the polling fallback, for a host that
    /// is about to be frozen. The open conversation and badges are kept.
    pub async fn suspend(&self) {
        let inner = &self.inner;
        if inner.suspended.swap(true, Ordering::SeqCst) {
            return;
        }
        inner.stop_polling();
        inner.subscriptions.close_all().await;
        inner.lock_failed().clear();
        info!("push channels torn down for suspend");
    }

    /// Re-establish fresh channels after [`suspend`](Self::suspend), catch up,
    /// and mark the open conversation read when in the foreground.
    pub async fn resume(&self) -> Result<(), FairwayError> {
        let inner = &self.inner;
        inner.me().await?;
        inner.suspended.store(false, Ordering::SeqCst);
        inner.reopen_channels().await?;
        inner.catch_up(BackfillReason::Resumed).await;
        info!("push channels re-established after suspend");
        if inner.active_id().is_some() && inner.backfill.visibility() == Visibility::Foreground {
            return self.mark_read().await;
        }
        inner.shared.unread().invalidate();
        inner.refresh_total().await;
        Ok(())
    }

    /// Leave-side cleanup: close the conversation if open and drop its
    /// cursor, watermark and badge.
    pub async fn forget_conversation(&self, conversation: &ConversationId) {
        self.close_conversation(conversation).await;
        let inner = &self.inner;
        inner.cursors.forget(conversation).await;
        inner.watermarks.forget(conversation);
        inner.shared.forget_badge(conversation);
        let mut memberships = inner.lock_memberships();
        memberships.member_of.remove(conversation);
        memberships.outside.insert(conversation.clone());
    }

    /// Rendered messages of the open conversation, oldest first.
    pub fn timeline(&self) -> Vec<Message> {
        self.inner
            .lock_active()
            .as_ref()
            .map(|a| a.timeline.to_vec())
            .unwrap_or_default()
    }

    /// The conversation whose timeline is rendered, if any.
    pub fn active_conversation(&self) -> Option<ConversationId> {
        self.inner.active_id()
    }

    /// Unread badge for a conversation that is not open.
    pub fn badge_count(&self, conversation: &ConversationId) -> u64 {
        self.inner.shared.badge(conversation)
    }

    /// Connectivity of the channel for `scope`, if one is open.
    pub fn connectivity(&self, scope: &ChannelScope) -> Option<ConnectivityState> {
        self.inner.subscriptions.state(scope)
    }

    /// Degraded while any scope relies on polling or the batch unread circuit
    /// is open; unhealthy after shutdown.
    pub fn health(&self) -> HealthStatus {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return HealthStatus::Unhealthy("sync engine is shut down".into());
        }
        let failed: Vec<String> = inner.lock_failed().iter().map(ToString::to_string).collect();
        if !failed.is_empty() {
            return HealthStatus::Degraded(format!("polling for {}", failed.join(", ")));
        }
        let circuit = inner.shared.unread().circuit();
        if circuit.state == CircuitState::Open {
            return HealthStatus::Degraded(format!(
                "batch unread disabled after {} failures",
                circuit.failures
            ));
        }
        HealthStatus::Healthy
    }

    /// A new receiver for engine events published from now on.
    pub fn events(&self) -> EventReceiver {
        self.inner.bus.subscribe()
    }

    /// The bus events are published on.
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Session state shared with other controllers of the same user.
    pub fn shared(&self) -> &Arc<SharedSyncState> {
        &self.inner.shared
    }

    /// Wait until every signal the subscription tasks have queued so far has
    /// been handled by the dispatcher.
    pub async fn settle(&self) {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        let (ack, done) = oneshot::channel();
        if self.inner.sink.send(SyncSignal::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Close every channel and wait for background tasks to finish.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return;
        }
        info!("sync engine shutting down");
        inner.stop_polling();
        inner.subscriptions.close_all().await;
        inner.shutdown.cancel();
        inner.tasks.close();
        inner.tasks.wait().await;
        inner.lock_active().take();
        info!("sync engine stopped");
    }
}

impl Drop for ConversationController {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveConversation>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_memberships(&self) -> MutexGuard<'_, Memberships> {
        self.memberships.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_failed(&self) -> MutexGuard<'_, HashSet<ChannelScope>> {
        self.failed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_polling(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.polling.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_last_realtime(&self) -> MutexGuard<'_, Option<Timestamp>> {
        self.last_realtime.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active_id(&self) -> Option<ConversationId> {
        self.lock_active()
            .as_ref()
            .map(|a| a.timeline.conversation().clone())
    }

    fn active_generation(&self) -> Option<u64> {
        self.lock_active().as_ref().map(|a| a.generation)
    }

    /// `Cancelled` when another open superseded `generation`.
    fn ensure_current(&self, generation: u64) -> Result<(), FairwayError> {
        if self.active_generation() == Some(generation) {
            Ok(())
        } else {
            debug!(generation, "conversation open superseded");
            Err(FairwayError::Cancelled)
        }
    }

    fn deactivate(&self, generation: u64) {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|a| a.generation == generation) {
            active.take();
        }
    }

    /// The signed-in user, resolved once per controller.
    async fn me(&self) -> Result<UserId, FairwayError> {
        let user = self
            .identity
            .get_or_try_init(|| async {
                let user = self
                    .auth
                    .current_user()
                    .await?
                    .ok_or(FairwayError::NotAuthenticated)?;
                match self.cursors.warm(&user).await {
                    Ok(count) => debug!(count, "read cursors loaded from device cache"),
                    Err(e) => warn!(error = %e, "failed to load cached read cursors"),
                }
                match self.watermarks.warm().await {
                    Ok(count) => debug!(count, "watermarks loaded from device cache"),
                    Err(e) => warn!(error = %e, "failed to load cached watermarks"),
                }
                info!(user = %user, "identity resolved");
                Ok::<_, FairwayError>(user)
            })
            .await?;
        Ok(user.clone())
    }

    fn publish(&self, event: EngineEvent) {
        self.bus.publish(event);
    }

    fn publish_badge(&self, conversation: &ConversationId, count: u64) {
        self.publish(EngineEvent::BadgeChanged {
            conversation_id: conversation.clone(),
            count,
        });
    }

    /// Recompute the unread total and publish it when it changed.
    ///
    /// A total computed across an invalidation is returned but not published;
    /// whoever invalidated publishes the newer one.
    async fn refresh_total(&self) -> u64 {
        let Some(me) = self.identity.get() else {
            return 0;
        };
        let unread = self.shared.unread();
        let epoch = unread.epoch();
        let cursors = self.cursors.snapshot();
        let total = unread.total_unread(me, &cursors).await;
        if unread.epoch() != epoch {
            debug!(total, "unread total superseded, not published");
            return total;
        }
        if self.shared.note_total(total) {
            self.publish(EngineEvent::TotalUnreadChanged { total });
        }
        total
    }

    /// Route one inbound message. Every source goes through here.
    async fn ingest(&self, event: MessageEvent, origin: Origin) {
        let Some(me) = self.identity.get().cloned() else {
            debug!("no identity yet, dropping inbound event");
            return;
        };
        let conversation = event.message().conversation_id.clone();
        let created_at = event.message().created_at;
        let now = self.clock.now();

        // `None` once the open timeline took the event.
        let unrendered = {
            let mut active = self.lock_active();
            match active.as_mut() {
                Some(current) if current.timeline.conversation() == &conversation => {
                    if origin.generation().is_some_and(|g| g != current.generation) {
                        debug!(conversation = %conversation, ?origin, "stale delivery discarded");
                        return;
                    }
                    self.render(current, event, now);
                    None
                }
                _ => Some(event),
            }
        };

        let Some(event) = unrendered else {
            self.watermarks.observe(&conversation, created_at).await;
            let reads = !matches!(origin, Origin::History(_))
                && self.backfill.visibility() == Visibility::Foreground;
            if reads {
                self.cursors.advance(&me, &conversation, created_at).await;
            }
            return;
        };

        if origin.generation().is_some() {
            debug!(conversation = %conversation, ?origin, "delivery for a closed conversation discarded");
            return;
        }
        let MessageEvent::Insert(message) = event else {
            debug!(conversation = %conversation, "update for a conversation that is not open");
            return;
        };
        self.count_unseen(&me, message, now).await;
    }

    /// Apply an event to the open timeline. Caller holds the active lock.
    fn render(&self, current: &mut ActiveConversation, event: MessageEvent, now: Timestamp) {
        match event {
            MessageEvent::Insert(message) => {
                if !current.dedup.remember(&message.id, now) {
                    debug!(message = %message.id, "duplicate delivery dropped");
                    return;
                }
                self.shared.remember(&message.id, now);
                if let Some(position) = current.timeline.insert(message.clone()) {
                    self.publish(EngineEvent::MessageRendered {
                        conversation_id: message.conversation_id.clone(),
                        message,
                        position,
                    });
                }
            }
            MessageEvent::Update(message) => {
                let id = message.id.clone();
                if current.timeline.get(&id) == Some(&message) {
                    debug!(message = %id, "duplicate update dropped");
                    return;
                }
                let Some(position) = current.timeline.apply_update(message) else {
                    debug!(message = %id, "update for a message that is not rendered");
                    return;
                };
                if let Some(updated) = current.timeline.get(&id) {
                    self.publish(EngineEvent::MessageUpdated {
                        conversation_id: updated.conversation_id.clone(),
                        message: updated.clone(),
                        position,
                    });
                }
            }
        }
    }

    /// Badge path for a message in a conversation that is not open.
    async fn count_unseen(&self, me: &UserId, message: Message, now: Timestamp) {
        let conversation = &message.conversation_id;
        if !self.is_member(conversation).await {
            debug!(conversation = %conversation, "message outside memberships ignored");
            return;
        }
        if !self.shared.remember(&message.id, now) {
            debug!(message = %message.id, "badge already counted");
            return;
        }
        self.watermarks.observe(conversation, message.created_at).await;

        if message.sender_id == *me {
            return;
        }
        if self
            .cursors
            .get(conversation)
            .is_some_and(|cursor| message.created_at <= cursor)
        {
            debug!(message = %message.id, "message already read");
            return;
        }

        let seed = self.shared.unread().cached_conversation(conversation, now);
        let count = self.shared.increment_badge(conversation, seed);
        self.publish_badge(conversation, count);
        self.shared.unread().invalidate();
        self.refresh_total().await;
    }

    async fn is_member(&self, conversation: &ConversationId) -> bool {
        {
            let memberships = self.lock_memberships();
            if memberships.member_of.contains(conversation) {
                return true;
            }
            if memberships.outside.contains(conversation) {
                return false;
            }
        }
        match self.refresh_memberships().await {
            Ok(ids) => {
                let member = ids.contains(conversation);
                if !member {
                    self.lock_memberships().outside.insert(conversation.clone());
                }
                member
            }
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "membership lookup failed");
                false
            }
        }
    }

    async fn refresh_memberships(&self) -> Result<Vec<ConversationId>, FairwayError> {
        let me = self.me().await?;
        let ids = self.store.list_memberships(&me).await?;
        let mut guard = self.lock_memberships();
        let memberships = &mut *guard;
        memberships.member_of = ids.iter().cloned().collect();
        memberships.outside.retain(|c| !memberships.member_of.contains(c));
        Ok(ids)
    }

    /// Backfill `scope` and route the results through [`ingest`](Self::ingest).
    async fn backfill_scope(
        &self,
        scope: &ChannelScope,
        reason: BackfillReason,
    ) -> Result<BackfillOutcome, FairwayError> {
        let (targets, origin) = match scope {
            ChannelScope::Conversation(conversation) => {
                let generation = {
                    let active = self.lock_active();
                    match active.as_ref() {
                        Some(a) if a.timeline.conversation() == conversation => a.generation,
                        _ => {
                            debug!(%scope, "backfill skipped, conversation not open");
                            return Ok(BackfillOutcome::Skipped);
                        }
                    }
                };
                let since = self.watermarks.since(conversation);
                (vec![(conversation.clone(), since)], Origin::Backfill(Some(generation)))
            }
            ChannelScope::Global => {
                let memberships = self.refresh_memberships().await?;
                let targets = memberships
                    .into_iter()
                    .map(|c| {
                        let since = self.watermarks.since(&c);
                        (c, since)
                    })
                    .collect();
                (targets, Origin::Backfill(None))
            }
        };

        let outcome = self.backfill.maybe_backfill(scope, targets, reason).await?;
        for message in outcome.messages() {
            self.ingest(MessageEvent::Insert(message.clone()), origin).await;
        }
        Ok(outcome)
    }

    /// Backfill the open conversation and, once started, the global scope.
    async fn catch_up(&self, reason: BackfillReason) {
        if let Some(conversation) = self.active_id() {
            let scope = ChannelScope::Conversation(conversation);
            if let Err(e) = self.backfill_scope(&scope, reason).await {
                warn!(%scope, %reason, error = %e, "backfill failed");
            }
        }
        if self.global.load(Ordering::SeqCst)
            && let Err(e) = self.backfill_scope(&ChannelScope::Global, reason).await
        {
            warn!(scope = "global", %reason, error = %e, "backfill failed");
        }
    }

    /// Scopes that should have a live channel right now.
    fn wanted_scopes(&self) -> Vec<ChannelScope> {
        let mut scopes: Vec<ChannelScope> = self
            .active_id()
            .map(ChannelScope::Conversation)
            .into_iter()
            .collect();
        if self.global.load(Ordering::SeqCst) {
            scopes.push(ChannelScope::Global);
        }
        scopes
    }

    /// Open every wanted scope. Live channels are kept; a scope whose retries
    /// run out again is handed to polling by its task.
    async fn reopen_channels(&self) -> Result<(), FairwayError> {
        for scope in self.wanted_scopes() {
            match self.subscriptions.open(&scope).await {
                Ok(()) => {
                    self.lock_failed().remove(&scope);
                }
                Err(FairwayError::Cancelled) => return Err(FairwayError::Cancelled),
                Err(e) => warn!(%scope, error = %e, "push channel not re-established"),
            }
        }
        Ok(())
    }

    async fn restart_realtime(&self) -> Result<(), FairwayError> {
        info!("restarting realtime channels");
        self.subscriptions.close_all().await;
        self.lock_failed().clear();
        self.reopen_channels().await?;
        self.catch_up(BackfillReason::StaleRestart).await;
        Ok(())
    }

    fn ensure_polling(self: &Arc<Self>) {
        let mut polling = self.lock_polling();
        if polling.is_some() || self.shutdown.is_cancelled() {
            return;
        }
        let token = self.shutdown.child_token();
        *polling = Some(token.clone());
        let inner = Arc::clone(self);
        self.tasks.spawn(async move { inner.poll(token).await });
        info!(
            interval_ms = self.config.polling.interval_ms,
            "push channel down, polling fallback started"
        );
    }

    fn stop_polling(&self) {
        if let Some(token) = self.lock_polling().take() {
            token.cancel();
        }
    }

    async fn poll(self: Arc<Self>, token: CancellationToken) {
        let interval = self.config.polling.interval();
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = self.clock.sleep(interval) => {}
            }
            self.poll_once().await;

            let mut polling = self.lock_polling();
            if token.is_cancelled() {
                break;
            }
            if self.lock_failed().is_empty() {
                polling.take();
                info!("push channels restored, polling fallback stopped");
                break;
            }
        }
        debug!("polling task exited");
    }

    async fn poll_once(&self) {
        self.catch_up(BackfillReason::Polling).await;
        self.shared.unread().invalidate();
        self.refresh_total().await;

        let scopes: Vec<ChannelScope> = self.lock_failed().iter().cloned().collect();
        let active = self.active_id();
        for scope in scopes {
            if let ChannelScope::Conversation(conversation) = &scope
                && active.as_ref() != Some(conversation)
            {
                self.lock_failed().remove(&scope);
                continue;
            }
            match self.subscriptions.open(&scope).await {
                Ok(()) => {
                    self.lock_failed().remove(&scope);
                    info!(%scope, "push channel re-established");
                }
                Err(e) => debug!(%scope, error = %e, "push channel still down"),
            }
        }
    }
}

/// Handle subscription signals one at a time until shutdown.
async fn dispatch(inner: Arc<Inner>, mut signals: mpsc::UnboundedReceiver<SyncSignal>) {
    loop {
        let signal = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            signal = signals.recv() => match signal {
                Some(signal) => signal,
                None => break,
            },
        };

        match signal {
            SyncSignal::Inbound { event, .. } => {
                *inner.lock_last_realtime() = Some(inner.clock.now());
                inner.ingest(event, Origin::Realtime).await;
            }
            SyncSignal::Connectivity { scope, state } => {
                debug!(%scope, %state, "connectivity changed");
                if state == ConnectivityState::Active {
                    inner.lock_failed().remove(&scope);
                }
                inner.publish(EngineEvent::ConnectivityChanged { scope, state });
            }
            SyncSignal::Reconnected { scope } => {
                if let Err(e) = inner
                    .backfill_scope(&scope, BackfillReason::Reconnected)
                    .await
                {
                    warn!(%scope, error = %e, "reconnect backfill failed");
                }
            }
            SyncSignal::ChannelFailed { scope, error } => {
                warn!(%scope, error = %error, "push channel gave up");
                inner.lock_failed().insert(scope);
                inner.ensure_polling();
            }
            SyncSignal::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("signal dispatcher stopped");
}

/// Restart every channel when the realtime link has been silent too long.
async fn watch_links(inner: Arc<Inner>) {
    let config = inner.config.watchdog.clone();
    let mut watchdog = LinkWatchdog::new(&config);
    loop {
        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            _ = inner.clock.sleep(config.check_interval()) => {}
        }
        if inner.suspended.load(Ordering::SeqCst)
            || inner.backfill.visibility() != Visibility::Foreground
            || inner.wanted_scopes().is_empty()
        {
            continue;
        }

        let last = *inner.lock_last_realtime();
        let Some(delay) = watchdog.check(inner.clock.now(), last) else {
            continue;
        };
        let delay = delay + watchdog.jitter();
        warn!(
            delay_ms = delay.as_millis() as u64,
            restarts = watchdog.restarts(),
            "realtime link stale, restart scheduled"
        );
        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            _ = inner.clock.sleep(delay) => {}
        }
        if *inner.lock_last_realtime() != last {
            debug!("realtime link recovered before restart");
            continue;
        }
        match inner.restart_realtime().await {
            Ok(()) => info!("realtime link restarted"),
            Err(FairwayError::Cancelled) if inner.shutdown.is_cancelled() => break,
            Err(e) => warn!(error = %e, "realtime restart failed"),
        }
    }
    debug!("link watchdog stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use fairway_core::{ManualClock, MessageId, StaticAuth};
    use fairway_store::MemoryStore;

    fn ts(secs: i64) -> Timestamp {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn message(room: &ConversationId, id: &str, sender: &str, secs: i64) -> Message {
        Message {
            id: MessageId::from(id),
            conversation_id: room.clone(),
            sender_id: UserId::from(sender),
            body: id.to_string(),
            created_at: ts(secs),
            edited_at: None,
            deleted: false,
        }
    }

    struct Fixture {
        memory: MemoryStore,
        room: ConversationId,
        controller: ConversationController,
    }

    async fn fixture(user: Option<&str>) -> Fixture {
        let clock = Arc::new(ManualClock::new(ts(10_000)));
        let memory = MemoryStore::new(clock.clone());
        let room = memory
            .create_direct(&UserId::from("alice"), &UserId::from("bob"))
            .unwrap()
            .id;
        let auth = match user {
            Some(user) => StaticAuth::signed_in(user),
            None => StaticAuth::anonymous(),
        };
        let mut config = FairwayConfig::default();
        config.watchdog.enabled = false;
        let controller = ConversationController::builder(Arc::new(memory.clone()), Arc::new(auth))
            .config(config)
            .clock(clock)
            .build()
            .await
            .unwrap();
        Fixture {
            memory,
            room,
            controller,
        }
    }

    #[tokio::test]
    async fn anonymous_user_cannot_open() {
        let f = fixture(None).await;
        let err = f.controller.open_conversation(&f.room).await.unwrap_err();
        assert!(matches!(err, FairwayError::NotAuthenticated));
        assert!(f.controller.active_conversation().is_none());
    }

    #[tokio::test]
    async fn send_without_open_conversation_is_rejected() {
        let f = fixture(Some("alice")).await;
        let err = f.controller.send_current("hi").await.unwrap_err();
        assert!(matches!(err, FairwayError::Validation(_)));
    }

    #[tokio::test]
    async fn history_renders_in_creation_order() {
        let f = fixture(Some("alice")).await;
        for (id, secs) in [("m3", 3), ("m1", 1), ("m2", 2)] {
            f.memory.import(message(&f.room, id, "bob", secs)).unwrap();
        }
        f.controller.open_conversation(&f.room).await.unwrap();

        let ids: Vec<String> = f
            .controller
            .timeline()
            .into_iter()
            .map(|m| m.id.0)
            .collect();
        assert_eq!(ids, ["m1", "m2", "m3"]);
        f.controller.shutdown().await;
    }

    #[tokio::test]
    async fn stale_origin_is_discarded_after_reopen() {
        let f = fixture(Some("alice")).await;
        f.controller.open_conversation(&f.room).await.unwrap();
        let old = f.controller.inner.active_generation().unwrap();

        f.controller.close_conversation(&f.room).await;
        f.controller.open_conversation(&f.room).await.unwrap();

        f.controller
            .inner
            .ingest(
                MessageEvent::Insert(message(&f.room, "late", "bob", 5)),
                Origin::Backfill(Some(old)),
            )
            .await;
        assert!(f.controller.timeline().is_empty());
        f.controller.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_reports_unhealthy() {
        let f = fixture(Some("alice")).await;
        assert_eq!(f.controller.health(), HealthStatus::Healthy);
        f.controller.shutdown().await;
        assert!(matches!(f.controller.health(), HealthStatus::Unhealthy(_)));
    }
}
