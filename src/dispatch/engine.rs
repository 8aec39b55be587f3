//! Dispatch engine: worker pool, polling loop and outcome recording.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::{PushChannel, PushError, PushErrorKind};
use crate::config::DispatchSettings;
use crate::model::{ChannelPreferences, Frequency, Notification, PushState};
use crate::render::RenderService;
use crate::service::ErrorListener;
use crate::store::{NotificationStore, PreferencesStore};

use super::key_lock::KeyedLock;
use super::retry_policy::RetryPolicy;
use super::selector::is_eligible;
use super::{PushOutcome, PushResult};

/// What a worker did with a polled candidate.
#[derive(Debug, PartialEq, Eq)]
enum ProcessOutcome {
    /// An attempt ran and its outcome was recorded.
    Dispatched,
    /// Another task holds the notification's lock; nothing was done.
    Contended,
    /// An attempt ran but the outcome could not be persisted.
    RecordFailed,
}

/// Error returned by [`DispatchEngine::dispatch_now`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No channel accepted the notification. The staged notification must
    /// be rolled back by the caller.
    #[error("immediate dispatch failed: {0}")]
    Failed(String),
    /// Delivery succeeded but the outcome could not be persisted. The
    /// notification was delivered; the caller must not roll it back.
    #[error("failed to record dispatch outcome: {0}")]
    Record(#[source] anyhow::Error),
}

/// The dispatch and retry engine.
///
/// Owns a fixed pool of worker tasks that poll the notification store for
/// due work. Each attempt runs under the notification's [`KeyedLock`]
/// entry, which also serializes against [`dispatch_now`](Self::dispatch_now)
/// calls for the same notification.
pub struct DispatchEngine {
    notification_store: Arc<dyn NotificationStore>,
    preferences_store: Arc<dyn PreferencesStore>,
    render_service: Arc<dyn RenderService>,
    channels: Vec<Arc<dyn PushChannel>>,
    retry_policy: RetryPolicy,
    locks: KeyedLock<String>,
    wake: Notify,
    error_listener: RwLock<Option<Arc<dyn ErrorListener>>>,
    shutdown_token: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
    pool_size: usize,
    poll_interval: Duration,
}

impl DispatchEngine {
    pub fn new(
        notification_store: Arc<dyn NotificationStore>,
        preferences_store: Arc<dyn PreferencesStore>,
        render_service: Arc<dyn RenderService>,
        channels: Vec<Arc<dyn PushChannel>>,
        settings: &DispatchSettings,
    ) -> Self {
        Self {
            notification_store,
            preferences_store,
            render_service,
            channels,
            retry_policy: RetryPolicy::new(settings.max_error_count),
            locks: KeyedLock::new(),
            wake: Notify::new(),
            error_listener: RwLock::new(None),
            shutdown_token: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
            pool_size: settings.pool_size,
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
        }
    }

    /// Register the listener that receives every failed channel attempt.
    pub fn set_error_listener(&self, listener: Arc<dyn ErrorListener>) {
        *self.error_listener.write().unwrap() = Some(listener);
    }

    /// Initial channel preferences for a new user, collected from every
    /// channel that wants to be enabled by default.
    pub fn default_channel_preferences(&self) -> HashMap<String, ChannelPreferences> {
        let mut map = HashMap::new();
        for channel in &self.channels {
            if let Some(prefs) = channel.default_preferences() {
                map.insert(channel.id().to_string(), prefs);
            }
        }
        map
    }

    /// Wake a polling worker; called when new work may be available.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Spawn the worker pool.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().unwrap();
        for worker_id in 0..self.pool_size {
            let engine = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                engine.run_worker(worker_id).await;
            }));
        }
        info!("dispatch engine started with {} workers", self.pool_size);
    }

    /// Stop the worker pool, letting in-flight attempts finish, and wait
    /// for every worker to exit.
    pub async fn shutdown(&self) {
        info!("dispatch engine shutting down");
        self.shutdown_token.cancel();
        self.wake.notify_waiters();

        let workers: Vec<JoinHandle<()>> = self.workers.lock().unwrap().drain(..).collect();
        for handle in workers {
            if let Err(e) = handle.await {
                warn!("dispatch worker terminated abnormally: {}", e);
            }
        }
        info!("all dispatch workers stopped");
    }

    /// Synchronous, caller-blocking delivery attempt.
    ///
    /// Waits for the notification's lock if a background attempt is in
    /// flight. Only a successful outcome is recorded; on failure the
    /// caller is expected to delete the staged notification so no queued
    /// artifact is left behind.
    pub async fn dispatch_now(&self, notification: &mut Notification) -> Result<(), DispatchError> {
        let _guard = self.locks.lock(notification.id.clone()).await;

        let outcome = self.do_push(notification, true).await;
        if outcome.result != PushResult::Success {
            return Err(DispatchError::Failed(outcome.message));
        }

        self.record_push_attempt(notification, &outcome)
            .map_err(DispatchError::Record)
    }

    async fn run_worker(&self, worker_id: usize) {
        debug!("dispatch worker {} started", worker_id);
        loop {
            if self.shutdown_token.is_cancelled() {
                break;
            }

            match self.notification_store.fetch_next_due(Utc::now().timestamp()) {
                Ok(Some(notification)) => match self.process(notification).await {
                    ProcessOutcome::Dispatched => {}
                    ProcessOutcome::Contended => {
                        // candidate is locked by another worker or an
                        // immediate dispatch; try the next one right away
                        tokio::task::yield_now().await;
                    }
                    // retrying immediately would re-deliver the same
                    // notification, so fall back to the safety-net poll
                    ProcessOutcome::RecordFailed => self.idle().await,
                },
                Ok(None) => self.idle().await,
                Err(e) => {
                    error!("failed to fetch next due notification: {}", e);
                    self.idle().await;
                }
            }
        }
        debug!("dispatch worker {} stopped", worker_id);
    }

    /// Attempt delivery of one polled notification under its lock.
    async fn process(&self, mut notification: Notification) -> ProcessOutcome {
        let Some(_guard) = self.locks.try_lock(notification.id.clone()) else {
            debug!(
                "notification {} already being dispatched, skipping",
                notification.id
            );
            return ProcessOutcome::Contended;
        };

        let outcome = self.do_push(&notification, false).await;
        if let Err(e) = self.record_push_attempt(&mut notification, &outcome) {
            // the attempt happened but the record still says queued; the
            // safety-net poll picks it up again once the store recovers
            error!(
                "failed to record push attempt for notification {}: {}",
                notification.id, e
            );
            return ProcessOutcome::RecordFailed;
        }
        ProcessOutcome::Dispatched
    }

    /// Block until the wake signal fires, bounded by the safety-net poll
    /// interval so lost signals never cause starvation.
    async fn idle(&self) {
        tokio::select! {
            _ = self.wake.notified() => {}
            _ = tokio::time::sleep(self.poll_interval) => {}
            _ = self.shutdown_token.cancelled() => {}
        }
    }

    /// Push the notification to every eligible channel and aggregate the
    /// per-channel outcomes.
    async fn do_push(&self, notification: &Notification, instant: bool) -> PushOutcome {
        let prefs = match self.preferences_store.get(&notification.user_id) {
            Ok(Some(prefs)) => prefs,
            Ok(None) => {
                warn!("can't push to unknown user {}", notification.user_id);
                return PushOutcome::persistent(format!(
                    "unknown user {}",
                    notification.user_id
                ));
            }
            Err(e) => {
                error!(
                    "failed to load preferences for user {}: {}",
                    notification.user_id, e
                );
                return PushOutcome::temporary(format!("failed to load preferences: {}", e));
            }
        };

        let mut success_channels: Vec<String> = Vec::new();
        let mut temporary_channels: Vec<(String, String)> = Vec::new();
        let mut persistent_channels: Vec<(String, String)> = Vec::new();

        for channel in &self.channels {
            let channel_prefs = prefs
                .channel_prefs
                .get(channel.id())
                .cloned()
                .or_else(|| channel.default_preferences());

            if !is_eligible(
                notification,
                channel.as_ref(),
                channel_prefs.as_ref(),
                Frequency::Instant,
                instant,
            ) {
                continue;
            }
            let Some(channel_prefs) = channel_prefs else {
                continue;
            };

            let message = match self
                .render_service
                .render(notification, &prefs, &channel_prefs)
            {
                Ok(message) => message,
                Err(e) => {
                    // this channel simply contributes nothing to the attempt
                    error!(
                        "failed to render notification {} for channel {}: {}",
                        notification.id,
                        channel.id(),
                        e
                    );
                    continue;
                }
            };

            match channel.push(&message, &channel_prefs).await {
                Ok(()) => {
                    success_channels.push(channel.id().to_string());
                }
                Err(e) => {
                    match e.kind {
                        PushErrorKind::Temporary => {
                            temporary_channels.push((channel.id().to_string(), e.message.clone()))
                        }
                        PushErrorKind::Persistent => {
                            persistent_channels.push((channel.id().to_string(), e.message.clone()))
                        }
                    }
                    self.report_error(notification, channel.id(), &e);
                }
            }
        }

        // partial success counts as overall success: retrying would
        // duplicate delivery on the channels that already succeeded
        if !success_channels.is_empty() {
            PushOutcome::success(format!("channels: {:?}", success_channels))
        } else if !temporary_channels.is_empty() {
            PushOutcome::temporary(format!("temporary error, channels: {:?}", temporary_channels))
        } else if !persistent_channels.is_empty() {
            PushOutcome::persistent(format!(
                "persistent error, channels: {:?}",
                persistent_channels
            ))
        } else {
            // preferences may be completed later, so absence of eligible
            // channels is treated as recoverable
            PushOutcome::temporary("no eligible channels available".to_string())
        }
    }

    fn report_error(&self, notification: &Notification, channel_id: &str, push_error: &PushError) {
        let listener = self.error_listener.read().unwrap().clone();
        match listener {
            Some(listener) => {
                if let Err(e) = listener.error(notification, channel_id, push_error) {
                    error!(
                        "error listener failed for notification {}: {}",
                        notification.id, e
                    );
                }
            }
            None => {
                warn!(
                    "failed to deliver notification {} on channel {}: {}",
                    notification.id, channel_id, push_error
                );
            }
        }
    }

    /// Fold an attempt outcome into the notification's tracking fields and
    /// persist it. Store write failures propagate: masking them would make
    /// the stored push state inconsistent with reality.
    fn record_push_attempt(
        &self,
        notification: &mut Notification,
        outcome: &PushOutcome,
    ) -> anyhow::Result<()> {
        let now = Utc::now().timestamp();

        if outcome.result == PushResult::Success {
            notification.push_state = PushState::Pushed;
            notification.push_date = now;
            notification.push_error_message = Some(outcome.message.clone());
        } else {
            let error_count = notification.record_push_error(&outcome.message);

            if self.retry_policy.is_terminal(error_count, outcome.result) {
                notification.push_state = PushState::Undeliverable;
                notification.push_date = now;
            } else {
                notification.push_state = PushState::Queued;
                notification.push_date = self.retry_policy.next_attempt_at(now, error_count);
            }
        }

        self.notification_store.update(notification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Params, Preferences};
    use crate::render::{MessageTemplate, TemplateRenderService};
    use crate::store::{SqliteNotificationStore, SqlitePreferencesStore};
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy, PartialEq)]
    enum Behavior {
        Succeed,
        TemporaryFailure,
        PersistentFailure,
    }

    struct TestChannel {
        id: &'static str,
        notification_types: HashSet<String>,
        behavior: Behavior,
        pushes: AtomicUsize,
        delay: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl TestChannel {
        fn new(id: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                id,
                notification_types: ["friend-request".to_string()].into_iter().collect(),
                behavior,
                pushes: AtomicUsize::new(0),
                delay: Duration::ZERO,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }

        fn slow(id: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                id,
                notification_types: ["friend-request".to_string()].into_iter().collect(),
                behavior: Behavior::Succeed,
                pushes: AtomicUsize::new(0),
                delay,
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            })
        }

        fn push_count(&self) -> usize {
            self.pushes.load(Ordering::SeqCst)
        }
    }

    impl crate::channel::Channel for TestChannel {
        fn id(&self) -> &str {
            self.id
        }

        fn notification_types(&self) -> &HashSet<String> {
            &self.notification_types
        }

        fn is_configured(&self, _user_id: &str, _prefs: &ChannelPreferences) -> bool {
            true
        }

        fn default_preferences(&self) -> Option<ChannelPreferences> {
            Some(ChannelPreferences::instant())
        }
    }

    #[async_trait]
    impl PushChannel for TestChannel {
        async fn push(
            &self,
            _message: &crate::render::RenderedMessage,
            _prefs: &ChannelPreferences,
        ) -> Result<(), PushError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.pushes.fetch_add(1, Ordering::SeqCst);

            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::TemporaryFailure => Err(PushError::temporary("connection refused")),
                Behavior::PersistentFailure => Err(PushError::persistent("invalid address")),
            }
        }
    }

    struct TestErrorListener {
        errors: AtomicUsize,
        fail: bool,
    }

    impl ErrorListener for TestErrorListener {
        fn error(
            &self,
            _notification: &Notification,
            _channel_id: &str,
            _error: &PushError,
        ) -> anyhow::Result<()> {
            self.errors.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("listener blew up");
            }
            Ok(())
        }
    }

    struct TestContext {
        engine: Arc<DispatchEngine>,
        notification_store: Arc<SqliteNotificationStore>,
        preferences_store: Arc<SqlitePreferencesStore>,
    }

    fn make_engine(channels: Vec<Arc<TestChannel>>) -> TestContext {
        make_engine_with_settings(channels, DispatchSettings::default())
    }

    fn make_engine_with_settings(
        channels: Vec<Arc<TestChannel>>,
        settings: DispatchSettings,
    ) -> TestContext {
        let channels: Vec<Arc<dyn PushChannel>> = channels
            .into_iter()
            .map(|c| c as Arc<dyn PushChannel>)
            .collect();
        let notification_store = Arc::new(SqliteNotificationStore::in_memory().unwrap());
        let preferences_store = Arc::new(SqlitePreferencesStore::in_memory().unwrap());
        let render_service = Arc::new(TemplateRenderService::new().with_template(
            "friend-request",
            MessageTemplate {
                subject: "New friend request".to_string(),
                body: "{from} wants to connect".to_string(),
            },
        ));

        let engine = Arc::new(DispatchEngine::new(
            notification_store.clone(),
            preferences_store.clone(),
            render_service,
            channels,
            &settings,
        ));

        TestContext {
            engine,
            notification_store,
            preferences_store,
        }
    }

    fn save_user_with_channels(ctx: &TestContext, user_id: &str, channel_ids: &[&str]) {
        save_user_with_frequency(ctx, user_id, channel_ids, Frequency::Instant);
    }

    fn save_user_with_frequency(
        ctx: &TestContext,
        user_id: &str,
        channel_ids: &[&str],
        frequency: Frequency,
    ) {
        let mut prefs = Preferences::new(user_id);
        for id in channel_ids {
            prefs
                .channel_prefs
                .insert(id.to_string(), ChannelPreferences::new(frequency));
        }
        ctx.preferences_store.save(&prefs).unwrap();
    }

    fn make_notification(user_id: &str) -> Notification {
        Notification::new(user_id, "friend-request")
            .with_params(Params::new().with("from", "user-2"))
    }

    #[tokio::test]
    async fn test_successful_push_marks_pushed() {
        let channel = TestChannel::new("mail", Behavior::Succeed);
        let ctx = make_engine(vec![channel.clone()]);
        save_user_with_channels(&ctx, "user-1", &["mail"]);

        let notification = make_notification("user-1");
        ctx.notification_store.save(&notification).unwrap();

        assert_eq!(
            ctx.engine.process(notification.clone()).await,
            ProcessOutcome::Dispatched
        );

        let stored = ctx.notification_store.get(&notification.id).unwrap().unwrap();
        assert_eq!(stored.push_state, PushState::Pushed);
        assert_eq!(stored.push_error_count, 0);
        assert!(stored.push_error_message.unwrap().contains("mail"));
        assert_eq!(channel.push_count(), 1);
    }

    #[tokio::test]
    async fn test_temporary_failure_schedules_retry() {
        let channel = TestChannel::new("mail", Behavior::TemporaryFailure);
        let ctx = make_engine(vec![channel]);
        save_user_with_channels(&ctx, "user-1", &["mail"]);

        let notification = make_notification("user-1");
        ctx.notification_store.save(&notification).unwrap();

        let before = Utc::now().timestamp();
        ctx.engine.process(notification.clone()).await;

        let stored = ctx.notification_store.get(&notification.id).unwrap().unwrap();
        assert_eq!(stored.push_state, PushState::Queued);
        assert_eq!(stored.push_error_count, 1);
        // first retry is a minute out
        assert!(stored.push_date >= before + 60);
        assert!(stored.push_date <= Utc::now().timestamp() + 61);
    }

    #[tokio::test]
    async fn test_repeated_temporary_failures_escalate_then_terminate() {
        let channel = TestChannel::new("mail", Behavior::TemporaryFailure);
        let ctx = make_engine(vec![channel]);
        save_user_with_channels(&ctx, "user-1", &["mail"]);

        let notification = make_notification("user-1");
        ctx.notification_store.save(&notification).unwrap();

        let policy = RetryPolicy::default();
        for attempt in 1..=3u32 {
            let stored = ctx.notification_store.get(&notification.id).unwrap().unwrap();
            let before = Utc::now().timestamp();
            ctx.engine.process(stored).await;

            let stored = ctx.notification_store.get(&notification.id).unwrap().unwrap();
            assert_eq!(stored.push_state, PushState::Queued);
            assert_eq!(stored.push_error_count, attempt);
            let expected_delay = policy.delay_after(attempt).as_secs() as i64;
            assert!(stored.push_date >= before + expected_delay);
        }

        // the fourth failure exceeds max_error_count = 3
        let stored = ctx.notification_store.get(&notification.id).unwrap().unwrap();
        ctx.engine.process(stored).await;

        let stored = ctx.notification_store.get(&notification.id).unwrap().unwrap();
        assert_eq!(stored.push_state, PushState::Undeliverable);
        assert_eq!(stored.push_error_count, 4);
    }

    #[tokio::test]
    async fn test_persistent_failure_is_undeliverable_after_one_attempt() {
        let channel = TestChannel::new("mail", Behavior::PersistentFailure);
        let ctx = make_engine(vec![channel]);
        save_user_with_channels(&ctx, "user-1", &["mail"]);

        let notification = make_notification("user-1");
        ctx.notification_store.save(&notification).unwrap();

        ctx.engine.process(notification.clone()).await;

        let stored = ctx.notification_store.get(&notification.id).unwrap().unwrap();
        assert_eq!(stored.push_state, PushState::Undeliverable);
        assert_eq!(stored.push_error_count, 1);
    }

    #[tokio::test]
    async fn test_unknown_user_is_persistent_without_touching_channels() {
        let channel = TestChannel::new("mail", Behavior::Succeed);
        let ctx = make_engine(vec![channel.clone()]);
        // no preferences saved for user-1

        let notification = make_notification("user-1");
        ctx.notification_store.save(&notification).unwrap();

        ctx.engine.process(notification.clone()).await;

        let stored = ctx.notification_store.get(&notification.id).unwrap().unwrap();
        assert_eq!(stored.push_state, PushState::Undeliverable);
        assert_eq!(channel.push_count(), 0);
    }

    #[tokio::test]
    async fn test_no_eligible_channel_is_temporary() {
        let channel = TestChannel::new("mail", Behavior::Succeed);
        let ctx = make_engine(vec![channel.clone()]);
        let prefs = Preferences::new("user-1");
        ctx.preferences_store.save(&prefs).unwrap();

        // the only channel does not support this type
        let notification = Notification::new("user-1", "unsupported-type");
        ctx.notification_store.save(&notification).unwrap();

        ctx.engine.process(notification.clone()).await;

        let stored = ctx.notification_store.get(&notification.id).unwrap().unwrap();
        // preferences may be completed later, so this stays queued
        assert_eq!(stored.push_state, PushState::Queued);
        assert_eq!(stored.push_error_count, 1);
        assert!(stored
            .push_error_message
            .unwrap()
            .contains("no eligible channels"));
    }

    #[tokio::test]
    async fn test_partial_success_counts_as_success() {
        let good = TestChannel::new("mail", Behavior::Succeed);
        let bad = TestChannel::new("webhook", Behavior::PersistentFailure);
        let ctx = make_engine(vec![good.clone(), bad.clone()]);
        save_user_with_channels(&ctx, "user-1", &["mail", "webhook"]);

        let notification = make_notification("user-1");
        ctx.notification_store.save(&notification).unwrap();

        ctx.engine.process(notification.clone()).await;

        let stored = ctx.notification_store.get(&notification.id).unwrap().unwrap();
        assert_eq!(stored.push_state, PushState::Pushed);
        assert_eq!(good.push_count(), 1);
        assert_eq!(bad.push_count(), 1);
    }

    #[tokio::test]
    async fn test_daily_frequency_skipped_by_poller_but_used_by_dispatch_now() {
        let channel = TestChannel::new("mail", Behavior::Succeed);
        let ctx = make_engine(vec![channel.clone()]);
        save_user_with_frequency(&ctx, "user-1", &["mail"], Frequency::Daily);

        let notification = make_notification("user-1");
        ctx.notification_store.save(&notification).unwrap();

        // background pass: the daily channel does not participate
        ctx.engine.process(notification.clone()).await;
        assert_eq!(channel.push_count(), 0);
        let stored = ctx.notification_store.get(&notification.id).unwrap().unwrap();
        assert_eq!(stored.push_state, PushState::Queued);

        // immediate dispatch bypasses the frequency gate
        let mut immediate = stored;
        ctx.engine.dispatch_now(&mut immediate).await.unwrap();
        assert_eq!(channel.push_count(), 1);
        assert_eq!(immediate.push_state, PushState::Pushed);
    }

    #[tokio::test]
    async fn test_dispatch_now_failure_returns_error_and_records_nothing() {
        let channel = TestChannel::new("mail", Behavior::TemporaryFailure);
        let ctx = make_engine(vec![channel]);
        save_user_with_channels(&ctx, "user-1", &["mail"]);

        let mut notification = make_notification("user-1");
        ctx.notification_store.save(&notification).unwrap();

        let result = ctx.engine.dispatch_now(&mut notification).await;
        assert!(matches!(result, Err(DispatchError::Failed(_))));

        // the failure was not folded into the stored record
        let stored = ctx.notification_store.get(&notification.id).unwrap().unwrap();
        assert_eq!(stored.push_state, PushState::Queued);
        assert_eq!(stored.push_error_count, 0);
    }

    #[tokio::test]
    async fn test_error_listener_receives_channel_failures() {
        let channel = TestChannel::new("mail", Behavior::TemporaryFailure);
        let ctx = make_engine(vec![channel]);
        save_user_with_channels(&ctx, "user-1", &["mail"]);

        let listener = Arc::new(TestErrorListener {
            errors: AtomicUsize::new(0),
            fail: false,
        });
        ctx.engine.set_error_listener(listener.clone());

        let notification = make_notification("user-1");
        ctx.notification_store.save(&notification).unwrap();
        ctx.engine.process(notification).await;

        assert_eq!(listener.errors.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_error_listener_does_not_abort_recording() {
        let channel = TestChannel::new("mail", Behavior::TemporaryFailure);
        let ctx = make_engine(vec![channel]);
        save_user_with_channels(&ctx, "user-1", &["mail"]);

        let listener = Arc::new(TestErrorListener {
            errors: AtomicUsize::new(0),
            fail: true,
        });
        ctx.engine.set_error_listener(listener.clone());

        let notification = make_notification("user-1");
        ctx.notification_store.save(&notification).unwrap();
        ctx.engine.process(notification.clone()).await;

        assert_eq!(listener.errors.load(Ordering::SeqCst), 1);
        let stored = ctx.notification_store.get(&notification.id).unwrap().unwrap();
        assert_eq!(stored.push_error_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_of_same_notification_serializes() {
        let channel = TestChannel::slow("mail", Duration::from_millis(100));
        let ctx = make_engine(vec![channel.clone()]);
        save_user_with_channels(&ctx, "user-1", &["mail"]);

        let notification = make_notification("user-1");
        ctx.notification_store.save(&notification).unwrap();

        let engine_a = Arc::clone(&ctx.engine);
        let engine_b = Arc::clone(&ctx.engine);
        let mut n_a = notification.clone();
        let mut n_b = notification.clone();

        let (a, b) = tokio::join!(
            async move { engine_a.dispatch_now(&mut n_a).await },
            async move { engine_b.dispatch_now(&mut n_b).await },
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(channel.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(channel.push_count(), 2);
    }

    #[tokio::test]
    async fn test_poller_skips_notification_locked_by_dispatch_now() {
        let channel = TestChannel::slow("mail", Duration::from_millis(200));
        let ctx = make_engine(vec![channel.clone()]);
        save_user_with_channels(&ctx, "user-1", &["mail"]);

        let notification = make_notification("user-1");
        ctx.notification_store.save(&notification).unwrap();

        let engine = Arc::clone(&ctx.engine);
        let mut immediate = notification.clone();
        let dispatch = tokio::spawn(async move { engine.dispatch_now(&mut immediate).await });

        // give dispatch_now time to take the lock
        tokio::time::sleep(Duration::from_millis(50)).await;

        // the poll path must skip instead of blocking
        assert_eq!(
            ctx.engine.process(notification.clone()).await,
            ProcessOutcome::Contended
        );

        dispatch.await.unwrap().unwrap();
        assert_eq!(channel.push_count(), 1);
    }

    #[tokio::test]
    async fn test_worker_pool_delivers_enqueued_notification() {
        let channel = TestChannel::new("mail", Behavior::Succeed);
        let settings = DispatchSettings {
            pool_size: 2,
            ..Default::default()
        };
        let ctx = make_engine_with_settings(vec![channel.clone()], settings);
        save_user_with_channels(&ctx, "user-1", &["mail"]);

        ctx.engine.start();

        let notification = make_notification("user-1");
        ctx.notification_store.save(&notification).unwrap();
        ctx.engine.wake();

        // one poll cycle is enough
        tokio::time::sleep(Duration::from_millis(300)).await;

        let stored = ctx.notification_store.get(&notification.id).unwrap().unwrap();
        assert_eq!(stored.push_state, PushState::Pushed);
        assert_eq!(channel.push_count(), 1);

        tokio::time::timeout(Duration::from_secs(2), ctx.engine.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_workers() {
        let channel = TestChannel::new("mail", Behavior::Succeed);
        let ctx = make_engine(vec![channel]);

        ctx.engine.start();
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(2), ctx.engine.shutdown())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_default_channel_preferences_collects_from_channels() {
        let channel = TestChannel::new("mail", Behavior::Succeed);
        let ctx = make_engine(vec![channel]);

        let defaults = ctx.engine.default_channel_preferences();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults["mail"].frequency, Frequency::Instant);
    }
}
