//! Admin message banner: which broadcast message, if any, is on screen.
//!
//! The controller polls a [`MessageSource`], keeps the last good batch, and
//! filters it through the configured [`DismissalPolicy`]. Rendering surfaces
//! read [`BannerView`] snapshots and call back into `dismiss`, `go_to` and
//! `refresh`.

use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use shared::{
    domain::{DismissalPolicy, MessageId},
    protocol::{AdminMessage, AdminMessageRecord},
};
use storage::KeyValueStore;
use tokio::{
    sync::{broadcast, Mutex as AsyncMutex},
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    error::{ClientError, ClientResult},
    MessageSource,
};

pub const LAST_DISMISSED_KEY: &str = "lastClosedAdminMessageId";
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BannerView {
    pub current_message: Option<AdminMessage>,
    pub has_multiple: bool,
    pub cursor: usize,
    pub total: usize,
    pub loading: bool,
}

/// Persisted "last dismissed" marker. Storage failures read as "nothing
/// dismissed" so the banner fails open.
#[derive(Clone)]
pub struct DismissalMemory {
    store: Arc<dyn KeyValueStore>,
}

impl DismissalMemory {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn last_dismissed(&self) -> Option<MessageId> {
        match self.store.get_item(LAST_DISMISSED_KEY).await {
            Ok(Some(raw)) => match raw.trim().parse::<i64>() {
                Ok(id) => Some(MessageId(id)),
                Err(_) => {
                    warn!("ignoring unreadable dismissed admin message id '{raw}'");
                    None
                }
            },
            Ok(None) => None,
            Err(source) => {
                let err = ClientError::Persistence {
                    key: LAST_DISMISSED_KEY.to_string(),
                    source,
                };
                warn!("{err}; treating as no prior dismissal");
                None
            }
        }
    }

    pub async fn remember(&self, message_id: MessageId) -> ClientResult<()> {
        self.store
            .set_item(LAST_DISMISSED_KEY, &message_id.to_string())
            .await
            .map_err(|source| ClientError::Persistence {
                key: LAST_DISMISSED_KEY.to_string(),
                source,
            })
    }
}

/// Synchronous banner state. Owned by [`MessageFeedController`], usable on its
/// own wherever fetching is handled elsewhere.
#[derive(Debug, Clone)]
pub struct FeedState {
    policy: DismissalPolicy,
    messages: Vec<AdminMessage>,
    last_dismissed: Option<MessageId>,
    dismissed_ids: HashSet<MessageId>,
    cursor: usize,
}

impl FeedState {
    pub fn new(policy: DismissalPolicy, last_dismissed: Option<MessageId>) -> Self {
        Self {
            policy,
            messages: Vec::new(),
            last_dismissed,
            dismissed_ids: HashSet::new(),
            cursor: 0,
        }
    }

    pub fn policy(&self) -> DismissalPolicy {
        self.policy
    }

    /// Messages in fetch order.
    pub fn messages(&self) -> &[AdminMessage] {
        &self.messages
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn last_dismissed(&self) -> Option<MessageId> {
        self.last_dismissed
    }

    pub fn replace_messages(&mut self, messages: Vec<AdminMessage>) {
        self.messages = messages;
        self.clamp_cursor();
    }

    /// Newest first; equal timestamps keep fetch order.
    pub fn ordered(&self) -> Vec<&AdminMessage> {
        let mut ordered: Vec<&AdminMessage> = self.messages.iter().collect();
        ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        ordered
    }

    /// Messages still eligible for display under the current policy.
    pub fn active_messages(&self) -> Vec<&AdminMessage> {
        match self.policy {
            DismissalPolicy::SingleSlot => self
                .ordered()
                .into_iter()
                .take(1)
                .filter(|newest| Some(newest.message_id) != self.last_dismissed)
                .collect(),
            DismissalPolicy::SessionSet => self
                .ordered()
                .into_iter()
                .filter(|message| !self.dismissed_ids.contains(&message.message_id))
                .collect(),
        }
    }

    pub fn current_message(&self) -> Option<&AdminMessage> {
        let active = self.active_messages();
        let last = active.len().checked_sub(1)?;
        active.get(self.cursor.min(last)).copied()
    }

    /// Returns whether anything observable changed.
    pub fn dismiss(&mut self, message_id: MessageId) -> bool {
        match self.policy {
            DismissalPolicy::SingleSlot => {
                let changed = self.last_dismissed != Some(message_id);
                self.last_dismissed = Some(message_id);
                changed
            }
            DismissalPolicy::SessionSet => {
                let position = self
                    .active_messages()
                    .iter()
                    .position(|message| message.message_id == message_id);
                if !self.dismissed_ids.insert(message_id) {
                    return false;
                }
                // Keep the same message under the cursor when an earlier one goes away;
                // dismissing the one under the cursor moves on to its successor.
                if matches!(position, Some(index) if index < self.cursor) {
                    self.cursor -= 1;
                }
                self.clamp_cursor();
                true
            }
        }
    }

    pub fn go_to(&mut self, index: usize) {
        self.cursor = index;
        self.clamp_cursor();
    }

    pub fn view(&self, loading: bool) -> BannerView {
        let total = self.active_messages().len();
        BannerView {
            current_message: self.current_message().cloned(),
            has_multiple: total > 1,
            cursor: self.cursor,
            total,
            loading,
        }
    }

    fn clamp_cursor(&mut self) {
        let total = self.active_messages().len();
        self.cursor = self.cursor.min(total.saturating_sub(1));
    }
}

/// Drops records missing an id or timestamp, and repeated ids after the first.
pub fn normalize_records(records: Vec<AdminMessageRecord>) -> Vec<AdminMessage> {
    let mut seen = HashSet::new();
    records
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| match AdminMessage::try_from(record) {
            Ok(message) if seen.insert(message.message_id) => Some(message),
            Ok(message) => {
                warn!(
                    "dropping duplicate admin message id={} at position {index}",
                    message.message_id
                );
                None
            }
            Err(err) => {
                let err = ClientError::Data(format!("admin message #{index}: {err}"));
                warn!("dropping admin message: {err}");
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
pub struct FeedOptions {
    pub policy: DismissalPolicy,
    pub refresh_interval: Duration,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            policy: DismissalPolicy::default(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

pub struct MessageFeedController {
    source: Arc<dyn MessageSource>,
    memory: DismissalMemory,
    refresh_interval: Duration,
    state: Mutex<FeedState>,
    /// Held across a dismissal's state change and its store write.
    dismissing: AsyncMutex<()>,
    in_flight: AtomicUsize,
    torn_down: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    views: broadcast::Sender<BannerView>,
}

/// Marks a fetch as in flight; `loading` resolves when the last guard drops,
/// however the fetch ended.
struct LoadingGuard<'a> {
    controller: &'a MessageFeedController,
}

impl<'a> LoadingGuard<'a> {
    fn enter(controller: &'a MessageFeedController) -> Self {
        controller.in_flight.fetch_add(1, Ordering::SeqCst);
        controller.publish();
        Self { controller }
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.controller.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.controller.publish();
    }
}

impl MessageFeedController {
    /// Reads the persisted dismissal once; nothing is fetched until
    /// [`start`](Self::start) or [`refresh`](Self::refresh).
    pub async fn new(
        source: Arc<dyn MessageSource>,
        store: Arc<dyn KeyValueStore>,
        options: FeedOptions,
    ) -> Arc<Self> {
        let memory = DismissalMemory::new(store);
        let last_dismissed = match options.policy {
            DismissalPolicy::SingleSlot => memory.last_dismissed().await,
            DismissalPolicy::SessionSet => None,
        };
        let (views, _) = broadcast::channel(64);

        Arc::new(Self {
            source,
            memory,
            // `tokio::time::interval` rejects a zero period.
            refresh_interval: options.refresh_interval.max(Duration::from_millis(1)),
            state: Mutex::new(FeedState::new(options.policy, last_dismissed)),
            dismissing: AsyncMutex::new(()),
            in_flight: AtomicUsize::new(0),
            torn_down: AtomicBool::new(false),
            timer: Mutex::new(None),
            views,
        })
    }

    /// Refreshes now and then on every interval tick until teardown.
    /// Calling it again while the timer runs is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut timer = lock(&self.timer);
        if timer.is_some() || self.is_torn_down() {
            return;
        }

        let controller = Arc::downgrade(self);
        let period = self.refresh_interval;
        *timer = Some(tokio::spawn(async move {
            let mut ticks = interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let Some(controller) = controller.upgrade() else {
                    break;
                };
                if controller.is_torn_down() {
                    break;
                }
                controller.refresh().await;
            }
        }));
        info!(
            "admin banner refresh started every {}s",
            period.as_secs_f64()
        );
    }

    /// Cancels the timer and turns every later completion into a no-op.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = lock(&self.timer).take() {
            task.abort();
        }
        info!("admin banner torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }

    pub fn policy(&self) -> DismissalPolicy {
        lock(&self.state).policy()
    }

    pub async fn refresh(&self) {
        if self.is_torn_down() {
            return;
        }
        let _loading = LoadingGuard::enter(self);

        let fetched = self.source.admin_messages().await;
        if self.is_torn_down() {
            debug!("discarding admin messages fetched after teardown");
            return;
        }

        match fetched {
            Ok(records) => {
                let messages = normalize_records(records);
                debug!("fetched {} admin message(s)", messages.len());
                lock(&self.state).replace_messages(messages);
            }
            Err(err) => {
                error!("failed to fetch admin messages: {err}");
            }
        }
    }

    pub async fn dismiss(&self, message_id: MessageId) {
        if self.is_torn_down() {
            return;
        }

        let _dismissing = self.dismissing.lock().await;
        let (policy, changed) = {
            let mut state = lock(&self.state);
            let changed = state.dismiss(message_id);
            (state.policy(), changed)
        };
        if changed {
            info!("admin message {message_id} dismissed");
            self.publish();
        }

        if policy == DismissalPolicy::SingleSlot {
            if let Err(err) = self.memory.remember(message_id).await {
                warn!("{err}; dismissal kept for this session only");
            }
        }
    }

    pub fn go_to(&self, index: usize) {
        if self.is_torn_down() {
            return;
        }
        lock(&self.state).go_to(index);
        self.publish();
    }

    pub fn current_message(&self) -> Option<AdminMessage> {
        lock(&self.state).current_message().cloned()
    }

    pub fn cursor(&self) -> usize {
        lock(&self.state).cursor()
    }

    /// Messages from the last successful fetch, in fetch order.
    pub fn messages(&self) -> Vec<AdminMessage> {
        lock(&self.state).messages().to_vec()
    }

    pub fn view(&self) -> BannerView {
        lock(&self.state).view(self.is_loading())
    }

    pub fn subscribe_view(&self) -> broadcast::Receiver<BannerView> {
        self.views.subscribe()
    }

    fn publish(&self) {
        if self.is_torn_down() {
            return;
        }
        let _ = self.views.send(self.view());
    }
}

impl Drop for MessageFeedController {
    fn drop(&mut self) {
        let timer = self
            .timer
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = timer.take() {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/banner_tests.rs"]
mod tests;
