use super::*;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use storage::MemoryStore;
use tokio::sync::Semaphore;

struct ScriptedSource {
    batch: Mutex<ClientResult<Vec<AdminMessageRecord>>>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    fn new(records: Vec<AdminMessageRecord>) -> Arc<Self> {
        Arc::new(Self {
            batch: Mutex::new(Ok(records)),
            calls: AtomicUsize::new(0),
        })
    }

    fn set_records(&self, records: Vec<AdminMessageRecord>) {
        *lock(&self.batch) = Ok(records);
    }

    fn fail_with(&self, reason: &str) {
        *lock(&self.batch) = Err(ClientError::Data(reason.to_string()));
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn admin_messages(&self) -> ClientResult<Vec<AdminMessageRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*lock(&self.batch) {
            Ok(records) => Ok(records.clone()),
            Err(err) => Err(ClientError::Data(err.to_string())),
        }
    }
}

/// Blocks every fetch until the test releases a permit.
struct GatedSource {
    gate: Semaphore,
    records: Vec<AdminMessageRecord>,
}

#[async_trait]
impl MessageSource for GatedSource {
    async fn admin_messages(&self) -> ClientResult<Vec<AdminMessageRecord>> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|err| ClientError::Data(err.to_string()))?;
        permit.forget();
        Ok(self.records.clone())
    }
}

struct UnavailableStore;

#[async_trait]
impl KeyValueStore for UnavailableStore {
    async fn get_item(&self, _key: &str) -> anyhow::Result<Option<String>> {
        Err(anyhow::anyhow!("storage disabled"))
    }

    async fn set_item(&self, _key: &str, _value: &str) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("storage disabled"))
    }
}

/// Holds the first write until the test releases a permit.
struct SlowFirstWriteStore {
    inner: MemoryStore,
    gate: Semaphore,
    first: AtomicBool,
}

impl SlowFirstWriteStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            gate: Semaphore::new(0),
            first: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl KeyValueStore for SlowFirstWriteStore {
    async fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.inner.get_item(key).await
    }

    async fn set_item(&self, key: &str, value: &str) -> anyhow::Result<()> {
        if self.first.swap(false, Ordering::SeqCst) {
            self.gate.acquire().await?.forget();
        }
        self.inner.set_item(key, value).await
    }
}

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, minute, 0)
        .single()
        .expect("valid time")
}

fn record(id: i64, minute: u32) -> AdminMessageRecord {
    AdminMessageRecord {
        message_id: Some(MessageId(id)),
        title: format!("notice {id}"),
        content: format!("body {id}"),
        created_at: Some(at(minute).to_rfc3339()),
    }
}

fn message(id: i64, minute: u32) -> AdminMessage {
    AdminMessage::try_from(record(id, minute)).expect("valid record")
}

async fn mount(
    source: Arc<dyn MessageSource>,
    store: Arc<dyn KeyValueStore>,
    policy: DismissalPolicy,
) -> Arc<MessageFeedController> {
    let options = FeedOptions {
        policy,
        ..FeedOptions::default()
    };
    MessageFeedController::new(source, store, options).await
}

fn memory() -> Arc<dyn KeyValueStore> {
    Arc::new(MemoryStore::new())
}

fn current_id(controller: &MessageFeedController) -> Option<i64> {
    controller.current_message().map(|m| m.message_id.0)
}

#[test]
fn ordering_is_newest_first_and_stable_for_equal_timestamps() {
    let mut state = FeedState::new(DismissalPolicy::SessionSet, None);
    state.replace_messages(vec![
        message(1, 5),
        message(2, 10),
        message(3, 5),
        message(4, 10),
    ]);

    let ids: Vec<i64> = state.ordered().iter().map(|m| m.message_id.0).collect();
    assert_eq!(ids, vec![2, 4, 1, 3]);
}

#[test]
fn single_slot_hides_only_the_remembered_newest_message() {
    let mut state = FeedState::new(DismissalPolicy::SingleSlot, Some(MessageId(2)));
    state.replace_messages(vec![message(1, 1), message(2, 2)]);
    assert!(state.current_message().is_none());

    state.replace_messages(vec![message(1, 1), message(2, 2), message(3, 3)]);
    assert_eq!(state.current_message().map(|m| m.message_id), Some(MessageId(3)));
    assert!(!state.view(false).has_multiple);
}

#[test]
fn dismiss_is_idempotent() {
    let mut state = FeedState::new(DismissalPolicy::SessionSet, None);
    state.replace_messages(vec![message(1, 1), message(2, 2), message(3, 3)]);

    assert!(state.dismiss(MessageId(2)));
    let once = state.view(false);
    assert!(!state.dismiss(MessageId(2)));
    assert_eq!(state.view(false), once);

    let mut single = FeedState::new(DismissalPolicy::SingleSlot, None);
    single.replace_messages(vec![message(1, 1)]);
    assert!(single.dismiss(MessageId(1)));
    assert!(!single.dismiss(MessageId(1)));
    assert!(single.current_message().is_none());
}

#[test]
fn go_to_clamps_into_active_range() {
    let mut state = FeedState::new(DismissalPolicy::SessionSet, None);
    state.go_to(4);
    assert_eq!(state.cursor(), 0);

    state.replace_messages(vec![message(1, 1), message(2, 2), message(3, 3)]);
    state.go_to(9);
    assert_eq!(state.cursor(), 2);
    assert_eq!(state.current_message().map(|m| m.message_id), Some(MessageId(1)));

    state.go_to(1);
    let view = state.view(false);
    assert_eq!(view.cursor, 1);
    assert_eq!(view.total, 3);
    assert!(view.has_multiple);
}

#[test]
fn dismissing_an_earlier_message_keeps_the_shown_one_in_place() {
    let mut state = FeedState::new(DismissalPolicy::SessionSet, None);
    state.replace_messages(vec![message(1, 1), message(2, 2), message(3, 3)]);
    state.go_to(1);
    assert_eq!(state.current_message().map(|m| m.message_id), Some(MessageId(2)));

    state.dismiss(MessageId(3));
    assert_eq!(state.cursor(), 0);
    assert_eq!(state.current_message().map(|m| m.message_id), Some(MessageId(2)));
}

#[test]
fn dismissing_the_last_position_clamps_back() {
    let mut state = FeedState::new(DismissalPolicy::SessionSet, None);
    state.replace_messages(vec![message(1, 1), message(2, 2)]);
    state.go_to(1);

    state.dismiss(MessageId(1));
    assert_eq!(state.cursor(), 0);
    assert_eq!(state.current_message().map(|m| m.message_id), Some(MessageId(2)));
}

#[test]
fn malformed_and_duplicate_records_are_dropped() {
    let mut missing_id = record(9, 9);
    missing_id.message_id = None;
    let mut missing_time = record(8, 8);
    missing_time.created_at = None;
    let mut bad_time = record(7, 7);
    bad_time.created_at = Some("not a date".into());

    let messages = normalize_records(vec![
        record(1, 1),
        missing_id,
        missing_time,
        bad_time,
        record(2, 2),
        record(1, 5),
    ]);

    let ids: Vec<i64> = messages.iter().map(|m| m.message_id.0).collect();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(messages[0].created_at, at(1));
}

#[tokio::test]
async fn newest_message_is_current_after_refresh() {
    let source = ScriptedSource::new(vec![record(1, 1), record(2, 2)]);
    let controller = mount(source.clone(), memory(), DismissalPolicy::SingleSlot).await;

    assert!(controller.current_message().is_none());
    controller.refresh().await;

    assert_eq!(current_id(&controller), Some(2));
    assert!(!controller.is_loading());
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn single_slot_dismissal_holds_until_a_newer_message_arrives() {
    let store = Arc::new(MemoryStore::new());
    let source = ScriptedSource::new(vec![record(1, 1), record(2, 2)]);
    let controller = mount(source.clone(), store.clone(), DismissalPolicy::SingleSlot).await;

    controller.refresh().await;
    controller.dismiss(MessageId(2)).await;
    assert!(controller.current_message().is_none());
    assert_eq!(
        store.get_item(LAST_DISMISSED_KEY).await.expect("get").as_deref(),
        Some("2")
    );

    controller.refresh().await;
    assert!(controller.current_message().is_none());

    source.set_records(vec![record(1, 1), record(2, 2), record(3, 3)]);
    controller.refresh().await;
    assert_eq!(current_id(&controller), Some(3));
}

#[tokio::test]
async fn overlapping_dismissals_store_the_one_shown_as_dismissed() {
    let store = SlowFirstWriteStore::new();
    let source = ScriptedSource::new(vec![record(1, 1), record(2, 2)]);
    let controller = mount(source, store.clone(), DismissalPolicy::SingleSlot).await;
    controller.refresh().await;

    futures::join!(
        controller.dismiss(MessageId(1)),
        controller.dismiss(MessageId(2)),
        async {
            tokio::task::yield_now().await;
            store.gate.add_permits(1);
        },
    );

    assert!(controller.current_message().is_none());
    assert_eq!(
        store.get_item(LAST_DISMISSED_KEY).await.expect("get").as_deref(),
        Some("2")
    );
}

#[tokio::test]
async fn persisted_dismissal_is_read_at_startup() {
    let store = Arc::new(MemoryStore::with_items([(LAST_DISMISSED_KEY, "2")]));
    let source = ScriptedSource::new(vec![record(1, 1), record(2, 2)]);
    let controller = mount(source, store, DismissalPolicy::SingleSlot).await;

    controller.refresh().await;
    assert!(controller.current_message().is_none());
}

#[tokio::test]
async fn unreadable_store_fails_open() {
    let source = ScriptedSource::new(vec![record(5, 5)]);
    let controller = mount(source, Arc::new(UnavailableStore), DismissalPolicy::SingleSlot).await;

    controller.refresh().await;
    assert_eq!(current_id(&controller), Some(5));

    controller.dismiss(MessageId(5)).await;
    assert!(controller.current_message().is_none());
}

#[tokio::test]
async fn fetch_failure_keeps_last_known_good_messages() {
    let source = ScriptedSource::new(vec![record(1, 1), record(2, 2)]);
    let controller = mount(source.clone(), memory(), DismissalPolicy::SingleSlot).await;
    controller.refresh().await;

    source.fail_with("connection refused");
    controller.refresh().await;

    assert_eq!(current_id(&controller), Some(2));
    assert_eq!(controller.messages().len(), 2);
    assert!(!controller.is_loading());
}

#[tokio::test]
async fn session_set_dismissing_everything_leaves_nothing() {
    let source = ScriptedSource::new(vec![record(1, 1), record(2, 2), record(3, 3)]);
    let controller = mount(source, memory(), DismissalPolicy::SessionSet).await;
    controller.refresh().await;

    for id in [1, 2, 3] {
        controller.dismiss(MessageId(id)).await;
    }
    assert!(controller.current_message().is_none());
    assert_eq!(controller.view().total, 0);
}

#[tokio::test]
async fn session_set_advances_past_dismissed_message_for_the_session() {
    let store = Arc::new(MemoryStore::new());
    let source = ScriptedSource::new(vec![record(1, 1), record(2, 2), record(3, 3)]);
    let controller = mount(source, store.clone(), DismissalPolicy::SessionSet).await;
    controller.refresh().await;

    let first_shown = controller.current_message().expect("message");
    assert_eq!(first_shown.message_id, MessageId(3));

    controller.dismiss(first_shown.message_id).await;
    assert_eq!(controller.cursor(), 0);
    assert_eq!(current_id(&controller), Some(2));

    controller.refresh().await;
    for index in 0..3 {
        controller.go_to(index);
        assert_ne!(current_id(&controller), Some(3));
    }
    assert_eq!(
        store.get_item(LAST_DISMISSED_KEY).await.expect("get"),
        None
    );
}

#[tokio::test]
async fn view_changes_are_published() {
    let source = ScriptedSource::new(vec![record(1, 1), record(2, 2)]);
    let controller = mount(source, memory(), DismissalPolicy::SessionSet).await;
    let mut views = controller.subscribe_view();

    controller.refresh().await;
    let started = views.recv().await.expect("loading view");
    assert!(started.loading);
    let finished = views.recv().await.expect("loaded view");
    assert!(!finished.loading);
    assert_eq!(finished.total, 2);

    controller.go_to(1);
    let moved = views.recv().await.expect("cursor view");
    assert_eq!(moved.cursor, 1);
    assert_eq!(moved.current_message.map(|m| m.message_id), Some(MessageId(1)));
}

#[tokio::test]
async fn concurrent_refreshes_settle_to_a_full_result() {
    let source = ScriptedSource::new(vec![record(1, 1), record(2, 2)]);
    let controller = mount(source.clone(), memory(), DismissalPolicy::SingleSlot).await;

    futures::join!(controller.refresh(), controller.refresh());

    assert_eq!(source.calls(), 2);
    assert_eq!(controller.messages().len(), 2);
    assert!(!controller.is_loading());
}

#[tokio::test(start_paused = true)]
async fn timer_refreshes_periodically_until_teardown() {
    let source = ScriptedSource::new(vec![record(1, 1)]);
    let controller = mount(source.clone(), memory(), DismissalPolicy::SingleSlot).await;

    controller.start();
    controller.start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(source.calls(), 1);
    assert_eq!(current_id(&controller), Some(1));

    tokio::time::sleep(DEFAULT_REFRESH_INTERVAL).await;
    assert_eq!(source.calls(), 2);

    controller.teardown();
    tokio::time::sleep(DEFAULT_REFRESH_INTERVAL * 3).await;
    assert_eq!(source.calls(), 2);

    controller.refresh().await;
    assert_eq!(source.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn dropping_the_controller_stops_the_timer() {
    let source = ScriptedSource::new(vec![record(1, 1)]);
    let controller = mount(source.clone(), memory(), DismissalPolicy::SingleSlot).await;

    controller.start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    drop(controller);

    tokio::time::sleep(DEFAULT_REFRESH_INTERVAL * 2).await;
    assert_eq!(source.calls(), 1);
}

#[tokio::test]
async fn fetch_completing_after_teardown_is_discarded() {
    let source = Arc::new(GatedSource {
        gate: Semaphore::new(0),
        records: vec![record(1, 1)],
    });
    let controller = mount(source.clone(), memory(), DismissalPolicy::SingleSlot).await;

    let pending = tokio::spawn({
        let controller = Arc::clone(&controller);
        async move { controller.refresh().await }
    });
    while !controller.is_loading() {
        tokio::task::yield_now().await;
    }

    controller.teardown();
    source.gate.add_permits(1);
    pending.await.expect("refresh task");

    assert!(controller.messages().is_empty());
    assert!(controller.current_message().is_none());
    assert!(!controller.is_loading());
}
