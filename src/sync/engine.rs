//! The sync engine.
//!
//! Owns the authoritative in-memory mirror of the share's person records.
//! Local edits land in the model immediately and are persisted through
//! debounced, version-checked writes; a stale write is refetched and retried
//! exactly once. A recurring poll merges remote deltas, leaving fields with
//! an unresolved local edit untouched.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::auth::WriteGate;
use crate::errors::AppError;
use crate::loader::SHARE_ID_FIELD;
use crate::models::{sort_by_beltpack, HeadsetType, PersonRecord, ShowConfig};
use crate::store::{RecordStore, RemoteRecord, SaveRequest, StoreError, RECORD_TYPE_SHARED_USER};

use super::{FieldSyncState, PersonField, SharePhase, SyncStatus, POLL_FIELDS};

/// Engine timing and policy knobs, taken from [`crate::config::Config`].
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Delay collapsing rapid edits to one field into a single save
    pub debounce: Duration,
    /// Interval between remote refresh polls
    pub poll_interval: Duration,
    /// How long a failed save keeps the error status before auto-recovery
    pub error_cooldown: Duration,
    /// Whether a platform sign-in is required before edits are accepted
    pub require_signin: bool,
}

type FieldKey = (String, PersonField);

/// Tracking entry for a (record, field) pair that is not Clean.
struct FieldSlot {
    state: FieldSyncState,
    /// Debounce or cool-down task; replaced on a newer edit, never stacked.
    task: Option<JoinHandle<()>>,
}

struct EngineState {
    people: HashMap<String, PersonRecord>,
    fields: HashMap<FieldKey, FieldSlot>,
    gate: WriteGate,
    /// Pending authorization prompt, consumed by the status route.
    auth_prompt: bool,
    /// Last prompt per field, so one attempt window raises one signal.
    prompted_at: HashMap<FieldKey, Instant>,
    last_updated: Option<DateTime<Utc>>,
}

/// One engine per share; all mutation of the model goes through it.
pub struct SyncEngine {
    store: Arc<dyn RecordStore>,
    share_id: String,
    show: ShowConfig,
    settings: SyncSettings,
    state: Mutex<EngineState>,
    status_tx: watch::Sender<SyncStatus>,
    phase_tx: watch::Sender<SharePhase>,
    /// Bumped on every visible model change; the re-render signal.
    rev_tx: watch::Sender<u64>,
    /// At most one poll outstanding; overlapping firings are dropped.
    poll_guard: Mutex<()>,
}

impl SyncEngine {
    /// Build an engine over an already-loaded roster. The engine only exists
    /// after the passcode round-trip, so the gate starts passcode-verified.
    pub fn new(
        store: Arc<dyn RecordStore>,
        share_id: String,
        show: ShowConfig,
        people: Vec<PersonRecord>,
        settings: SyncSettings,
    ) -> Arc<Self> {
        let mut gate = WriteGate::new(settings.require_signin, show.editable_departments.clone());
        gate.passcode_ok = true;

        let people = people
            .into_iter()
            .map(|p| (p.record_name.clone(), p))
            .collect();

        Arc::new(Self {
            store,
            share_id,
            show,
            settings,
            state: Mutex::new(EngineState {
                people,
                fields: HashMap::new(),
                gate,
                auth_prompt: false,
                prompted_at: HashMap::new(),
                last_updated: Some(Utc::now()),
            }),
            status_tx: watch::Sender::new(SyncStatus::Synced),
            phase_tx: watch::Sender::new(SharePhase::Ready),
            rev_tx: watch::Sender::new(0),
            poll_guard: Mutex::new(()),
        })
    }

    pub fn show(&self) -> &ShowConfig {
        &self.show
    }

    pub fn sync_status(&self) -> SyncStatus {
        *self.status_tx.borrow()
    }

    pub fn phase(&self) -> SharePhase {
        self.phase_tx.borrow().clone()
    }

    pub fn model_rev(&self) -> u64 {
        *self.rev_tx.borrow()
    }

    pub async fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.last_updated
    }

    /// Roster snapshot in display order.
    pub async fn people(&self) -> Vec<PersonRecord> {
        let state = self.state.lock().await;
        let mut people: Vec<PersonRecord> = state.people.values().cloned().collect();
        sort_by_beltpack(&mut people);
        people
    }

    /// Record a completed platform sign-in; restores the write capability.
    pub async fn mark_signed_in(&self) {
        self.state.lock().await.gate.mark_signed_in();
    }

    /// Consume the pending authorization prompt, if any.
    pub async fn take_auth_prompt(&self) -> bool {
        std::mem::take(&mut self.state.lock().await.auth_prompt)
    }

    /// Apply a local edit to a text-like field: update the model immediately
    /// and schedule the debounced persist. Unauthorized edits change nothing
    /// and raise the authorization prompt.
    pub async fn apply_edit(
        self: &Arc<Self>,
        record_name: &str,
        field: PersonField,
        value: &str,
    ) -> Result<(), AppError> {
        if field == PersonField::ChannelAssignments {
            return Err(AppError::Validation(
                "Channel slots are edited through the channel route".to_string(),
            ));
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let department = state
            .people
            .get(record_name)
            .map(|p| p.department.clone())
            .ok_or_else(|| AppError::NotFound(format!("Record {} not found", record_name)))?;

        if !state.gate.can_write(&department) {
            self.raise_auth_prompt(state, record_name, field);
            return Err(AppError::AuthRequired(
                "Editing this share requires authorization".to_string(),
            ));
        }

        let parsed_headset = match field {
            PersonField::HeadsetType => Some(
                HeadsetType::from_str(value)
                    .ok_or_else(|| AppError::Validation(format!("Unknown headset type: {}", value)))?,
            ),
            _ => None,
        };

        let Some(person) = state.people.get_mut(record_name) else {
            return Err(AppError::NotFound(format!("Record {} not found", record_name)));
        };

        match field {
            PersonField::FirstName => person.first_name = value.to_string(),
            PersonField::LastName => person.last_name = value.to_string(),
            PersonField::Nickname => person.nickname = value.to_string(),
            PersonField::Department => person.department = value.to_string(),
            PersonField::Role => person.role = value.to_string(),
            PersonField::Notes => person.notes = value.to_string(),
            PersonField::HeadsetType => {
                person.headset_type = parsed_headset.unwrap_or_default();
            }
            PersonField::ChannelAssignments => unreachable!("rejected above"),
        }

        self.schedule_persist(state, record_name, field);
        drop(guard);
        self.rev_tx.send_modify(|rev| *rev += 1);
        Ok(())
    }

    /// Apply a channel-slot edit. The remote store has no partial-array
    /// update, so the persist sends the whole padded sequence.
    pub async fn apply_channel_edit(
        self: &Arc<Self>,
        record_name: &str,
        index: usize,
        channel: &str,
    ) -> Result<(), AppError> {
        if index >= self.show.channel_slot_count {
            return Err(AppError::Validation(format!(
                "Channel slot {} out of range (show has {})",
                index, self.show.channel_slot_count
            )));
        }
        if !channel.is_empty() && !self.show.has_channel(channel) {
            return Err(AppError::Validation(format!("Unknown channel: {}", channel)));
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let department = state
            .people
            .get(record_name)
            .map(|p| p.department.clone())
            .ok_or_else(|| AppError::NotFound(format!("Record {} not found", record_name)))?;

        if !state.gate.can_write(&department) {
            self.raise_auth_prompt(state, record_name, PersonField::ChannelAssignments);
            return Err(AppError::AuthRequired(
                "Editing this share requires authorization".to_string(),
            ));
        }

        let Some(person) = state.people.get_mut(record_name) else {
            return Err(AppError::NotFound(format!("Record {} not found", record_name)));
        };

        // Pad with empty slots rather than failing on sparse indices
        while person.channel_assignments.len() <= index {
            person.channel_assignments.push(String::new());
        }
        person.channel_assignments[index] = channel.to_string();

        self.schedule_persist(state, record_name, PersonField::ChannelAssignments);
        drop(guard);
        self.rev_tx.send_modify(|rev| *rev += 1);
        Ok(())
    }

    /// Refresh the roster from the store, merging records whose change tag
    /// moved. Skipped entirely while a previous poll is still in flight.
    pub async fn poll(self: &Arc<Self>) {
        if !self.state.lock().await.gate.passcode_ok {
            return;
        }

        let Ok(_guard) = self.poll_guard.try_lock() else {
            tracing::debug!("Poll already in flight for {}, skipping", self.share_id);
            return;
        };

        let records = match self
            .store
            .query(RECORD_TYPE_SHARED_USER, SHARE_ID_FIELD, &self.share_id)
            .await
        {
            Ok(records) => records,
            Err(StoreError::AuthRequired) => {
                tracing::warn!("Refresh rejected as unauthenticated for {}", self.share_id);
                let mut state = self.state.lock().await;
                state.gate.revoke();
                state.auth_prompt = true;
                return;
            }
            Err(err) => {
                tracing::warn!("Refresh failed for {}: {}", self.share_id, err);
                return;
            }
        };

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let mut changed = false;
        for remote in &records {
            changed |= merge_remote_record(state, remote);
        }
        if changed {
            state.last_updated = Some(Utc::now());
            drop(guard);
            self.rev_tx.send_modify(|rev| *rev += 1);
        }
    }

    /// Start the recurring refresh. The task holds only a weak reference and
    /// exits when the engine is dropped.
    pub fn spawn_poller(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let interval = self.settings.poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The immediate first tick; the roster was just loaded
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = weak.upgrade() else { break };
                engine.poll().await;
            }
        })
    }

    fn raise_auth_prompt(&self, state: &mut EngineState, record_name: &str, field: PersonField) {
        let key = (record_name.to_string(), field);
        let now = Instant::now();
        let recently = state
            .prompted_at
            .get(&key)
            .is_some_and(|at| now.duration_since(*at) < self.settings.debounce);
        if !recently {
            state.auth_prompt = true;
            state.prompted_at.insert(key, now);
            tracing::debug!(
                "Unauthorized edit to {}/{}, raising prompt",
                record_name,
                field.remote_name()
            );
        }
    }

    /// (Re)arm the debounce for a field. An existing timer is reset, not
    /// stacked: the previous task is aborted and replaced.
    fn schedule_persist(self: &Arc<Self>, state: &mut EngineState, record_name: &str, field: PersonField) {
        let key = (record_name.to_string(), field);
        let slot = state.fields.entry(key.clone()).or_insert(FieldSlot {
            state: FieldSyncState::Pending,
            task: None,
        });
        slot.state = FieldSyncState::Pending;
        if let Some(task) = slot.task.take() {
            task.abort();
        }

        let engine = Arc::clone(self);
        let debounce = self.settings.debounce;
        slot.task = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            engine.persist(&key.0, key.1).await;
        }));
    }

    /// Send the version-checked write for a field. The value is read from
    /// the model at fire time, so coalesced edits persist only once.
    async fn persist(self: &Arc<Self>, record_name: &str, field: PersonField) {
        let key = (record_name.to_string(), field);

        let (request, status) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let Some(person) = state.people.get(record_name) else { return };
            let request = SaveRequest {
                record_type: RECORD_TYPE_SHARED_USER.to_string(),
                record_name: record_name.to_string(),
                change_tag: person.change_tag.clone(),
                fields: self.wire_fields(person, field),
            };
            let Some(slot) = state.fields.get_mut(&key) else { return };
            slot.state = FieldSyncState::Saving;
            slot.task = None;
            (request, aggregate_status(&state.fields))
        };
        self.status_tx.send_replace(status);

        match self.store.save(request).await {
            Ok(saved) => self.finish_save(record_name, field, saved.change_tag).await,
            Err(StoreError::VersionConflict { .. }) => {
                self.retry_after_conflict(record_name, field).await;
            }
            Err(StoreError::AuthRequired) => self.handle_auth_required(record_name, field).await,
            Err(StoreError::NotFound(_)) => self.handle_vanished(record_name, field).await,
            Err(err) => {
                tracing::warn!(
                    "Save failed for {}/{}: {}",
                    record_name,
                    field.remote_name(),
                    err
                );
                self.fail_field(record_name, field).await;
            }
        }
    }

    /// The store rejected our change tag as stale: refetch the authoritative
    /// record, adopt its tag (merging fields we are not mid-editing), and
    /// retry the same write exactly once.
    async fn retry_after_conflict(self: &Arc<Self>, record_name: &str, field: PersonField) {
        let key = (record_name.to_string(), field);
        tracing::info!(
            "Stale change tag on {}/{}, refetching and retrying",
            record_name,
            field.remote_name()
        );
        {
            let mut state = self.state.lock().await;
            if let Some(slot) = state.fields.get_mut(&key) {
                slot.state = FieldSyncState::ConflictRetry;
            }
        }

        let request = match self.store.fetch_by_id(record_name).await {
            Ok(Some(remote)) => {
                let mut guard = self.state.lock().await;
                let state = &mut *guard;
                let merged = merge_remote_record(state, &remote);
                let Some(person) = state.people.get(record_name) else { return };
                let request = SaveRequest {
                    record_type: RECORD_TYPE_SHARED_USER.to_string(),
                    record_name: record_name.to_string(),
                    change_tag: person.change_tag.clone(),
                    fields: self.wire_fields(person, field),
                };
                drop(guard);
                if merged {
                    self.rev_tx.send_modify(|rev| *rev += 1);
                }
                request
            }
            Ok(None) => {
                self.handle_vanished(record_name, field).await;
                return;
            }
            Err(StoreError::AuthRequired) => {
                self.handle_auth_required(record_name, field).await;
                return;
            }
            Err(err) => {
                tracing::warn!("Conflict refetch failed for {}: {}", record_name, err);
                self.fail_field(record_name, field).await;
                return;
            }
        };

        match self.store.save(request).await {
            Ok(saved) => self.finish_save(record_name, field, saved.change_tag).await,
            Err(StoreError::AuthRequired) => self.handle_auth_required(record_name, field).await,
            Err(StoreError::NotFound(_)) => self.handle_vanished(record_name, field).await,
            Err(err) => {
                // One retry only; keep the local value and surface the error
                tracing::warn!(
                    "Retry failed for {}/{}: {}",
                    record_name,
                    field.remote_name(),
                    err
                );
                self.fail_field(record_name, field).await;
            }
        }
    }

    async fn finish_save(&self, record_name: &str, field: PersonField, new_tag: String) {
        let key = (record_name.to_string(), field);
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if let Some(person) = state.people.get_mut(record_name) {
            person.change_tag = new_tag;
        }
        settle_unless_pending(state, &key);
        state.last_updated = Some(Utc::now());
        let status = aggregate_status(&state.fields);
        drop(guard);
        self.status_tx.send_replace(status);
    }

    /// Mark a field Failed and arm the cool-down back to Clean. The local
    /// value stays in the model; nothing is rolled back.
    async fn fail_field(self: &Arc<Self>, record_name: &str, field: PersonField) {
        let key = (record_name.to_string(), field);
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let Some(slot) = state.fields.get_mut(&key) else { return };
        if slot.state == FieldSyncState::Pending {
            // A newer edit already re-armed the debounce; let it drive
            return;
        }
        slot.state = FieldSyncState::Failed;
        if let Some(task) = slot.task.take() {
            task.abort();
        }
        let engine = Arc::clone(self);
        let cooldown = self.settings.error_cooldown;
        let cleanup_key = key.clone();
        slot.task = Some(tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            engine.clear_failed(cleanup_key).await;
        }));
        let status = aggregate_status(&state.fields);
        drop(guard);
        self.status_tx.send_replace(status);
    }

    async fn clear_failed(&self, key: FieldKey) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if state
            .fields
            .get(&key)
            .is_some_and(|slot| slot.state == FieldSyncState::Failed)
        {
            state.fields.remove(&key);
        }
        let status = aggregate_status(&state.fields);
        drop(guard);
        self.status_tx.send_replace(status);
    }

    /// The store rejected our write credentials: revoke the capability and
    /// raise the prompt. The local value stays.
    async fn handle_auth_required(&self, record_name: &str, field: PersonField) {
        tracing::warn!(
            "Store rejected write credentials on {}/{}; revoking write capability",
            record_name,
            field.remote_name()
        );
        let key = (record_name.to_string(), field);
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.gate.revoke();
        state.auth_prompt = true;
        settle_unless_pending(state, &key);
        let status = aggregate_status(&state.fields);
        drop(guard);
        self.status_tx.send_replace(status);
    }

    /// The record vanished from the store mid-session; fatal to the view.
    async fn handle_vanished(&self, record_name: &str, field: PersonField) {
        tracing::error!("Record {} no longer exists in the store", record_name);
        let key = (record_name.to_string(), field);
        {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            settle_unless_pending(state, &key);
            let status = aggregate_status(&state.fields);
            drop(guard);
            self.status_tx.send_replace(status);
        }
        self.phase_tx
            .send_replace(SharePhase::FatalError(format!(
                "Record {} no longer exists",
                record_name
            )));
    }

    /// Wire representation of one field write, plus the update timestamp.
    fn wire_fields(&self, person: &PersonRecord, field: PersonField) -> Map<String, Value> {
        let value = match field {
            PersonField::FirstName => json!(person.first_name),
            PersonField::LastName => json!(person.last_name),
            PersonField::Nickname => json!(person.nickname),
            PersonField::Department => json!(person.department),
            PersonField::Role => json!(person.role),
            PersonField::HeadsetType => json!(person.headset_type.as_str()),
            PersonField::Notes => json!(person.notes),
            PersonField::ChannelAssignments => {
                let mut slots = person.channel_assignments.clone();
                while slots.len() < self.show.channel_slot_count {
                    slots.push(String::new());
                }
                json!(slots)
            }
        };

        let mut fields = Map::new();
        fields.insert(field.remote_name().to_string(), value);
        fields.insert(
            "updatedAt".to_string(),
            json!(Utc::now().timestamp_millis()),
        );
        fields
    }
}

/// Clear a field's tracking entry unless a newer edit re-entered Pending.
fn settle_unless_pending(state: &mut EngineState, key: &FieldKey) {
    if state
        .fields
        .get(key)
        .is_some_and(|slot| slot.state != FieldSyncState::Pending)
    {
        state.fields.remove(key);
    }
}

/// Merge a remote record into the model if its change tag moved. Fields with
/// an unresolved local edit are exempt from the overwrite until they settle.
/// Records unknown locally are ignored; roster membership is fixed for the
/// page lifetime.
fn merge_remote_record(state: &mut EngineState, remote: &RemoteRecord) -> bool {
    {
        let Some(person) = state.people.get(&remote.record_name) else {
            return false;
        };
        if person.change_tag == remote.change_tag {
            return false;
        }
    }

    let dirty: Vec<PersonField> = POLL_FIELDS
        .iter()
        .copied()
        .filter(|f| state.fields.contains_key(&(remote.record_name.clone(), *f)))
        .collect();

    let Some(person) = state.people.get_mut(&remote.record_name) else {
        return false;
    };

    for field in POLL_FIELDS {
        if dirty.contains(&field) {
            continue;
        }
        match field {
            PersonField::FirstName => {
                person.first_name = remote.str_field("firstName").unwrap_or_default().to_string();
            }
            PersonField::LastName => {
                person.last_name = remote.str_field("lastName").unwrap_or_default().to_string();
            }
            PersonField::Nickname => {
                person.nickname = remote.str_field("nickname").unwrap_or_default().to_string();
            }
            PersonField::Department => {
                person.department = remote.str_field("department").unwrap_or_default().to_string();
            }
            PersonField::ChannelAssignments => {
                person.channel_assignments = remote.string_list_field("channelAssignments");
            }
            PersonField::HeadsetType => {
                person.headset_type = remote
                    .str_field("headsetType")
                    .and_then(HeadsetType::from_str)
                    .unwrap_or_default();
            }
            PersonField::Notes => {
                person.notes = remote.str_field("notes").unwrap_or_default().to_string();
            }
            // Role never appears in POLL_FIELDS
            PersonField::Role => {}
        }
    }
    person.change_tag = remote.change_tag.clone();
    true
}

fn aggregate_status(fields: &HashMap<FieldKey, FieldSlot>) -> SyncStatus {
    let mut status = SyncStatus::Synced;
    for slot in fields.values() {
        match slot.state {
            FieldSyncState::Failed => return SyncStatus::Error,
            FieldSyncState::Saving | FieldSyncState::ConflictRetry => {
                status = SyncStatus::Syncing;
            }
            FieldSyncState::Pending => {}
        }
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::Ordering;

    const DEBOUNCE: Duration = Duration::from_millis(500);
    const COOLDOWN: Duration = Duration::from_millis(3000);

    fn settings() -> SyncSettings {
        SyncSettings {
            debounce: DEBOUNCE,
            poll_interval: Duration::from_millis(5000),
            error_cooldown: COOLDOWN,
            require_signin: false,
        }
    }

    fn show() -> ShowConfig {
        ShowConfig {
            channels: vec!["A".to_string(), "B".to_string()],
            channel_slot_count: 4,
            ..ShowConfig::default()
        }
    }

    fn person_fields(channel_assignments: Value) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert("shareID".to_string(), json!("s1"));
        fields.insert("firstName".to_string(), json!("Al"));
        fields.insert("lastName".to_string(), json!("Jones"));
        fields.insert("department".to_string(), json!("Audio"));
        fields.insert("beltpackNumber".to_string(), json!(1));
        fields.insert("channelAssignments".to_string(), channel_assignments);
        fields
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert(
                RECORD_TYPE_SHARED_USER,
                "rec-1",
                person_fields(json!(["A", "", "", ""])),
            )
            .await;
        store
    }

    async fn engine_with(
        store: Arc<MemoryStore>,
        show: ShowConfig,
        settings: SyncSettings,
    ) -> Arc<SyncEngine> {
        let people = loader::load_people(store.as_ref(), "s1").await.unwrap();
        SyncEngine::new(store, "s1".to_string(), show, people, settings)
    }

    async fn engine_over(store: Arc<MemoryStore>) -> Arc<SyncEngine> {
        engine_with(store, show(), settings()).await
    }

    async fn settle(extra: Duration) {
        tokio::time::sleep(DEBOUNCE + extra).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_edits_coalesce_into_one_save() {
        let store = seeded_store().await;
        let engine = engine_over(store.clone()).await;

        engine
            .apply_edit("rec-1", PersonField::FirstName, "Al")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        engine
            .apply_edit("rec-1", PersonField::FirstName, "Alex")
            .await
            .unwrap();

        // Read-your-write before the save lands
        assert_eq!(engine.people().await[0].first_name, "Alex");

        settle(Duration::from_millis(200)).await;

        assert_eq!(store.save_calls.load(Ordering::Relaxed), 1);
        let remote = store.record("rec-1").await.unwrap();
        assert_eq!(remote.str_field("firstName"), Some("Alex"));
        assert!(remote.i64_field("updatedAt").is_some());
        assert_eq!(engine.sync_status(), SyncStatus::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_adopts_store_tag_and_next_save_is_accepted() {
        let store = seeded_store().await;
        let engine = engine_over(store.clone()).await;

        engine
            .apply_edit("rec-1", PersonField::Notes, "hello")
            .await
            .unwrap();
        settle(Duration::from_millis(100)).await;

        let remote = store.record("rec-1").await.unwrap();
        assert_eq!(engine.people().await[0].change_tag, remote.change_tag);

        engine
            .apply_edit("rec-1", PersonField::Notes, "world")
            .await
            .unwrap();
        settle(Duration::from_millis(100)).await;

        // No conflict retry was needed
        assert_eq!(store.save_calls.load(Ordering::Relaxed), 2);
        let remote = store.record("rec-1").await.unwrap();
        assert_eq!(remote.str_field("notes"), Some("world"));
        assert_eq!(engine.sync_status(), SyncStatus::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_refetches_and_retries_once() {
        let store = seeded_store().await;
        let engine = engine_over(store.clone()).await;

        // A concurrent writer bumps the tag after our load
        store.put_field("rec-1", "lastName", json!("Remote")).await;

        engine
            .apply_edit("rec-1", PersonField::Notes, "from share")
            .await
            .unwrap();
        settle(Duration::from_millis(200)).await;

        assert_eq!(store.save_calls.load(Ordering::Relaxed), 2);
        let remote = store.record("rec-1").await.unwrap();
        assert_eq!(remote.str_field("notes"), Some("from share"));

        let people = engine.people().await;
        let person = &people[0];
        // The refetch merged the concurrent writer's change
        assert_eq!(person.last_name, "Remote");
        assert_eq!(person.change_tag, remote.change_tag);
        assert_eq!(engine.sync_status(), SyncStatus::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_retry_keeps_value_and_recovers_after_cooldown() {
        let store = seeded_store().await;
        let engine = engine_over(store.clone()).await;

        store
            .fail_next_save(StoreError::VersionConflict {
                current_change_tag: "elsewhere".to_string(),
            })
            .await;
        store
            .fail_next_save(StoreError::VersionConflict {
                current_change_tag: "elsewhere".to_string(),
            })
            .await;

        engine
            .apply_edit("rec-1", PersonField::Notes, "kept")
            .await
            .unwrap();
        settle(Duration::from_millis(200)).await;

        // Exactly one automatic retry, then no more
        assert_eq!(store.save_calls.load(Ordering::Relaxed), 2);
        assert_eq!(engine.sync_status(), SyncStatus::Error);
        assert_eq!(engine.people().await[0].notes, "kept");

        tokio::time::sleep(COOLDOWN + Duration::from_millis(100)).await;
        assert_eq!(engine.sync_status(), SyncStatus::Synced);
        assert_eq!(engine.people().await[0].notes, "kept");
        assert_eq!(store.save_calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_save_failure_surfaces_then_clears() {
        let store = seeded_store().await;
        let engine = engine_over(store.clone()).await;

        store
            .fail_next_save(StoreError::Transient("service hiccup".to_string()))
            .await;

        engine
            .apply_edit("rec-1", PersonField::Notes, "kept")
            .await
            .unwrap();
        settle(Duration::from_millis(100)).await;

        // Transient errors are not retried
        assert_eq!(store.save_calls.load(Ordering::Relaxed), 1);
        assert_eq!(engine.sync_status(), SyncStatus::Error);

        tokio::time::sleep(COOLDOWN + Duration::from_millis(100)).await;
        assert_eq!(engine.sync_status(), SyncStatus::Synced);

        // A later edit persists normally
        engine
            .apply_edit("rec-1", PersonField::Notes, "second")
            .await
            .unwrap();
        settle(Duration::from_millis(100)).await;
        let remote = store.record("rec-1").await.unwrap();
        assert_eq!(remote.str_field("notes"), Some("second"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_merges_once_and_is_idempotent() {
        let store = seeded_store().await;
        let engine = engine_over(store.clone()).await;
        let rev = engine.model_rev();

        store
            .put_field("rec-1", "notes", json!("from server"))
            .await;

        engine.poll().await;
        assert_eq!(engine.model_rev(), rev + 1);
        let people = engine.people().await;
        let person = &people[0];
        assert_eq!(person.notes, "from server");
        assert_eq!(
            person.change_tag,
            store.record("rec-1").await.unwrap().change_tag
        );

        // Nothing changed remotely: no mutation, no re-render signal
        engine.poll().await;
        assert_eq!(engine.model_rev(), rev + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_leaves_unresolved_local_edit_alone() {
        let store = seeded_store().await;
        let engine = engine_over(store.clone()).await;

        engine
            .apply_edit("rec-1", PersonField::FirstName, "Zed")
            .await
            .unwrap();

        store
            .put_field("rec-1", "firstName", json!("Remote"))
            .await;
        store
            .put_field("rec-1", "notes", json!("from server"))
            .await;

        engine.poll().await;

        let people = engine.people().await;
        let person = &people[0];
        assert_eq!(person.first_name, "Zed");
        assert_eq!(person.notes, "from server");

        // The debounced save carries the adopted tag and lands cleanly
        settle(Duration::from_millis(100)).await;
        assert_eq!(store.save_calls.load(Ordering::Relaxed), 1);
        let remote = store.record("rec-1").await.unwrap();
        assert_eq!(remote.str_field("firstName"), Some("Zed"));
        assert_eq!(engine.people().await[0].change_tag, remote.change_tag);
        assert_eq!(engine.sync_status(), SyncStatus::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channel_slot_edit_persists_padded_sequence() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert(RECORD_TYPE_SHARED_USER, "rec-1", person_fields(json!(["A"])))
            .await;
        let engine = engine_over(store.clone()).await;

        engine.apply_channel_edit("rec-1", 2, "B").await.unwrap();
        assert_eq!(
            engine.people().await[0].channel_assignments,
            vec!["A", "", "B"]
        );

        settle(Duration::from_millis(100)).await;
        let remote = store.record("rec-1").await.unwrap();
        assert_eq!(
            remote.string_list_field("channelAssignments"),
            vec!["A", "", "B", ""]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_validation_rejects_without_scheduling() {
        let store = seeded_store().await;
        let engine = engine_over(store.clone()).await;

        let err = engine
            .apply_channel_edit("rec-1", 4, "A")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = engine
            .apply_channel_edit("rec-1", 0, "Z")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = engine
            .apply_edit("rec-1", PersonField::HeadsetType, "Bone Conduction")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = engine
            .apply_edit("rec-ghost", PersonField::Notes, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        settle(Duration::from_millis(100)).await;
        assert_eq!(store.save_calls.load(Ordering::Relaxed), 0);

        // Clearing a slot with the empty string is allowed
        engine.apply_channel_edit("rec-1", 0, "").await.unwrap();
        settle(Duration::from_millis(100)).await;
        let remote = store.record("rec-1").await.unwrap();
        assert_eq!(
            remote.string_list_field("channelAssignments"),
            vec!["", "", "", ""]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_department_allow_list_blocks_and_prompts_once() {
        let store = seeded_store().await;
        let mut show = show();
        show.editable_departments = vec!["Video".to_string()];
        let engine = engine_with(store.clone(), show, settings()).await;

        // The seeded person is in Audio, which is not allowed to edit
        let err = engine
            .apply_edit("rec-1", PersonField::FirstName, "X")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AuthRequired(_)));
        assert_eq!(engine.people().await[0].first_name, "Al");

        assert!(engine.take_auth_prompt().await);
        assert!(!engine.take_auth_prompt().await);

        // Another keystroke inside the same window does not re-raise
        engine
            .apply_edit("rec-1", PersonField::FirstName, "XY")
            .await
            .unwrap_err();
        assert!(!engine.take_auth_prompt().await);

        // A fresh attempt after the window prompts again
        settle(Duration::from_millis(100)).await;
        engine
            .apply_edit("rec-1", PersonField::FirstName, "XYZ")
            .await
            .unwrap_err();
        assert!(engine.take_auth_prompt().await);

        assert_eq!(store.save_calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_auth_rejection_revokes_capability() {
        let store = seeded_store().await;
        let engine = engine_over(store.clone()).await;

        store.fail_next_save(StoreError::AuthRequired).await;

        engine
            .apply_edit("rec-1", PersonField::Notes, "x")
            .await
            .unwrap();
        settle(Duration::from_millis(100)).await;

        assert!(engine.take_auth_prompt().await);

        let err = engine
            .apply_edit("rec-1", PersonField::Notes, "y")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AuthRequired(_)));

        // Sign-in restores the capability
        engine.mark_signed_in().await;
        engine
            .apply_edit("rec-1", PersonField::Notes, "y")
            .await
            .unwrap();
        settle(Duration::from_millis(100)).await;
        let remote = store.record("rec-1").await.unwrap();
        assert_eq!(remote.str_field("notes"), Some("y"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_record_is_fatal() {
        let store = seeded_store().await;
        let engine = engine_over(store.clone()).await;

        store
            .fail_next_save(StoreError::NotFound("rec-1".to_string()))
            .await;

        engine
            .apply_edit("rec-1", PersonField::Notes, "x")
            .await
            .unwrap();
        settle(Duration::from_millis(100)).await;

        assert!(matches!(engine.phase(), SharePhase::FatalError(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_signin_requirement_gates_edits() {
        let store = seeded_store().await;
        let mut settings = settings();
        settings.require_signin = true;
        let engine = engine_with(store.clone(), show(), settings).await;

        let err = engine
            .apply_edit("rec-1", PersonField::Notes, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::AuthRequired(_)));
        assert!(engine.take_auth_prompt().await);

        engine.mark_signed_in().await;
        engine
            .apply_edit("rec-1", PersonField::Notes, "x")
            .await
            .unwrap();
        settle(Duration::from_millis(100)).await;
        let remote = store.record("rec-1").await.unwrap();
        assert_eq!(remote.str_field("notes"), Some("x"));
    }
}
