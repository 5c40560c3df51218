#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::env;
use std::net::SocketAddr;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use carevault_engines::permissions::PermissionError;
use carevault_engines::reminder::ReminderConfig;
use carevault_kernel_contracts::access::{PermissionSet, Role, SessionContext, UserId};
use carevault_kernel_contracts::appointment::{
    Appointment, AppointmentDraft, AppointmentId, AppointmentSnapshot, AppointmentStatus,
};
use carevault_kernel_contracts::care::{
    CareRecipient, CareRecipientDraft, CareRecipientId, DocumentDraft, DocumentId,
};
use carevault_kernel_contracts::reminder::{
    NotificationPermission, ReminderNotification, ReminderPassMetrics,
};
use carevault_os::actions::{ActionOutcome, CareActionRuntime};
use carevault_os::reminder::{check_and_notify, DispatchError, NotificationDispatcher};
use carevault_storage::kv::{KeyValueStore, LocalKeyValueStore, NotifiedState};
use carevault_storage::repo::AppointmentsRepo;
use carevault_storage::{CareStore, StorageError};
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8080";
const REMINDER_INTERVAL_RANGE_MS: RangeInclusive<u64> = 1_000..=3_600_000;
const DELIVERED_HISTORY_LIMIT: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("invalid {var}: {reason}")]
    Config { var: &'static str, reason: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("adapter runtime lock poisoned")]
    LockPoisoned,
}

impl AdapterError {
    pub fn http_status(&self) -> u16 {
        match self {
            AdapterError::Storage(StorageError::NotFound { .. })
            | AdapterError::Storage(StorageError::ForeignKeyViolation { .. }) => 404,
            AdapterError::Storage(StorageError::DuplicateKey { .. }) => 409,
            AdapterError::Storage(StorageError::ContractViolation(_))
            | AdapterError::InvalidRequest(_) => 400,
            AdapterError::Storage(StorageError::Io { .. })
            | AdapterError::Storage(StorageError::Journal { .. })
            | AdapterError::Config { .. }
            | AdapterError::LockPoisoned => 500,
        }
    }
}

// ----------------------------------------------------------------------
// configuration
// ----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub http_bind: SocketAddr,
    pub reminder_interval_ms: u64,
    pub notified_state_path: PathBuf,
    pub notification_permission: NotificationPermission,
    pub notification_prompt_grants: bool,
}

impl AdapterConfig {
    pub fn from_env() -> Result<Self, AdapterError> {
        Self::from_env_var_map(|key| env::var(key).ok())
    }

    /// Out-of-range or unparseable intervals fall back to the default; a bad
    /// bind address or permission value is an error.
    pub fn from_env_var_map<F>(mut env_getter: F) -> Result<Self, AdapterError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let bind = non_empty(env_getter("CAREVAULT_HTTP_BIND"))
            .unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string());
        let http_bind = bind
            .parse::<SocketAddr>()
            .map_err(|err| AdapterError::Config {
                var: "CAREVAULT_HTTP_BIND",
                reason: err.to_string(),
            })?;
        let reminder_interval_ms = non_empty(env_getter("CAREVAULT_REMINDER_INTERVAL_MS"))
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| REMINDER_INTERVAL_RANGE_MS.contains(v))
            .unwrap_or(ReminderConfig::mvp_v1().poll_interval_ms);
        let notified_state_path = non_empty(env_getter("CAREVAULT_NOTIFIED_STATE_PATH"))
            .map(PathBuf::from)
            .unwrap_or_else(|| default_notified_state_path(non_empty(env_getter("HOME"))));
        let notification_permission =
            match non_empty(env_getter("CAREVAULT_NOTIFICATION_PERMISSION")) {
                Some(v) => parse_notification_permission(&v)?,
                None => NotificationPermission::Default,
            };
        let notification_prompt_grants =
            match non_empty(env_getter("CAREVAULT_NOTIFICATION_PROMPT_GRANTS")) {
                Some(v) => !matches!(
                    v.to_ascii_lowercase().as_str(),
                    "0" | "false" | "off" | "no"
                ),
                None => true,
            };

        Ok(Self {
            http_bind,
            reminder_interval_ms,
            notified_state_path,
            notification_permission,
            notification_prompt_grants,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn default_notified_state_path(home: Option<String>) -> PathBuf {
    match home {
        Some(home) => PathBuf::from(home).join(".carevault/notified_state.jsonl"),
        None => PathBuf::from(".carevault/notified_state.jsonl"),
    }
}

fn parse_notification_permission(raw: &str) -> Result<NotificationPermission, AdapterError> {
    match raw.to_ascii_lowercase().as_str() {
        "default" => Ok(NotificationPermission::Default),
        "granted" => Ok(NotificationPermission::Granted),
        "denied" => Ok(NotificationPermission::Denied),
        other => Err(AdapterError::Config {
            var: "CAREVAULT_NOTIFICATION_PERMISSION",
            reason: format!("expected default|granted|denied, got '{other}'"),
        }),
    }
}

/// Installs the global subscriber. `RUST_LOG` wins; otherwise `info`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Unknown roles and malformed user ids become `None`, so every gated action
/// fails closed.
pub fn session_from_headers(user: Option<&str>, role: Option<&str>) -> SessionContext {
    let user_id = user
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .and_then(|v| UserId::new(v).ok());
    let role = role.map(str::trim).and_then(|v| v.parse::<Role>().ok());
    SessionContext::new(user_id, role)
}

// ----------------------------------------------------------------------
// clock and dispatcher
// ----------------------------------------------------------------------

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Server-side stand-in for the browser notification API: shown reminders go
/// to the log and a short in-memory history.
#[derive(Debug, Clone)]
pub struct LogNotificationDispatcher {
    permission: NotificationPermission,
    prompt_grants: bool,
    delivered: VecDeque<ReminderNotification>,
}

impl LogNotificationDispatcher {
    pub fn new(permission: NotificationPermission, prompt_grants: bool) -> Self {
        Self {
            permission,
            prompt_grants,
            delivered: VecDeque::new(),
        }
    }

    pub fn delivered(&self) -> impl Iterator<Item = &ReminderNotification> {
        self.delivered.iter()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }
}

impl NotificationDispatcher for LogNotificationDispatcher {
    fn permission(&self) -> NotificationPermission {
        self.permission
    }

    fn request_permission(&mut self) -> Result<NotificationPermission, DispatchError> {
        self.permission = if self.prompt_grants {
            NotificationPermission::Granted
        } else {
            NotificationPermission::Denied
        };
        tracing::info!(permission = ?self.permission, "notification permission prompt answered");
        Ok(self.permission)
    }

    fn show(&mut self, notification: &ReminderNotification) -> Result<(), DispatchError> {
        tracing::info!(
            tag = %notification.tag,
            title = %notification.title,
            body = %notification.body,
            "notification"
        );
        if self.delivered.len() == DELIVERED_HISTORY_LIMIT {
            self.delivered.pop_front();
        }
        self.delivered.push_back(notification.clone());
        Ok(())
    }
}

// ----------------------------------------------------------------------
// reminder poller
// ----------------------------------------------------------------------

pub type SharedNotifiedState<S> = Arc<Mutex<NotifiedState<S>>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReminderPollerStats {
    pub passes: u64,
    pub last_pass: Option<ReminderPassMetrics>,
}

struct ActiveWatch {
    care_recipient_id: CareRecipientId,
    handle: JoinHandle<()>,
}

/// Owns the single background task that re-checks one appointment snapshot
/// on a fixed interval. Loading a snapshot replaces the previous task; dropping
/// the poller aborts it.
pub struct ReminderPoller<D, S> {
    interval: Duration,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<Mutex<D>>,
    notified: SharedNotifiedState<S>,
    stats: Arc<Mutex<ReminderPollerStats>>,
    /// Bumped on every stop; a pass from an older load sees the mismatch
    /// under the NotifiedState lock and does nothing.
    generation: Arc<AtomicU64>,
    active: Option<ActiveWatch>,
}

impl<D, S> ReminderPoller<D, S>
where
    D: NotificationDispatcher + Send + 'static,
    S: KeyValueStore + Send + 'static,
{
    pub fn new(
        interval: Duration,
        clock: Arc<dyn Clock>,
        dispatcher: Arc<Mutex<D>>,
        notified: SharedNotifiedState<S>,
    ) -> Self {
        Self {
            interval,
            clock,
            dispatcher,
            notified,
            stats: Arc::new(Mutex::new(ReminderPollerStats::default())),
            generation: Arc::new(AtomicU64::new(0)),
            active: None,
        }
    }

    /// Starts watching `snapshot`: one pass right away, then one per interval.
    /// Must be called from inside a tokio runtime.
    pub fn load(&mut self, snapshot: AppointmentSnapshot) {
        self.stop();

        let care_recipient_id = snapshot.care_recipient_id.clone();
        let appointments = snapshot.len();
        let interval = self.interval;
        let clock = Arc::clone(&self.clock);
        let dispatcher = Arc::clone(&self.dispatcher);
        let notified = Arc::clone(&self.notified);
        let stats = Arc::clone(&self.stats);
        let generation = Arc::clone(&self.generation);
        let loaded_generation = generation.load(Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let pass = PassTarget {
                    snapshot: &snapshot,
                    generation: &generation,
                    loaded_generation,
                };
                run_reminder_pass(pass, clock.now(), &dispatcher, &notified, &stats);
            }
        });
        tracing::info!(
            care_recipient_id = %care_recipient_id,
            appointments,
            interval_ms = interval.as_millis() as u64,
            "reminder poller started"
        );
        self.active = Some(ActiveWatch {
            care_recipient_id,
            handle,
        });
    }

    pub fn stop(&mut self) -> bool {
        self.generation.fetch_add(1, Ordering::SeqCst);
        match self.active.take() {
            Some(watch) => {
                watch.handle.abort();
                tracing::info!(
                    care_recipient_id = %watch.care_recipient_id,
                    "reminder poller stopped"
                );
                true
            }
            None => false,
        }
    }

    pub fn watching(&self) -> Option<&CareRecipientId> {
        self.active.as_ref().map(|w| &w.care_recipient_id)
    }

    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    pub fn stats(&self) -> ReminderPollerStats {
        match self.stats.lock() {
            Ok(stats) => *stats,
            Err(_) => ReminderPollerStats::default(),
        }
    }
}

impl<D, S> Drop for ReminderPoller<D, S> {
    fn drop(&mut self) {
        if let Some(watch) = self.active.take() {
            watch.handle.abort();
        }
    }
}

struct PassTarget<'a> {
    snapshot: &'a AppointmentSnapshot,
    generation: &'a AtomicU64,
    loaded_generation: u64,
}

fn run_reminder_pass<D, S>(
    target: PassTarget<'_>,
    now: DateTime<Utc>,
    dispatcher: &Mutex<D>,
    notified: &Mutex<NotifiedState<S>>,
    stats: &Mutex<ReminderPollerStats>,
) where
    D: NotificationDispatcher,
    S: KeyValueStore,
{
    let Ok(mut dispatcher) = dispatcher.lock() else {
        tracing::warn!("notification dispatcher lock poisoned; skipping reminder pass");
        return;
    };
    let Ok(mut notified) = notified.lock() else {
        tracing::warn!("notified state lock poisoned; skipping reminder pass");
        return;
    };
    if target.generation.load(Ordering::SeqCst) != target.loaded_generation {
        return;
    }
    let metrics = check_and_notify(target.snapshot, now, &mut *dispatcher, &mut *notified);
    if let Ok(mut stats) = stats.lock() {
        stats.passes += 1;
        stats.last_pass = Some(metrics);
    }
}

// ----------------------------------------------------------------------
// runtime
// ----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdapterActionResponse<T> {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub data: Option<T>,
}

impl<T> AdapterActionResponse<T> {
    pub fn from_outcome(outcome: ActionOutcome<T>) -> (u16, Self) {
        match outcome {
            ActionOutcome::Applied(data) => (
                200,
                Self {
                    status: "ok".to_string(),
                    outcome: "APPLIED".to_string(),
                    reason: None,
                    data: Some(data),
                },
            ),
            ActionOutcome::Denied(decision) => (
                403,
                Self {
                    status: "denied".to_string(),
                    outcome: "DENIED".to_string(),
                    reason: Some(decision.capability.as_str().to_string()),
                    data: None,
                },
            ),
        }
    }

    pub fn from_error(err: &AdapterError) -> (u16, Self) {
        (
            err.http_status(),
            Self {
                status: "error".to_string(),
                outcome: "REJECTED".to_string(),
                reason: Some(err.to_string()),
                data: None,
            },
        )
    }

    pub fn from_result(result: Result<ActionOutcome<T>, AdapterError>) -> (u16, Self) {
        match result {
            Ok(outcome) => Self::from_outcome(outcome),
            Err(err) => Self::from_error(&err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReminderHealth {
    pub watching: Option<String>,
    /// False when reminder flags live only in memory.
    pub durable_state: bool,
    pub running: bool,
    pub passes: u64,
    pub last_pass: Option<ReminderPassMetrics>,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub reminders: ReminderHealth,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ReminderWatchResponse {
    pub care_recipient_id: String,
    pub appointments: usize,
    pub interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DocumentUploadRequest {
    #[serde(flatten)]
    pub document: DocumentDraft,
    pub file_name: String,
    pub content_base64: String,
}

/// Everything one HTTP process needs: the record store, the gated handlers,
/// NotifiedState, and the reminder poller for the recipient being watched.
pub struct AdapterRuntime<S = LocalKeyValueStore> {
    store: CareStore,
    actions: CareActionRuntime,
    clock: Arc<dyn Clock>,
    dispatcher: Arc<Mutex<LogNotificationDispatcher>>,
    notified: SharedNotifiedState<S>,
    poller: ReminderPoller<LogNotificationDispatcher, S>,
    interval: Duration,
}

impl AdapterRuntime<LocalKeyValueStore> {
    /// An unusable NotifiedState journal degrades reminders to in-memory
    /// flags; it never stops the runtime from starting.
    pub fn from_config(config: &AdapterConfig) -> Self {
        let kv = LocalKeyValueStore::open_or_volatile(&config.notified_state_path);
        Self::new(
            CareStore::new_in_memory(),
            kv,
            LogNotificationDispatcher::new(
                config.notification_permission,
                config.notification_prompt_grants,
            ),
            Arc::new(SystemClock),
            Duration::from_millis(config.reminder_interval_ms),
        )
    }
}

impl<S> AdapterRuntime<S>
where
    S: KeyValueStore + Send + 'static,
{
    pub fn new(
        store: CareStore,
        notified_store: S,
        dispatcher: LogNotificationDispatcher,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        let dispatcher = Arc::new(Mutex::new(dispatcher));
        let notified = Arc::new(Mutex::new(NotifiedState::new(notified_store)));
        let poller = ReminderPoller::new(
            interval,
            Arc::clone(&clock),
            Arc::clone(&dispatcher),
            Arc::clone(&notified),
        );
        Self {
            store,
            actions: CareActionRuntime::new(),
            clock,
            dispatcher,
            notified,
            poller,
            interval,
        }
    }

    pub fn store(&self) -> &CareStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut CareStore {
        &mut self.store
    }

    pub fn permissions(&self, session: &SessionContext) -> Result<PermissionSet, PermissionError> {
        self.actions.permissions(session)
    }

    pub fn list_care_recipients(
        &self,
        session: &SessionContext,
    ) -> Result<ActionOutcome<Vec<CareRecipient>>, AdapterError> {
        Ok(self.actions.list_care_recipients(&self.store, session)?)
    }

    pub fn add_care_recipient(
        &mut self,
        session: &SessionContext,
        draft: CareRecipientDraft,
    ) -> Result<ActionOutcome<CareRecipientId>, AdapterError> {
        let now = self.clock.now();
        Ok(self
            .actions
            .add_care_recipient(&mut self.store, session, draft, now)?)
    }

    pub fn list_appointments(
        &self,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
    ) -> Result<ActionOutcome<Vec<Appointment>>, AdapterError> {
        Ok(self
            .actions
            .list_appointments(&self.store, session, care_recipient_id)?)
    }

    pub fn add_appointment(
        &mut self,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
        draft: AppointmentDraft,
    ) -> Result<ActionOutcome<AppointmentId>, AdapterError> {
        let now = self.clock.now();
        let outcome =
            self.actions
                .add_appointment(&mut self.store, session, care_recipient_id, draft, now)?;
        if !outcome.is_denied() {
            self.reload_watch();
        }
        Ok(outcome)
    }

    pub fn toggle_appointment(
        &mut self,
        session: &SessionContext,
        id: &AppointmentId,
    ) -> Result<ActionOutcome<AppointmentStatus>, AdapterError> {
        let now = self.clock.now();
        let outcome = self
            .actions
            .toggle_appointment_complete(&mut self.store, session, id, now)?;
        if !outcome.is_denied() {
            self.reload_watch();
        }
        Ok(outcome)
    }

    pub fn delete_appointment(
        &mut self,
        session: &SessionContext,
        id: &AppointmentId,
    ) -> Result<ActionOutcome<()>, AdapterError> {
        // Stop before the flag is forgotten so no pass over the old snapshot
        // can re-notify the deleted row.
        let watched = self.poller.watching().cloned();
        self.poller.stop();
        let result = self.delete_appointment_unwatched(session, id);
        if let Some(care_recipient_id) = watched {
            self.load_watch(care_recipient_id);
        }
        result
    }

    fn delete_appointment_unwatched(
        &mut self,
        session: &SessionContext,
        id: &AppointmentId,
    ) -> Result<ActionOutcome<()>, AdapterError> {
        let mut notified = self
            .notified
            .lock()
            .map_err(|_| AdapterError::LockPoisoned)?;
        Ok(self
            .actions
            .delete_appointment(&mut self.store, &mut notified, session, id)?)
    }

    pub fn upload_document(
        &mut self,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
        request: DocumentUploadRequest,
    ) -> Result<ActionOutcome<DocumentId>, AdapterError> {
        let bytes = BASE64
            .decode(request.content_base64.trim())
            .map_err(|err| AdapterError::InvalidRequest(format!("content_base64: {err}")))?;
        let now = self.clock.now();
        Ok(self.actions.upload_document(
            &mut self.store,
            session,
            care_recipient_id,
            request.document,
            &request.file_name,
            bytes,
            now,
        )?)
    }

    /// Loads the recipient's appointments and points the poller at them.
    pub fn watch_reminders(
        &mut self,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
    ) -> Result<ActionOutcome<ReminderWatchResponse>, AdapterError> {
        let now = self.clock.now();
        let outcome =
            self.actions
                .appointment_snapshot(&self.store, session, care_recipient_id, now)?;
        let interval_ms = self.interval.as_millis() as u64;
        Ok(outcome.map(|snapshot| {
            let response = ReminderWatchResponse {
                care_recipient_id: care_recipient_id.as_str().to_string(),
                appointments: snapshot.len(),
                interval_ms,
            };
            self.poller.load(snapshot);
            response
        }))
    }

    pub fn stop_reminders(&mut self) -> bool {
        self.poller.stop()
    }

    pub fn export_emergency_summary(
        &self,
        session: &SessionContext,
        care_recipient_id: &CareRecipientId,
    ) -> Result<ActionOutcome<String>, AdapterError> {
        Ok(self.actions.export_emergency_summary(
            &self.store,
            session,
            care_recipient_id,
            self.clock.now(),
        )?)
    }

    pub fn delivered_notifications(&self) -> Vec<ReminderNotification> {
        match self.dispatcher.lock() {
            Ok(d) => d.delivered().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn health_report(&self) -> AdapterHealthResponse {
        let stats = self.poller.stats();
        AdapterHealthResponse {
            status: "ok".to_string(),
            outcome: "HEALTHY".to_string(),
            reason: None,
            reminders: ReminderHealth {
                watching: self.poller.watching().map(|id| id.as_str().to_string()),
                durable_state: self.durable_state(),
                running: self.poller.is_running(),
                passes: stats.passes,
                last_pass: stats.last_pass,
            },
        }
    }

    fn durable_state(&self) -> bool {
        self.notified
            .lock()
            .is_ok_and(|state| state.store().is_durable())
    }

    // A changed appointment set is a new snapshot for the recipient being watched.
    fn reload_watch(&mut self) {
        if let Some(care_recipient_id) = self.poller.watching().cloned() {
            self.load_watch(care_recipient_id);
        }
    }

    fn load_watch(&mut self, care_recipient_id: CareRecipientId) {
        let rows = self
            .store
            .appointment_rows(&care_recipient_id)
            .into_iter()
            .cloned()
            .collect();
        let snapshot = AppointmentSnapshot::new(care_recipient_id, rows, self.clock.now());
        self.poller.load(snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carevault_storage::kv::InMemoryKeyValueStore;
    use chrono::{NaiveDate, TimeZone};
    use std::collections::BTreeMap;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap()
    }

    /// Wall clock that follows tokio's (pausable) clock.
    struct TokioClock {
        base: DateTime<Utc>,
        start: tokio::time::Instant,
    }

    impl TokioClock {
        fn starting_at(base: DateTime<Utc>) -> Self {
            Self {
                base,
                start: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            self.base + chrono::Duration::from_std(self.start.elapsed()).unwrap()
        }
    }

    // Lets spawned poller tasks run; paused time auto-advances 1ms.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    fn env_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn appt(cr: &CareRecipientId, id: &str, at: DateTime<Utc>) -> Appointment {
        Appointment::from_draft(
            AppointmentId::new(id).unwrap(),
            cr.clone(),
            AppointmentDraft {
                title: format!("Visit {id}"),
                description: None,
                scheduled_at: at,
                location: None,
                doctor_name: None,
                remind_before_minutes: 30,
                repeat_interval: Default::default(),
                notes: None,
            },
            t0(),
        )
        .unwrap()
    }

    fn poller_parts() -> (
        Arc<dyn Clock>,
        Arc<Mutex<LogNotificationDispatcher>>,
        SharedNotifiedState<InMemoryKeyValueStore>,
    ) {
        (
            Arc::new(TokioClock::starting_at(t0())),
            Arc::new(Mutex::new(LogNotificationDispatcher::new(
                NotificationPermission::Granted,
                true,
            ))),
            Arc::new(Mutex::new(NotifiedState::new(InMemoryKeyValueStore::new()))),
        )
    }

    fn delivered(d: &Arc<Mutex<LogNotificationDispatcher>>) -> Vec<String> {
        d.lock().unwrap().delivered().map(|n| n.tag.clone()).collect()
    }

    #[test]
    fn at_adapter_01_config_defaults() {
        let vars = env_map(&[("HOME", "/home/carer")]);
        let cfg = AdapterConfig::from_env_var_map(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(cfg.http_bind, DEFAULT_HTTP_BIND.parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.reminder_interval_ms, 60_000);
        assert_eq!(
            cfg.notified_state_path,
            PathBuf::from("/home/carer/.carevault/notified_state.jsonl")
        );
        assert_eq!(cfg.notification_permission, NotificationPermission::Default);
        assert!(cfg.notification_prompt_grants);
    }

    #[test]
    fn at_adapter_02_config_overrides_and_range_filter() {
        let vars = env_map(&[
            ("CAREVAULT_HTTP_BIND", "0.0.0.0:9090"),
            ("CAREVAULT_REMINDER_INTERVAL_MS", "5000"),
            ("CAREVAULT_NOTIFIED_STATE_PATH", "/tmp/cv/state.jsonl"),
            ("CAREVAULT_NOTIFICATION_PERMISSION", "Denied"),
            ("CAREVAULT_NOTIFICATION_PROMPT_GRANTS", "off"),
        ]);
        let cfg = AdapterConfig::from_env_var_map(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(cfg.http_bind.port(), 9090);
        assert_eq!(cfg.reminder_interval_ms, 5_000);
        assert_eq!(cfg.notified_state_path, PathBuf::from("/tmp/cv/state.jsonl"));
        assert_eq!(cfg.notification_permission, NotificationPermission::Denied);
        assert!(!cfg.notification_prompt_grants);

        let vars = env_map(&[("CAREVAULT_REMINDER_INTERVAL_MS", "10")]);
        let cfg = AdapterConfig::from_env_var_map(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(cfg.reminder_interval_ms, 60_000);
        assert_eq!(
            cfg.notified_state_path,
            PathBuf::from(".carevault/notified_state.jsonl")
        );
    }

    #[test]
    fn at_adapter_03_config_rejects_bad_bind_and_permission() {
        let vars = env_map(&[("CAREVAULT_HTTP_BIND", "not-an-addr")]);
        assert!(matches!(
            AdapterConfig::from_env_var_map(|k| vars.get(k).cloned()),
            Err(AdapterError::Config {
                var: "CAREVAULT_HTTP_BIND",
                ..
            })
        ));
        let vars = env_map(&[("CAREVAULT_NOTIFICATION_PERMISSION", "maybe")]);
        assert!(matches!(
            AdapterConfig::from_env_var_map(|k| vars.get(k).cloned()),
            Err(AdapterError::Config {
                var: "CAREVAULT_NOTIFICATION_PERMISSION",
                ..
            })
        ));
    }

    #[test]
    fn at_adapter_04_session_headers_fail_closed() {
        let s = session_from_headers(Some("carer_1"), Some("caregiver"));
        assert_eq!(s.role, Some(Role::Caregiver));
        assert!(s.user_id.is_some());

        let s = session_from_headers(Some("has space"), Some("admin"));
        assert_eq!(s, SessionContext::anonymous());
        assert_eq!(session_from_headers(None, None), SessionContext::anonymous());
    }

    #[test]
    fn at_adapter_05_error_status_mapping() {
        let nf = AdapterError::Storage(StorageError::NotFound {
            table: "appointments",
            key: "appt_1".to_string(),
        });
        assert_eq!(nf.http_status(), 404);
        assert_eq!(AdapterError::InvalidRequest("x".to_string()).http_status(), 400);
        assert_eq!(AdapterError::LockPoisoned.http_status(), 500);
        let (code, body) = AdapterActionResponse::<()>::from_error(&nf);
        assert_eq!(code, 404);
        assert_eq!(body.outcome, "REJECTED");
    }

    #[test]
    fn at_adapter_11_denied_reply_names_capability_without_data() {
        let decision = carevault_engines::permissions::decide(
            Some(Role::Patient),
            carevault_kernel_contracts::access::Capability::DeleteDocuments,
        );
        let (code, body) =
            AdapterActionResponse::<DocumentId>::from_outcome(ActionOutcome::Denied(decision));
        assert_eq!(code, 403);
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["outcome"], "DENIED");
        assert_eq!(json["reason"], "canDeleteDocuments");
        assert!(json["data"].is_null());
    }

    #[test]
    fn at_adapter_12_unusable_journal_still_starts_runtime() {
        let dir = std::env::temp_dir().join(format!(
            "carevault_adapter_fallback_{}",
            std::process::id()
        ));
        let journal = dir.join("notified_state.jsonl");
        std::fs::create_dir_all(&journal).unwrap();
        let vars = env_map(&[(
            "CAREVAULT_NOTIFIED_STATE_PATH",
            journal.to_str().unwrap(),
        )]);
        let cfg = AdapterConfig::from_env_var_map(|k| vars.get(k).cloned()).unwrap();

        let rt = AdapterRuntime::from_config(&cfg);
        let health = rt.health_report();
        assert_eq!(health.status, "ok");
        assert!(!health.reminders.durable_state);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn at_adapter_13_pass_from_stopped_load_does_nothing() {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let dispatcher = Mutex::new(LogNotificationDispatcher::new(
            NotificationPermission::Granted,
            true,
        ));
        let notified = Mutex::new(NotifiedState::new(InMemoryKeyValueStore::new()));
        let stats = Mutex::new(ReminderPollerStats::default());
        let now = clock.now();
        let cr = CareRecipientId::new("cr_000001").unwrap();
        let snapshot = AppointmentSnapshot::new(
            cr.clone(),
            vec![appt(&cr, "appt_gone", now + chrono::Duration::minutes(5))],
            now,
        );
        let generation = AtomicU64::new(1);

        let stale = PassTarget {
            snapshot: &snapshot,
            generation: &generation,
            loaded_generation: 0,
        };
        run_reminder_pass(stale, now, &dispatcher, &notified, &stats);
        assert_eq!(dispatcher.lock().unwrap().delivered_count(), 0);
        assert_eq!(stats.lock().unwrap().passes, 0);
        let id = AppointmentId::new("appt_gone").unwrap();
        assert!(!notified.lock().unwrap().is_notified(&id).unwrap());

        let current = PassTarget {
            snapshot: &snapshot,
            generation: &generation,
            loaded_generation: 1,
        };
        run_reminder_pass(current, now, &dispatcher, &notified, &stats);
        assert_eq!(dispatcher.lock().unwrap().delivered_count(), 1);
    }

    #[test]
    fn at_adapter_06_log_dispatcher_prompt_and_history_cap() {
        let mut d = LogNotificationDispatcher::new(NotificationPermission::Default, false);
        assert_eq!(
            d.request_permission().unwrap(),
            NotificationPermission::Denied
        );
        let id = AppointmentId::new("appt_1").unwrap();
        let n = ReminderNotification::v1("GP".to_string(), "soon".to_string(), &id).unwrap();
        for _ in 0..(DELIVERED_HISTORY_LIMIT + 5) {
            d.show(&n).unwrap();
        }
        assert_eq!(d.delivered_count(), DELIVERED_HISTORY_LIMIT);
    }

    #[tokio::test(start_paused = true)]
    async fn at_adapter_07_poller_runs_immediately_then_each_interval() {
        let (clock, dispatcher, notified) = poller_parts();
        let cr = CareRecipientId::new("cr_000001").unwrap();
        // Window opens 15 minutes in.
        let snapshot = AppointmentSnapshot::new(
            cr.clone(),
            vec![appt(&cr, "appt_later", t0() + chrono::Duration::minutes(45))],
            t0(),
        );
        let mut poller = ReminderPoller::new(
            Duration::from_secs(60),
            clock,
            Arc::clone(&dispatcher),
            Arc::clone(&notified),
        );
        poller.load(snapshot);
        settle().await;
        assert_eq!(poller.stats().passes, 1);
        assert!(delivered(&dispatcher).is_empty());
        assert_eq!(poller.watching(), Some(&cr));

        tokio::time::sleep(Duration::from_secs(15 * 60 + 1)).await;
        assert_eq!(poller.stats().passes, 16);
        assert_eq!(delivered(&dispatcher), vec!["appt_later".to_string()]);

        tokio::time::sleep(Duration::from_secs(10 * 60)).await;
        assert_eq!(delivered(&dispatcher).len(), 1);
        assert_eq!(poller.stats().last_pass.unwrap().already_notified, 1);
        assert!(poller.stop());
        assert!(!poller.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn at_adapter_08_reload_cancels_previous_snapshot() {
        let (clock, dispatcher, notified) = poller_parts();
        let cr_a = CareRecipientId::new("cr_a").unwrap();
        let cr_b = CareRecipientId::new("cr_b").unwrap();
        let mut poller = ReminderPoller::new(
            Duration::from_secs(60),
            clock,
            Arc::clone(&dispatcher),
            notified,
        );

        poller.load(AppointmentSnapshot::new(
            cr_a.clone(),
            vec![appt(&cr_a, "appt_a", t0() + chrono::Duration::minutes(40))],
            t0(),
        ));
        settle().await;
        poller.load(AppointmentSnapshot::new(
            cr_b.clone(),
            vec![appt(&cr_b, "appt_b", t0() + chrono::Duration::minutes(5))],
            t0(),
        ));
        settle().await;
        assert_eq!(poller.watching(), Some(&cr_b));
        assert_eq!(delivered(&dispatcher), vec!["appt_b".to_string()]);

        tokio::time::sleep(Duration::from_secs(20 * 60)).await;
        assert_eq!(delivered(&dispatcher), vec!["appt_b".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn at_adapter_09_dropping_poller_cancels_task() {
        let (clock, dispatcher, notified) = poller_parts();
        let cr = CareRecipientId::new("cr_000001").unwrap();
        {
            let mut poller = ReminderPoller::new(
                Duration::from_secs(60),
                clock,
                Arc::clone(&dispatcher),
                notified,
            );
            poller.load(AppointmentSnapshot::new(
                cr.clone(),
                vec![appt(&cr, "appt_x", t0() + chrono::Duration::minutes(35))],
                t0(),
            ));
            settle().await;
        }
        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        assert!(delivered(&dispatcher).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn at_adapter_10_runtime_watch_denies_patient_writes_and_reloads_on_change() {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock::starting_at(t0()));
        let mut rt = AdapterRuntime::new(
            CareStore::new_in_memory(),
            InMemoryKeyValueStore::new(),
            LogNotificationDispatcher::new(NotificationPermission::Default, true),
            clock,
            Duration::from_secs(60),
        );
        let carer = session_from_headers(Some("carer_1"), Some("caregiver"));
        let patient = session_from_headers(Some("patient_1"), Some("patient"));

        let cr = rt
            .add_care_recipient(
                &carer,
                CareRecipientDraft {
                    patient_email: None,
                    first_name: "Iris".to_string(),
                    last_name: "Hale".to_string(),
                    date_of_birth: NaiveDate::from_ymd_opt(1941, 3, 9).unwrap(),
                    diagnosis: None,
                    medical_conditions: None,
                    allergies: None,
                    emergency_contact_name: None,
                    emergency_contact_phone: None,
                    emergency_contact_relationship: None,
                    notes: None,
                },
            )
            .unwrap()
            .applied()
            .unwrap();

        let watch = rt.watch_reminders(&carer, &cr).unwrap().applied().unwrap();
        assert_eq!(watch.appointments, 0);
        settle().await;

        let draft = AppointmentDraft {
            title: "GP review".to_string(),
            description: Some("bloods".to_string()),
            scheduled_at: t0() + chrono::Duration::minutes(20),
            location: None,
            doctor_name: None,
            remind_before_minutes: 30,
            repeat_interval: Default::default(),
            notes: None,
        };
        let denied = rt.add_appointment(&patient, &cr, draft.clone()).unwrap();
        assert!(denied.is_denied());
        let (code, _) = AdapterActionResponse::from_outcome(denied);
        assert_eq!(code, 403);

        let id = rt
            .add_appointment(&carer, &cr, draft)
            .unwrap()
            .applied()
            .unwrap();
        settle().await;
        let shown = rt.delivered_notifications();
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].tag, id.as_str());
        assert_eq!(shown[0].body, "2026-10-18 09:20 UTC - bloods");

        rt.delete_appointment(&carer, &id).unwrap().applied().unwrap();
        settle().await;
        let health = rt.health_report();
        assert_eq!(health.reminders.watching.as_deref(), Some(cr.as_str()));
        assert!(health.reminders.running);
        assert_eq!(health.reminders.last_pass.unwrap().examined, 0);
        assert!(rt.stop_reminders());
    }
}
