#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use carevault_adapter::{
    init_tracing, session_from_headers, AdapterActionResponse, AdapterConfig, AdapterError,
    AdapterHealthResponse, AdapterRuntime, DocumentUploadRequest, ReminderHealth,
    ReminderWatchResponse,
};
use carevault_kernel_contracts::access::{PermissionSet, SessionContext};
use carevault_kernel_contracts::appointment::{
    Appointment, AppointmentDraft, AppointmentId, AppointmentStatus,
};
use carevault_kernel_contracts::care::{
    CareRecipient, CareRecipientDraft, CareRecipientId, DocumentId,
};
use carevault_os::actions::ActionOutcome;
use carevault_storage::StorageError;

type SharedRuntime = Arc<Mutex<AdapterRuntime>>;
type ActionReply<T> = (StatusCode, Json<AdapterActionResponse<T>>);

const USER_HEADER: &str = "x-carevault-user";
const ROLE_HEADER: &str = "x-carevault-role";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let config = AdapterConfig::from_env()?;
    let runtime: SharedRuntime = Arc::new(Mutex::new(AdapterRuntime::from_config(&config)));

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/permissions", get(permissions))
        .route(
            "/v1/care-recipients",
            get(list_care_recipients).post(add_care_recipient),
        )
        .route(
            "/v1/care-recipients/:id/appointments",
            get(list_appointments).post(add_appointment),
        )
        .route("/v1/care-recipients/:id/documents", post(upload_document))
        .route("/v1/care-recipients/:id/reminders/watch", post(watch_reminders))
        .route(
            "/v1/care-recipients/:id/emergency-summary",
            get(emergency_summary),
        )
        .route("/v1/appointments/:id/toggle", post(toggle_appointment))
        .route("/v1/appointments/:id", delete(delete_appointment))
        .with_state(runtime);

    tracing::info!(
        addr = %config.http_bind,
        reminder_interval_ms = config.reminder_interval_ms,
        notified_state_path = %config.notified_state_path.display(),
        "carevault_adapter_http listening"
    );
    let listener = tokio::net::TcpListener::bind(config.http_bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("carevault_adapter_http stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "ctrl-c handler failed; shutting down");
    }
}

fn session(headers: &HeaderMap) -> SessionContext {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    session_from_headers(header(USER_HEADER), header(ROLE_HEADER))
}

fn lock(runtime: &SharedRuntime) -> Result<MutexGuard<'_, AdapterRuntime>, AdapterError> {
    runtime.lock().map_err(|_| AdapterError::LockPoisoned)
}

fn reply<T>(result: Result<ActionOutcome<T>, AdapterError>) -> ActionReply<T> {
    let (code, body) = AdapterActionResponse::from_result(result);
    (
        StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(body),
    )
}

fn care_recipient_id(raw: &str) -> Result<CareRecipientId, AdapterError> {
    CareRecipientId::new(raw).map_err(|e| AdapterError::Storage(StorageError::from(e)))
}

fn appointment_id(raw: &str) -> Result<AppointmentId, AdapterError> {
    AppointmentId::new(raw).map_err(|e| AdapterError::Storage(StorageError::from(e)))
}

async fn healthz(
    State(runtime): State<SharedRuntime>,
) -> (StatusCode, Json<AdapterHealthResponse>) {
    match lock(&runtime) {
        Ok(runtime) => (StatusCode::OK, Json(runtime.health_report())),
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(AdapterHealthResponse {
                status: "error".to_string(),
                outcome: "UNHEALTHY".to_string(),
                reason: Some(err.to_string()),
                reminders: ReminderHealth {
                    watching: None,
                    durable_state: false,
                    running: false,
                    passes: 0,
                    last_pass: None,
                },
            }),
        ),
    }
}

async fn permissions(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
) -> ActionReply<PermissionSet> {
    let session = session(&headers);
    reply(lock(&runtime).map(|rt| match rt.permissions(&session) {
        Ok(set) => ActionOutcome::Applied(set),
        // Absent or unknown roles resolve to an empty set, not an error.
        Err(_) => ActionOutcome::Applied(PermissionSet::NONE),
    }))
}

async fn list_care_recipients(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
) -> ActionReply<Vec<CareRecipient>> {
    let session = session(&headers);
    reply(lock(&runtime).and_then(|rt| rt.list_care_recipients(&session)))
}

async fn add_care_recipient(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Json(draft): Json<CareRecipientDraft>,
) -> ActionReply<CareRecipientId> {
    let session = session(&headers);
    reply(lock(&runtime).and_then(|mut rt| rt.add_care_recipient(&session, draft)))
}

async fn list_appointments(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ActionReply<Vec<Appointment>> {
    let session = session(&headers);
    reply(care_recipient_id(&id).and_then(|cr| {
        let rt = lock(&runtime)?;
        rt.list_appointments(&session, &cr)
    }))
}

async fn add_appointment(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(draft): Json<AppointmentDraft>,
) -> ActionReply<AppointmentId> {
    let session = session(&headers);
    reply(care_recipient_id(&id).and_then(|cr| {
        let mut rt = lock(&runtime)?;
        rt.add_appointment(&session, &cr, draft)
    }))
}

async fn upload_document(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(request): Json<DocumentUploadRequest>,
) -> ActionReply<DocumentId> {
    let session = session(&headers);
    reply(care_recipient_id(&id).and_then(|cr| {
        let mut rt = lock(&runtime)?;
        rt.upload_document(&session, &cr, request)
    }))
}

async fn watch_reminders(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ActionReply<ReminderWatchResponse> {
    let session = session(&headers);
    reply(care_recipient_id(&id).and_then(|cr| {
        let mut rt = lock(&runtime)?;
        rt.watch_reminders(&session, &cr)
    }))
}

async fn emergency_summary(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ActionReply<String> {
    let session = session(&headers);
    reply(care_recipient_id(&id).and_then(|cr| {
        let rt = lock(&runtime)?;
        rt.export_emergency_summary(&session, &cr)
    }))
}

async fn toggle_appointment(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ActionReply<AppointmentStatus> {
    let session = session(&headers);
    reply(appointment_id(&id).and_then(|appt| {
        let mut rt = lock(&runtime)?;
        rt.toggle_appointment(&session, &appt)
    }))
}

async fn delete_appointment(
    State(runtime): State<SharedRuntime>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ActionReply<()> {
    let session = session(&headers);
    reply(appointment_id(&id).and_then(|appt| {
        let mut rt = lock(&runtime)?;
        rt.delete_appointment(&session, &appt)
    }))
}
