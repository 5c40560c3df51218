#![forbid(unsafe_code)]

use carevault_engines::reminder::{build_notification, diff_minutes, in_reminder_window};
use carevault_kernel_contracts::appointment::AppointmentSnapshot;
use carevault_kernel_contracts::reminder::{
    NotificationPermission, ReminderNotification, ReminderPassMetrics,
};
use carevault_storage::kv::{KeyValueStore, NotifiedState};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("notification platform unavailable: {0}")]
    Unavailable(String),
    #[error("notification rejected by platform: {0}")]
    Rejected(String),
}

/// Platform notification capability. Delivery is fire-and-forget: `Ok` from
/// `show` means the platform accepted the notification, nothing more.
pub trait NotificationDispatcher {
    fn permission(&self) -> NotificationPermission;
    /// Prompts the user. Only called while the permission is `Default`.
    fn request_permission(&mut self) -> Result<NotificationPermission, DispatchError>;
    fn show(&mut self, notification: &ReminderNotification) -> Result<(), DispatchError>;
}

/// One reminder check over `snapshot` at `now`.
///
/// Emits at most one notification per appointment id for the lifetime of
/// `notified`. Permission is resolved lazily, at most once per pass, and only
/// when something is actually due. Failures are logged and counted; they never
/// stop the pass.
pub fn check_and_notify<D, S>(
    snapshot: &AppointmentSnapshot,
    now: DateTime<Utc>,
    dispatcher: &mut D,
    notified: &mut NotifiedState<S>,
) -> ReminderPassMetrics
where
    D: NotificationDispatcher + ?Sized,
    S: KeyValueStore,
{
    let mut metrics = ReminderPassMetrics::default();
    let mut permission: Option<NotificationPermission> = None;

    for appt in snapshot.iter() {
        metrics.examined += 1;
        let Some(scheduled_at) = appt.scheduled_at else {
            metrics.malformed += 1;
            tracing::debug!(appointment_id = %appt.id, "appointment has no scheduled time");
            continue;
        };
        if appt.is_closed() {
            continue;
        }
        if !in_reminder_window(diff_minutes(scheduled_at, now), appt.remind_before_minutes) {
            continue;
        }
        match notified.is_notified(&appt.id) {
            Ok(true) => {
                metrics.already_notified += 1;
                continue;
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(
                    appointment_id = %appt.id,
                    error = %err,
                    "notified state read failed; skipping reminder"
                );
                continue;
            }
        }

        let resolved = match permission {
            Some(p) => p,
            None => {
                let p = resolve_permission(dispatcher);
                permission = Some(p);
                p
            }
        };
        if resolved != NotificationPermission::Granted {
            metrics.permission_denied += 1;
            continue;
        }

        let notification = match build_notification(appt) {
            Ok(n) => n,
            Err(err) => {
                metrics.malformed += 1;
                tracing::warn!(appointment_id = %appt.id, error = %err, "reminder content invalid");
                continue;
            }
        };
        if let Err(err) = dispatcher.show(&notification) {
            metrics.dispatch_failed += 1;
            tracing::warn!(appointment_id = %appt.id, error = %err, "reminder dispatch failed");
            continue;
        }
        metrics.emitted += 1;
        tracing::info!(
            appointment_id = %appt.id,
            care_recipient_id = %appt.care_recipient_id,
            scheduled_at = %scheduled_at,
            "reminder emitted"
        );
        if let Err(err) = notified.mark_notified(&appt.id) {
            metrics.state_write_failed += 1;
            tracing::warn!(appointment_id = %appt.id, error = %err, "notified state write failed");
        }
    }

    tracing::debug!(
        care_recipient_id = %snapshot.care_recipient_id,
        examined = metrics.examined,
        emitted = metrics.emitted,
        already_notified = metrics.already_notified,
        permission_denied = metrics.permission_denied,
        dispatch_failed = metrics.dispatch_failed,
        "reminder pass complete"
    );
    metrics
}

fn resolve_permission<D>(dispatcher: &mut D) -> NotificationPermission
where
    D: NotificationDispatcher + ?Sized,
{
    match dispatcher.permission() {
        NotificationPermission::Default => match dispatcher.request_permission() {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(error = %err, "notification permission request failed");
                NotificationPermission::Default
            }
        },
        p => p,
    }
}
