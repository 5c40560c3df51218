#![forbid(unsafe_code)]

use carevault_kernel_contracts::appointment::{Appointment, AppointmentSnapshot};
use carevault_kernel_contracts::reminder::{
    ReminderNotification, ReminderPhase, REMINDER_BODY_MAX_CHARS,
};
use carevault_kernel_contracts::ContractViolation;
use chrono::{DateTime, Utc};

const MS_PER_MINUTE: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReminderConfig {
    pub poll_interval_ms: u64,
}

impl ReminderConfig {
    pub fn mvp_v1() -> Self {
        Self {
            poll_interval_ms: 60_000,
        }
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self::mvp_v1()
    }
}

/// Whole minutes from `now` until `scheduled_at`, floored toward negative
/// infinity: 30 seconds in the past is `-1`, not `0`.
pub fn diff_minutes(scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    scheduled_at
        .signed_duration_since(now)
        .num_milliseconds()
        .div_euclid(MS_PER_MINUTE)
}

/// Inclusive on both ends.
pub fn in_reminder_window(diff_minutes: i64, remind_before_minutes: u32) -> bool {
    (0..=i64::from(remind_before_minutes)).contains(&diff_minutes)
}

/// Derives the reminder phase. `notified` is the NotifiedState lookup for this
/// appointment and only matters inside the window.
pub fn classify(appointment: &Appointment, now: DateTime<Utc>, notified: bool) -> ReminderPhase {
    let Some(scheduled_at) = appointment.scheduled_at else {
        return ReminderPhase::Past;
    };
    if appointment.is_closed() {
        return ReminderPhase::Past;
    }
    let diff = diff_minutes(scheduled_at, now);
    if diff < 0 {
        ReminderPhase::Past
    } else if !in_reminder_window(diff, appointment.remind_before_minutes) {
        ReminderPhase::Future
    } else if notified {
        ReminderPhase::Notified
    } else {
        ReminderPhase::DueForReminder
    }
}

/// Open, well-formed appointments whose window contains `now`. NotifiedState
/// is not consulted here.
pub fn in_window<'a>(
    snapshot: &'a AppointmentSnapshot,
    now: DateTime<Utc>,
) -> impl Iterator<Item = &'a Appointment> + 'a {
    snapshot.iter().filter(move |a| {
        !a.is_closed()
            && a.scheduled_at.is_some_and(|t| {
                in_reminder_window(diff_minutes(t, now), a.remind_before_minutes)
            })
    })
}

/// Time line plus the description, cut to [`REMINDER_BODY_MAX_CHARS`] so a
/// long description never blocks the reminder.
pub fn notification_body(appointment: &Appointment) -> String {
    let when = match appointment.scheduled_at {
        Some(t) => t.format("%Y-%m-%d %H:%M UTC").to_string(),
        None => "time not set".to_string(),
    };
    let body = match appointment.description.as_deref().map(str::trim) {
        Some(desc) if !desc.is_empty() => format!("{when} - {desc}"),
        _ => when,
    };
    truncate_chars(body, REMINDER_BODY_MAX_CHARS)
}

fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((cut, _)) = text.char_indices().nth(max_chars) {
        text.truncate(cut);
    }
    text
}

pub fn build_notification(
    appointment: &Appointment,
) -> Result<ReminderNotification, ContractViolation> {
    ReminderNotification::v1(
        appointment.title.clone(),
        notification_body(appointment),
        &appointment.id,
    )
}
