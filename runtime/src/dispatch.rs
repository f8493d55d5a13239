//! Post-commit side effects: notification, email and audit.
//!
//! Everything here runs after the unit of work has committed. Collaborator failures
//! are logged and counted, never returned.

use crate::Collaborators;
use crate::metrics::record_collaborator_failure;
use classbook_core::collaborators::{ActivityEntry, Audience, OutgoingEmail};
use classbook_core::error::BookingError;
use classbook_core::lifecycle::BookingAction;
use classbook_core::model::{Booking, Parent};
use classbook_core::request::{BookingOrigin, Panel};
use classbook_core::status::BookingStatus;
use serde_json::{Value, json};

/// A committed change to report.
#[derive(Debug)]
pub struct Notice<'a> {
    /// Audit module (`booking`, `freeze`, `cancellation`, `payment`)
    pub module: &'static str,
    /// Audit action
    pub action: &'static str,
    /// Who asked; `None` for background sweeps
    pub origin: Option<BookingOrigin>,
    /// Booking after the change
    pub booking: &'a Booking,
    /// Email recipient
    pub recipient: Option<&'a Parent>,
    /// Email template key, if this change sends one
    pub template: Option<&'static str>,
    /// Audit payload
    pub payload: Value,
}

/// Invokes the collaborators.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    collaborators: Collaborators,
}

impl Dispatcher {
    /// Creates a new dispatcher
    #[must_use]
    pub const fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    /// Report a committed change.
    pub async fn committed(&self, notice: Notice<'_>) {
        let actor = notice.origin.and_then(|origin| origin.actor());
        let panel = notice.origin.map_or(Panel::Admin, |origin| origin.panel());
        let booking = notice.booking;

        let title = format!("Booking {}", notice.action.replace('_', " "));
        let body = format!("Booking {} is now {}", booking.reference, booking.status);
        if let Err(error) = self
            .collaborators
            .notifier
            .notify(actor, &title, &body, Audience::Admins)
            .await
        {
            record_collaborator_failure("notifier");
            tracing::warn!(booking_id = %booking.id, error = %error, "Notification failed");
        }

        if let (Some(key), Some(parent)) = (notice.template, notice.recipient) {
            self.send_email(panel, key, booking, parent).await;
        }

        self.audit(ActivityEntry {
            actor,
            panel,
            module: notice.module.to_string(),
            action: notice.action.to_string(),
            payload: notice.payload,
            success: true,
        })
        .await;
    }

    /// Record a rejected operation.
    pub async fn rejected(
        &self,
        origin: Option<BookingOrigin>,
        module: &'static str,
        action: &'static str,
        mut payload: Value,
        error: &BookingError,
    ) {
        if let Some(fields) = payload.as_object_mut() {
            fields.insert("reason".to_string(), json!(error.reason()));
            fields.insert("message".to_string(), json!(error.user_message()));
        }
        self.audit(ActivityEntry {
            actor: origin.and_then(|origin| origin.actor()),
            panel: origin.map_or(Panel::Admin, |origin| origin.panel()),
            module: module.to_string(),
            action: action.to_string(),
            payload,
            success: false,
        })
        .await;
    }

    async fn send_email(&self, panel: Panel, key: &str, booking: &Booking, parent: &Parent) {
        let template = match self.collaborators.templates.get_template(panel, key).await {
            Ok(Some(template)) => template,
            Ok(None) => {
                tracing::warn!(panel = panel.as_str(), template = key, "Email template missing; skipping email");
                return;
            },
            Err(error) => {
                record_collaborator_failure("templates");
                tracing::warn!(template = key, error = %error, "Email template lookup failed; skipping email");
                return;
            },
        };

        let (subject, html) = template.render(&[
            ("reference", booking.reference.to_string()),
            ("parent", parent.first_name.clone()),
            ("status", booking.status.to_string()),
            ("start_date", booking.start_date.to_string()),
        ]);
        let email = OutgoingEmail {
            to: parent.email.clone(),
            subject,
            html,
            config: template.config,
        };
        if let Err(error) = self.collaborators.mailer.send(email).await {
            record_collaborator_failure("mailer");
            tracing::warn!(booking_id = %booking.id, template = key, error = %error, "Email delivery failed");
        }
    }

    async fn audit(&self, entry: ActivityEntry) {
        let module = entry.module.clone();
        let action = entry.action.clone();
        if let Err(error) = self.collaborators.audit.log_activity(entry).await {
            record_collaborator_failure("audit");
            tracing::warn!(module = %module, action = %action, error = %error, "Audit log write failed");
        }
    }
}

/// Email template sent after a lifecycle action lands on `status`.
#[must_use]
pub const fn template_for(action: &BookingAction, status: BookingStatus) -> Option<&'static str> {
    match action {
        BookingAction::Promote => Some("booking_promoted"),
        BookingAction::MoveToWaitingList => Some("moved_to_waiting_list"),
        BookingAction::Expire => Some("waiting_list_expired"),
        BookingAction::StartFreeze { .. } => Some("booking_frozen"),
        BookingAction::EndFreeze { .. } | BookingAction::Reactivate => Some("booking_reactivated"),
        BookingAction::Cancel { .. } => match status {
            BookingStatus::RequestToCancel => Some("cancellation_requested"),
            _ => Some("booking_cancelled"),
        },
        BookingAction::ConfirmCancellation => Some("booking_cancelled"),
        BookingAction::RemoveFromWaitingList => Some("waiting_list_removed"),
        BookingAction::Rebook { .. } => Some("trial_rebooked"),
        BookingAction::MarkAttendance { .. } => None,
        BookingAction::ConvertToMembership { .. } => Some("membership_confirmation"),
    }
}
