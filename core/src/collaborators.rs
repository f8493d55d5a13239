//! External collaborators invoked after a unit of work commits.
//!
//! None of these can fail a booking operation. Their errors are logged by the caller.

use crate::error::CollaboratorError;
use crate::request::Panel;
use crate::types::ActorId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Recipients of an in-app notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    /// Staff on the admin panel
    Admins,
    /// The booking's parents
    Parents,
}

/// In-app notification delivery.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Fire-and-forget notification.
    async fn notify(
        &self,
        actor: Option<ActorId>,
        title: &str,
        body: &str,
        audience: Audience,
    ) -> Result<(), CollaboratorError>;
}

/// A rendered-ready email template.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailTemplate {
    /// Sender and transport configuration
    pub config: serde_json::Value,
    /// Subject line with `{placeholders}`
    pub subject: String,
    /// HTML body with `{placeholders}`
    pub html: String,
}

impl EmailTemplate {
    /// Replace `{key}` placeholders in subject and body.
    #[must_use]
    pub fn render(&self, values: &[(&str, String)]) -> (String, String) {
        let mut subject = self.subject.clone();
        let mut html = self.html.clone();
        for (key, value) in values {
            let placeholder = format!("{{{key}}}");
            subject = subject.replace(&placeholder, value);
            html = html.replace(&placeholder, value);
        }
        (subject, html)
    }
}

/// Email template lookup.
#[async_trait]
pub trait EmailTemplates: Send + Sync {
    /// Template for `key` on `panel`, if configured.
    async fn get_template(
        &self,
        panel: Panel,
        key: &str,
    ) -> Result<Option<EmailTemplate>, CollaboratorError>;
}

/// Outgoing email.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingEmail {
    /// Recipient
    pub to: String,
    /// Subject
    pub subject: String,
    /// HTML body
    pub html: String,
    /// Template transport configuration
    pub config: serde_json::Value,
}

/// Email delivery.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send one email.
    async fn send(&self, email: OutgoingEmail) -> Result<(), CollaboratorError>;
}

/// One audit-log entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Acting staff member; `None` for public or system actions
    pub actor: Option<ActorId>,
    /// Panel
    pub panel: Panel,
    /// Module (e.g. `booking`, `freeze`)
    pub module: String,
    /// Action (e.g. `create`, `cancel`)
    pub action: String,
    /// Structured payload
    pub payload: serde_json::Value,
    /// Whether the operation succeeded
    pub success: bool,
}

/// Audit log.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Record an activity.
    async fn log_activity(&self, entry: ActivityEntry) -> Result<(), CollaboratorError>;
}
