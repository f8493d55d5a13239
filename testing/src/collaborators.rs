//! Recording collaborators.

use crate::lock;
use async_trait::async_trait;
use classbook_core::collaborators::{
    ActivityEntry, Audience, AuditLog, EmailTemplate, EmailTemplates, Mailer, Notifier,
    OutgoingEmail,
};
use classbook_core::error::CollaboratorError;
use classbook_core::request::Panel;
use classbook_core::types::ActorId;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// A notification as received.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentNotification {
    /// Acting staff member
    pub actor: Option<ActorId>,
    /// Title
    pub title: String,
    /// Body
    pub body: String,
    /// Audience
    pub audience: Audience,
}

/// Notifier that records every call; can be switched to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    /// Working notifier
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail.
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Notifications received.
    pub fn sent(&self) -> Vec<SentNotification> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        actor: Option<ActorId>,
        title: &str,
        body: &str,
        audience: Audience,
    ) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError {
                collaborator: "notifier",
                message: "push service down".to_string(),
            });
        }
        lock(&self.sent).push(SentNotification {
            actor,
            title: title.to_string(),
            body: body.to_string(),
            audience,
        });
        Ok(())
    }
}

/// Template lookup backed by a map.
#[derive(Debug, Default)]
pub struct InMemoryTemplates {
    templates: Mutex<HashMap<(Panel, String), EmailTemplate>>,
}

impl InMemoryTemplates {
    /// No templates configured
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template.
    #[must_use]
    pub fn with(self, panel: Panel, key: &str, subject: &str, html: &str) -> Self {
        lock(&self.templates).insert(
            (panel, key.to_string()),
            EmailTemplate {
                config: serde_json::json!({"from": "bookings@example.com"}),
                subject: subject.to_string(),
                html: html.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl EmailTemplates for InMemoryTemplates {
    async fn get_template(
        &self,
        panel: Panel,
        key: &str,
    ) -> Result<Option<EmailTemplate>, CollaboratorError> {
        Ok(lock(&self.templates).get(&(panel, key.to_string())).cloned())
    }
}

/// Mailer that records every email; can be switched to fail.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    /// Working mailer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every send fail.
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Emails sent.
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError {
                collaborator: "mailer",
                message: "smtp relay refused connection".to_string(),
            });
        }
        lock(&self.sent).push(email);
        Ok(())
    }
}

/// Audit log that records every entry.
#[derive(Debug, Default)]
pub struct RecordingAuditLog {
    entries: Mutex<Vec<ActivityEntry>>,
}

impl RecordingAuditLog {
    /// Empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries recorded.
    pub fn entries(&self) -> Vec<ActivityEntry> {
        lock(&self.entries).clone()
    }
}

#[async_trait]
impl AuditLog for RecordingAuditLog {
    async fn log_activity(&self, entry: ActivityEntry) -> Result<(), CollaboratorError> {
        lock(&self.entries).push(entry);
        Ok(())
    }
}
