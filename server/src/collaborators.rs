//! Collaborators backed by the log pipeline.
//!
//! Notifications, outgoing mail and audit entries are emitted as structured
//! `tracing` events under dedicated targets (`classbook::notify`, `classbook::mail`,
//! `classbook::audit`) for the log shipper to route.

use async_trait::async_trait;
use classbook_core::collaborators::{
    ActivityEntry, Audience, AuditLog, EmailTemplate, EmailTemplates, Mailer, Notifier,
    OutgoingEmail,
};
use classbook_core::error::CollaboratorError;
use classbook_core::request::Panel;
use classbook_core::types::ActorId;
use std::collections::HashMap;
use std::path::Path;

/// Notifier that emits one event per notification.
#[derive(Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(
        &self,
        actor: Option<ActorId>,
        title: &str,
        body: &str,
        audience: Audience,
    ) -> Result<(), CollaboratorError> {
        tracing::info!(
            target: "classbook::notify",
            actor = ?actor,
            audience = ?audience,
            title = title,
            body = body,
            "Notification"
        );
        Ok(())
    }
}

/// Mailer that hands rendered emails to the log pipeline.
#[derive(Debug, Default)]
pub struct TracingMailer;

#[async_trait]
impl Mailer for TracingMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), CollaboratorError> {
        if email.to.trim().is_empty() {
            return Err(CollaboratorError {
                collaborator: "mailer",
                message: "empty recipient".to_string(),
            });
        }
        tracing::info!(
            target: "classbook::mail",
            to = %email.to,
            subject = %email.subject,
            config = %email.config,
            html = %email.html,
            "Outgoing email"
        );
        Ok(())
    }
}

/// Audit log written as structured events.
#[derive(Debug, Default)]
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn log_activity(&self, entry: ActivityEntry) -> Result<(), CollaboratorError> {
        tracing::info!(
            target: "classbook::audit",
            actor = ?entry.actor,
            panel = entry.panel.as_str(),
            module = %entry.module,
            action = %entry.action,
            success = entry.success,
            payload = %entry.payload,
            "Activity"
        );
        Ok(())
    }
}

/// Email templates loaded once from a JSON document shaped
/// `{"website": {"booking_confirmation": {"subject": .., "html": .., "config": ..}}, "admin": {..}}`.
#[derive(Debug, Default)]
pub struct FileTemplates {
    templates: HashMap<String, HashMap<String, EmailTemplate>>,
}

impl FileTemplates {
    /// No templates; every email is skipped.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a template document.
    ///
    /// # Errors
    ///
    /// Returns the JSON error when the document does not match the expected shape.
    pub fn from_json(document: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            templates: serde_json::from_str(document)?,
        })
    }

    /// Read and parse the template file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let document = std::fs::read_to_string(path)?;
        let templates = Self::from_json(&document)?;
        tracing::info!(
            path = %path.display(),
            templates = templates.len(),
            "Email templates loaded"
        );
        Ok(templates)
    }

    /// Number of templates across panels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.templates.values().map(HashMap::len).sum()
    }

    /// Whether no template is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EmailTemplates for FileTemplates {
    async fn get_template(
        &self,
        panel: Panel,
        key: &str,
    ) -> Result<Option<EmailTemplate>, CollaboratorError> {
        Ok(self
            .templates
            .get(panel.as_str())
            .and_then(|by_key| by_key.get(key))
            .cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "website": {
            "booking_confirmation": {
                "subject": "Booking {reference} confirmed",
                "html": "<p>See you at {class_name}</p>",
                "config": {"from": "bookings@example.com"}
            }
        },
        "admin": {}
    }"#;

    #[tokio::test]
    async fn templates_are_looked_up_by_panel_and_key() {
        let templates = FileTemplates::from_json(DOCUMENT).unwrap();

        assert_eq!(templates.len(), 1);
        let found = templates
            .get_template(Panel::Website, "booking_confirmation")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.subject, "Booking {reference} confirmed");
        assert!(
            templates
                .get_template(Panel::Admin, "booking_confirmation")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn malformed_documents_are_rejected() {
        assert!(FileTemplates::from_json(r#"{"website": {"x": {"subject": 1}}}"#).is_err());
    }

    #[tokio::test]
    async fn mailer_refuses_blank_recipients() {
        let email = OutgoingEmail {
            to: " ".to_string(),
            subject: "Hi".to_string(),
            html: String::new(),
            config: serde_json::json!({}),
        };

        let error = TracingMailer.send(email).await.unwrap_err();

        assert_eq!(error.collaborator, "mailer");
    }
}
