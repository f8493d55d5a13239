//! Parent portal account synchronization.
//!
//! The first parent of the first student keys a portal account. Syncing it is an
//! explicit step: [`AccountSync::prepare`] runs before any write and fails with a
//! conflict when the email already belongs to a staff account; the prepared account
//! is then upserted inside the booking's unit of work.

use classbook_core::error::BookingError;
use classbook_core::model::{AccountKind, Parent, PortalAccount, Student};
use classbook_core::store::{BookingStore, UnitOfWork};
use classbook_core::types::AccountId;

/// First parent of the lowest-positioned student.
#[must_use]
pub fn primary_parent(students: &[Student]) -> Option<&Parent> {
    students
        .iter()
        .min_by_key(|student| student.position)
        .and_then(|student| student.parents.first())
}

/// Named synchronization step for the portal account.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountSync;

impl AccountSync {
    /// Account the booking's participants imply, if any.
    #[must_use]
    pub fn candidate(students: &[Student]) -> Option<PortalAccount> {
        primary_parent(students).map(|parent| PortalAccount {
            id: AccountId::new(),
            email: parent.email.trim().to_ascii_lowercase(),
            first_name: parent.first_name.clone(),
            last_name: parent.last_name.clone(),
            phone: parent.phone.clone(),
            kind: AccountKind::Parent,
        })
    }

    /// Pre-check the email and resolve the account to write.
    ///
    /// An existing parent account keeps its ID and takes the new contact details.
    ///
    /// # Errors
    ///
    /// [`BookingError::Conflict`] when the email belongs to a staff account.
    pub async fn prepare<S: BookingStore>(
        store: &S,
        candidate: PortalAccount,
    ) -> Result<PortalAccount, BookingError> {
        match store.portal_account_by_email(&candidate.email).await? {
            Some(existing) if existing.kind == AccountKind::Staff => Err(BookingError::Conflict(
                format!("{} is already used by a staff account", candidate.email),
            )),
            Some(existing) => Ok(PortalAccount {
                id: existing.id,
                ..candidate
            }),
            None => Ok(candidate),
        }
    }

    /// Write the prepared account inside `tx`.
    ///
    /// # Errors
    ///
    /// [`BookingError::Conflict`] when a staff account took the email after
    /// [`prepare`](Self::prepare); the staff account is left untouched. Other storage failures.
    pub async fn apply<T: UnitOfWork>(tx: &mut T, account: &PortalAccount) -> Result<(), BookingError> {
        tx.upsert_portal_account(account).await?;
        tracing::debug!(account_id = %account.id, "Portal account synced");
        Ok(())
    }
}
