//! # Classbook Core
//!
//! Domain types and the booking lifecycle for seat-limited children's activity
//! classes: trials, memberships, the waiting list, freezes and cancellations.
//!
//! This crate contains no I/O. It provides:
//!
//! - **Types**: identifiers, [`Money`](types::Money), booking and payment records
//! - **Status**: the closed [`BookingStatus`](status::BookingStatus) enumeration and
//!   its transition table
//! - **Lifecycle**: the [`BookingReducer`](lifecycle::BookingReducer), a pure function
//!   `(Booking, Action, Environment) → Effects` that validates every status change and
//!   describes the capacity and contract side effects it requires
//! - **Ports**: the [`BookingStore`](store::BookingStore) / [`UnitOfWork`](store::UnitOfWork)
//!   persistence traits and the external collaborator traits
//! - **Errors**: the caller-facing [`BookingError`](error::BookingError) taxonomy
//!
//! ## Architecture Principles
//!
//! - Functional core, imperative shell: the reducer decides, the runtime executes
//! - Explicit effects: capacity mutations are values returned from the reducer
//! - Dependency injection: time comes from a [`Clock`](environment::Clock)
//!
//! ## Example
//!
//! ```
//! use classbook_core::status::BookingStatus;
//!
//! assert!(BookingStatus::Active.can_transition_to(BookingStatus::Frozen));
//! assert!(!BookingStatus::Expired.can_transition_to(BookingStatus::Active));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod collaborators;
pub mod environment;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod payment;
pub mod request;
pub mod status;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, Utc};
pub use error::{BookingError, GatewayError, StoreError};
pub use lifecycle::{BookingAction, BookingEffect, BookingReducer, Reducer};
pub use smallvec::{SmallVec, smallvec};
pub use status::{BookingStatus, ServiceKind};
