//! Booking lifecycle reducer.
//!
//! Every status change goes through [`BookingReducer`]. The reducer validates the
//! action against the transition table and its date/kind guards, updates the
//! booking in place, and returns the side effects the runtime must execute inside
//! the same unit of work (capacity mutations, contract pause/resume, record cleanup).
//!
//! Capacity effects follow one rule: release the old seat iff one was held and is no
//! longer held in that session; reserve the new seat iff one is now held and was not
//! held there before. See [`BookingStatus::holds_seat`].

use crate::environment::Clock;
use crate::error::BookingError;
use crate::model::Booking;
use crate::status::{BookingStatus, ServiceKind};
use crate::types::{ClassSessionId, PlanId};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::sync::Arc;

/// The Reducer trait - core abstraction for business logic
///
/// A reducer is a pure function: `(State, Action, Environment) → Result<Effects, Error>`.
/// On error the state must be left untouched.
pub trait Reducer {
    /// The state type this reducer operates on
    type State;

    /// The action type this reducer processes
    type Action;

    /// The environment type with injected dependencies
    type Environment;

    /// Side-effect descriptions returned to the runtime
    type Effect;

    /// Rejection type
    type Error;

    /// Reduce an action into state changes and effects
    ///
    /// # Errors
    ///
    /// Returns an error, without mutating `state`, when the action is not allowed.
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<SmallVec<[Self::Effect; 4]>, Self::Error>;
}

/// Dependencies of the lifecycle reducer.
#[derive(Clone)]
pub struct LifecycleEnvironment {
    /// Clock for date guards and timestamps
    pub clock: Arc<dyn Clock>,
}

impl LifecycleEnvironment {
    /// Creates a new environment
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

/// Status-changing actions on an existing booking.
///
/// Serializes internally tagged (`{"action": "convert_to_membership", "plan_id": ..}`)
/// so an action waiting on a payment can be parked on the attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BookingAction {
    /// Waiting list to active
    Promote,
    /// Voluntary move back to the waiting list
    MoveToWaitingList,
    /// Waiting-list entry whose start date has passed
    Expire,
    /// Freeze window has begun
    StartFreeze {
        /// First frozen day from the freeze record
        freeze_start: NaiveDate,
    },
    /// Freeze window has ended
    EndFreeze {
        /// Reactivation day from the freeze record
        reactivate_on: NaiveDate,
    },
    /// Explicit reactivation of a frozen or cancelled booking
    Reactivate,
    /// Cancel now, or request cancellation for a future date
    Cancel {
        /// Effective date; a future date yields `request_to_cancel`
        effective_on: Option<NaiveDate>,
    },
    /// A requested cancellation has reached its effective date
    ConfirmCancellation,
    /// Remove a waiting-list entry
    RemoveFromWaitingList,
    /// Move a trial to another session or date
    Rebook {
        /// New session (may be the same one)
        class_session_id: ClassSessionId,
        /// New trial date
        date: NaiveDate,
    },
    /// Record trial attendance
    MarkAttendance {
        /// Whether the student attended
        attended: bool,
    },
    /// Turn a trial into a membership
    ConvertToMembership {
        /// Plan of the new membership
        plan_id: PlanId,
    },
}

impl BookingAction {
    /// Stable verb used in errors, logs and audit entries.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Promote => "promote",
            Self::MoveToWaitingList => "move_to_waiting_list",
            Self::Expire => "expire",
            Self::StartFreeze { .. } => "freeze",
            Self::EndFreeze { .. } => "unfreeze",
            Self::Reactivate => "reactivate",
            Self::Cancel { .. } => "cancel",
            Self::ConfirmCancellation => "confirm_cancellation",
            Self::RemoveFromWaitingList => "remove_from_waiting_list",
            Self::Rebook { .. } => "rebook",
            Self::MarkAttendance { .. } => "mark_attendance",
            Self::ConvertToMembership { .. } => "convert_to_membership",
        }
    }
}

/// Effects the runtime executes in the same unit of work as the status write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingEffect {
    /// Decrement capacity; fails the unit of work if seats are not available
    ReserveSeats {
        /// Session
        class_session_id: ClassSessionId,
        /// Seats
        seats: u32,
    },
    /// Increment capacity
    ReleaseSeats {
        /// Session
        class_session_id: ClassSessionId,
        /// Seats
        seats: u32,
    },
    /// Pause the recurring contract open-ended (if the booking pays by contract)
    SuspendContract,
    /// Resume the recurring contract (if the booking pays by contract)
    ResumeContract,
    /// Delete the cancel record
    ClearCancelRecord,
    /// Delete freeze records
    ClearFreezeRecords,
}

/// Reducer for the booking lifecycle.
#[derive(Clone, Copy, Debug, Default)]
pub struct BookingReducer;

impl BookingReducer {
    /// Creates a new reducer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Initial status of a new booking given the session's remaining capacity.
    ///
    /// The waiting list is chosen only when the session is exactly full. Any other
    /// capacity yields `active`, and the subsequent reservation decides whether the
    /// requested seats fit.
    #[must_use]
    pub const fn place(capacity: u32) -> BookingStatus {
        if capacity == 0 {
            BookingStatus::WaitingList
        } else {
            BookingStatus::Active
        }
    }

    /// Capacity effects of moving a booking between (status, session) pairs.
    #[must_use]
    pub fn seat_effects(
        before: (BookingStatus, ClassSessionId),
        after: (BookingStatus, ClassSessionId),
        seats: u32,
    ) -> SmallVec<[BookingEffect; 4]> {
        let (old_status, old_session) = before;
        let (new_status, new_session) = after;
        let moved = old_session != new_session;
        let mut effects = SmallVec::new();

        if old_status.holds_seat() && (!new_status.holds_seat() || moved) {
            effects.push(BookingEffect::ReleaseSeats {
                class_session_id: old_session,
                seats,
            });
        }
        if new_status.holds_seat() && (!old_status.holds_seat() || moved) {
            effects.push(BookingEffect::ReserveSeats {
                class_session_id: new_session,
                seats,
            });
        }
        effects
    }

    fn invalid(state: &Booking, action: &BookingAction) -> BookingError {
        BookingError::InvalidTransition {
            from: state.status,
            action: action.name(),
        }
    }

    fn require_trial(state: &Booking, action: &BookingAction) -> Result<(), BookingError> {
        if state.is_trial() {
            Ok(())
        } else {
            Err(BookingError::validation(
                "service_kind",
                format!("only trials can {}", action.name().replace('_', " ")),
            ))
        }
    }

    /// Resolve the target status for an action, checking every guard.
    fn target(
        state: &Booking,
        action: &BookingAction,
        today: NaiveDate,
    ) -> Result<BookingStatus, BookingError> {
        use BookingStatus::{
            Active, Attended, Cancelled, Expired, Frozen, NotAttended, Rebooked, Removed,
            RequestToCancel, WaitingList,
        };

        let from = state.status;
        let target = match action {
            BookingAction::Promote => match from {
                WaitingList => Active,
                _ => return Err(Self::invalid(state, action)),
            },
            BookingAction::MoveToWaitingList => match from {
                Active | Frozen | Cancelled | RequestToCancel => WaitingList,
                _ => return Err(Self::invalid(state, action)),
            },
            BookingAction::Expire => {
                if from != WaitingList {
                    return Err(Self::invalid(state, action));
                }
                if state.start_date >= today {
                    return Err(BookingError::validation(
                        "start_date",
                        "waiting-list entries expire only after their start date",
                    ));
                }
                Expired
            },
            BookingAction::StartFreeze { freeze_start } => {
                if from != Active {
                    return Err(Self::invalid(state, action));
                }
                if *freeze_start > today {
                    return Err(BookingError::validation("freeze_start", "freeze has not started yet"));
                }
                Frozen
            },
            BookingAction::EndFreeze { reactivate_on } => {
                if from != Frozen {
                    return Err(Self::invalid(state, action));
                }
                if *reactivate_on > today {
                    return Err(BookingError::validation("reactivate_on", "freeze has not ended yet"));
                }
                Active
            },
            BookingAction::Reactivate => match from {
                Frozen | Cancelled | RequestToCancel => Active,
                _ => return Err(Self::invalid(state, action)),
            },
            BookingAction::Cancel { effective_on } => match effective_on {
                Some(date) if *date > today => RequestToCancel,
                _ => Cancelled,
            },
            BookingAction::ConfirmCancellation => match from {
                RequestToCancel => Cancelled,
                _ => return Err(Self::invalid(state, action)),
            },
            BookingAction::RemoveFromWaitingList => Removed,
            BookingAction::Rebook { .. } => {
                Self::require_trial(state, action)?;
                match from {
                    Active | Rebooked | NotAttended => Rebooked,
                    _ => return Err(Self::invalid(state, action)),
                }
            },
            BookingAction::MarkAttendance { attended } => {
                Self::require_trial(state, action)?;
                if !matches!(from, Active | Rebooked) {
                    return Err(Self::invalid(state, action));
                }
                if *attended { Attended } else { NotAttended }
            },
            BookingAction::ConvertToMembership { .. } => {
                Self::require_trial(state, action)?;
                match from {
                    // Conversion keeps an active trial active
                    Active => return Ok(Active),
                    Attended | Rebooked => Active,
                    _ => return Err(Self::invalid(state, action)),
                }
            },
        };

        if from.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Self::invalid(state, action))
        }
    }

    fn contract_effects(
        from: BookingStatus,
        to: BookingStatus,
        action: &BookingAction,
    ) -> SmallVec<[BookingEffect; 4]> {
        use BookingStatus::{Active, Cancelled, Frozen, RequestToCancel, WaitingList};

        let mut effects = SmallVec::new();
        let contract_running = matches!(from, Active | Frozen | RequestToCancel);
        if contract_running && matches!(to, Cancelled | WaitingList) {
            effects.push(BookingEffect::SuspendContract);
        }
        if matches!(action, BookingAction::Reactivate) && matches!(from, Frozen | Cancelled) {
            effects.push(BookingEffect::ResumeContract);
        }
        if to == Active && matches!(from, Cancelled | RequestToCancel) {
            effects.push(BookingEffect::ClearCancelRecord);
        }
        let leaves_membership = matches!(from, Active | Frozen)
            && matches!(to, Cancelled | RequestToCancel | WaitingList);
        if leaves_membership || (from == Frozen && to == Active) {
            effects.push(BookingEffect::ClearFreezeRecords);
        }
        effects
    }
}

impl Reducer for BookingReducer {
    type State = Booking;
    type Action = BookingAction;
    type Environment = LifecycleEnvironment;
    type Effect = BookingEffect;
    type Error = BookingError;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> Result<SmallVec<[Self::Effect; 4]>, Self::Error> {
        let today = env.clock.today();
        let target = Self::target(state, &action, today)?;

        let before = (state.status, state.class_session_id);
        let from = state.status;

        match &action {
            BookingAction::Rebook {
                class_session_id,
                date,
            } => {
                state.class_session_id = *class_session_id;
                state.start_date = *date;
                if let Some(trial) = state.trial.as_mut() {
                    trial.trial_date = *date;
                    trial.rebook_count += 1;
                }
            },
            BookingAction::ConvertToMembership { plan_id } => {
                state.service_kind = ServiceKind::Membership;
                state.payment_plan_id = Some(*plan_id);
                state.trial = None;
            },
            _ => {},
        }

        state.status = target;
        state.updated_at = env.clock.now();

        let mut effects: SmallVec<[BookingEffect; 4]> = smallvec![];
        effects.extend(Self::seat_effects(
            before,
            (state.status, state.class_session_id),
            state.seats,
        ));
        effects.extend(Self::contract_effects(from, target, &action));
        Ok(effects)
    }
}
