//! Step transition rules.
//!
//! Everything here is a pure function of a session snapshot and the request:
//! no I/O, no mutation. The coordinator runs these checks before any remote
//! call is issued, and the store repeats the ordering check under its lock.

use std::collections::HashSet;

use crate::session::{BookingSession, SessionStatus};
use crate::step::{Step, StepInput};

/// Why a requested step may not run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DenyReason {
    #[error("{requested} cannot follow {}", describe(.current))]
    OutOfOrder { current: Option<Step>, requested: Step },
    #[error("session is {0}")]
    SessionClosed(SessionStatus),
    #[error("{input} input sent to the {step} step")]
    InputMismatch { step: Step, input: Step },
    #[error("no session token (TUI) present")]
    NoTui,
    #[error("no search results present")]
    NoSearchResults,
    #[error("no trip selected")]
    EmptySelection,
    #[error("trip index {0} is not in the search results")]
    SelectionOutOfRange(usize),
    #[error("trip index {0} selected twice")]
    DuplicateSelection(usize),
    #[error("no trip selection present")]
    NoTripSelection,
    #[error("expected {expected} travelers, got {actual}")]
    PassengerCountMismatch { expected: u32, actual: usize },
    #[error("no itinerary present")]
    NoItinerary,
    #[error("no transaction id for payment step")]
    NoTransactionId,
    #[error("payment can only be retried after a failed payment")]
    NothingToRetry,
}

fn describe(step: &Option<Step>) -> String {
    match step {
        Some(step) => step.to_string(),
        None => "a new session".to_string(),
    }
}

/// Step a caller may request next, if any.
pub fn next_step(session: &BookingSession) -> Option<Step> {
    if session.status.is_terminal() {
        return None;
    }
    Step::after(session.step)
}

/// Ordering only: is `requested` the immediate successor of the current step?
pub fn check_order(session: &BookingSession, requested: Step) -> Result<(), DenyReason> {
    if session.status.is_terminal() {
        return Err(DenyReason::SessionClosed(session.status));
    }
    if Step::after(session.step) != Some(requested) {
        return Err(DenyReason::OutOfOrder { current: session.step, requested });
    }
    Ok(())
}

/// Full check: ordering plus the preconditions of the requested step.
pub fn validate(session: &BookingSession, step: Step, input: &StepInput) -> Result<(), DenyReason> {
    if input.step() != step {
        return Err(DenyReason::InputMismatch { step, input: input.step() });
    }
    check_order(session, step)?;

    match input {
        StepInput::Search => Ok(()),
        StepInput::Price { trips } => {
            if session.tui.is_none() {
                return Err(DenyReason::NoTui);
            }
            if session.results.is_empty() {
                return Err(DenyReason::NoSearchResults);
            }
            if trips.is_empty() {
                return Err(DenyReason::EmptySelection);
            }
            let mut seen = HashSet::new();
            for &index in trips {
                if index >= session.results.len() {
                    return Err(DenyReason::SelectionOutOfRange(index));
                }
                if !seen.insert(index) {
                    return Err(DenyReason::DuplicateSelection(index));
                }
            }
            Ok(())
        }
        StepInput::Itinerary { travelers, .. } => {
            if session.selection.is_none() {
                return Err(DenyReason::NoTripSelection);
            }
            let expected = session.params.pax.total();
            if travelers.len() != expected as usize {
                return Err(DenyReason::PassengerCountMismatch { expected, actual: travelers.len() });
            }
            Ok(())
        }
        StepInput::Payment { .. } => {
            if session.selection.is_none() {
                return Err(DenyReason::NoTripSelection);
            }
            if session.itinerary.is_none() {
                return Err(DenyReason::NoItinerary);
            }
            Ok(())
        }
        StepInput::Ticket => {
            if session.itinerary.is_none() {
                return Err(DenyReason::NoItinerary);
            }
            if session.transaction_id.is_none() {
                return Err(DenyReason::NoTransactionId);
            }
            Ok(())
        }
    }
}

/// SSR, seat and fare-rule lookups need a priced selection on a live session.
pub fn lookup_allowed(session: &BookingSession) -> Result<(), DenyReason> {
    if matches!(session.status, SessionStatus::Failed | SessionStatus::Cancelled) {
        return Err(DenyReason::SessionClosed(session.status));
    }
    if session.selection.is_none() || session.tui.is_none() {
        return Err(DenyReason::NoTripSelection);
    }
    Ok(())
}

/// Booking retrieval needs a remote itinerary.
pub fn validate_retrieve(session: &BookingSession) -> Result<(), DenyReason> {
    if session.itinerary.is_none() {
        return Err(DenyReason::NoItinerary);
    }
    Ok(())
}

/// Only a session whose payment step failed may be reopened for a new attempt.
pub fn validate_payment_retry(session: &BookingSession) -> Result<(), DenyReason> {
    if session.status != SessionStatus::Failed || session.failed_step != Some(Step::Payment) {
        return Err(DenyReason::NothingToRetry);
    }
    if session.itinerary.is_none() {
        return Err(DenyReason::NoItinerary);
    }
    Ok(())
}
