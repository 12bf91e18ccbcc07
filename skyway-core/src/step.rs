use serde::{Deserialize, Serialize};
use std::fmt;

use crate::iata::{ContactInfo, PaymentMethod, Traveler};
use crate::session::SessionStatus;

/// Booking pipeline steps, in the only order they may complete.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Step {
    Search,
    Price,
    Itinerary,
    Payment,
    Ticket,
}

impl Step {
    pub const ORDER: [Step; 5] = [
        Step::Search,
        Step::Price,
        Step::Itinerary,
        Step::Payment,
        Step::Ticket,
    ];

    /// The step allowed after `current` (`None` = nothing completed yet).
    pub fn after(current: Option<Step>) -> Option<Step> {
        match current {
            None => Some(Step::Search),
            Some(Step::Search) => Some(Step::Price),
            Some(Step::Price) => Some(Step::Itinerary),
            Some(Step::Itinerary) => Some(Step::Payment),
            Some(Step::Payment) => Some(Step::Ticket),
            Some(Step::Ticket) => None,
        }
    }

    /// Status a session enters once this step has completed.
    pub fn completed_status(self) -> SessionStatus {
        match self {
            Step::Search => SessionStatus::Searching,
            Step::Price => SessionStatus::Priced,
            Step::Itinerary => SessionStatus::ItineraryCreated,
            Step::Payment => SessionStatus::PaymentPending,
            Step::Ticket => SessionStatus::Ticketed,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Search => "SEARCH",
            Step::Price => "PRICE",
            Step::Itinerary => "ITINERARY",
            Step::Payment => "PAYMENT",
            Step::Ticket => "TICKET",
        };
        f.write_str(name)
    }
}

/// Caller-supplied input for one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepInput {
    Search,
    Price {
        /// Indexes into the session's search results.
        trips: Vec<usize>,
    },
    Itinerary {
        travelers: Vec<Traveler>,
        contact: ContactInfo,
    },
    Payment {
        method: PaymentMethod,
    },
    Ticket,
}

impl StepInput {
    pub fn step(&self) -> Step {
        match self {
            StepInput::Search => Step::Search,
            StepInput::Price { .. } => Step::Price,
            StepInput::Itinerary { .. } => Step::Itinerary,
            StepInput::Payment { .. } => Step::Payment,
            StepInput::Ticket => Step::Ticket,
        }
    }
}

/// Request to move a session forward by one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceRequest {
    pub step: Step,
    /// Version the caller last observed; a mismatch fails with `StaleSession`.
    pub expected_version: Option<u64>,
    pub input: StepInput,
}

impl AdvanceRequest {
    pub fn new(input: StepInput) -> Self {
        Self { step: input.step(), expected_version: None, input }
    }

    pub fn at_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_order_is_linear() {
        let mut current = None;
        for expected in Step::ORDER {
            let next = Step::after(current).unwrap();
            assert_eq!(next, expected);
            current = Some(next);
        }
        assert_eq!(Step::after(Some(Step::Ticket)), None);
    }

    #[test]
    fn test_step_input_wire_format() {
        let input: StepInput = serde_json::from_str(r#"{"type": "price", "trips": [0, 2]}"#).unwrap();
        assert_eq!(input, StepInput::Price { trips: vec![0, 2] });
        assert_eq!(input.step(), Step::Price);

        let ticket: StepInput = serde_json::from_str(r#"{"type": "ticket"}"#).unwrap();
        assert_eq!(ticket.step(), Step::Ticket);
    }
}
