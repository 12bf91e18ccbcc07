use serde::{Deserialize, Serialize};
use chrono::{DateTime, NaiveDate, Utc};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripType {
    OneWay,
    RoundTrip,
    MultiCity,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cabin {
    #[default]
    Economy,
    PremiumEconomy,
    Business,
    First,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaxCounts {
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    #[serde(default)]
    pub infants: u32,
}

/// Seats a single booking may hold.
pub const MAX_PASSENGERS: u32 = 9;

impl PaxCounts {
    pub fn total(&self) -> u32 {
        self.adults
            .saturating_add(self.children)
            .saturating_add(self.infants)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchLeg {
    pub origin_airport_code: String,
    pub destination_airport_code: String,
    pub date: NaiveDate, // Just date, ignore time for search match
}

/// What the traveller asked for. Fixed for the lifetime of a session; a new
/// search means a new session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchParameters {
    pub trip_type: TripType,
    pub legs: Vec<SearchLeg>,
    pub pax: PaxCounts,
    #[serde(default)]
    pub cabin: Cabin,
}

impl SearchParameters {
    pub fn validate(&self) -> Result<(), String> {
        if self.pax.adults == 0 {
            return Err("at least one adult passenger is required".to_string());
        }
        if self.pax.total() > MAX_PASSENGERS {
            return Err(format!("at most {} passengers per booking", MAX_PASSENGERS));
        }
        // Infants travel on an adult's lap.
        if self.pax.infants > self.pax.adults {
            return Err("each infant needs an accompanying adult".to_string());
        }

        let legs_ok = match self.trip_type {
            TripType::OneWay => self.legs.len() == 1,
            TripType::RoundTrip => self.legs.len() == 2,
            TripType::MultiCity => self.legs.len() >= 2,
        };
        if !legs_ok {
            return Err(format!(
                "{:?} trip cannot have {} leg(s)",
                self.trip_type,
                self.legs.len()
            ));
        }

        for leg in &self.legs {
            for code in [&leg.origin_airport_code, &leg.destination_airport_code] {
                if !is_airport_code(code) {
                    return Err(format!("invalid airport code: {}", code));
                }
            }
            if leg.origin_airport_code.eq_ignore_ascii_case(&leg.destination_airport_code) {
                return Err(format!(
                    "origin and destination are both {}",
                    leg.origin_airport_code
                ));
            }
        }

        Ok(())
    }
}

fn is_airport_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())
}

/// Amount in minor units (cents) plus ISO currency code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Money {
    pub amount: i64,
    pub currency: String,
}

impl Money {
    pub fn new(amount: i64, currency: &str) -> Self {
        Self { amount, currency: currency.to_string() }
    }
}

/// One bookable fare from a search response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlightOffer {
    pub index: usize,
    pub fare_id: String,
    pub carrier: String,
    pub flight_number: String,
    pub origin: String,
    pub destination: String,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub fare: Money,
    pub seats_left: Option<u32>,
}
