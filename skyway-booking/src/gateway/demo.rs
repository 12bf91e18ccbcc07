use async_trait::async_trait;
use chrono::{Duration, NaiveTime, TimeZone, Utc};
use skyway_core::gateway::*;
use skyway_core::search::{FlightOffer, Money};
use skyway_shared::Masked;
use uuid::Uuid;

const CURRENCY: &str = "USD";
const CARRIERS: [(&str, u32, i64); 3] = [("SK", 101, 189_00), ("WY", 455, 214_50), ("SK", 207, 242_00)];

/// Deterministic local stand-in for the booking API, for development setups
/// without upstream access.
///
/// Keeps no state between calls: fare ids carry their own price so that
/// pricing and itinerary responses can be computed from the request alone.
#[derive(Debug, Clone, Default)]
pub struct DemoGateway;

impl DemoGateway {
    pub fn new() -> Self {
        Self
    }

    pub fn respond(&self, request: &GatewayRequest) -> GatewayResponse {
        match request {
            GatewayRequest::Search(r) => GatewayResponse::Search(search(r)),
            GatewayRequest::Pricing(r) => GatewayResponse::Pricing(PricingResponse {
                tui: r.tui.clone(),
                fare_ids: r.fare_ids.clone(),
                total_fare: total(&r.fare_ids),
            }),
            GatewayRequest::Itinerary(r) => GatewayResponse::Itinerary(ItineraryResponse {
                itinerary_id: format!("IT-{}", short_code(&r.tui, 10)),
                total_fare: total(&r.fare_ids),
            }),
            GatewayRequest::Payment(r) => GatewayResponse::Payment(PaymentResponse {
                transaction_id: r.transaction_id.clone(),
                status: RemotePaymentStatus::Succeeded,
                reason: None,
            }),
            GatewayRequest::Ticket(r) => GatewayResponse::Ticket(TicketResponse {
                pnr: short_code(&r.itinerary_id, 6),
                ticket_numbers: vec![format!("176-{}", digits(&r.transaction_id, 10))],
            }),
            GatewayRequest::Cancel(_) => GatewayResponse::Cancel(CancelResponse {
                cancelled: true,
                refund: None,
            }),
            GatewayRequest::Ssr(r) => GatewayResponse::Ssr(SsrResponse {
                services: flights(&r.fare_ids)
                    .flat_map(|flight| {
                        [
                            SsrOffer {
                                code: "VGML".to_string(),
                                description: "Vegetarian meal".to_string(),
                                flight_number: flight.clone(),
                                price: Money::new(12_00, CURRENCY),
                            },
                            SsrOffer {
                                code: "XBAG".to_string(),
                                description: "Extra checked bag 23kg".to_string(),
                                flight_number: flight,
                                price: Money::new(45_00, CURRENCY),
                            },
                        ]
                    })
                    .collect(),
            }),
            GatewayRequest::SeatLayout(r) => GatewayResponse::SeatLayout(SeatLayoutResponse {
                seats: flights(&r.fare_ids)
                    .flat_map(|flight| {
                        (1..=3).flat_map(move |row| {
                            let flight = flight.clone();
                            ['A', 'C', 'D', 'F'].into_iter().map(move |col| SeatOption {
                                flight_number: flight.clone(),
                                seat_number: format!("{}{}", row, col),
                                available: !(row == 2 && col == 'C'),
                                price: Money::new(if col == 'A' || col == 'F' { 15_00 } else { 0 }, CURRENCY),
                            })
                        })
                    })
                    .collect(),
            }),
            GatewayRequest::FareRule(_) => GatewayResponse::FareRule(FareRuleResponse {
                rules: vec![
                    FareRule {
                        category: "CANCELLATION".to_string(),
                        text: "Cancellation permitted up to 24 hours before departure for a fee.".to_string(),
                    },
                    FareRule {
                        category: "DATE_CHANGE".to_string(),
                        text: "Changes permitted; fare difference applies.".to_string(),
                    },
                ],
            }),
            GatewayRequest::Retrieve(r) => GatewayResponse::Retrieve(RetrieveResponse {
                itinerary_id: r.itinerary_id.clone(),
                pnr: r.pnr.clone(),
                status: if r.pnr.is_some() { "TICKETED" } else { "HELD" }.to_string(),
                total_fare: Money::new(0, CURRENCY),
            }),
        }
    }
}

#[async_trait]
impl RemoteGateway for DemoGateway {
    async fn authenticate(&self) -> Result<Credential, GatewayError> {
        Ok(Credential {
            token: Masked::new(format!("demo_{}", Uuid::new_v4().simple())),
            expires_at: Utc::now() + Duration::hours(2),
        })
    }

    async fn call(
        &self,
        _key: &IdempotencyKey,
        _credential: &Credential,
        request: &GatewayRequest,
    ) -> Result<GatewayResponse, GatewayError> {
        Ok(self.respond(request))
    }
}

fn search(request: &SearchRequest) -> SearchResponse {
    let pax = request.params.pax.total().max(1) as i64;
    let mut offers = Vec::new();

    for (leg_no, leg) in request.params.legs.iter().enumerate() {
        for (slot, (carrier, number, base)) in CARRIERS.iter().enumerate() {
            let flight_number = format!("{}{}", carrier, number + leg_no as u32);
            let departs = NaiveTime::from_hms_opt(6 + 4 * slot as u32, 30, 0).unwrap_or_default();
            let departure_time = Utc.from_utc_datetime(&leg.date.and_time(departs));
            offers.push(FlightOffer {
                index: offers.len(),
                // FARE-<flight>-<amount for the whole party>
                fare_id: format!("FARE-{}-{}", flight_number, base * pax),
                carrier: carrier.to_string(),
                flight_number,
                origin: leg.origin_airport_code.to_uppercase(),
                destination: leg.destination_airport_code.to_uppercase(),
                departure_time,
                arrival_time: departure_time + Duration::minutes(135 + 20 * slot as i64),
                fare: Money::new(base * pax, CURRENCY),
                seats_left: Some(9 - 2 * slot as u32),
            });
        }
    }

    SearchResponse {
        tui: format!("DEMO-{}", Uuid::new_v4().simple()),
        offers,
    }
}

fn total(fare_ids: &[String]) -> Money {
    let amount = fare_ids
        .iter()
        .filter_map(|id| id.rsplit('-').next()?.parse::<i64>().ok())
        .sum();
    Money::new(amount, CURRENCY)
}

fn flights(fare_ids: &[String]) -> impl Iterator<Item = String> + '_ {
    fare_ids.iter().filter_map(|id| id.split('-').nth(1).map(str::to_string))
}

fn short_code(seed: &str, len: usize) -> String {
    let code: String = seed
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .rev()
        .take(len)
        .collect::<String>()
        .to_uppercase();
    format!("{:X<width$}", code, width = len)
}

fn digits(seed: &str, len: usize) -> String {
    let code: String = seed.chars().filter(|c| c.is_ascii_digit()).take(len).collect();
    format!("{:0<width$}", code, width = len)
}
