pub mod auth;
pub mod resiliency;

pub use auth::{customer_auth_middleware, CustomerClaims};
pub use resiliency::circuit_breaker_middleware;
