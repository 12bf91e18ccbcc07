pub mod store;
pub mod policy;
pub mod gateway;
pub mod coordinator;

pub use store::{SessionStore, CallLease, FailureDisposition};
pub use policy::{RecoveryPolicy, RetryConfig, Recovery};
pub use gateway::{DemoGateway, HttpGateway, HttpGatewayConfig, ScriptedGateway};
pub use coordinator::{AdvanceFailure, BookingCoordinator, CoordinatorConfig, LookupKind};
