pub mod http;
pub mod demo;
pub mod scripted;

pub use http::{HttpGateway, HttpGatewayConfig};
pub use demo::DemoGateway;
pub use scripted::ScriptedGateway;
