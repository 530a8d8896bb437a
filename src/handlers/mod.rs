mod demo;
mod health;

pub use demo::{demo, echo, not_found};
pub use health::{StatusResponse, health_check, root};
