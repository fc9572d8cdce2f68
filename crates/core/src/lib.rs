// Conveyor Core - Queue orchestration, domain model & broker ports
// NO infrastructure dependencies: brokers plug in behind `port::Broker`

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod port;

pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
