pub mod capture;
pub mod config;
pub mod error;
pub mod relay;
pub mod retry;

pub mod kafka;

pub use config::Config;
pub use error::{Error, Result};
pub use relay::Relay;
