mod config;
mod distributor;
mod error;

pub use config::FanoutConfig;
pub use distributor::{ClientId, Distributor};
pub use error::FanoutError;
