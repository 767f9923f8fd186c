//! Error types and result alias for turbine operations

mod builders;
mod display;
mod types;

pub use types::{Error, Result};
