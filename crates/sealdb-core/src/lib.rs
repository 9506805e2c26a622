pub mod config;
pub mod error;
pub mod types;

pub use config::SealConfig;
pub use error::{SealError, SealResult};
pub use types::{GateState, TransformDirection, TransformOutcome};
