mod config;
mod constants;
pub mod duration;
mod error;
mod ramp;
mod stats;
mod threshold;

pub use config::*;
pub use constants::*;
pub use error::*;
pub use ramp::*;
pub use stats::*;
pub use threshold::*;
