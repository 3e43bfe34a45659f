mod config;
mod constants;
mod report;
mod stats;

pub use config::*;
pub use constants::*;
pub use report::{format_latency, group_thousands};
pub use stats::*;
