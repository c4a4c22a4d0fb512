pub mod advisory;
pub mod config;
pub mod logger;
pub mod openmrs;
pub mod tracker;

pub use config::*;
pub use logger::*;
pub use tracker::{CallOutcome, RequestId, RequestTracker, Subscription};
