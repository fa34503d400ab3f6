//! Background job domain entities.

pub mod details;
pub mod model;
pub mod state;

pub use details::JobDetails;
pub use model::Job;
pub use state::{JobState, StateRecord};
