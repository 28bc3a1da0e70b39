//! State module for classifying attempts and units
//!
//! # Components
//!
//! - `FailureReason`: the closed failure taxonomy written on every failed attempt
//! - `UnitStatus`: the reduced status of a unit (done, retry-eligible, unattempted)

mod failure_reason;
mod unit_status;

pub use failure_reason::FailureReason;
pub use unit_status::UnitStatus;
