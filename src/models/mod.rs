//! Data models for the CrewComms share editor.
//!
//! These models match the browser-side interfaces exactly for seamless
//! interoperability.

mod person;
mod session;
mod show;

pub use person::*;
pub use session::*;
pub use show::*;
