//! Database models split into domain-specific modules.
//!
//! This module re-exports all types so callers can use `crate::db::*`.

pub mod activity;
pub mod fine;
pub mod leave;
pub mod pass;
pub mod phone;
pub mod student;
pub mod tally;
pub mod user;

pub use activity::*;
pub use fine::*;
pub use leave::*;
pub use pass::*;
pub use phone::*;
pub use student::*;
pub use tally::*;
pub use user::*;
