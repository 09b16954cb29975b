//! Task activity tracking: counts `task:*` events, keeps a short history,
//! answers `task:stats` requests and asks for notifications when tasks
//! complete.

pub mod module;
pub use module::{TaskEventsModule, STATS_SERVICE};

#[doc(hidden)]
pub mod api;
#[doc(hidden)]
pub mod config;
#[doc(hidden)]
pub mod domain;
