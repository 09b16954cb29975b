//! Prioritized in-process event bus.
//!
//! Listeners of one event fire in (priority desc, registration order asc)
//! order. Listener failures and panics are caught at invocation and never
//! reach the emitter; in wait-for-all mode they are visible in the returned
//! [`EmitReport`].

mod bus;
mod listener;
mod stats;

pub use bus::{
    response_event, EmitOptions, EmitReport, EventBus, EventError, DEFAULT_RESPONSE_TIMEOUT,
    RESPONSE_SUFFIX,
};
pub use listener::{
    EventMiddleware, FnMiddleware, ListenerId, ListenerInfo, ListenerOptions, ListenerOutcome,
};
pub use stats::EventStats;
