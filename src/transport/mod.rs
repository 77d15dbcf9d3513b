//! Socket transport for server-pushed notification events.
//!
//! - `codec`: Engine.IO / Socket.IO text framing
//! - `backoff`: bounded exponential backoff between reconnection attempts
//! - `channel`: the long-lived connection with named event handlers

mod backoff;
mod channel;
pub mod codec;

pub use backoff::{BackoffConfig, ExponentialBackoff};
pub use channel::{
    ChannelState, ChannelStatus, EventHandler, TransportChannel, IDENTIFY_EVENT,
};
