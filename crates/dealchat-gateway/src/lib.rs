//! Realtime relay: authenticated websocket sessions fanned out through
//! per-user and per-discussion groups.

pub mod connection;
pub mod dispatcher;
pub mod relay;

pub use connection::{RelayState, router};
pub use dispatcher::{Dispatcher, Group};
pub use relay::{Relay, Session};
