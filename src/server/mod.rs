//! Socket ownership: the event loop, its connection table, listening
//! sockets and the shutdown flag.

pub mod connection;
pub mod listener;
pub mod reactor;
pub mod shutdown;

pub use reactor::Reactor;
pub use shutdown::{Shutdown, listen_for_signals};
