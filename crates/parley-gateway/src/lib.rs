//! Real-time half of the server: WebSocket connections, presence, typing
//! state, and event fan-out to conversation members.

pub mod connection;
pub mod dispatcher;
pub mod typing;
