//! REST surface of the server: auth, user directory, conversations,
//! messages, and reactions. Every mutation that other members should see
//! immediately also fans a gateway event out to them.

pub mod auth;
pub mod conversations;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod users;

mod views;
