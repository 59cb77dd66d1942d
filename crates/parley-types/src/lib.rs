//! Shared types for the parley workspace: API request/response DTOs,
//! entity views, and the gateway event/command wire format.

pub mod api;
pub mod events;
pub mod models;
