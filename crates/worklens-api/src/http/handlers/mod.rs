//! Request handlers for the API.

pub mod chats;
pub mod query;
pub mod turn;
pub mod ws;
