//! obfrelay bot
//!
//! Wires the core relay to Telegram:
//! - Bot API client implementing the messaging gateway
//! - Long-polling and webhook update sources
//! - Update dispatcher
//! - Liveness and webhook HTTP endpoints

pub mod app;
pub mod dispatch;
pub mod polling;
pub mod routes;
pub mod telegram;

pub use app::{AppContext, UpdateSource};
