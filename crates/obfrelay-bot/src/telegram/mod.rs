//! Telegram Bot API integration.
//!
//! Provides a reqwest-based client covering the handful of Bot API methods
//! the relay needs, and implements [`obfrelay_core::MessagingGateway`] on it.

mod client;
pub mod types;


pub use client::{TelegramClient, TelegramError, DEFAULT_API_BASE};
pub use types::{Chat, Document, File, Message, Update, User};
