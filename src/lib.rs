//! Automail — templated email campaigns with reply tracking and reminders.

pub mod campaign;
pub mod config;
pub mod directory;
pub mod error;
pub mod message;
pub mod template;
pub mod transport;
