// Chat Relay - Library root

pub mod auth;
pub mod config;
pub mod delivery;
pub mod error;
pub mod history;
pub mod models;
pub mod session;
