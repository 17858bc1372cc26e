// Authentication module
// Manages bearer token lifecycle against an external issuer

mod claims;
mod manager;
mod refresh;
mod types;

pub use claims::expiry_from_token;
pub use manager::TokenManager;
pub use types::{
    TokenClientOptions, TokenConfig, DEFAULT_EXPIRATION_WINDOW, DEFAULT_REFRESH_INTERVAL,
};
