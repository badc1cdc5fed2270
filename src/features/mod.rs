pub mod authenticator;
pub mod downloads_registry;
pub mod session_store;
pub mod totp;
