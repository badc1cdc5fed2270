pub mod core;
pub mod features;
pub mod scraping;
pub mod tools;

// --- Primary core exports ---
pub use self::core::types;
pub use self::core::types::*;
pub use self::core::{AutomationError, AutomationSession, Pipeline, Result};

// --- Short module paths ---
pub use features::{authenticator, session_store, totp};
pub use scraping::{locator, port};
pub use tools::{course_analytics, forum, recordings, roster};
