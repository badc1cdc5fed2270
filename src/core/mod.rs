pub mod config;
pub mod error;
pub mod executor;
pub mod poll;
pub mod session;
pub mod types;

pub use error::{AutomationError, Result};
pub use executor::Pipeline;
pub use session::AutomationSession;
