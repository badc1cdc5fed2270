pub mod browser_manager;
pub mod cdp;
pub mod frames;
pub mod locator;
pub mod port;
pub mod wait;
