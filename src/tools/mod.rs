pub mod course_analytics;
pub mod export;
pub mod forum;
pub mod recordings;
pub mod roster;
