pub mod matcher;
pub mod models;
pub mod session_clock;
