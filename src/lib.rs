pub mod app;
pub mod buffer;
pub mod config;
pub mod error;
pub mod queue;
pub mod session;
pub mod tui;
pub mod worker;
