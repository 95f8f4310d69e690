//! TUI module for SellPoint chat
//!
//! Terminal user interface using Ratatui.

mod app;
mod backend;
mod compose;
mod messages;
mod sidebar;
mod ui;

pub use app::run;
