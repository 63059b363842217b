//! Terminal UI components
//!
//! Built with ratatui. The monitor is a single live table of tasks.

pub mod tasks;
pub mod theme;

pub use theme::Theme;
