mod app;
mod log_view;
mod schedule_window;
mod themes;
mod tray;

pub use app::{ControlPanel, PanelServices};
pub use log_view::UiSink;
