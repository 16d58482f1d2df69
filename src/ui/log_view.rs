use crate::workflow::{trace_line, LogLevel, LogSink};
use chrono::{DateTime, Local};
use eframe::egui;
use std::collections::VecDeque;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;

pub const MAX_LOG_LINES: usize = 1000;

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
    pub level: LogLevel,
}

impl LogEntry {
    pub fn now(level: LogLevel, message: String) -> Self {
        Self {
            timestamp: Local::now(),
            message,
            level,
        }
    }
}

pub fn level_icon(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "ℹ️",
        LogLevel::Warning => "⚠️",
        LogLevel::Error => "❌",
        LogLevel::Success => "✅",
        LogLevel::Debug => "🔧",
    }
}

/// Sink feeding the log pane from any thread.
///
/// Every line is also written to `tracing`, so a hidden panel still leaves a
/// trail in the process log.
pub struct UiSink {
    tx: mpsc::UnboundedSender<LogEntry>,
    repaint: OnceLock<egui::Context>,
}

impl UiSink {
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<LogEntry>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(Self {
            tx,
            repaint: OnceLock::new(),
        });
        (sink, rx)
    }

    /// Wake the panel whenever a line arrives.
    pub fn attach(&self, ctx: egui::Context) {
        let _ = self.repaint.set(ctx);
    }
}

impl LogSink for UiSink {
    fn log(&self, level: LogLevel, message: String) {
        trace_line(level, &message);
        // The panel may already be gone during shutdown.
        let _ = self.tx.send(LogEntry::now(level, message));
        if let Some(ctx) = self.repaint.get() {
            ctx.request_repaint();
        }
    }
}

/// Scrollback of the last [`MAX_LOG_LINES`] lines plus the pane's view settings.
pub struct LogView {
    entries: VecDeque<LogEntry>,
    text: String,
    pub filter: LogLevel,
    pub show_timestamps: bool,
    pub auto_scroll: bool,
}

impl Default for LogView {
    fn default() -> Self {
        Self {
            entries: VecDeque::new(),
            text: String::new(),
            filter: LogLevel::Info,
            show_timestamps: true,
            auto_scroll: true,
        }
    }
}

impl LogView {
    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > MAX_LOG_LINES {
            self.entries.pop_front();
        }
        self.rebuild();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.rebuild();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The filtered, formatted text shown in the pane.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_filter(&mut self, filter: LogLevel) {
        self.filter = filter;
        self.rebuild();
    }

    pub fn set_show_timestamps(&mut self, show: bool) {
        self.show_timestamps = show;
        self.rebuild();
    }

    fn shows(&self, level: LogLevel) -> bool {
        match self.filter {
            LogLevel::Debug => true,
            LogLevel::Info => level != LogLevel::Debug,
            LogLevel::Success => matches!(level, LogLevel::Success | LogLevel::Warning | LogLevel::Error),
            LogLevel::Warning => matches!(level, LogLevel::Warning | LogLevel::Error),
            LogLevel::Error => level == LogLevel::Error,
        }
    }

    /// Entries passing the level filter, oldest first.
    pub fn visible(&self) -> impl Iterator<Item = &LogEntry> + '_ {
        self.entries.iter().filter(|entry| self.shows(entry.level))
    }

    pub fn format_line(&self, entry: &LogEntry) -> String {
        let stamp = if self.show_timestamps {
            format!("[{}] ", entry.timestamp.format("%H:%M:%S"))
        } else {
            String::new()
        };
        format!("{}{} {}", stamp, level_icon(entry.level), entry.message)
    }

    fn rebuild(&mut self) {
        let lines: Vec<String> = self.visible().map(|entry| self.format_line(entry)).collect();
        self.text = lines.join("\n");
    }

    /// Write the full scrollback (unfiltered) to `report455_logs_<timestamp>.txt`.
    pub fn save_to_dir(&self, dir: &std::path::Path) -> std::io::Result<std::path::PathBuf> {
        let filename = format!("report455_logs_{}.txt", Local::now().format("%Y%m%d_%H%M%S"));
        let path = dir.join(filename);
        let content: Vec<String> = self
            .entries
            .iter()
            .map(|entry| {
                format!(
                    "[{}] {:<7} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.level.name(),
                    entry.message
                )
            })
            .collect();
        std::fs::write(&path, content.join("\n"))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(level: LogLevel, message: &str) -> LogEntry {
        LogEntry::now(level, message.to_string())
    }

    #[test]
    fn test_scrollback_is_capped() {
        let mut view = LogView::default();
        for i in 0..MAX_LOG_LINES + 25 {
            view.push(entry(LogLevel::Info, &format!("line {}", i)));
        }
        assert_eq!(view.len(), MAX_LOG_LINES);
        assert!(!view.text().contains("line 24\n"));
        assert!(view.text().contains("line 25"));
        assert!(view.text().ends_with(&format!("line {}", MAX_LOG_LINES + 24)));
    }

    #[test]
    fn test_filter_hides_lower_levels() {
        let mut view = LogView::default();
        view.set_show_timestamps(false);
        view.push(entry(LogLevel::Debug, "driver detail"));
        view.push(entry(LogLevel::Info, "starting"));
        view.push(entry(LogLevel::Error, "login failed"));

        assert!(!view.text().contains("driver detail"));
        assert!(view.text().contains("starting"));

        view.set_filter(LogLevel::Error);
        assert_eq!(view.text(), "❌ login failed");

        view.set_filter(LogLevel::Debug);
        assert_eq!(view.text().lines().count(), 3);
    }

    #[test]
    fn test_visible_lines_carry_their_level_colour() {
        let mut view = LogView::default();
        view.set_show_timestamps(false);
        view.set_filter(LogLevel::Warning);
        view.push(entry(LogLevel::Info, "starting"));
        view.push(entry(LogLevel::Warning, "no matching row"));
        view.push(entry(LogLevel::Error, "login failed"));

        let rendered: Vec<_> = view
            .visible()
            .map(|e| (view.format_line(e), crate::ui::themes::level_color(e.level)))
            .collect();
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].0, "⚠️ no matching row");
        assert_eq!(rendered[1].0, "❌ login failed");
        assert_ne!(rendered[0].1, rendered[1].1);
    }

    #[test]
    fn test_clear_and_save() {
        let dir = tempfile::tempdir().unwrap();
        let mut view = LogView::default();
        view.set_filter(LogLevel::Error);
        view.push(entry(LogLevel::Info, "kept in the file"));

        let saved = view.save_to_dir(dir.path()).unwrap();
        let content = std::fs::read_to_string(saved).unwrap();
        assert!(content.contains("Info"));
        assert!(content.contains("kept in the file"));

        view.clear();
        assert!(view.is_empty());
        assert!(view.text().is_empty());
    }

    #[tokio::test]
    async fn test_ui_sink_delivers_lines_in_order() {
        let (sink, mut rx) = UiSink::channel();
        sink.info("first".to_string());
        sink.warn("second".to_string());

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.level, first.message.as_str()), (LogLevel::Info, "first"));
        assert_eq!((second.level, second.message.as_str()), (LogLevel::Warning, "second"));
    }
}
