use crate::scheduler::{ScheduleError, ScheduleTime, Scheduler};
use crate::workflow::LogSink;
use eframe::egui;
use egui_extras::{Column, TableBuilder};

/// Word the operator must type before the whole schedule is wiped.
pub const CLEAR_CONFIRMATION: &str = "CONFIRM";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorAction {
    Add(String),
    Remove(ScheduleTime),
    ClearAll,
}

/// Add/remove/clear window over the schedule file.
#[derive(Default)]
pub struct ScheduleEditor {
    pub open: bool,
    new_time: String,
    confirm: String,
    times: Vec<ScheduleTime>,
    error: Option<String>,
}

impl ScheduleEditor {
    pub fn show_window(&mut self, scheduler: &Scheduler) {
        self.refresh(scheduler);
        self.open = true;
    }

    #[cfg(test)]
    fn times(&self) -> &[ScheduleTime] {
        &self.times
    }

    fn refresh(&mut self, scheduler: &Scheduler) {
        match scheduler.store().load() {
            Ok(times) => {
                self.times = times;
                self.error = None;
            }
            Err(e) => self.error = Some(e.to_string()),
        }
    }

    /// Persist one edit and re-arm the scheduler. Returns whether the file changed.
    pub fn apply(&mut self, action: EditorAction, scheduler: &Scheduler, sink: &dyn LogSink) -> bool {
        let store = scheduler.store();
        let result: Result<String, ScheduleError> = match &action {
            EditorAction::Add(raw) => store.add(raw).map(|_| format!("Scheduled a daily run at {}", raw.trim())),
            EditorAction::Remove(time) => store.remove(*time).map(|_| format!("Removed the {} run", time)),
            EditorAction::ClearAll => {
                if self.confirm.trim() != CLEAR_CONFIRMATION {
                    self.error = Some(format!("Type {} to clear every scheduled time", CLEAR_CONFIRMATION));
                    return false;
                }
                store.clear().map(|_| "Cleared every scheduled time".to_string())
            }
        };

        let message = match result {
            Ok(message) => message,
            Err(e) => {
                sink.warn(format!("Schedule not changed: {}", e));
                self.error = Some(e.to_string());
                return false;
            }
        };

        sink.success(message);
        match scheduler.reload() {
            Ok(times) => {
                self.times = times;
                self.error = None;
            }
            Err(e) => {
                sink.error(format!("Could not reload the schedule: {}", e));
                self.error = Some(e.to_string());
            }
        }
        match action {
            EditorAction::Add(_) => self.new_time.clear(),
            EditorAction::ClearAll => self.confirm.clear(),
            EditorAction::Remove(_) => {}
        }
        true
    }

    pub fn render(&mut self, ctx: &egui::Context, scheduler: &Scheduler, sink: &dyn LogSink) {
        if !self.open {
            return;
        }

        let mut open = self.open;
        let mut action = None;

        egui::Window::new("🗓 Schedule")
            .open(&mut open)
            .resizable(false)
            .default_width(320.0)
            .show(ctx, |ui| {
                ui.label("Daily start times (24-hour HH:MM)");
                ui.separator();

                ui.horizontal(|ui| {
                    let input = ui.add(
                        egui::TextEdit::singleline(&mut self.new_time)
                            .desired_width(80.0)
                            .hint_text("09:30"),
                    );
                    let submitted = input.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                    if ui.button("➕ Add").clicked() || submitted {
                        action = Some(EditorAction::Add(self.new_time.clone()));
                    }
                });

                ui.add_space(6.0);

                if self.times.is_empty() {
                    ui.weak("No times scheduled.");
                } else {
                    TableBuilder::new(ui)
                        .striped(true)
                        .column(Column::initial(100.0).at_least(80.0))
                        .column(Column::remainder())
                        .header(20.0, |mut header| {
                            header.col(|ui| {
                                ui.strong("Time");
                            });
                            header.col(|ui| {
                                ui.strong("");
                            });
                        })
                        .body(|mut body| {
                            for time in &self.times {
                                body.row(22.0, |mut row| {
                                    row.col(|ui| {
                                        ui.monospace(time.to_string());
                                    });
                                    row.col(|ui| {
                                        if ui.small_button("🗑 Remove").clicked() {
                                            action = Some(EditorAction::Remove(*time));
                                        }
                                    });
                                });
                            }
                        });
                }

                ui.add_space(6.0);
                ui.separator();

                ui.horizontal(|ui| {
                    ui.add(
                        egui::TextEdit::singleline(&mut self.confirm)
                            .desired_width(100.0)
                            .hint_text(CLEAR_CONFIRMATION),
                    );
                    let armed = self.confirm.trim() == CLEAR_CONFIRMATION && !self.times.is_empty();
                    if ui
                        .add_enabled(armed, egui::Button::new("🧹 Clear all"))
                        .on_hover_text(format!("Type {} to enable", CLEAR_CONFIRMATION))
                        .clicked()
                    {
                        action = Some(EditorAction::ClearAll);
                    }
                });

                if let Some(error) = &self.error {
                    ui.colored_label(egui::Color32::from_rgb(244, 67, 54), error);
                }
            });

        self.open = open;
        if let Some(action) = action {
            self.apply(action, scheduler, sink);
        }
    }

    #[cfg(test)]
    fn type_confirmation(&mut self, text: &str) {
        self.confirm = text.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{slow_timings, workflow};
    use crate::runner::Launcher;
    use crate::scheduler::ScheduleStore;
    use crate::workflow::log::testing::MemorySink;
    use crate::workflow::session::testing::{FakeFactory, FakePortal};
    use std::sync::Arc;

    fn scheduler(dir: &std::path::Path) -> (Scheduler, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let factory = FakeFactory::new(FakePortal::with_tables(vec![vec![]]));
        let launcher = Arc::new(Launcher::new(workflow(dir, slow_timings()), factory, sink.clone()));
        let store = ScheduleStore::new(dir.join("schedules.json"));
        (Scheduler::new(store, launcher, sink.clone()), sink)
    }

    #[tokio::test]
    async fn test_add_persists_and_arms_the_scheduler() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, sink) = scheduler(dir.path());
        let mut editor = ScheduleEditor::default();

        assert!(editor.apply(EditorAction::Add("14:30".into()), &scheduler, sink.as_ref()));
        assert!(editor.apply(EditorAction::Add(" 09:00".into()), &scheduler, sink.as_ref()));

        let shown: Vec<String> = editor.times().iter().map(|t| t.to_string()).collect();
        assert_eq!(shown, vec!["09:00", "14:30"]);
        assert_eq!(scheduler.store().load().unwrap().len(), 2);
        assert!(scheduler.is_running());
    }

    #[tokio::test]
    async fn test_invalid_and_duplicate_times_leave_the_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, sink) = scheduler(dir.path());
        let mut editor = ScheduleEditor::default();

        assert!(editor.apply(EditorAction::Add("09:00".into()), &scheduler, sink.as_ref()));
        assert!(!editor.apply(EditorAction::Add("9am".into()), &scheduler, sink.as_ref()));
        assert!(!editor.apply(EditorAction::Add("09:00".into()), &scheduler, sink.as_ref()));

        assert_eq!(scheduler.store().load().unwrap().len(), 1);
        assert!(sink.contains("already scheduled"));
    }

    #[tokio::test]
    async fn test_clear_requires_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, sink) = scheduler(dir.path());
        let mut editor = ScheduleEditor::default();
        editor.apply(EditorAction::Add("06:15".into()), &scheduler, sink.as_ref());

        editor.type_confirmation("confirm");
        assert!(!editor.apply(EditorAction::ClearAll, &scheduler, sink.as_ref()));
        assert_eq!(scheduler.store().load().unwrap().len(), 1);

        editor.type_confirmation(CLEAR_CONFIRMATION);
        assert!(editor.apply(EditorAction::ClearAll, &scheduler, sink.as_ref()));
        assert!(scheduler.store().load().unwrap().is_empty());
        assert!(editor.times().is_empty());
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn test_remove_last_time_stops_the_scheduler() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, sink) = scheduler(dir.path());
        let mut editor = ScheduleEditor::default();
        editor.apply(EditorAction::Add("22:00".into()), &scheduler, sink.as_ref());
        assert!(scheduler.is_running());

        let time: ScheduleTime = "22:00".parse().unwrap();
        assert!(editor.apply(EditorAction::Remove(time), &scheduler, sink.as_ref()));
        assert!(!scheduler.is_running());
    }
}
