use super::log_view::{level_icon, LogEntry, LogView, UiSink};
use super::schedule_window::ScheduleEditor;
use super::themes::{self, Palette};
use super::tray::{self, TrayHandle};
use crate::config::{Preferences, Theme};
use crate::models::Period;
use crate::runner::{Launcher, RunState, Trigger};
use crate::scheduler::Scheduler;
use crate::workflow::{LogLevel, LogSink};
use eframe::egui;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Graceful exit shared by the window and the tray menu.
#[derive(Clone)]
pub struct Shutdown {
    launcher: Arc<Launcher>,
    scheduler: Arc<Scheduler>,
    quitting: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new(launcher: Arc<Launcher>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            launcher,
            scheduler,
            quitting: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_quitting(&self) -> bool {
        self.quitting.load(Ordering::SeqCst)
    }

    /// Stop the scheduler and ask the active run (if any) to wind down.
    pub fn begin(&self) {
        if self.quitting.swap(true, Ordering::SeqCst) {
            return;
        }
        self.scheduler.stop();
        self.launcher.request_stop();
    }

    pub fn quit(&self, ctx: &egui::Context) {
        self.begin();
        // A hidden viewport may never process the close, so surface it first.
        tray::show_panel(ctx);
        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
    }
}

/// Everything the panel drives, built before the window opens.
pub struct PanelServices {
    pub launcher: Arc<Launcher>,
    pub scheduler: Arc<Scheduler>,
    pub sink: Arc<UiSink>,
    pub log_rx: mpsc::UnboundedReceiver<LogEntry>,
    pub preferences: Preferences,
    pub download_dir: PathBuf,
    pub icon: egui::IconData,
}

pub struct ControlPanel {
    launcher: Arc<Launcher>,
    scheduler: Arc<Scheduler>,
    sink: Arc<UiSink>,
    log_rx: mpsc::UnboundedReceiver<LogEntry>,
    logs: LogView,
    editor: ScheduleEditor,
    preferences: Preferences,
    palette: Palette,
    download_dir: PathBuf,
    shutdown: Shutdown,
    tray: Option<TrayHandle>,
}

impl ControlPanel {
    pub fn new(cc: &eframe::CreationContext<'_>, services: PanelServices) -> Self {
        let PanelServices {
            launcher,
            scheduler,
            sink,
            log_rx,
            preferences,
            download_dir,
            icon,
        } = services;

        sink.attach(cc.egui_ctx.clone());
        themes::apply_theme(&cc.egui_ctx, preferences.theme);

        let shutdown = Shutdown::new(launcher.clone(), scheduler.clone());
        let tray = match tray::install(&cc.egui_ctx, &icon, shutdown.clone()) {
            Ok(tray) => Some(tray),
            Err(e) => {
                sink.warn(format!("Tray icon unavailable, closing the window will quit: {:#}", e));
                None
            }
        };

        let mut panel = Self {
            launcher,
            scheduler,
            sink,
            log_rx,
            logs: LogView::default(),
            editor: ScheduleEditor::default(),
            palette: Palette::for_theme(preferences.theme),
            preferences,
            download_dir,
            shutdown,
            tray,
        };

        panel.sink.info(format!("Report 455 control panel v{} ready", env!("CARGO_PKG_VERSION")));
        if panel.preferences.start_scheduler_on_launch {
            panel.start_scheduler();
        }
        if panel.preferences.start_hidden && panel.tray.is_some() {
            tray::hide_panel(&cc.egui_ctx);
            panel.sink.info("Running in the tray".to_string());
        }
        panel
    }

    fn drain_logs(&mut self) {
        while let Ok(entry) = self.log_rx.try_recv() {
            self.logs.push(entry);
        }
    }

    fn start_run(&self) {
        // Rejections are logged by the launcher.
        let _ = self.launcher.try_start(Trigger::Manual);
    }

    fn stop_run(&self) {
        if !self.launcher.request_stop() {
            self.sink.info("No run in progress.".to_string());
        }
    }

    fn start_scheduler(&self) {
        if let Err(e) = self.scheduler.start() {
            self.sink.error(format!("Could not start the scheduler: {}", e));
        }
    }

    fn toggle_scheduler(&self) {
        if let Err(e) = self.scheduler.toggle() {
            self.sink.error(format!("Could not start the scheduler: {}", e));
        }
    }

    fn save_preferences(&self) {
        if let Err(e) = self.preferences.save() {
            self.sink.error(format!("Failed to save preferences: {:#}", e));
        }
    }

    fn set_theme(&mut self, ctx: &egui::Context, theme: Theme) {
        self.preferences.theme = theme;
        self.palette = Palette::for_theme(theme);
        themes::apply_theme(ctx, theme);
        self.save_preferences();
    }

    fn handle_keyboard_shortcuts(&mut self, ctx: &egui::Context) {
        let (start, stop, clear) = ctx.input(|i| {
            (
                i.modifiers.ctrl && i.key_pressed(egui::Key::E),
                i.key_pressed(egui::Key::Escape),
                i.modifiers.ctrl && i.key_pressed(egui::Key::L),
            )
        });

        if start && !self.launcher.is_running() {
            self.start_run();
        }
        if stop && self.launcher.state() == RunState::Running {
            self.stop_run();
        }
        if clear {
            self.logs.clear();
        }
    }

    /// Closing the window hides it to the tray; without a tray it quits.
    fn handle_close_request(&mut self, ctx: &egui::Context) {
        if !ctx.input(|i| i.viewport().close_requested()) || self.shutdown.is_quitting() {
            return;
        }

        if self.tray.is_some() {
            ctx.send_viewport_cmd(egui::ViewportCommand::CancelClose);
            tray::hide_panel(ctx);
            self.sink
                .info("Panel hidden to the tray. Use the tray menu to show it again or quit.".to_string());
        } else {
            self.shutdown.begin();
        }
    }

    fn render_toolbar(&mut self, ui: &mut egui::Ui) {
        let state = self.launcher.state();

        ui.horizontal(|ui| {
            ui.add_space(12.0);

            let (color, label) = themes::status_badge(state);
            ui.colored_label(color, "●");
            ui.label(label);
            ui.add_space(8.0);

            let start = ui
                .add_enabled(
                    state == RunState::Idle,
                    egui::Button::new("🚀 Start now (Ctrl+E)").min_size(egui::vec2(150.0, 30.0)),
                )
                .on_hover_text("Download the report for this month and the two before it");
            if start.clicked() {
                self.start_run();
            }

            let stop = ui.add_enabled(
                state == RunState::Running,
                egui::Button::new("⏹ Stop (Esc)").min_size(egui::vec2(110.0, 30.0)),
            );
            if stop.clicked() {
                self.stop_run();
            }

            ui.separator();

            let scheduler_on = self.scheduler.is_running();
            let label = if scheduler_on { "⏰ Scheduler: on" } else { "⏰ Scheduler: off" };
            if ui.selectable_label(scheduler_on, label).clicked() {
                self.toggle_scheduler();
            }

            if ui.button("🗓 Edit schedule").clicked() {
                self.editor.show_window(&self.scheduler);
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.add_space(10.0);
                let next = match self.preferences.theme {
                    Theme::Dark => Theme::Light,
                    Theme::Light => Theme::Dark,
                };
                let icon = match next {
                    Theme::Light => "☀",
                    Theme::Dark => "🌙",
                };
                if ui.button(icon).on_hover_text("Switch theme").clicked() {
                    self.set_theme(ui.ctx(), next);
                }
            });
        });
    }

    fn render_sidebar(&mut self, ui: &mut egui::Ui) {
        ui.heading("📋 Next run");
        ui.separator();
        let today = chrono::Local::now().date_naive();
        for period in Period::recent(today) {
            ui.horizontal(|ui| {
                ui.monospace(period.file_base_name());
                ui.weak(period.to_string());
            });
        }

        ui.add_space(12.0);
        ui.heading("⏰ Schedule");
        ui.separator();
        let armed = self.scheduler.armed_times();
        if armed.is_empty() {
            ui.weak("Scheduler is off");
        } else {
            let times: Vec<String> = armed.iter().map(|t| t.to_string()).collect();
            ui.label(format!("Daily at {}", times.join(", ")));
        }
        ui.small(self.scheduler.store().path().display().to_string());

        ui.add_space(12.0);
        ui.heading("📁 Downloads");
        ui.separator();
        ui.label(self.download_dir.display().to_string());

        ui.add_space(12.0);
        ui.heading("⚙ Preferences");
        ui.separator();
        let mut changed = false;
        changed |= ui
            .checkbox(&mut self.preferences.start_scheduler_on_launch, "Start scheduler on launch")
            .changed();
        changed |= ui
            .checkbox(&mut self.preferences.start_hidden, "Start hidden in the tray")
            .changed();
        if changed {
            self.save_preferences();
        }

        ui.add_space(12.0);
        ui.group(|ui| {
            ui.label("⌨️ Keyboard Shortcuts");
            ui.separator();
            for (keys, action) in [("Ctrl+E", "Start now"), ("Esc", "Stop the run"), ("Ctrl+L", "Clear the log")] {
                ui.horizontal(|ui| {
                    ui.label(format!("{}:", keys));
                    ui.weak(action);
                });
            }
        });
    }

    fn render_log_panel(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.heading("📝 Log");
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if ui.button("🗑 Clear").clicked() {
                    self.logs.clear();
                }

                if ui.button("💾 Save").clicked() {
                    match self.logs.save_to_dir(Path::new(".")) {
                        Ok(path) => self.sink.success(format!("Logs saved to {}", path.display())),
                        Err(e) => self.sink.error(format!("Failed to save logs: {}", e)),
                    }
                }

                if ui.add_enabled(!self.logs.is_empty(), egui::Button::new("📋 Copy All")).clicked() {
                    let text = self.logs.text().to_string();
                    ui.output_mut(|o| o.copied_text = text);
                }

                if ui.selectable_label(self.logs.auto_scroll, "📍 Auto-scroll").clicked() {
                    self.logs.auto_scroll = !self.logs.auto_scroll;
                }

                if ui.selectable_label(self.logs.show_timestamps, "⏰ Timestamps").clicked() {
                    let show = !self.logs.show_timestamps;
                    self.logs.set_show_timestamps(show);
                }
            });
        });

        ui.horizontal(|ui| {
            ui.label("Filter:");
            let mut filter = self.logs.filter;
            egui::ComboBox::from_label("")
                .selected_text(format!("{} {}", level_icon(filter), filter.name()))
                .show_ui(ui, |ui| {
                    for level in [
                        LogLevel::Debug,
                        LogLevel::Info,
                        LogLevel::Success,
                        LogLevel::Warning,
                        LogLevel::Error,
                    ] {
                        let text = format!("{} {}", level_icon(level), level.name());
                        ui.selectable_value(&mut filter, level, text);
                    }
                });
            if filter != self.logs.filter {
                self.logs.set_filter(filter);
            }

            ui.separator();
            ui.label(format!("{} entries", self.logs.len()));
        });

        ui.separator();

        egui::ScrollArea::vertical()
            .stick_to_bottom(self.logs.auto_scroll)
            .auto_shrink([false, false])
            .show(ui, |ui| {
                for entry in self.logs.visible() {
                    let line = egui::RichText::new(self.logs.format_line(entry))
                        .monospace()
                        .color(themes::level_color(entry.level));
                    ui.label(line);
                }
            });
    }

    fn render_status_bar(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let (color, label) = themes::status_badge(self.launcher.state());
            ui.colored_label(color, label);
            if self.launcher.is_running() {
                ui.add(egui::Spinner::new());
            }

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                ui.add_space(10.0);
                ui.label(format!("v{}", env!("CARGO_PKG_VERSION")));
            });
        });
    }
}

impl eframe::App for ControlPanel {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_logs();
        self.handle_keyboard_shortcuts(ctx);
        self.handle_close_request(ctx);

        // Badge and spinner follow the run even when no line arrives.
        if self.launcher.is_running() {
            ctx.request_repaint_after(Duration::from_millis(500));
        }

        let palette = self.palette;

        egui::TopBottomPanel::top("toolbar")
            .frame(egui::Frame {
                fill: palette.toolbar,
                stroke: egui::Stroke::new(1.0, palette.border),
                ..Default::default()
            })
            .show(ctx, |ui| {
                ui.add_space(8.0);
                self.render_toolbar(ui);
                ui.add_space(8.0);
            });

        egui::TopBottomPanel::bottom("status_bar")
            .frame(egui::Frame {
                fill: palette.toolbar,
                stroke: egui::Stroke::new(1.0, palette.border),
                inner_margin: egui::Margin::symmetric(12.0, 4.0),
                ..Default::default()
            })
            .show(ctx, |ui| {
                self.render_status_bar(ui);
            });

        egui::SidePanel::left("sidebar")
            .default_width(280.0)
            .resizable(true)
            .frame(egui::Frame {
                fill: palette.toolbar,
                stroke: egui::Stroke::new(1.0, palette.border),
                inner_margin: egui::Margin::same(12.0),
                ..Default::default()
            })
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    self.render_sidebar(ui);
                });
            });

        egui::CentralPanel::default()
            .frame(egui::Frame {
                fill: palette.content,
                inner_margin: egui::Margin::same(8.0),
                ..Default::default()
            })
            .show(ctx, |ui| {
                self.render_log_panel(ui);
            });

        self.editor.render(ctx, &self.scheduler, self.sink.as_ref());
    }
}
