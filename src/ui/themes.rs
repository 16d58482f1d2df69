use crate::config::Theme;
use crate::runner::RunState;
use crate::workflow::LogLevel;
use eframe::egui::{self, Color32};

/// Colors the panel paints itself with, per theme.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    pub toolbar: Color32,
    pub content: Color32,
    pub border: Color32,
    pub accent: Color32,
}

impl Palette {
    pub fn for_theme(theme: Theme) -> Self {
        match theme {
            Theme::Dark => Self {
                toolbar: Color32::from_rgb(32, 33, 36),
                content: Color32::from_rgb(24, 25, 26),
                border: Color32::from_rgb(60, 61, 64),
                accent: Color32::from_rgb(26, 115, 232),
            },
            Theme::Light => Self {
                toolbar: Color32::from_rgb(248, 249, 250),
                content: Color32::WHITE,
                border: Color32::from_rgb(218, 220, 224),
                accent: Color32::from_rgb(26, 115, 232),
            },
        }
    }
}

pub fn apply_theme(ctx: &egui::Context, theme: Theme) {
    let palette = Palette::for_theme(theme);
    let mut visuals = match theme {
        Theme::Dark => {
            let mut v = egui::Visuals::dark();
            v.widgets.inactive.bg_fill = Color32::from_rgb(48, 49, 52);
            v.widgets.hovered.bg_fill = Color32::from_rgb(64, 65, 68);
            v.extreme_bg_color = Color32::from_rgb(16, 17, 18);
            v.selection.bg_fill = Color32::from_rgba_unmultiplied(26, 115, 232, 80);
            v
        }
        Theme::Light => {
            let mut v = egui::Visuals::light();
            v.widgets.inactive.bg_fill = Color32::from_rgb(241, 243, 244);
            v.widgets.hovered.bg_fill = Color32::from_rgb(232, 234, 237);
            v.extreme_bg_color = Color32::from_rgb(248, 249, 250);
            v.selection.bg_fill = Color32::from_rgba_unmultiplied(26, 115, 232, 40);
            v
        }
    };
    visuals.panel_fill = palette.content;
    visuals.window_fill = palette.toolbar;
    visuals.selection.stroke = egui::Stroke::new(1.0, palette.accent);
    ctx.set_visuals(visuals);

    let mut style = (*ctx.style()).clone();
    style.text_styles.insert(egui::TextStyle::Body, egui::FontId::proportional(14.0));
    style.text_styles.insert(egui::TextStyle::Button, egui::FontId::proportional(14.0));
    style.text_styles.insert(egui::TextStyle::Heading, egui::FontId::proportional(18.0));
    style.spacing.item_spacing = egui::vec2(8.0, 6.0);
    style.spacing.button_padding = egui::vec2(8.0, 4.0);
    ctx.set_style(style);
}

pub fn status_badge(state: RunState) -> (Color32, &'static str) {
    match state {
        RunState::Idle => (Color32::from_rgb(76, 175, 80), "Idle"),
        RunState::Running => (Color32::from_rgb(33, 150, 243), "Running"),
        RunState::StopRequested => (Color32::from_rgb(255, 193, 7), "Stopping"),
    }
}

pub fn level_color(level: LogLevel) -> Color32 {
    match level {
        LogLevel::Info => Color32::from_rgb(200, 200, 200),
        LogLevel::Warning => Color32::from_rgb(255, 193, 7),
        LogLevel::Error => Color32::from_rgb(244, 67, 54),
        LogLevel::Success => Color32::from_rgb(76, 175, 80),
        LogLevel::Debug => Color32::from_rgb(150, 150, 255),
    }
}
