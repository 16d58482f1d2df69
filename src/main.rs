use anyhow::Result;
use eframe::egui;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

mod chromedriver_manager;
mod config;
mod models;
mod runner;
mod scheduler;
mod ui;
mod workflow;

use chromedriver_manager::ChromeDriverManager;
use config::{AppConfig, Preferences};
use runner::{Launcher, Trigger};
use scheduler::{ScheduleStore, Scheduler};
use ui::{ControlPanel, PanelServices, UiSink};
use workflow::browser::ChromeSessionFactory;
use workflow::{LogSink, PortalSettings, ReportWorkflow, TracingSink, WorkflowTimings};

/// Run one pass without the panel, logging to stderr, then exit.
const ONCE_FLAG: &str = "--once";
const ICON_FILE: &str = "icon.png";
const FALLBACK_ICON_SIZE: u32 = 64;
/// How long an interrupted run gets to close its browser after the window is gone.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env();
    tracing::info!("Downloads go to {}", config.download_dir.display());
    tracing::info!("Schedule file is {}", config.schedule_file.display());

    let preferences = Preferences::load().unwrap_or_else(|e| {
        tracing::warn!("Using default preferences: {:#}", e);
        Preferences::default()
    });

    let manager = Arc::new(ChromeDriverManager::new(config.driver_port, config.driver_path.clone()));

    if std::env::args().skip(1).any(|arg| arg == ONCE_FLAG) {
        let launcher = build_launcher(&config, manager.clone(), Arc::new(TracingSink));
        let result = run_once(&launcher).await;
        if let Err(e) = manager.stop_driver().await {
            tracing::warn!("ChromeDriver cleanup warning: {:#}", e);
        }
        return result;
    }

    let (sink, log_rx) = UiSink::channel();
    let launcher = build_launcher(&config, manager.clone(), sink.clone());
    let scheduler = Arc::new(Scheduler::new(
        ScheduleStore::new(&config.schedule_file),
        launcher.clone(),
        sink.clone(),
    ));

    let icon = load_icon(&icon_path());
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Report 455 Automation")
            .with_inner_size([1000.0, 680.0])
            .with_min_inner_size([760.0, 480.0])
            .with_icon(icon.clone()),
        centered: true,
        ..Default::default()
    };

    let services = PanelServices {
        launcher: launcher.clone(),
        scheduler: scheduler.clone(),
        sink,
        log_rx,
        preferences,
        download_dir: config.download_dir.clone(),
        icon,
    };

    let ui_result = eframe::run_native(
        "Report 455 Automation",
        options,
        Box::new(move |cc| Ok(Box::new(ControlPanel::new(cc, services)))),
    )
    .map_err(|e| anyhow::anyhow!("Failed to run application: {}", e));

    scheduler.stop();
    launcher.request_stop();
    let deadline = Instant::now() + SHUTDOWN_GRACE;
    while launcher.is_running() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    if launcher.is_running() {
        tracing::warn!("Run still active at exit; abandoning it");
    }
    if let Err(e) = manager.stop_driver().await {
        tracing::warn!("ChromeDriver cleanup warning: {:#}", e);
    }

    ui_result
}

fn build_launcher(config: &AppConfig, manager: Arc<ChromeDriverManager>, sink: Arc<dyn LogSink>) -> Arc<Launcher> {
    let factory = Arc::new(ChromeSessionFactory::new(
        manager,
        config.download_dir.clone(),
        config.headless,
    ));
    let workflow = ReportWorkflow::new(
        PortalSettings {
            url: config.portal_url.clone(),
            credentials: config.credentials.clone(),
            download_dir: config.download_dir.clone(),
        },
        WorkflowTimings::default(),
    );
    Arc::new(Launcher::new(workflow, factory, sink))
}

async fn run_once(launcher: &Launcher) -> Result<()> {
    let summary = launcher.try_start(Trigger::Manual)?.await?;
    let total = summary.reports.len();
    if summary.cancelled || summary.downloaded() < total {
        anyhow::bail!("{} of {} reports downloaded", summary.downloaded(), total);
    }
    Ok(())
}

fn icon_path() -> std::path::PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(ICON_FILE)))
        .unwrap_or_else(|| ICON_FILE.into())
}

/// `icon.png` next to the executable, or a plain blue square.
fn load_icon(path: &Path) -> egui::IconData {
    match image::open(path) {
        Ok(img) => {
            let img = img.to_rgba8();
            let (width, height) = img.dimensions();
            egui::IconData {
                rgba: img.into_raw(),
                width,
                height,
            }
        }
        Err(e) => {
            tracing::debug!("No usable icon at {}: {}", path.display(), e);
            fallback_icon()
        }
    }
}

fn fallback_icon() -> egui::IconData {
    let pixels = (FALLBACK_ICON_SIZE * FALLBACK_ICON_SIZE) as usize;
    egui::IconData {
        rgba: [30u8, 100, 200, 255].repeat(pixels),
        width: FALLBACK_ICON_SIZE,
        height: FALLBACK_ICON_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_icon_falls_back_to_blue_square() {
        let dir = tempfile::tempdir().unwrap();
        let icon = load_icon(&dir.path().join(ICON_FILE));
        assert_eq!((icon.width, icon.height), (64, 64));
        assert_eq!(icon.rgba.len(), 64 * 64 * 4);
        assert_eq!(&icon.rgba[..4], &[30, 100, 200, 255]);
    }

    #[test]
    fn test_icon_png_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(ICON_FILE);
        image::RgbaImage::from_pixel(16, 8, image::Rgba([255, 0, 0, 255]))
            .save(&path)
            .unwrap();

        let icon = load_icon(&path);
        assert_eq!((icon.width, icon.height), (16, 8));
        assert_eq!(&icon.rgba[..4], &[255, 0, 0, 255]);
    }
}
