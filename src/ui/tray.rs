use super::app::Shutdown;
use anyhow::Result;
use eframe::egui;
use tray_icon::menu::{Menu, MenuEvent, MenuId, MenuItem, PredefinedMenuItem};
use tray_icon::{Icon, TrayIcon, TrayIconBuilder};

const TOOLTIP: &str = "Report 455 automation";

/// Keeps the tray icon alive for as long as the panel lives.
pub struct TrayHandle {
    // On Linux the icon lives on its own GTK thread instead.
    #[cfg(not(target_os = "linux"))]
    _icon: TrayIcon,
}

struct TrayMenu {
    icon: TrayIcon,
    show: MenuId,
    quit: MenuId,
}

fn build(rgba: Vec<u8>, width: u32, height: u32) -> Result<TrayMenu> {
    let show = MenuItem::new("Show panel", true, None);
    let quit = MenuItem::new("Quit", true, None);

    let menu = Menu::new();
    menu.append(&show)?;
    menu.append(&PredefinedMenuItem::separator())?;
    menu.append(&quit)?;

    let icon = TrayIconBuilder::new()
        .with_menu(Box::new(menu))
        .with_tooltip(TOOLTIP)
        .with_icon(Icon::from_rgba(rgba, width, height)?)
        .build()?;

    Ok(TrayMenu {
        icon,
        show: show.id().clone(),
        quit: quit.id().clone(),
    })
}

/// Takes the panel off screen. Windows stops redrawing an invisible window and
/// would never apply the later show, so there the panel is minimized instead.
fn hide_commands() -> Vec<egui::ViewportCommand> {
    if cfg!(windows) {
        vec![egui::ViewportCommand::Minimized(true)]
    } else {
        vec![egui::ViewportCommand::Visible(false)]
    }
}

fn show_commands() -> Vec<egui::ViewportCommand> {
    vec![
        egui::ViewportCommand::Visible(true),
        egui::ViewportCommand::Minimized(false),
        egui::ViewportCommand::Focus,
    ]
}

pub fn hide_panel(ctx: &egui::Context) {
    for command in hide_commands() {
        ctx.send_viewport_cmd(command);
    }
}

pub fn show_panel(ctx: &egui::Context) {
    for command in show_commands() {
        ctx.send_viewport_cmd(command);
    }
    ctx.request_repaint();
}

/// Menu events arrive on the tray's thread; the panel may be hidden and not
/// repainting, so they act on the viewport directly.
fn route_menu_events(show: MenuId, quit: MenuId, ctx: egui::Context, shutdown: Shutdown) {
    MenuEvent::set_event_handler(Some(move |event: MenuEvent| {
        if event.id == show {
            show_panel(&ctx);
        } else if event.id == quit {
            shutdown.quit(&ctx);
        }
    }));
}

#[cfg(not(target_os = "linux"))]
pub fn install(ctx: &egui::Context, icon: &egui::IconData, shutdown: Shutdown) -> Result<TrayHandle> {
    let tray = build(icon.rgba.clone(), icon.width, icon.height)?;
    route_menu_events(tray.show, tray.quit, ctx.clone(), shutdown);
    Ok(TrayHandle { _icon: tray.icon })
}

#[cfg(target_os = "linux")]
pub fn install(ctx: &egui::Context, icon: &egui::IconData, shutdown: Shutdown) -> Result<TrayHandle> {
    use std::sync::mpsc;
    use std::time::Duration;

    let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
    let (rgba, width, height) = (icon.rgba.clone(), icon.width, icon.height);
    let ctx = ctx.clone();

    std::thread::Builder::new()
        .name("tray".to_string())
        .spawn(move || {
            if let Err(e) = gtk::init() {
                let _ = ready_tx.send(Err(anyhow::anyhow!("GTK init failed: {}", e)));
                return;
            }
            match build(rgba, width, height) {
                Ok(tray) => {
                    route_menu_events(tray.show, tray.quit, ctx, shutdown);
                    let _ = ready_tx.send(Ok(()));
                    gtk::main();
                    drop(tray.icon);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            }
        })?;

    ready_rx
        .recv_timeout(Duration::from_secs(5))
        .map_err(|_| anyhow::anyhow!("tray thread did not report back"))??;
    Ok(TrayHandle {})
}
