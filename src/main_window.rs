use tauri::{
    window::{Color, ProgressBarState, ProgressBarStatus},
    AppHandle, Manager, Url, WebviewUrl, WebviewWindow, WebviewWindowBuilder,
};

use crate::{desktop_bridge_commands, APP_DISPLAY_NAME, LOOPBACK_HOST};

pub const MAIN_WINDOW_LABEL: &str = "main";
pub const LOADING_WINDOW_LABEL: &str = "loading";

const MAIN_WINDOW_SIZE: (f64, f64) = (1400.0, 900.0);
const MAIN_WINDOW_MIN_SIZE: (f64, f64) = (1024.0, 700.0);
const LOADING_WINDOW_SIZE: (f64, f64) = (420.0, 260.0);
const WINDOW_BACKGROUND: Color = Color(0x0f, 0x0f, 0x23, 0xff);

/// Links leaving the local gateway open in the system browser instead of the
/// shell window.
fn is_in_app_navigation(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => matches!(
            url.host_str(),
            Some(LOOPBACK_HOST) | Some("localhost") | Some("tauri.localhost")
        ),
        _ => true,
    }
}

/// Frameless main window. It stays hidden until the gateway is serving.
pub fn build_main_window<F>(app_handle: &AppHandle, log: F) -> Result<WebviewWindow, String>
where
    F: Fn(&str) + Copy + Send + 'static,
{
    if let Some(window) = app_handle.get_webview_window(MAIN_WINDOW_LABEL) {
        return Ok(window);
    }

    WebviewWindowBuilder::new(
        app_handle,
        MAIN_WINDOW_LABEL,
        WebviewUrl::App("index.html".into()),
    )
    .title(APP_DISPLAY_NAME)
    .inner_size(MAIN_WINDOW_SIZE.0, MAIN_WINDOW_SIZE.1)
    .min_inner_size(MAIN_WINDOW_MIN_SIZE.0, MAIN_WINDOW_MIN_SIZE.1)
    .decorations(false)
    .background_color(WINDOW_BACKGROUND)
    .visible(false)
    .center()
    .on_navigation(move |url| {
        if is_in_app_navigation(url) {
            return true;
        }
        log(&format!("opening external link in browser: {url}"));
        if let Err(error) = desktop_bridge_commands::open_url_with_system_browser(url.as_str()) {
            log(&format!("failed to open external link: {error}"));
        }
        false
    })
    .build()
    .map_err(|error| format!("Failed to create main window: {error}"))
}

pub fn show_loading_window<F>(app_handle: &AppHandle, log: F)
where
    F: Fn(&str),
{
    if let Some(window) = app_handle.get_webview_window(LOADING_WINDOW_LABEL) {
        if let Err(error) = window.show() {
            log(&format!("failed to show loading window: {error}"));
        }
        return;
    }

    let result = WebviewWindowBuilder::new(
        app_handle,
        LOADING_WINDOW_LABEL,
        WebviewUrl::App("index.html".into()),
    )
    .title(APP_DISPLAY_NAME)
    .inner_size(LOADING_WINDOW_SIZE.0, LOADING_WINDOW_SIZE.1)
    .resizable(false)
    .decorations(false)
    .always_on_top(true)
    .skip_taskbar(true)
    .background_color(WINDOW_BACKGROUND)
    .center()
    .build();
    if let Err(error) = result {
        log(&format!("failed to create loading window: {error}"));
    }
}

pub fn close_loading_window<F>(app_handle: &AppHandle, log: F)
where
    F: Fn(&str),
{
    let Some(window) = app_handle.get_webview_window(LOADING_WINDOW_LABEL) else {
        return;
    };
    if let Err(error) = window.destroy() {
        log(&format!("failed to close loading window: {error}"));
    }
}

pub fn show_main_window<F>(app_handle: &AppHandle, log: F)
where
    F: Fn(&str),
{
    let Some(window) = app_handle.get_webview_window(MAIN_WINDOW_LABEL) else {
        log("show_main_window skipped: main window not found");
        return;
    };

    if let Err(error) = window.unminimize() {
        log(&format!("failed to unminimize main window: {error}"));
    }
    if let Err(error) = window.show() {
        log(&format!("failed to show main window: {error}"));
    }
    if let Err(error) = window.set_focus() {
        log(&format!("failed to focus main window: {error}"));
    }
}

pub fn navigate_main_window(app_handle: &AppHandle, gateway_url: &str) -> Result<(), String> {
    let Some(window) = app_handle.get_webview_window(MAIN_WINDOW_LABEL) else {
        return Err("Main window is unavailable after startup.".to_string());
    };
    let url = Url::parse(gateway_url)
        .map_err(|error| format!("Invalid gateway URL {gateway_url}: {error}"))?;
    window
        .navigate(url)
        .map_err(|error| format!("Failed to open {gateway_url} in main window: {error}"))
}

/// Taskbar progress plus title; `None` restores both.
pub fn set_main_window_progress<F>(
    app_handle: &AppHandle,
    percent: Option<u8>,
    title: &str,
    log: F,
) where
    F: Fn(&str),
{
    let Some(window) = app_handle.get_webview_window(MAIN_WINDOW_LABEL) else {
        return;
    };
    let state = match percent {
        Some(percent) => ProgressBarState {
            status: Some(ProgressBarStatus::Normal),
            progress: Some(u64::from(percent)),
        },
        None => ProgressBarState {
            status: Some(ProgressBarStatus::None),
            progress: None,
        },
    };
    if let Err(error) = window.set_progress_bar(state) {
        log(&format!("failed to update progress bar: {error}"));
    }
    if let Err(error) = window.set_title(title) {
        log(&format!("failed to update window title: {error}"));
    }
}
