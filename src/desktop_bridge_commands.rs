use std::{
    process::{Command, Stdio},
    sync::Arc,
};

use tauri::{AppHandle, Manager, WebviewWindow};
use url::Url;

use crate::{
    app_controller::AppController, append_desktop_log, desktop_shell::TauriShellUi,
    runtime_paths, shell_locale, BridgeResult, DesktopAppUpdateCheckResult, RunState,
    BUNDLED_APP_VERSION,
};

fn parse_openable_url(raw_url: &str) -> Result<Url, String> {
    let trimmed = raw_url.trim();
    if trimmed.is_empty() {
        return Err("Missing external URL.".to_string());
    }

    let parsed = Url::parse(trimmed).map_err(|error| format!("Invalid URL: {error}"))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(format!(
            "Unsupported URL scheme '{scheme}', only http/https are allowed."
        )),
    }
}

#[cfg(target_os = "macos")]
pub(crate) fn open_url_with_system_browser(url: &str) -> Result<(), String> {
    Command::new("open")
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
        .map_err(|error| format!("Failed to run 'open': {error}"))
}

#[cfg(target_os = "windows")]
pub(crate) fn open_url_with_system_browser(url: &str) -> Result<(), String> {
    use std::os::windows::process::CommandExt;

    Command::new("rundll32")
        .args(["url.dll,FileProtocolHandler", url])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(crate::CREATE_NO_WINDOW)
        .spawn()
        .map(|_| ())
        .map_err(|error| format!("Failed to run 'rundll32': {error}"))
}

#[cfg(all(unix, not(target_os = "macos")))]
pub(crate) fn open_url_with_system_browser(url: &str) -> Result<(), String> {
    Command::new("xdg-open")
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map(|_| ())
        .map_err(|error| format!("Failed to run 'xdg-open': {error}"))
}

#[cfg(not(any(target_os = "macos", target_os = "windows", unix)))]
pub(crate) fn open_url_with_system_browser(_url: &str) -> Result<(), String> {
    Err("Opening external URLs is not supported on this platform.".to_string())
}

fn to_bridge_result(result: Result<(), String>) -> BridgeResult {
    match result {
        Ok(()) => BridgeResult::ok(),
        Err(error) => BridgeResult::failed(error),
    }
}

fn controller(app_handle: &AppHandle) -> Option<Arc<AppController>> {
    app_handle
        .try_state::<Arc<AppController>>()
        .map(|state| Arc::clone(state.inner()))
}

#[tauri::command]
pub(crate) fn desktop_is_desktop_runtime() -> bool {
    true
}

#[tauri::command]
pub(crate) fn desktop_get_version(app_handle: AppHandle) -> String {
    match controller(&app_handle) {
        Some(controller) => controller.versions().current_version(),
        None => BUNDLED_APP_VERSION.to_string(),
    }
}

#[tauri::command]
pub(crate) fn desktop_get_run_state(app_handle: AppHandle) -> RunState {
    controller(&app_handle)
        .map(|controller| controller.run_state())
        .unwrap_or_default()
}

#[tauri::command]
pub(crate) async fn desktop_check_update(app_handle: AppHandle) -> DesktopAppUpdateCheckResult {
    let (Some(controller), Some(ui)) = (
        controller(&app_handle),
        app_handle.try_state::<Arc<TauriShellUi>>(),
    ) else {
        return DesktopAppUpdateCheckResult {
            ok: false,
            reason: Some("Application is not running.".to_string()),
            current_version: BUNDLED_APP_VERSION.to_string(),
            latest_version: None,
            has_update: false,
            update_applied: false,
        };
    };
    let ui = Arc::clone(ui.inner());
    let result = controller.check_for_updates(ui.as_ref()).await;
    append_desktop_log(&format!(
        "manual update check: ok={}, has_update={}, applied={}",
        result.ok, result.has_update, result.update_applied
    ));
    result
}

#[tauri::command]
pub(crate) fn desktop_window_minimize(window: WebviewWindow) -> BridgeResult {
    to_bridge_result(
        window
            .minimize()
            .map_err(|error| format!("Failed to minimize window: {error}")),
    )
}

#[tauri::command]
pub(crate) fn desktop_window_toggle_maximize(window: WebviewWindow) -> BridgeResult {
    let result = match window.is_maximized() {
        Ok(true) => window.unmaximize(),
        Ok(false) => window.maximize(),
        Err(error) => Err(error),
    };
    to_bridge_result(result.map_err(|error| format!("Failed to toggle maximize: {error}")))
}

#[tauri::command]
pub(crate) fn desktop_window_close(window: WebviewWindow) -> BridgeResult {
    to_bridge_result(
        window
            .close()
            .map_err(|error| format!("Failed to close window: {error}")),
    )
}

#[tauri::command]
pub(crate) fn desktop_window_is_maximized(window: WebviewWindow) -> bool {
    window.is_maximized().unwrap_or(false)
}

#[tauri::command]
pub(crate) fn desktop_open_external_url(url: String) -> BridgeResult {
    to_bridge_result(
        parse_openable_url(&url).and_then(|parsed| open_url_with_system_browser(parsed.as_str())),
    )
}

#[tauri::command]
pub(crate) fn desktop_set_shell_locale(locale: Option<String>) -> BridgeResult {
    let app_root_dir = runtime_paths::default_app_root_dir();
    match shell_locale::write_cached_shell_locale(
        locale.as_deref(),
        app_root_dir.as_deref(),
        append_desktop_log,
    ) {
        Ok(()) => BridgeResult::ok(),
        Err(error) => {
            append_desktop_log(&format!("failed to persist shell locale: {error}"));
            BridgeResult::failed(error)
        }
    }
}
