use std::{path::PathBuf, sync::Arc};

use tauri::{AppHandle, Manager, RunEvent};
use tauri_plugin_dialog::{DialogExt, MessageDialogButtons, MessageDialogKind};

use crate::{
    app_controller::{AppController, ControllerLogs},
    append_desktop_log, append_shutdown_log, append_startup_log,
    desktop_shell::TauriShellUi,
    exit_events,
    exit_state::ShutdownTrigger,
    logging, main_window, process_control, runtime_paths,
    shell_config::ShellConfig,
    shell_locale,
    shell_ui::ShellUi,
    BootError, InstallLayout, BUNDLED_APP_VERSION, DEFAULT_SHELL_LOCALE, DESKTOP_LOG_FILE,
};

fn resolve_app_root(app_handle: &AppHandle) -> PathBuf {
    runtime_paths::default_app_root_dir()
        .or_else(|| app_handle.path().app_data_dir().ok())
        .unwrap_or_else(std::env::temp_dir)
}

fn resolve_install_layout(app_handle: &AppHandle, packaged: bool) -> Result<InstallLayout, String> {
    if !packaged {
        if let Some(layout) = runtime_paths::dev_install_layout() {
            return Ok(layout);
        }
        append_startup_log("source checkout not found; falling back to bundled resources");
    }
    let resource_dir = app_handle
        .path()
        .resource_dir()
        .map_err(|error| format!("Failed to resolve resource directory: {error}"))?;
    Ok(runtime_paths::packaged_install_layout(&resource_dir))
}

fn build_controller(app_handle: &AppHandle) -> Result<AppController, BootError> {
    let packaged = !cfg!(debug_assertions);
    let config = ShellConfig::from_env(packaged, append_startup_log);
    let layout = resolve_install_layout(app_handle, packaged).map_err(|reason| {
        BootError::Spawn {
            command: "backend".to_string(),
            reason,
        }
    })?;
    let app_root = resolve_app_root(app_handle);
    append_startup_log(&format!(
        "app root: {}, backend dir: {}, frontend dir: {}",
        app_root.display(),
        layout.backend_dir.display(),
        layout.frontend_dir.display()
    ));
    AppController::new(
        config,
        layout,
        &app_root,
        BUNDLED_APP_VERSION,
        ControllerLogs::default(),
    )
}

/// Kills the backend tree and exits; the regular teardown cannot run from
/// inside a panicking runtime thread.
fn install_panic_hook(controller: Arc<AppController>) {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        append_shutdown_log(&format!("panic: {info}"));
        if let Some(pid) = controller.supervisor().pid() {
            let killer = std::thread::spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => {
                        let stopped = runtime.block_on(process_control::terminate_pid_tree(
                            pid,
                            true,
                            append_shutdown_log,
                        ));
                        if let Err(error) = stopped {
                            append_shutdown_log(&format!("failed to kill backend {pid}: {error}"));
                        }
                    }
                    Err(error) => append_shutdown_log(&format!(
                        "failed to stop backend after panic: {error}"
                    )),
                }
            });
            let _ = killer.join();
        }
        default_hook(info);
        std::process::exit(1);
    }));
}

fn report_unbuildable_controller(app_handle: &AppHandle, error: &BootError) {
    append_startup_log(&format!("boot failed before start: {error}"));
    let texts = shell_locale::shell_texts_for_locale(shell_locale::resolve_shell_locale(
        DEFAULT_SHELL_LOCALE,
        runtime_paths::default_app_root_dir(),
    ));
    let exit_handle = app_handle.clone();
    app_handle
        .dialog()
        .message(shell_locale::boot_error_text(&texts, &error.to_string()))
        .title(texts.boot_error_title)
        .kind(MessageDialogKind::Error)
        .buttons(MessageDialogButtons::Ok)
        .show(move |_| exit_handle.exit(1));
}

fn spawn_boot_task(app_handle: AppHandle, controller: Arc<AppController>, ui: Arc<TauriShellUi>) {
    tauri::async_runtime::spawn(async move {
        match controller.start(ui.as_ref()).await {
            Ok(()) => {
                let gateway_url = controller.gateway_url();
                if let Err(error) = main_window::navigate_main_window(&app_handle, &gateway_url) {
                    append_startup_log(&error);
                }
                main_window::show_main_window(&app_handle, append_startup_log);
                let ui: Arc<dyn ShellUi> = ui;
                controller.spawn_deferred_update_check(ui);
            }
            Err(error) => {
                append_startup_log(&format!("boot failed: {error}"));
                ui.show_boot_error(&error.to_string()).await;
                controller.shutdown(ShutdownTrigger::BootFailure).await;
                app_handle.exit(1);
            }
        }
    });
}

pub fn run() {
    append_startup_log("desktop process starting");
    append_startup_log(&format!(
        "desktop log path: {}",
        logging::resolve_desktop_log_path(runtime_paths::default_app_root_dir(), DESKTOP_LOG_FILE)
            .display()
    ));

    tauri::Builder::default()
        .plugin(tauri_plugin_single_instance::init(|app_handle, _argv, _cwd| {
            append_desktop_log("second instance blocked, focusing main window");
            main_window::show_main_window(app_handle, append_desktop_log);
        }))
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_process::init())
        .invoke_handler(tauri::generate_handler![
            crate::desktop_bridge_commands::desktop_is_desktop_runtime,
            crate::desktop_bridge_commands::desktop_get_version,
            crate::desktop_bridge_commands::desktop_get_run_state,
            crate::desktop_bridge_commands::desktop_check_update,
            crate::desktop_bridge_commands::desktop_window_minimize,
            crate::desktop_bridge_commands::desktop_window_toggle_maximize,
            crate::desktop_bridge_commands::desktop_window_close,
            crate::desktop_bridge_commands::desktop_window_is_maximized,
            crate::desktop_bridge_commands::desktop_open_external_url,
            crate::desktop_bridge_commands::desktop_set_shell_locale,
        ])
        .setup(|app| {
            let app_handle = app.handle().clone();
            main_window::build_main_window(&app_handle, append_desktop_log)?;

            let controller = match build_controller(&app_handle) {
                Ok(controller) => Arc::new(controller),
                Err(error) => {
                    report_unbuildable_controller(&app_handle, &error);
                    return Ok(());
                }
            };
            controller.mark_instance_lock_held();
            install_panic_hook(Arc::clone(&controller));

            let locale = shell_locale::resolve_shell_locale(
                DEFAULT_SHELL_LOCALE,
                runtime_paths::default_app_root_dir(),
            );
            let ui = Arc::new(TauriShellUi::new(
                app_handle.clone(),
                Arc::clone(&controller),
                locale,
            ));
            app.manage(Arc::clone(&controller));
            app.manage(Arc::clone(&ui));

            spawn_boot_task(app_handle, controller, ui);
            Ok(())
        })
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(|app_handle, event| match event {
            RunEvent::ExitRequested { api, .. } => {
                exit_events::handle_exit_requested(app_handle, &api);
            }
            RunEvent::Exit => {
                exit_events::handle_exit_event(app_handle);
            }
            _ => {}
        });
}
