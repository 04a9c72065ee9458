mod app_constants;
pub mod app_controller;
mod app_helpers;
mod app_types;
pub mod backend_config;
mod backend_launch;
pub mod backend_logs;
pub mod backend_process_lifecycle;
mod backend_proxy;
mod backend_readiness;
mod boot_error;
pub mod exit_state;
pub mod gateway_routes;
pub mod launch_plan;
pub mod local_gateway;
pub mod logging;
pub mod port_reconciler;
pub mod process_control;
pub mod runtime_paths;
pub mod shell_config;
pub mod shell_locale;
pub mod shell_ui;
pub mod static_files;
pub mod update_apply;
pub mod update_check;
pub mod update_download;
pub mod update_installer;
pub mod version_store;

#[cfg(feature = "desktop")]
pub mod app_runtime;
#[cfg(feature = "desktop")]
mod desktop_bridge_commands;
#[cfg(feature = "desktop")]
mod desktop_shell;
#[cfg(feature = "desktop")]
mod exit_events;
#[cfg(feature = "desktop")]
mod main_window;

pub use app_constants::*;
pub use app_helpers::{
    append_desktop_log, append_shutdown_log, append_startup_log, append_update_log,
    build_debug_command,
};
pub use app_types::{
    AtomicFlagGuard, BridgeResult, DesktopAppUpdateCheckResult, InstallLayout, LaunchPlan,
    RunState,
};
pub use boot_error::BootError;
