use std::time::Duration;

pub const APP_DISPLAY_NAME: &str = "Demet";
pub const BUNDLED_APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const LOOPBACK_HOST: &str = "127.0.0.1";
pub const DEFAULT_GATEWAY_PORT: u16 = 45321;
pub const DEFAULT_BACKEND_PORT: u16 = 8000;
pub const GATEWAY_PORT_ENV: &str = "DEMET_GATEWAY_PORT";
pub const BACKEND_PORT_ENV: &str = "DEMET_BACKEND_PORT";
pub const BACKEND_HOST_ENV: &str = "DEMET_BACKEND_HOST";

pub const HEALTH_PATH: &str = "/health";
pub const API_PREFIX: &str = "/api/";
pub const UPLOADS_PREFIX: &str = "/uploads/";

pub const BACKEND_CMD_ENV: &str = "DEMET_BACKEND_CMD";
pub const BACKEND_CWD_ENV: &str = "DEMET_BACKEND_CWD";
pub const BACKEND_TIMEOUT_ENV: &str = "DEMET_BACKEND_TIMEOUT_MS";
pub const DEV_BACKEND_TIMEOUT_MS: u64 = 60_000;
pub const PACKAGED_BACKEND_TIMEOUT_FALLBACK_MS: u64 = 120_000;
pub const BACKEND_READY_POLL_INTERVAL_ENV: &str = "DEMET_BACKEND_READY_POLL_INTERVAL_MS";
pub const DEFAULT_BACKEND_READY_POLL_INTERVAL_MS: u64 = 500;
pub const BACKEND_READY_POLL_INTERVAL_MIN_MS: u64 = 50;
pub const BACKEND_READY_POLL_INTERVAL_MAX_MS: u64 = 10_000;
pub const BACKEND_READY_PROBE_TIMEOUT_ENV: &str = "DEMET_BACKEND_READY_PROBE_TIMEOUT_MS";
pub const DEFAULT_BACKEND_READY_PROBE_TIMEOUT_MS: u64 = 2_000;
pub const BACKEND_READY_PROBE_TIMEOUT_MIN_MS: u64 = 100;
pub const BACKEND_READY_PROBE_TIMEOUT_MAX_MS: u64 = 30_000;
pub const GRACEFUL_STOP_TIMEOUT_MS: u64 = 10_000;
pub const PACKAGED_BACKEND_EXE_STEM: &str = "Demet";

pub const BACKEND_LOG_BUFFER_LINES: usize = 500;
pub const BACKEND_ERROR_TAIL_LINES: usize = 20;
pub const BACKEND_ERROR_LOG_FILE: &str = "backend_error.log";

pub const GATEWAY_BIND_ATTEMPTS: u32 = 3;
pub const GATEWAY_BIND_RETRY_DELAY: Duration = Duration::from_secs(2);

pub const RELEASE_FEED_ENV: &str = "DEMET_RELEASE_FEED";
pub const DEFAULT_RELEASE_FEED_URL: &str =
    "https://api.github.com/repos/aligencg2-code/reworar/releases/latest";
pub const RELEASE_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
pub const UPDATER_USER_AGENT: &str = "Demet-Updater";
pub const AUTO_UPDATE_ENV: &str = "DEMET_AUTO_UPDATE";
pub const UPDATE_CHECK_DELAY: Duration = Duration::from_secs(3);
pub const CHANGELOG_PREVIEW_CHARS: usize = 300;
pub const INSTALLER_SILENT_FLAG: &str = "/S";
pub const UPDATE_SCRATCH_DIR_NAME: &str = "demet-update";
pub const ARCHIVE_BACKEND_SUBTREE: &str = "backend";
pub const ARCHIVE_FRONTEND_SUBTREE: &str = "frontend-out";

pub const INSTALLED_VERSION_FILE: &str = "installed_version.json";
pub const APP_ROOT_ENV: &str = "DEMET_ROOT";
pub const DESKTOP_LOG_PATH_ENV: &str = "DEMET_DESKTOP_LOG_PATH";
pub const DESKTOP_LOG_FILE: &str = "desktop.log";
pub const BACKEND_LOG_FILE: &str = "backend.log";
pub const DESKTOP_LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;
pub const BACKEND_LOG_MAX_BYTES: u64 = 20 * 1024 * 1024;
pub const LOG_BACKUP_COUNT: usize = 5;

pub const DEFAULT_SHELL_LOCALE: &str = "tr-TR";

#[cfg(target_os = "windows")]
pub const CREATE_NO_WINDOW: u32 = 0x0800_0000;
#[cfg(target_os = "windows")]
pub const DETACHED_PROCESS: u32 = 0x0000_0008;
