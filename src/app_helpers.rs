use std::sync::{Mutex, OnceLock};

use crate::{
    logging, runtime_paths, LaunchPlan, DESKTOP_LOG_FILE, DESKTOP_LOG_MAX_BYTES, LOG_BACKUP_COUNT,
};

static DESKTOP_LOG_WRITE_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn build_debug_command(plan: &LaunchPlan) -> Vec<String> {
    let mut parts = vec![plan.cmd.clone()];
    parts.extend(plan.args.clone());
    parts
}

pub fn append_desktop_log(message: &str) {
    append_desktop_log_with_category(logging::DesktopLogCategory::Runtime, message);
}

pub fn append_startup_log(message: &str) {
    append_desktop_log_with_category(logging::DesktopLogCategory::Startup, message);
}

pub fn append_update_log(message: &str) {
    append_desktop_log_with_category(logging::DesktopLogCategory::Update, message);
}

pub fn append_shutdown_log(message: &str) {
    append_desktop_log_with_category(logging::DesktopLogCategory::Shutdown, message);
}

fn append_desktop_log_with_category(category: logging::DesktopLogCategory, message: &str) {
    logging::append_desktop_log(
        category,
        message,
        runtime_paths::default_app_root_dir(),
        DESKTOP_LOG_FILE,
        DESKTOP_LOG_MAX_BYTES,
        LOG_BACKUP_COUNT,
        &DESKTOP_LOG_WRITE_LOCK,
    )
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn debug_command_joins_program_and_arguments() {
        let plan = LaunchPlan {
            cmd: "python3".to_string(),
            args: vec!["-m".to_string(), "uvicorn".to_string()],
            cwd: PathBuf::from("/srv/backend"),
            envs: Vec::new(),
            packaged_mode: false,
        };
        assert_eq!(build_debug_command(&plan), vec!["python3", "-m", "uvicorn"]);
    }
}
