use std::{
    env,
    ffi::OsString,
    fs::{self, OpenOptions},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
    sync::{Mutex, OnceLock},
};

use crate::{APP_ROOT_ENV, BACKEND_LOG_FILE, DESKTOP_LOG_PATH_ENV};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesktopLogCategory {
    Startup,
    Runtime,
    Update,
    Shutdown,
}

impl DesktopLogCategory {
    fn as_label(self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Runtime => "runtime",
            Self::Update => "update",
            Self::Shutdown => "shutdown",
        }
    }
}

fn report_rotation_error(log_scope: &str, action: &str, path: &Path, error: std::io::Error) {
    if error.kind() != ErrorKind::NotFound {
        eprintln!(
            "[log rotation:{log_scope}] failed to {action} {}: {}",
            path.display(),
            error
        );
    }
}

/// Shifts `file.N` to `file.N+1` and moves the active file to `file.1` once it
/// grows past `max_bytes`. The oldest backup beyond `backup_count` is dropped.
pub fn rotate_log_if_needed(path: &Path, max_bytes: u64, backup_count: usize, log_scope: &str) {
    if max_bytes == 0 || backup_count == 0 {
        return;
    }

    let size = match fs::metadata(path) {
        Ok(metadata) => metadata.len(),
        Err(error) => {
            report_rotation_error(log_scope, "read metadata for", path, error);
            return;
        }
    };
    if size < max_bytes {
        return;
    }

    let oldest = rotated_log_path(path, backup_count);
    if let Err(error) = fs::remove_file(&oldest) {
        report_rotation_error(log_scope, "remove oldest backup", &oldest, error);
    }

    for index in (1..backup_count).rev() {
        let source = rotated_log_path(path, index);
        if !source.exists() {
            continue;
        }
        let target = rotated_log_path(path, index + 1);
        if let Err(error) = fs::rename(&source, &target) {
            report_rotation_error(log_scope, "shift backup", &source, error);
        }
    }

    if let Err(error) = fs::rename(path, rotated_log_path(path, 1)) {
        report_rotation_error(log_scope, "rotate", path, error);
    }
}

fn rotated_log_path(path: &Path, index: usize) -> PathBuf {
    let mut value = OsString::from(path.as_os_str());
    value.push(format!(".{index}"));
    PathBuf::from(value)
}

fn non_empty_env_path(name: &str) -> Option<PathBuf> {
    let raw = env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

pub fn resolve_desktop_log_path(app_root: Option<PathBuf>, desktop_log_file: &str) -> PathBuf {
    if let Some(custom) = non_empty_env_path(DESKTOP_LOG_PATH_ENV) {
        return custom;
    }
    if let Some(root) = non_empty_env_path(APP_ROOT_ENV).or(app_root) {
        return root.join("logs").join(desktop_log_file);
    }

    env::temp_dir()
        .join("demet")
        .join("logs")
        .join(desktop_log_file)
}

pub fn resolve_backend_log_path(app_root: Option<&Path>) -> PathBuf {
    match app_root {
        Some(root) => root.join("logs").join(BACKEND_LOG_FILE),
        None => env::temp_dir()
            .join("demet")
            .join("logs")
            .join(BACKEND_LOG_FILE),
    }
}

pub fn format_log_line(category: DesktopLogCategory, message: &str) -> String {
    let timestamp = chrono::Local::now()
        .format("%Y-%m-%d %H:%M:%S%.3f %z")
        .to_string();
    format!("[{}] [{}] {}\n", timestamp, category.as_label(), message)
}

pub fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut file| file.write_all(line.as_bytes()))
}

pub fn append_desktop_log(
    category: DesktopLogCategory,
    message: &str,
    app_root: Option<PathBuf>,
    desktop_log_file: &str,
    max_bytes: u64,
    backup_count: usize,
    write_lock: &OnceLock<Mutex<()>>,
) {
    let path = resolve_desktop_log_path(app_root, desktop_log_file);
    let _guard = match write_lock.get_or_init(|| Mutex::new(())).lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    rotate_log_if_needed(&path, max_bytes, backup_count, "desktop");
    let line = format_log_line(category, message);
    if cfg!(debug_assertions) {
        eprint!("{line}");
    }
    let _ = append_line(&path, &line);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotate_log_shifts_backups_once_limit_is_reached() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("desktop.log");
        fs::write(&path, "0123456789").expect("write active log");
        fs::write(rotated_log_path(&path, 1), "older").expect("write first backup");

        rotate_log_if_needed(&path, 5, 3, "test");

        assert!(!path.exists());
        assert_eq!(
            fs::read_to_string(rotated_log_path(&path, 1)).expect("read .1"),
            "0123456789"
        );
        assert_eq!(
            fs::read_to_string(rotated_log_path(&path, 2)).expect("read .2"),
            "older"
        );
    }

    #[test]
    fn rotate_log_keeps_small_files_in_place() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("desktop.log");
        fs::write(&path, "tiny").expect("write active log");

        rotate_log_if_needed(&path, 1024, 3, "test");

        assert_eq!(fs::read_to_string(&path).expect("read log"), "tiny");
        assert!(!rotated_log_path(&path, 1).exists());
    }

    #[test]
    fn format_log_line_includes_category_label() {
        let line = format_log_line(DesktopLogCategory::Update, "checking releases");
        assert!(line.contains("[update] checking releases"));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn backend_log_path_lives_under_app_root_logs() {
        let root = PathBuf::from("/tmp/demet-root");
        assert_eq!(
            resolve_backend_log_path(Some(&root)),
            root.join("logs").join(BACKEND_LOG_FILE)
        );
    }
}
