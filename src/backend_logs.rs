use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::logging;

/// Bounded ring of the most recent backend output lines. Every line is also
/// mirrored to the rotating backend log file when one is configured.
#[derive(Debug)]
pub struct BackendLogBuffer {
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
    mirror: Option<LogMirror>,
}

#[derive(Debug)]
struct LogMirror {
    path: PathBuf,
    max_bytes: u64,
    backup_count: usize,
}

impl BackendLogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            mirror: None,
        }
    }

    pub fn with_mirror(capacity: usize, path: PathBuf, max_bytes: u64, backup_count: usize) -> Self {
        Self {
            mirror: Some(LogMirror {
                path,
                max_bytes,
                backup_count,
            }),
            ..Self::new(capacity)
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        let line = line.into();
        if let Some(mirror) = &self.mirror {
            logging::rotate_log_if_needed(
                &mirror.path,
                mirror.max_bytes,
                mirror.backup_count,
                "backend",
            );
            let _ = logging::append_line(&mirror.path, &format!("{line}\n"));
        }

        let mut lines = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Last `count` lines joined with newlines, oldest first.
    pub fn tail(&self, count: usize) -> String {
        let lines = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let skip = lines.len().saturating_sub(count);
        lines
            .iter()
            .skip(skip)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn snapshot(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    pub fn clear(&self) {
        match self.lines.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    /// Writes every buffered line to `path`, replacing its previous content.
    pub fn dump_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|error| {
                format!("Failed to create log directory {}: {}", parent.display(), error)
            })?;
        }
        fs::write(path, self.snapshot().join("\n"))
            .map_err(|error| format!("Failed to write {}: {}", path.display(), error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_drops_oldest_lines_beyond_capacity() {
        let buffer = BackendLogBuffer::new(3);
        for index in 1..=5 {
            buffer.push(format!("line {index}"));
        }
        assert_eq!(buffer.snapshot(), vec!["line 3", "line 4", "line 5"]);
        assert_eq!(buffer.tail(2), "line 4\nline 5");
        assert_eq!(buffer.tail(20), "line 3\nline 4\nline 5");
    }

    #[test]
    fn tail_of_empty_buffer_is_empty() {
        assert_eq!(BackendLogBuffer::new(10).tail(20), "");
    }

    #[test]
    fn mirror_file_receives_every_line() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("logs").join("backend.log");
        let buffer = BackendLogBuffer::with_mirror(1, path.clone(), 1024 * 1024, 2);
        buffer.push("first");
        buffer.push("ERR: second");

        assert_eq!(buffer.snapshot(), vec!["ERR: second"]);
        assert_eq!(
            fs::read_to_string(&path).expect("read mirror"),
            "first\nERR: second\n"
        );
    }

    #[test]
    fn dump_to_replaces_previous_error_log() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("backend_error.log");
        fs::write(&path, "stale").expect("seed stale log");

        let buffer = BackendLogBuffer::new(10);
        buffer.push("booting");
        buffer.push("EXIT CODE: 1");
        buffer.dump_to(&path).expect("dump buffer");

        assert_eq!(
            fs::read_to_string(&path).expect("read dump"),
            "booting\nEXIT CODE: 1"
        );
    }
}
