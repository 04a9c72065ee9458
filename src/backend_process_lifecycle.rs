use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::{process::Child, task::JoinHandle};

use crate::{
    backend_logs::BackendLogBuffer, process_control, shell_config::ReadinessConfig, LaunchPlan,
    GRACEFUL_STOP_TIMEOUT_MS,
};

const EXIT_WATCH_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub(crate) struct RunningBackend {
    pub(crate) pid: u32,
    pub(crate) child: Child,
}

/// Owns the single backend process: spawn, readiness gate, output capture and
/// teardown. At most one child is tracked; a new one can only be spawned after
/// the previous handle was cleared by `stop` or by an observed exit.
pub struct BackendSupervisor {
    pub(crate) plan: LaunchPlan,
    pub(crate) base_url: String,
    pub(crate) readiness: ReadinessConfig,
    pub(crate) logs: Arc<BackendLogBuffer>,
    pub(crate) error_log_path: Option<PathBuf>,
    pub(crate) http: reqwest::Client,
    pub(crate) child: Arc<Mutex<Option<RunningBackend>>>,
    pub(crate) capture_tasks: Mutex<Vec<JoinHandle<()>>>,
    pub(crate) is_starting: AtomicBool,
    pub(crate) stop_timeout: Duration,
    pub(crate) log: fn(&str),
}

impl BackendSupervisor {
    pub fn new(
        plan: LaunchPlan,
        base_url: impl Into<String>,
        readiness: ReadinessConfig,
        logs: Arc<BackendLogBuffer>,
        error_log_path: Option<PathBuf>,
        log: fn(&str),
    ) -> Self {
        Self {
            plan,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            readiness,
            logs,
            error_log_path,
            http: reqwest::Client::new(),
            child: Arc::new(Mutex::new(None)),
            capture_tasks: Mutex::new(Vec::new()),
            is_starting: AtomicBool::new(false),
            stop_timeout: Duration::from_millis(GRACEFUL_STOP_TIMEOUT_MS),
            log,
        }
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn logs(&self) -> &BackendLogBuffer {
        &self.logs
    }

    pub(crate) fn lock_child(&self) -> MutexGuard<'_, Option<RunningBackend>> {
        match self.child.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.lock_child().as_ref().map(|running| running.pid)
    }

    /// Whether a tracked child exists and has not exited. An exit observed
    /// here clears the handle.
    pub fn is_running(&self) -> bool {
        let mut guard = self.lock_child();
        let Some(running) = guard.as_mut() else {
            return false;
        };
        match running.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                self.logs.push(format!("EXIT CODE: {}", exit_code_label(&status)));
                *guard = None;
                false
            }
            Err(error) => {
                (self.log)(&format!(
                    "failed to poll backend process status: pid={}, error={error}",
                    running.pid
                ));
                false
            }
        }
    }

    /// Idempotent. The handle is cleared before waiting so a concurrent
    /// caller can never stop the same child twice.
    pub async fn stop(&self) {
        let Some(mut running) = self.lock_child().take() else {
            return;
        };
        let log = self.log;
        log(&format!("stopping backend: pid={}", running.pid));
        if process_control::stop_child_gracefully(&mut running.child, self.stop_timeout, log).await
        {
            log(&format!("backend stopped: pid={}", running.pid));
        } else {
            log(&format!(
                "backend did not exit after {}ms stop timeout: pid={}",
                self.stop_timeout.as_millis(),
                running.pid
            ));
        }
    }

    /// Observes exits that happen after readiness. The window keeps running;
    /// proxied routes answer 502 until the backend comes back.
    pub(crate) fn spawn_exit_watcher(&self, pid: u32) {
        let child = self.child.clone();
        let logs = self.logs.clone();
        let log = self.log;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(EXIT_WATCH_INTERVAL).await;
                let mut guard = match child.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let Some(running) = guard.as_mut().filter(|running| running.pid == pid) else {
                    return;
                };
                match running.child.try_wait() {
                    Ok(None) => {}
                    Ok(Some(status)) => {
                        let code = exit_code_label(&status);
                        logs.push(format!("EXIT CODE: {code}"));
                        log(&format!(
                            "backend exited unexpectedly: pid={pid}, exit_code={code}"
                        ));
                        *guard = None;
                        return;
                    }
                    Err(error) => {
                        log(&format!(
                            "backend exit watcher failed to poll pid={pid}: {error}"
                        ));
                        return;
                    }
                }
            }
        });
    }
}

pub(crate) fn exit_code_label(status: &std::process::ExitStatus) -> String {
    status
        .code()
        .map(|code| code.to_string())
        .unwrap_or_else(|| status.to_string())
}
