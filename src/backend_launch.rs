use std::{fs, process::Stdio, sync::Arc};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
};

use crate::{
    backend_logs::BackendLogBuffer,
    backend_process_lifecycle::{BackendSupervisor, RunningBackend},
    build_debug_command,
    shell_ui::{LoadingGuard, ShellUi},
    AtomicFlagGuard, BootError,
};

impl BackendSupervisor {
    /// Spawns the backend and resolves once its health endpoint answers with a
    /// success status. The loading indicator is visible for the whole wait.
    pub async fn start(&self, ui: &dyn ShellUi) -> Result<(), BootError> {
        let _start_guard =
            AtomicFlagGuard::try_set(&self.is_starting).ok_or_else(|| BootError::Spawn {
                command: self.debug_command(),
                reason: "Backend start already in progress.".to_string(),
            })?;

        if self.is_running() {
            (self.log)("backend child already exists, skip re-spawn");
            return self.wait_until_healthy().await;
        }

        let _loading = LoadingGuard::show(ui);
        self.logs.clear();
        let pid = self.spawn_backend_process()?;

        match self.wait_until_healthy().await {
            Ok(()) => {
                (self.log)(&format!("backend ready: pid={pid}, url={}", self.base_url));
                self.spawn_exit_watcher(pid);
                Ok(())
            }
            Err(error) => {
                (self.log)(&format!("backend startup failed: {error}"));
                self.stop().await;
                Err(error)
            }
        }
    }

    pub(crate) fn debug_command(&self) -> String {
        build_debug_command(&self.plan).join(" ")
    }

    fn spawn_backend_process(&self) -> Result<u32, BootError> {
        let plan = &self.plan;
        if !plan.cwd.exists() {
            fs::create_dir_all(&plan.cwd).map_err(|error| BootError::Spawn {
                command: self.debug_command(),
                reason: format!(
                    "Failed to create backend cwd {}: {}",
                    plan.cwd.display(),
                    error
                ),
            })?;
        }

        let mut command = Command::new(&plan.cmd);
        command
            .args(&plan.args)
            .current_dir(&plan.cwd)
            .envs(plan.envs.iter().map(|(key, value)| (key, value)))
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        #[cfg(unix)]
        {
            // Own process group so stop() can signal forked workers too.
            command.process_group(0);
        }
        #[cfg(target_os = "windows")]
        {
            command.creation_flags(crate::CREATE_NO_WINDOW);
        }

        let mut child = command.spawn().map_err(|error| BootError::Spawn {
            command: self.debug_command(),
            reason: error.to_string(),
        })?;
        let Some(pid) = child.id() else {
            return Err(BootError::Spawn {
                command: self.debug_command(),
                reason: "Backend process exited immediately after spawn.".to_string(),
            });
        };
        (self.log)(&format!(
            "spawned backend: pid={pid}, cmd={:?}, cwd={}",
            build_debug_command(plan),
            plan.cwd.display()
        ));

        let mut tasks = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            tasks.push(tokio::spawn(capture_stream(stdout, self.logs.clone(), "")));
        }
        if let Some(stderr) = child.stderr.take() {
            tasks.push(tokio::spawn(capture_stream(
                stderr,
                self.logs.clone(),
                "ERR: ",
            )));
        }
        match self.capture_tasks.lock() {
            Ok(mut guard) => *guard = tasks,
            Err(poisoned) => *poisoned.into_inner() = tasks,
        }

        *self.lock_child() = Some(RunningBackend { pid, child });
        Ok(pid)
    }
}

/// Forwards each output line into the ring buffer until the pipe closes.
async fn capture_stream<R>(stream: R, logs: Arc<BackendLogBuffer>, prefix: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {
                let line = String::from_utf8_lossy(&raw);
                let line = line.trim_end_matches(['\r', '\n']);
                if !line.trim().is_empty() {
                    logs.push(format!("{prefix}{line}"));
                }
            }
        }
    }
}
