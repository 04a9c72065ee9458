use std::time::Duration;

use tokio::time::Instant;

use crate::{
    backend_process_lifecycle::{exit_code_label, BackendSupervisor},
    BootError, BACKEND_ERROR_TAIL_LINES,
};

const CAPTURE_DRAIN_LIMIT: Duration = Duration::from_millis(500);
const EMPTY_LOG_PLACEHOLDER: &str = "(no output captured - the backend never wrote to stdout/stderr)";

struct ObservedExit {
    description: String,
    code: Option<String>,
}

impl BackendSupervisor {
    /// Polls the health endpoint until it answers with a success status, the
    /// process exits, or the boot timeout elapses. Returns on the first success
    /// and never polls again afterwards.
    pub async fn wait_until_healthy(&self) -> Result<(), BootError> {
        let health_url = format!("{}{}", self.base_url, self.readiness.health_path);
        let started = Instant::now();
        let mut last_status: Option<u16> = None;

        loop {
            match self.probe_health(&health_url).await {
                Ok(status) if (200..300).contains(&status) => return Ok(()),
                Ok(status) => last_status = Some(status),
                Err(_) => {}
            }

            if let Some(exit) = self.poll_backend_exit() {
                self.drain_capture_tasks().await;
                if let Some(code) = &exit.code {
                    self.logs.push(format!("EXIT CODE: {code}"));
                }
                self.write_error_log();
                return Err(BootError::BackendExited {
                    status: exit.description,
                    log_tail: self.error_tail(),
                });
            }

            if let Some(limit) = self.readiness.boot_timeout {
                if started.elapsed() >= limit {
                    (self.log)(&format!(
                        "backend health check timed out after {}ms: url={}, probe_timeout_ms={}, last_http_status={}",
                        limit.as_millis(),
                        health_url,
                        self.readiness.probe_timeout.as_millis(),
                        last_status
                            .map(|status| status.to_string())
                            .unwrap_or_else(|| "none".to_string())
                    ));
                    self.write_error_log();
                    return Err(BootError::HealthTimeout {
                        timeout_ms: limit.as_millis(),
                        log_tail: self.error_tail(),
                    });
                }
            }

            tokio::time::sleep(self.readiness.poll_interval).await;
        }
    }

    async fn probe_health(&self, url: &str) -> Result<u16, reqwest::Error> {
        let response = self
            .http
            .get(url)
            .timeout(self.readiness.probe_timeout)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }

    /// `Some` when the tracked child is gone; the handle is cleared.
    fn poll_backend_exit(&self) -> Option<ObservedExit> {
        let mut guard = self.lock_child();
        let Some(running) = guard.as_mut() else {
            return Some(ObservedExit {
                description: "backend process is not running".to_string(),
                code: None,
            });
        };
        match running.child.try_wait() {
            Ok(None) => None,
            Ok(Some(status)) => {
                let code = exit_code_label(&status);
                *guard = None;
                Some(ObservedExit {
                    description: format!("exit code {code}"),
                    code: Some(code),
                })
            }
            Err(error) => Some(ObservedExit {
                description: format!("failed to poll backend process: {error}"),
                code: None,
            }),
        }
    }

    async fn drain_capture_tasks(&self) {
        let tasks = match self.capture_tasks.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for task in tasks {
            let _ = tokio::time::timeout(CAPTURE_DRAIN_LIMIT, task).await;
        }
    }

    fn error_tail(&self) -> String {
        let tail = self.logs.tail(BACKEND_ERROR_TAIL_LINES);
        if tail.is_empty() {
            EMPTY_LOG_PLACEHOLDER.to_string()
        } else {
            tail
        }
    }

    fn write_error_log(&self) {
        let Some(path) = &self.error_log_path else {
            return;
        };
        match self.logs.dump_to(path) {
            Ok(()) => (self.log)(&format!("backend error log written: {}", path.display())),
            Err(error) => (self.log)(&format!("failed to write backend error log: {error}")),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::{
        path::PathBuf,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use axum::{extract::State, http::StatusCode, routing::get, Router};

    use crate::{
        backend_logs::BackendLogBuffer,
        backend_process_lifecycle::BackendSupervisor,
        shell_config::ReadinessConfig,
        shell_ui::testing::{RecordingUi, UiEvent},
        BootError, LaunchPlan,
    };

    struct FakeBackend {
        base_url: String,
        hits: Arc<AtomicUsize>,
    }

    async fn spawn_fake_backend(status: StatusCode) -> FakeBackend {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/health",
                get(|State((hits, status)): State<(Arc<AtomicUsize>, StatusCode)>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    status
                }),
            )
            .with_state((hits.clone(), status));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake backend");
        let addr = listener.local_addr().expect("fake backend addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        FakeBackend {
            base_url: format!("http://{addr}"),
            hits,
        }
    }

    fn shell_plan(script: &str, cwd: PathBuf) -> LaunchPlan {
        LaunchPlan {
            cmd: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            cwd,
            envs: Vec::new(),
            packaged_mode: false,
        }
    }

    fn readiness(boot_timeout: Duration) -> ReadinessConfig {
        ReadinessConfig {
            health_path: "/health".to_string(),
            poll_interval: Duration::from_millis(50),
            probe_timeout: Duration::from_millis(500),
            boot_timeout: Some(boot_timeout),
        }
    }

    fn supervisor(plan: LaunchPlan, base_url: &str, boot_timeout: Duration) -> BackendSupervisor {
        BackendSupervisor::new(
            plan,
            base_url,
            readiness(boot_timeout),
            Arc::new(BackendLogBuffer::new(100)),
            None,
            |_| {},
        )
        .with_stop_timeout(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn start_resolves_once_health_succeeds_and_stops_polling() {
        let backend = spawn_fake_backend(StatusCode::OK).await;
        let dir = tempfile::tempdir().expect("create temp dir");
        let supervisor = supervisor(
            shell_plan("sleep 30", dir.path().to_path_buf()),
            &backend.base_url,
            Duration::from_secs(10),
        );
        let ui = RecordingUi::accepting();

        supervisor.start(&ui).await.expect("backend should become healthy");
        assert!(supervisor.is_running());
        let hits_at_ready = backend.hits.load(Ordering::SeqCst);
        assert_eq!(hits_at_ready, 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(backend.hits.load(Ordering::SeqCst), hits_at_ready);
        assert_eq!(
            ui.events(),
            vec![UiEvent::LoadingShown, UiEvent::LoadingHidden]
        );

        supervisor.stop().await;
        assert!(!supervisor.is_running());
        supervisor.stop().await;
        assert!(supervisor.pid().is_none());
    }

    #[tokio::test]
    async fn health_timeout_error_contains_last_log_line() {
        let backend = spawn_fake_backend(StatusCode::SERVICE_UNAVAILABLE).await;
        let dir = tempfile::tempdir().expect("create temp dir");
        let error_log = dir.path().join("backend_error.log");
        let supervisor = BackendSupervisor::new(
            shell_plan(
                "echo 'loading accounts'; echo 'migration stuck on table hashtags' >&2; sleep 30",
                dir.path().to_path_buf(),
            ),
            &backend.base_url,
            readiness(Duration::from_millis(800)),
            Arc::new(BackendLogBuffer::new(100)),
            Some(error_log.clone()),
            |_| {},
        )
        .with_stop_timeout(Duration::from_secs(2));
        let ui = RecordingUi::accepting();

        let error = supervisor.start(&ui).await.expect_err("health should time out");
        assert!(matches!(error, BootError::HealthTimeout { .. }));
        let message = error.to_string();
        assert!(message.contains("ERR: migration stuck on table hashtags"));
        assert!(message.contains("loading accounts"));

        let dumped = std::fs::read_to_string(&error_log).expect("error log written");
        assert!(dumped.contains("migration stuck on table hashtags"));
        assert!(!supervisor.is_running());
        assert_eq!(
            ui.events(),
            vec![UiEvent::LoadingShown, UiEvent::LoadingHidden]
        );
    }

    #[tokio::test]
    async fn early_exit_is_reported_with_exit_code_and_output() {
        let backend = spawn_fake_backend(StatusCode::SERVICE_UNAVAILABLE).await;
        let dir = tempfile::tempdir().expect("create temp dir");
        let supervisor = supervisor(
            shell_plan(
                "echo 'ModuleNotFoundError: fastapi' >&2; exit 3",
                dir.path().to_path_buf(),
            ),
            &backend.base_url,
            Duration::from_secs(10),
        );

        let error = supervisor
            .start(&RecordingUi::accepting())
            .await
            .expect_err("backend exits early");
        let BootError::BackendExited { status, log_tail } = error else {
            panic!("expected BackendExited, got {error:?}");
        };
        assert_eq!(status, "exit code 3");
        assert!(log_tail.contains("ERR: ModuleNotFoundError: fastapi"));
        assert!(log_tail.ends_with("EXIT CODE: 3"));
    }

    #[tokio::test]
    async fn missing_executable_is_a_spawn_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let plan = LaunchPlan {
            cmd: dir
                .path()
                .join("Demet")
                .to_string_lossy()
                .to_string(),
            args: Vec::new(),
            cwd: dir.path().to_path_buf(),
            envs: Vec::new(),
            packaged_mode: true,
        };
        let supervisor = supervisor(plan, "http://127.0.0.1:9", Duration::from_secs(1));
        let error = supervisor
            .start(&RecordingUi::accepting())
            .await
            .expect_err("spawn should fail");
        assert!(matches!(error, BootError::Spawn { .. }));
        assert!(supervisor.pid().is_none());
    }

    #[tokio::test]
    async fn exit_after_readiness_clears_handle() {
        let backend = spawn_fake_backend(StatusCode::OK).await;
        let dir = tempfile::tempdir().expect("create temp dir");
        let supervisor = supervisor(
            shell_plan("sleep 0.3; exit 7", dir.path().to_path_buf()),
            &backend.base_url,
            Duration::from_secs(10),
        );

        supervisor
            .start(&RecordingUi::accepting())
            .await
            .expect("backend ready");
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(supervisor.pid().is_none());
        assert!(supervisor.logs().tail(1).contains("EXIT CODE: 7"));
    }
}
