//! Boot sequence and teardown. The controller owns the backend supervisor, the
//! gateway handle and the run state; nothing else mutates them.

use std::{
    path::{Path, PathBuf},
    sync::{atomic::AtomicBool, Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::task::JoinHandle;

use crate::{
    app_helpers,
    backend_logs::BackendLogBuffer,
    backend_process_lifecycle::BackendSupervisor,
    exit_state::{ShutdownMachine, ShutdownPhase, ShutdownTrigger},
    gateway_routes::RouteTable,
    launch_plan,
    local_gateway::{GatewayHandle, LocalGateway},
    logging, port_reconciler,
    shell_config::ShellConfig,
    shell_ui::ShellUi,
    update_apply,
    update_check::UpdateChecker,
    update_installer::UpdateInstaller,
    version_store::VersionStore,
    AtomicFlagGuard, BootError, DesktopAppUpdateCheckResult, InstallLayout, LaunchPlan, RunState,
    BACKEND_ERROR_LOG_FILE, BACKEND_LOG_BUFFER_LINES, BACKEND_LOG_MAX_BYTES, LOG_BACKUP_COUNT,
    UPDATE_CHECK_DELAY, UPDATE_SCRATCH_DIR_NAME,
};

/// Log sinks per concern. The desktop build routes them to the categorized
/// desktop log.
#[derive(Debug, Clone, Copy)]
pub struct ControllerLogs {
    pub startup: fn(&str),
    pub update: fn(&str),
    pub shutdown: fn(&str),
}

impl Default for ControllerLogs {
    fn default() -> Self {
        Self {
            startup: app_helpers::append_startup_log,
            update: app_helpers::append_update_log,
            shutdown: app_helpers::append_shutdown_log,
        }
    }
}

pub struct AppController {
    config: ShellConfig,
    layout: InstallLayout,
    versions: Arc<VersionStore>,
    supervisor: Arc<BackendSupervisor>,
    gateway: Mutex<Option<GatewayHandle>>,
    run_state: Mutex<RunState>,
    shutdown: Mutex<ShutdownMachine>,
    is_updating: AtomicBool,
    scratch_dir: PathBuf,
    gateway_retry_delay: Option<Duration>,
    logs: ControllerLogs,
}

impl AppController {
    /// Resolves the launch plan for `layout`; an unlaunchable backend is a
    /// boot failure.
    pub fn new(
        config: ShellConfig,
        layout: InstallLayout,
        app_root: &Path,
        bundled_version: &str,
        logs: ControllerLogs,
    ) -> Result<Self, BootError> {
        let plan = launch_plan::resolve_launch_plan(&layout, config.backend_port).map_err(
            |reason| BootError::Spawn {
                command: layout.backend_dir.display().to_string(),
                reason,
            },
        )?;
        Ok(Self::with_launch_plan(
            config,
            layout,
            plan,
            app_root,
            bundled_version,
            logs,
        ))
    }

    pub fn with_launch_plan(
        config: ShellConfig,
        layout: InstallLayout,
        plan: LaunchPlan,
        app_root: &Path,
        bundled_version: &str,
        logs: ControllerLogs,
    ) -> Self {
        let backend_logs = Arc::new(BackendLogBuffer::with_mirror(
            BACKEND_LOG_BUFFER_LINES,
            logging::resolve_backend_log_path(Some(app_root)),
            BACKEND_LOG_MAX_BYTES,
            LOG_BACKUP_COUNT,
        ));
        let supervisor = BackendSupervisor::new(
            plan,
            config.backend_base_url(),
            config.readiness.clone(),
            backend_logs,
            Some(app_root.join(BACKEND_ERROR_LOG_FILE)),
            logs.startup,
        );
        Self {
            versions: Arc::new(VersionStore::new(app_root, bundled_version)),
            supervisor: Arc::new(supervisor),
            gateway: Mutex::new(None),
            run_state: Mutex::new(RunState::default()),
            shutdown: Mutex::new(ShutdownMachine::default()),
            is_updating: AtomicBool::new(false),
            scratch_dir: std::env::temp_dir().join(UPDATE_SCRATCH_DIR_NAME),
            gateway_retry_delay: None,
            config,
            layout,
            logs,
        }
    }

    pub fn with_scratch_dir(mut self, scratch_dir: PathBuf) -> Self {
        self.scratch_dir = scratch_dir;
        self
    }

    pub fn with_gateway_retry_delay(mut self, delay: Duration) -> Self {
        self.gateway_retry_delay = Some(delay);
        self
    }

    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    pub fn versions(&self) -> &Arc<VersionStore> {
        &self.versions
    }

    pub fn supervisor(&self) -> &Arc<BackendSupervisor> {
        &self.supervisor
    }

    fn lock_run_state(&self) -> MutexGuard<'_, RunState> {
        match self.run_state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_shutdown(&self) -> MutexGuard<'_, ShutdownMachine> {
        match self.shutdown.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Snapshot with the live backend pid; an exit observed since startup
    /// clears `backend_ready`.
    pub fn run_state(&self) -> RunState {
        let mut state = self.lock_run_state().clone();
        state.backend_pid = self.supervisor.pid();
        state.backend_ready = state.backend_ready && state.backend_pid.is_some();
        state
    }

    pub fn mark_instance_lock_held(&self) {
        self.lock_run_state().lock_held = true;
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock_shutdown().is_shutting_down()
    }

    pub fn shutdown_phase(&self) -> ShutdownPhase {
        self.lock_shutdown().phase()
    }

    pub fn gateway_url(&self) -> String {
        match self.gateway_addr() {
            Some(addr) => format!("http://{addr}"),
            None => self.config.gateway_url(),
        }
    }

    pub fn gateway_addr(&self) -> Option<std::net::SocketAddr> {
        match self.gateway.lock() {
            Ok(guard) => guard.as_ref().map(GatewayHandle::local_addr),
            Err(poisoned) => poisoned.into_inner().as_ref().map(GatewayHandle::local_addr),
        }
    }

    /// Reclaims both ports, opens the gateway, then starts the backend and
    /// waits for it to become healthy. Phases run strictly in order.
    pub async fn start(&self, ui: &dyn ShellUi) -> Result<(), BootError> {
        let log = self.logs.startup;
        log(&format!(
            "boot: gateway_port={}, backend_port={}, packaged={}",
            self.config.gateway_port, self.config.backend_port, self.layout.packaged
        ));

        port_reconciler::reconcile(self.config.gateway_port, log).await;
        port_reconciler::reconcile(self.config.backend_port, log).await;

        if !self.layout.frontend_dir.is_dir() {
            return Err(BootError::FrontendMissing {
                path: self.layout.frontend_dir.clone(),
            });
        }

        let routes = RouteTable::standard(
            &self.config.backend_base_url(),
            self.layout.frontend_dir.clone(),
        );
        let mut gateway = LocalGateway::new(routes, log);
        if let Some(delay) = self.gateway_retry_delay {
            gateway = gateway.with_retry_delay(delay);
        }
        let handle = gateway.listen(self.config.gateway_port).await?;
        match self.gateway.lock() {
            Ok(mut guard) => *guard = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }
        self.lock_run_state().gateway_listening = true;

        self.supervisor.start(ui).await?;
        {
            let mut state = self.lock_run_state();
            state.backend_ready = true;
            state.backend_pid = self.supervisor.pid();
        }

        match self.versions.record_first_launch() {
            Ok(true) => log(&format!(
                "installed version recorded: {}",
                self.versions.current_version()
            )),
            Ok(false) => {}
            Err(error) => log(&format!("failed to record installed version: {error}")),
        }
        log(&format!(
            "boot complete: version={}, gateway={}",
            self.versions.current_version(),
            self.gateway_url()
        ));
        Ok(())
    }

    /// Stops the backend and closes the gateway. Only the first call does any
    /// work; later calls return `false`.
    pub async fn shutdown(&self, trigger: ShutdownTrigger) -> bool {
        let log = self.logs.shutdown;
        if !self.lock_shutdown().try_begin_teardown() {
            log(&format!(
                "teardown already handled, ignoring trigger={}",
                trigger.as_str()
            ));
            return false;
        }
        log(&format!("teardown started: trigger={}", trigger.as_str()));

        self.supervisor.stop().await;
        let handle = match self.gateway.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut handle) = handle {
            handle.shutdown().await;
        }
        {
            let mut state = self.lock_run_state();
            state.backend_pid = None;
            state.backend_ready = false;
            state.gateway_listening = false;
        }

        self.lock_shutdown().finish_teardown();
        log(&format!("teardown finished: trigger={}", trigger.as_str()));
        true
    }

    pub fn request_shutdown(&self) {
        self.lock_shutdown().request();
    }

    pub fn take_exit_allowance(&self) -> bool {
        self.lock_shutdown().take_exit_allowance()
    }

    /// Check → confirm → download → apply. Used for both the deferred check and
    /// the manual check command; concurrent runs are rejected.
    pub async fn check_for_updates(&self, ui: &dyn ShellUi) -> DesktopAppUpdateCheckResult {
        let log = self.logs.update;
        let current_version = self.versions.current_version();
        let result = |ok: bool, reason: Option<String>| DesktopAppUpdateCheckResult {
            ok,
            reason,
            current_version: current_version.clone(),
            latest_version: None,
            has_update: false,
            update_applied: false,
        };

        let Some(_updating) = AtomicFlagGuard::try_set(&self.is_updating) else {
            return result(false, Some("Update check already in progress.".to_string()));
        };

        let Some(feed) = self.config.release_feed.clone() else {
            let reason = "No release feed configured.".to_string();
            log(&reason);
            return result(false, Some(reason));
        };
        let checker = match UpdateChecker::new(feed, log) {
            Ok(checker) => checker,
            Err(error) => {
                log(&error);
                return result(false, Some(error));
            }
        };
        log(&format!(
            "checking for updates: current={current_version}, feed={}",
            checker.feed_url()
        ));
        let Some(release) = checker.check(&current_version).await else {
            return result(true, None);
        };
        log(&format!("update available: {}", release.version));

        let installer = match UpdateInstaller::new(
            self.scratch_dir.clone(),
            self.versions.clone(),
            self.supervisor.clone(),
            update_apply::archive_targets(&self.layout),
            log,
        ) {
            Ok(installer) => installer,
            Err(error) => {
                log(&error);
                return DesktopAppUpdateCheckResult {
                    latest_version: Some(release.version),
                    has_update: true,
                    ..result(false, Some(error))
                };
            }
        };
        let applied = installer.run(&release, ui).await;
        DesktopAppUpdateCheckResult {
            latest_version: Some(release.version),
            has_update: true,
            update_applied: applied,
            ..result(true, None)
        }
    }

    /// Fires the update flow a few seconds after the window is up. `None` when
    /// automatic checks are disabled.
    pub fn spawn_deferred_update_check(
        self: &Arc<Self>,
        ui: Arc<dyn ShellUi>,
    ) -> Option<JoinHandle<DesktopAppUpdateCheckResult>> {
        self.spawn_update_check_after(ui, UPDATE_CHECK_DELAY)
    }

    fn spawn_update_check_after(
        self: &Arc<Self>,
        ui: Arc<dyn ShellUi>,
        delay: Duration,
    ) -> Option<JoinHandle<DesktopAppUpdateCheckResult>> {
        if !self.config.auto_update_enabled {
            (self.logs.update)("automatic update check disabled");
            return None;
        }
        let controller = Arc::clone(self);
        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if controller.is_shutting_down() {
                return DesktopAppUpdateCheckResult {
                    ok: false,
                    reason: Some("Shutting down.".to_string()),
                    current_version: controller.versions.current_version(),
                    latest_version: None,
                    has_update: false,
                    update_applied: false,
                };
            }
            controller.check_for_updates(ui.as_ref()).await
        }))
    }
}
