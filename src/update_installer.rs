use std::{path::PathBuf, sync::Arc};

use crate::{
    backend_process_lifecycle::BackendSupervisor,
    shell_ui::{Acknowledgement, ShellUi, UpdatePrompt, UpdateProgressGuard},
    update_apply::{self, ArchiveTarget},
    update_check::{ArtifactKind, ReleaseAsset, ReleaseDescriptor},
    update_download::{self, DownloadJob},
    version_store::VersionStore,
    CHANGELOG_PREVIEW_CHARS,
};

const FALLBACK_INSTALLER_NAME: &str = "DemetSetup.exe";
const FALLBACK_ARCHIVE_NAME: &str = "demet-update.zip";

pub fn changelog_preview(changelog: &str) -> String {
    changelog.trim().chars().take(CHANGELOG_PREVIEW_CHARS).collect()
}

/// Runs confirm → download → apply for one release. Every failure is logged
/// and reported as `false`; the installed version keeps running untouched.
pub struct UpdateInstaller {
    client: reqwest::Client,
    scratch_dir: PathBuf,
    versions: Arc<VersionStore>,
    supervisor: Arc<BackendSupervisor>,
    archive_targets: Vec<ArchiveTarget>,
    log: fn(&str),
}

impl UpdateInstaller {
    pub fn new(
        scratch_dir: PathBuf,
        versions: Arc<VersionStore>,
        supervisor: Arc<BackendSupervisor>,
        archive_targets: Vec<ArchiveTarget>,
        log: fn(&str),
    ) -> Result<Self, String> {
        Ok(Self {
            client: update_download::build_download_client()?,
            scratch_dir,
            versions,
            supervisor,
            archive_targets,
            log,
        })
    }

    pub async fn run(&self, release: &ReleaseDescriptor, ui: &dyn ShellUi) -> bool {
        let log = self.log;
        let Some(asset) = &release.asset else {
            log(&format!(
                "update {} has no downloadable artifact, skipping install",
                release.version
            ));
            return false;
        };

        let prompt = UpdatePrompt {
            current_version: self.versions.current_version(),
            target_version: release.version.clone(),
            size_bytes: asset.size_bytes,
            changelog_preview: changelog_preview(&release.changelog),
            force_update: release.force_update,
        };
        if !ui.confirm_update(&prompt).await {
            log(&format!("update {} postponed by user", release.version));
            return false;
        }

        let job = match self.download(asset, ui).await {
            Ok(job) => job,
            Err(error) => {
                log(&format!("update download failed: {error}"));
                return false;
            }
        };
        log(&format!(
            "update downloaded: path={}, bytes={}",
            job.target_path.display(),
            job.bytes_received
        ));

        match asset.kind {
            ArtifactKind::Installer => self.apply_installer(release, &job, ui).await,
            ArtifactKind::Archive => {
                let applied = self.apply_archive(release, &job, ui).await;
                self.cleanup_scratch();
                applied
            }
        }
    }

    async fn download(&self, asset: &ReleaseAsset, ui: &dyn ShellUi) -> Result<DownloadJob, String> {
        let fallback = match asset.kind {
            ArtifactKind::Installer => FALLBACK_INSTALLER_NAME,
            ArtifactKind::Archive => FALLBACK_ARCHIVE_NAME,
        };
        let target = self
            .scratch_dir
            .join(update_download::artifact_file_name(&asset.url, fallback));
        (self.log)(&format!(
            "downloading update: url={}, target={}",
            asset.url,
            target.display()
        ));

        let _progress = UpdateProgressGuard::new(ui);
        let mut last_percent = None;
        update_download::download_artifact(&self.client, &asset.url, &target, |job| {
            let percent = job.percent();
            if percent.is_some() && percent != last_percent {
                last_percent = percent;
                ui.set_update_progress(percent);
            }
        })
        .await
    }

    async fn apply_installer(
        &self,
        release: &ReleaseDescriptor,
        job: &DownloadJob,
        ui: &dyn ShellUi,
    ) -> bool {
        let log = self.log;
        let previous = self.versions.load_or_bundled();
        if let Err(error) = self.versions.save_installed_version(&release.version) {
            log(&format!("failed to persist installed version: {error}"));
            return false;
        }

        ui.acknowledge(Acknowledgement::InstallerWillLaunch).await;
        if let Err(error) = update_apply::launch_installer_detached(&job.target_path, log) {
            log(&error);
            if let Err(restore_error) = self.versions.save_installed_version(&previous.version) {
                log(&format!("failed to restore installed version: {restore_error}"));
            }
            return false;
        }

        ui.request_exit(0);
        true
    }

    async fn apply_archive(
        &self,
        release: &ReleaseDescriptor,
        job: &DownloadJob,
        ui: &dyn ShellUi,
    ) -> bool {
        let log = self.log;
        let archive = job.target_path.clone();
        let scratch = self.scratch_dir.clone();
        let targets = self.archive_targets.clone();
        let staged = tokio::task::spawn_blocking(move || {
            update_apply::stage_archive_update(
                &archive,
                &scratch,
                &targets,
                update_apply::copy_file,
                log,
            )
        })
        .await
        .map_err(|error| format!("staging task failed: {error}"))
        .and_then(|result| result);
        let staged = match staged {
            Ok(staged) => staged,
            Err(error) => {
                log(&format!("update archive staging failed: {error}"));
                return false;
            }
        };

        self.supervisor.stop().await;
        let to_commit = staged.clone();
        let committed =
            tokio::task::spawn_blocking(move || update_apply::apply_archive(&to_commit, log))
                .await
                .map_err(|error| format!("apply task failed: {error}"))
                .and_then(|result| result);
        let committed = match committed {
            Ok(committed) => committed,
            Err(error) => {
                log(&format!("update archive apply failed, restoring backend: {error}"));
                update_apply::discard_staged(&staged);
                self.restart_previous_backend(ui).await;
                return false;
            }
        };

        if let Err(error) = self.versions.save_installed_version(&release.version) {
            log(&format!(
                "failed to persist installed version, rolling back update: {error}"
            ));
            committed.roll_back(log);
            self.restart_previous_backend(ui).await;
            return false;
        }
        committed.finalize(log);

        ui.acknowledge(Acknowledgement::ArchiveApplied).await;
        ui.request_relaunch();
        true
    }

    async fn restart_previous_backend(&self, ui: &dyn ShellUi) {
        if let Err(error) = self.supervisor.start(ui).await {
            (self.log)(&format!("failed to restart previous backend: {error}"));
        }
    }

    fn cleanup_scratch(&self) {
        if let Err(error) = std::fs::remove_dir_all(&self.scratch_dir) {
            if error.kind() != std::io::ErrorKind::NotFound {
                (self.log)(&format!(
                    "failed to clean update scratch dir {}: {error}",
                    self.scratch_dir.display()
                ));
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::{fs, path::Path, time::Duration};

    use axum::{routing::get, Router};
    use url::Url;

    use super::*;
    use crate::{
        backend_logs::BackendLogBuffer,
        shell_config::ReadinessConfig,
        shell_ui::testing::{RecordingUi, UiEvent},
        update_apply::{
            archive_targets,
            tests::{install_tree, write_archive},
        },
        LaunchPlan,
    };

    async fn serve_bytes(path: &'static str, bytes: Vec<u8>) -> String {
        let router = Router::new().route(path, get(move || async move { bytes }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind artifact host");
        let addr = listener.local_addr().expect("artifact host addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}{path}")
    }

    async fn serve_health() -> String {
        let router = Router::new().route("/health", get(|| async { "ok" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind health host");
        let addr = listener.local_addr().expect("health host addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    fn idle_supervisor(cwd: &Path) -> Arc<BackendSupervisor> {
        sleeping_supervisor(cwd, "http://127.0.0.1:9", Duration::from_millis(300))
    }

    fn sleeping_supervisor(
        cwd: &Path,
        base_url: &str,
        boot_timeout: Duration,
    ) -> Arc<BackendSupervisor> {
        let plan = LaunchPlan {
            cmd: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 30".to_string()],
            cwd: cwd.to_path_buf(),
            envs: Vec::new(),
            packaged_mode: false,
        };
        let readiness = ReadinessConfig {
            health_path: "/health".to_string(),
            poll_interval: Duration::from_millis(50),
            probe_timeout: Duration::from_millis(200),
            boot_timeout: Some(boot_timeout),
        };
        Arc::new(
            BackendSupervisor::new(
                plan,
                base_url,
                readiness,
                Arc::new(BackendLogBuffer::new(50)),
                None,
                |_| {},
            )
            .with_stop_timeout(Duration::from_secs(1)),
        )
    }

    fn release(url: &str, kind: ArtifactKind, force_update: bool) -> ReleaseDescriptor {
        ReleaseDescriptor {
            version: "1.1.0".to_string(),
            changelog: "x".repeat(CHANGELOG_PREVIEW_CHARS + 50),
            asset: Some(ReleaseAsset {
                name: "artifact".to_string(),
                url: Url::parse(url).expect("artifact url"),
                size_bytes: 2 * 1024 * 1024,
                kind,
            }),
            force_update,
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        versions: Arc<VersionStore>,
        supervisor: Arc<BackendSupervisor>,
        installer: UpdateInstaller,
    }

    fn fixture() -> Fixture {
        fixture_with(idle_supervisor)
    }

    fn fixture_with(supervisor: impl FnOnce(&Path) -> Arc<BackendSupervisor>) -> Fixture {
        let dir = tempfile::tempdir().expect("create temp dir");
        let root = dir.path().to_path_buf();
        let layout = install_tree(&root.join("install"));
        let versions = Arc::new(VersionStore::new(&root, "1.0.0"));
        let supervisor = supervisor(&root);
        let installer = UpdateInstaller::new(
            root.join("scratch"),
            versions.clone(),
            supervisor.clone(),
            archive_targets(&layout),
            |_| {},
        )
        .expect("build installer");
        Fixture {
            _dir: dir,
            root,
            versions,
            supervisor,
            installer,
        }
    }

    async fn serve_v2_archive(root: &Path) -> String {
        let archive_path = root.join("built.zip");
        write_archive(
            &archive_path,
            &[
                ("backend/Demet.exe", "backend v2"),
                ("frontend-out/index.html", "ui v2"),
            ],
        );
        serve_bytes("/update-1.1.0.zip", fs::read(&archive_path).expect("read zip")).await
    }

    fn installed(fixture: &Fixture, relative: &str) -> String {
        fs::read_to_string(fixture.root.join("install").join(relative)).expect("read install tree")
    }

    fn leftover_siblings(fixture: &Fixture) -> Vec<String> {
        fs::read_dir(fixture.root.join("install"))
            .expect("list install dir")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".demet-old") || name.ends_with(".demet-staged"))
            .collect()
    }

    #[tokio::test]
    async fn declined_prompt_has_no_side_effects() {
        let fixture = fixture();
        let ui = RecordingUi::declining();
        let applied = fixture
            .installer
            .run(&release("http://127.0.0.1:9/u.zip", ArtifactKind::Archive, false), &ui)
            .await;
        assert!(!applied);
        assert!(!fixture.versions.has_record());
        assert!(!fixture.root.join("scratch").exists());
        let events = ui.events();
        assert_eq!(events.len(), 1);
        let UiEvent::Prompted(prompt) = &events[0] else {
            panic!("expected prompt, got {events:?}");
        };
        assert_eq!(prompt.current_version, "1.0.0");
        assert_eq!(prompt.changelog_preview.chars().count(), CHANGELOG_PREVIEW_CHARS);
    }

    #[tokio::test]
    async fn archive_update_swaps_trees_persists_version_and_relaunches() {
        let fixture = fixture();
        let url = serve_v2_archive(&fixture.root).await;

        let ui = RecordingUi::declining();
        let applied = fixture
            .installer
            .run(&release(&url, ArtifactKind::Archive, true), &ui)
            .await;

        assert!(applied);
        assert_eq!(fixture.versions.current_version(), "1.1.0");
        assert_eq!(installed(&fixture, "backend/Demet.exe"), "backend v2");
        assert_eq!(installed(&fixture, "frontend-out/index.html"), "ui v2");
        assert!(leftover_siblings(&fixture).is_empty());
        assert!(!fixture.root.join("scratch").exists());

        let events = ui.events();
        assert!(matches!(events.first(), Some(UiEvent::Prompted(_))));
        assert!(events.contains(&UiEvent::Progress(Some(100))));
        let tail: Vec<&UiEvent> = events.iter().rev().take(3).collect();
        assert_eq!(
            tail,
            vec![
                &UiEvent::Relaunch,
                &UiEvent::Acknowledged(Acknowledgement::ArchiveApplied),
                &UiEvent::Progress(None),
            ]
        );
    }

    #[tokio::test]
    async fn broken_archive_keeps_previous_version_and_tree() {
        let fixture = fixture();
        let url = serve_bytes("/update.zip", b"this is not a zip".to_vec()).await;
        let ui = RecordingUi::accepting();

        let applied = fixture
            .installer
            .run(&release(&url, ArtifactKind::Archive, false), &ui)
            .await;

        assert!(!applied);
        assert!(!fixture.versions.has_record());
        assert_eq!(fixture.versions.current_version(), "1.0.0");
        assert_eq!(
            fs::read_to_string(fixture.root.join("install").join("backend").join("Demet.exe"))
                .expect("read backend"),
            "backend v1"
        );
        assert!(!ui.events().contains(&UiEvent::Relaunch));
        assert_eq!(ui.events().last(), Some(&UiEvent::Progress(None)));
    }

    #[tokio::test]
    async fn download_failure_clears_progress_and_returns_false() {
        let fixture = fixture();
        let dead_port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
            probe.local_addr().expect("probe addr").port()
        };
        let ui = RecordingUi::accepting();
        let applied = fixture
            .installer
            .run(
                &release(
                    &format!("http://127.0.0.1:{dead_port}/Demet-Setup.exe"),
                    ArtifactKind::Installer,
                    false,
                ),
                &ui,
            )
            .await;
        assert!(!applied);
        assert!(!fixture.versions.has_record());
        assert_eq!(ui.events().last(), Some(&UiEvent::Progress(None)));
    }

    #[tokio::test]
    async fn release_without_asset_is_skipped_without_prompt() {
        let fixture = fixture();
        let ui = RecordingUi::accepting();
        let mut bare = release("http://127.0.0.1:9/x.exe", ArtifactKind::Installer, false);
        bare.asset = None;
        assert!(!fixture.installer.run(&bare, &ui).await);
        assert!(ui.events().is_empty());
    }

    #[tokio::test]
    async fn failed_version_save_rolls_back_swapped_trees() {
        let health_url = serve_health().await;
        let fixture = fixture_with(|root| {
            sleeping_supervisor(root, &health_url, Duration::from_secs(3))
        });
        fixture
            .supervisor
            .start(&RecordingUi::accepting())
            .await
            .expect("start backend");
        fs::create_dir(fixture.root.join("installed_version.json.tmp"))
            .expect("block version record");
        let url = serve_v2_archive(&fixture.root).await;

        let ui = RecordingUi::accepting();
        let applied = fixture
            .installer
            .run(&release(&url, ArtifactKind::Archive, true), &ui)
            .await;

        assert!(!applied);
        assert!(!fixture.versions.has_record());
        assert_eq!(fixture.versions.current_version(), "1.0.0");
        assert_eq!(installed(&fixture, "backend/Demet.exe"), "backend v1");
        assert_eq!(installed(&fixture, "backend/demet.db"), "user data");
        assert_eq!(installed(&fixture, "frontend-out/index.html"), "ui v1");
        assert!(leftover_siblings(&fixture).is_empty());
        assert!(fixture.supervisor.is_running());
        let events = ui.events();
        assert!(!events.contains(&UiEvent::Relaunch));
        assert!(!events.contains(&UiEvent::Acknowledged(Acknowledgement::ArchiveApplied)));

        fixture.supervisor.stop().await;
    }

    #[tokio::test]
    async fn failed_swap_restarts_previous_backend() {
        let health_url = serve_health().await;
        let fixture = fixture_with(|root| {
            sleeping_supervisor(root, &health_url, Duration::from_secs(3))
        });
        fixture
            .supervisor
            .start(&RecordingUi::accepting())
            .await
            .expect("start backend");
        assert!(fixture.supervisor.is_running());
        // A plain file where the frontend backup goes makes the second swap fail.
        fs::write(
            fixture.root.join("install").join("frontend-out.demet-old"),
            "stale",
        )
        .expect("block frontend backup");
        let url = serve_v2_archive(&fixture.root).await;

        let ui = RecordingUi::accepting();
        let applied = fixture
            .installer
            .run(&release(&url, ArtifactKind::Archive, true), &ui)
            .await;

        assert!(!applied);
        assert!(!fixture.versions.has_record());
        assert_eq!(fixture.versions.current_version(), "1.0.0");
        assert_eq!(installed(&fixture, "backend/Demet.exe"), "backend v1");
        assert_eq!(installed(&fixture, "frontend-out/index.html"), "ui v1");
        assert!(!fixture.root.join("install").join("backend.demet-old").exists());
        assert!(fixture.supervisor.is_running());
        assert!(!ui.events().contains(&UiEvent::Relaunch));

        fixture.supervisor.stop().await;
    }
}
