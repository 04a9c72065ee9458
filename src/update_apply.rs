//! Apply strategies for downloaded artifacts: a silent detached installer, or
//! an update archive staged beside the install and swapped in with renames.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use crate::{InstallLayout, ARCHIVE_BACKEND_SUBTREE, ARCHIVE_FRONTEND_SUBTREE, INSTALLER_SILENT_FLAG};

#[cfg(target_os = "windows")]
use crate::{CREATE_NO_WINDOW, DETACHED_PROCESS};

const STAGED_SUFFIX: &str = "demet-staged";
const BACKUP_SUFFIX: &str = "demet-old";

/// Launches the installer with the silent flag, fully detached from this
/// process so it survives the shell exiting.
pub fn launch_installer_detached<F>(installer: &Path, log: F) -> Result<u32, String>
where
    F: Fn(&str),
{
    if !installer.is_file() {
        return Err(format!("Installer not found: {}", installer.display()));
    }
    let mut command = Command::new(installer);
    command
        .arg(INSTALLER_SILENT_FLAG)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if let Some(parent) = installer.parent() {
        command.current_dir(parent);
    }
    #[cfg(target_os = "windows")]
    {
        use std::os::windows::process::CommandExt;
        command.creation_flags(DETACHED_PROCESS | CREATE_NO_WINDOW);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let child = command.spawn().map_err(|error| {
        format!(
            "Failed to launch installer {}: {error}",
            installer.display()
        )
    })?;
    let pid = child.id();
    log(&format!(
        "installer launched detached: path={}, pid={pid}",
        installer.display()
    ));
    Ok(pid)
}

/// Archive subtree → installed directory it replaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveTarget {
    pub subtree: String,
    pub install_dir: PathBuf,
}

pub fn archive_targets(layout: &InstallLayout) -> Vec<ArchiveTarget> {
    vec![
        ArchiveTarget {
            subtree: ARCHIVE_BACKEND_SUBTREE.to_string(),
            install_dir: layout.backend_dir.clone(),
        },
        ArchiveTarget {
            subtree: ARCHIVE_FRONTEND_SUBTREE.to_string(),
            install_dir: layout.frontend_dir.clone(),
        },
    ]
}

/// A fully built replacement for one installed directory, not yet live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedTree {
    pub install_dir: PathBuf,
    pub staged_dir: PathBuf,
    pub backup_dir: PathBuf,
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

fn remove_dir_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}

pub fn copy_file(source: &Path, destination: &Path) -> io::Result<()> {
    fs::copy(source, destination).map(|_| ())
}

/// Extracts every entry of `archive` under `destination`. Entries whose names
/// would land outside `destination` are rejected.
pub fn extract_archive(archive: &Path, destination: &Path) -> Result<usize, String> {
    let file = fs::File::open(archive)
        .map_err(|error| format!("Failed to open archive {}: {error}", archive.display()))?;
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|error| format!("Failed to read archive {}: {error}", archive.display()))?;
    fs::create_dir_all(destination).map_err(|error| {
        format!(
            "Failed to create extraction dir {}: {error}",
            destination.display()
        )
    })?;

    let mut extracted = 0;
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|error| format!("Failed to read archive entry #{index}: {error}"))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(format!("Archive entry escapes extraction root: {}", entry.name()));
        };
        let out_path = destination.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|error| {
                format!("Failed to create {}: {error}", out_path.display())
            })?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|error| format!("Failed to create {}: {error}", parent.display()))?;
        }
        let mut output = fs::File::create(&out_path)
            .map_err(|error| format!("Failed to create {}: {error}", out_path.display()))?;
        io::copy(&mut entry, &mut output)
            .map_err(|error| format!("Failed to extract {}: {error}", out_path.display()))?;
        extracted += 1;
    }
    Ok(extracted)
}

fn copy_tree<C>(source: &Path, destination: &Path, copy: &C) -> Result<usize, String>
where
    C: Fn(&Path, &Path) -> io::Result<()>,
{
    fs::create_dir_all(destination)
        .map_err(|error| format!("Failed to create {}: {error}", destination.display()))?;
    let entries = fs::read_dir(source)
        .map_err(|error| format!("Failed to read {}: {error}", source.display()))?;
    let mut copied = 0;
    for entry in entries {
        let entry = entry.map_err(|error| format!("Failed to read {}: {error}", source.display()))?;
        let from = entry.path();
        let to = destination.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|error| format!("Failed to stat {}: {error}", from.display()))?;
        if file_type.is_dir() {
            copied += copy_tree(&from, &to, copy)?;
        } else {
            copy(&from, &to).map_err(|error| {
                format!(
                    "Failed to copy {} -> {}: {error}",
                    from.display(),
                    to.display()
                )
            })?;
            copied += 1;
        }
    }
    Ok(copied)
}

pub fn discard_staged(staged: &[StagedTree]) {
    for tree in staged {
        let _ = remove_dir_if_present(&tree.staged_dir);
    }
}

/// Builds `<install>.demet-staged` for every target the archive carries: the
/// current tree copied first, then the archive files overlaid. Nothing live is
/// touched; on error every staging directory is removed.
pub fn stage_archive_update<C, F>(
    archive: &Path,
    scratch_dir: &Path,
    targets: &[ArchiveTarget],
    copy: C,
    log: F,
) -> Result<Vec<StagedTree>, String>
where
    C: Fn(&Path, &Path) -> io::Result<()>,
    F: Fn(&str),
{
    let extract_root = scratch_dir.join("extracted");
    remove_dir_if_present(&extract_root).map_err(|error| {
        format!(
            "Failed to clear extraction dir {}: {error}",
            extract_root.display()
        )
    })?;
    let extracted = extract_archive(archive, &extract_root)?;
    log(&format!(
        "update archive extracted: files={extracted}, dir={}",
        extract_root.display()
    ));

    let mut staged = Vec::new();
    for target in targets {
        let subtree = extract_root.join(&target.subtree);
        if !subtree.is_dir() {
            log(&format!("archive has no {} subtree, skipping", target.subtree));
            continue;
        }
        let tree = StagedTree {
            install_dir: target.install_dir.clone(),
            staged_dir: sibling_with_suffix(&target.install_dir, STAGED_SUFFIX),
            backup_dir: sibling_with_suffix(&target.install_dir, BACKUP_SUFFIX),
        };
        staged.push(tree.clone());

        let result = remove_dir_if_present(&tree.staged_dir)
            .map_err(|error| {
                format!("Failed to clear {}: {error}", tree.staged_dir.display())
            })
            .and_then(|()| {
                let kept = if tree.install_dir.is_dir() {
                    copy_tree(&tree.install_dir, &tree.staged_dir, &copy)?
                } else {
                    0
                };
                let overlaid = copy_tree(&subtree, &tree.staged_dir, &copy)?;
                Ok((kept, overlaid))
            });
        match result {
            Ok((kept, overlaid)) => log(&format!(
                "staged {}: kept={kept}, overlaid={overlaid}",
                tree.install_dir.display()
            )),
            Err(error) => {
                discard_staged(&staged);
                return Err(error);
            }
        }
    }

    if staged.is_empty() {
        return Err(format!(
            "Update archive contains neither {ARCHIVE_BACKEND_SUBTREE}/ nor {ARCHIVE_FRONTEND_SUBTREE}/"
        ));
    }
    Ok(staged)
}

fn swap_in(tree: &StagedTree) -> io::Result<bool> {
    remove_dir_if_present(&tree.backup_dir)?;
    let had_install = tree.install_dir.exists();
    if had_install {
        fs::rename(&tree.install_dir, &tree.backup_dir)?;
    }
    if let Err(error) = fs::rename(&tree.staged_dir, &tree.install_dir) {
        if had_install {
            let _ = fs::rename(&tree.backup_dir, &tree.install_dir);
        }
        return Err(error);
    }
    Ok(had_install)
}

fn roll_back(tree: &StagedTree, had_install: bool) {
    let _ = remove_dir_if_present(&tree.install_dir);
    if had_install {
        let _ = fs::rename(&tree.backup_dir, &tree.install_dir);
    }
}

/// Trees made live by [`apply_archive`]. The previous contents stay beside
/// them as `.demet-old` until the swap is finalized or rolled back.
#[derive(Debug)]
#[must_use]
pub struct CommittedSwap {
    trees: Vec<(StagedTree, bool)>,
}

impl CommittedSwap {
    /// Drops the backups; the new trees become the only copy.
    pub fn finalize<F>(self, log: F)
    where
        F: Fn(&str),
    {
        for (tree, _) in &self.trees {
            if let Err(error) = remove_dir_if_present(&tree.backup_dir) {
                log(&format!(
                    "failed to remove previous tree {}: {error}",
                    tree.backup_dir.display()
                ));
            }
        }
        log(&format!("update archive applied to {} tree(s)", self.trees.len()));
    }

    /// Puts the previous trees back in place, newest swap first.
    pub fn roll_back<F>(self, log: F)
    where
        F: Fn(&str),
    {
        for (tree, had_install) in self.trees.iter().rev() {
            roll_back(tree, *had_install);
        }
        log(&format!("update archive rolled back for {} tree(s)", self.trees.len()));
    }
}

/// Makes every staged tree live with directory renames. If any rename fails,
/// the trees already swapped are restored and the error is returned; the
/// previous install is left as it was.
pub fn apply_archive<F>(staged: &[StagedTree], log: F) -> Result<CommittedSwap, String>
where
    F: Fn(&str),
{
    let mut committed = CommittedSwap { trees: Vec::new() };
    for tree in staged {
        match swap_in(tree) {
            Ok(had_install) => committed.trees.push((tree.clone(), had_install)),
            Err(error) => {
                committed.roll_back(&log);
                discard_staged(staged);
                return Err(format!(
                    "Failed to swap in {}: {error}",
                    tree.install_dir.display()
                ));
            }
        }
    }
    log(&format!("swapped in {} staged tree(s)", staged.len()));
    Ok(committed)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        io::Write,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use zip::write::SimpleFileOptions;

    use super::*;

    pub(crate) fn write_archive(path: &Path, entries: &[(&str, &str)]) {
        let file = fs::File::create(path).expect("create archive");
        let mut writer = zip::ZipWriter::new(file);
        for (name, contents) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .expect("start archive entry");
            writer
                .write_all(contents.as_bytes())
                .expect("write archive entry");
        }
        writer.finish().expect("finish archive");
    }

    pub(crate) fn install_tree(root: &Path) -> InstallLayout {
        let backend_dir = root.join("backend");
        let frontend_dir = root.join("frontend-out");
        fs::create_dir_all(backend_dir.join("_internal")).expect("create backend");
        fs::create_dir_all(&frontend_dir).expect("create frontend");
        fs::write(backend_dir.join("Demet.exe"), "backend v1").expect("write backend exe");
        fs::write(backend_dir.join("_internal").join("lib.pyd"), "lib v1").expect("write lib");
        fs::write(backend_dir.join("demet.db"), "user data").expect("write db");
        fs::write(frontend_dir.join("index.html"), "ui v1").expect("write index");
        InstallLayout {
            backend_dir,
            frontend_dir,
            packaged: true,
        }
    }

    fn read(path: &Path) -> String {
        fs::read_to_string(path).expect("read file")
    }

    #[test]
    fn staged_update_overlays_archive_and_keeps_other_files() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let layout = install_tree(&dir.path().join("install"));
        let archive = dir.path().join("update-1.1.0.zip");
        write_archive(
            &archive,
            &[
                ("backend/Demet.exe", "backend v2"),
                ("backend/_internal/lib.pyd", "lib v2"),
                ("frontend-out/index.html", "ui v2"),
                ("frontend-out/_next/app.js", "js v2"),
            ],
        );
        let scratch = dir.path().join("scratch");

        let staged = stage_archive_update(
            &archive,
            &scratch,
            &archive_targets(&layout),
            copy_file,
            |_| {},
        )
        .expect("stage update");
        assert_eq!(staged.len(), 2);
        assert_eq!(read(&layout.backend_dir.join("Demet.exe")), "backend v1");

        apply_archive(&staged, |_| {})
            .expect("apply update")
            .finalize(|_| {});
        assert_eq!(read(&layout.backend_dir.join("Demet.exe")), "backend v2");
        assert_eq!(read(&layout.backend_dir.join("demet.db")), "user data");
        assert_eq!(read(&layout.frontend_dir.join("_next").join("app.js")), "js v2");
        for tree in &staged {
            assert!(!tree.staged_dir.exists());
            assert!(!tree.backup_dir.exists());
        }
    }

    #[test]
    fn copy_failure_mid_stage_leaves_install_untouched() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let layout = install_tree(&dir.path().join("install"));
        let archive = dir.path().join("update.zip");
        write_archive(
            &archive,
            &[
                ("backend/Demet.exe", "backend v2"),
                ("frontend-out/index.html", "ui v2"),
            ],
        );

        let copies = AtomicUsize::new(0);
        let error = stage_archive_update(
            &archive,
            &dir.path().join("scratch"),
            &archive_targets(&layout),
            |from: &Path, to: &Path| {
                if copies.fetch_add(1, Ordering::SeqCst) == 4 {
                    return Err(io::Error::new(io::ErrorKind::PermissionDenied, "file in use"));
                }
                copy_file(from, to)
            },
            |_| {},
        )
        .expect_err("staging fails");
        assert!(error.contains("file in use"));
        assert_eq!(read(&layout.backend_dir.join("Demet.exe")), "backend v1");
        assert_eq!(read(&layout.frontend_dir.join("index.html")), "ui v1");
        assert!(!sibling_with_suffix(&layout.backend_dir, STAGED_SUFFIX).exists());
        assert!(!sibling_with_suffix(&layout.frontend_dir, STAGED_SUFFIX).exists());
    }

    #[test]
    fn archive_without_known_subtrees_is_rejected() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let layout = install_tree(&dir.path().join("install"));
        let archive = dir.path().join("update.zip");
        write_archive(&archive, &[("readme.txt", "hello")]);
        let error = stage_archive_update(
            &archive,
            &dir.path().join("scratch"),
            &archive_targets(&layout),
            copy_file,
            |_| {},
        )
        .expect_err("nothing to stage");
        assert!(error.contains("neither backend/ nor frontend-out/"));
    }

    #[test]
    fn failed_swap_rolls_back_committed_trees() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let layout = install_tree(&dir.path().join("install"));
        let staged_backend = sibling_with_suffix(&layout.backend_dir, STAGED_SUFFIX);
        fs::create_dir_all(&staged_backend).expect("create staged backend");
        fs::write(staged_backend.join("Demet.exe"), "backend v2").expect("write staged exe");

        let staged = vec![
            StagedTree {
                install_dir: layout.backend_dir.clone(),
                staged_dir: staged_backend,
                backup_dir: sibling_with_suffix(&layout.backend_dir, BACKUP_SUFFIX),
            },
            StagedTree {
                install_dir: layout.frontend_dir.clone(),
                staged_dir: dir.path().join("does-not-exist"),
                backup_dir: sibling_with_suffix(&layout.frontend_dir, BACKUP_SUFFIX),
            },
        ];
        apply_archive(&staged, |_| {}).expect_err("second swap fails");
        assert_eq!(read(&layout.backend_dir.join("Demet.exe")), "backend v1");
        assert_eq!(read(&layout.frontend_dir.join("index.html")), "ui v1");
    }

    fn staged_pair(dir: &Path) -> (InstallLayout, Vec<StagedTree>) {
        let layout = install_tree(&dir.join("install"));
        let archive = dir.join("update.zip");
        write_archive(
            &archive,
            &[
                ("backend/Demet.exe", "backend v2"),
                ("frontend-out/index.html", "ui v2"),
            ],
        );
        let staged = stage_archive_update(
            &archive,
            &dir.join("scratch"),
            &archive_targets(&layout),
            copy_file,
            |_| {},
        )
        .expect("stage update");
        (layout, staged)
    }

    #[test]
    fn swapped_trees_keep_backups_until_finalized() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let (layout, staged) = staged_pair(dir.path());

        let committed = apply_archive(&staged, |_| {}).expect("swap in");
        assert_eq!(read(&layout.backend_dir.join("Demet.exe")), "backend v2");
        assert!(staged.iter().all(|tree| tree.backup_dir.is_dir()));

        committed.finalize(|_| {});
        assert!(staged.iter().all(|tree| !tree.backup_dir.exists()));
        assert_eq!(read(&layout.frontend_dir.join("index.html")), "ui v2");
        assert_eq!(read(&layout.backend_dir.join("demet.db")), "user data");
    }

    #[test]
    fn committed_swap_rolls_back_to_previous_trees() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let (layout, staged) = staged_pair(dir.path());

        let committed = apply_archive(&staged, |_| {}).expect("swap in");
        committed.roll_back(|_| {});

        assert_eq!(read(&layout.backend_dir.join("Demet.exe")), "backend v1");
        assert_eq!(read(&layout.frontend_dir.join("index.html")), "ui v1");
        assert!(staged
            .iter()
            .all(|tree| !tree.backup_dir.exists() && !tree.staged_dir.exists()));
    }

    #[test]
    fn zip_slip_entries_are_rejected() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let archive = dir.path().join("evil.zip");
        write_archive(&archive, &[("../outside.txt", "owned")]);
        let error = extract_archive(&archive, &dir.path().join("out")).expect_err("rejected");
        assert!(error.contains("escapes"));
        assert!(!dir.path().join("outside.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn detached_installer_launch_runs_with_silent_flag() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("create temp dir");
        let marker = dir.path().join("args.txt");
        let installer = dir.path().join("Demet-Setup.sh");
        fs::write(
            &installer,
            format!("#!/bin/sh\necho \"$@\" > '{}'\n", marker.display()),
        )
        .expect("write installer");
        fs::set_permissions(&installer, fs::Permissions::from_mode(0o755)).expect("chmod");

        launch_installer_detached(&installer, |_| {}).expect("launch installer");
        for _ in 0..50 {
            if marker.exists() && !read(&marker).is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        assert_eq!(read(&marker).trim(), INSTALLER_SILENT_FLAG);

        let missing = launch_installer_detached(&dir.path().join("nope.exe"), |_| {});
        assert!(missing.is_err());
    }
}
