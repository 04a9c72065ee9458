use std::{
    env,
    path::{Path, PathBuf},
};

use crate::{InstallLayout, APP_ROOT_ENV};

const SOURCE_DIR_ENV: &str = "DEMET_SOURCE_DIR";

/// Per-user data directory: `DEMET_ROOT` when set, otherwise `~/.demet`.
pub fn default_app_root_dir() -> Option<PathBuf> {
    if let Ok(root) = env::var(APP_ROOT_ENV) {
        let root = PathBuf::from(root.trim());
        if !root.as_os_str().is_empty() {
            return Some(root);
        }
    }
    home::home_dir().map(|home| home.join(".demet"))
}

pub fn workspace_root_dir() -> PathBuf {
    let candidate = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    candidate
        .canonicalize()
        .unwrap_or_else(|_| candidate.to_path_buf())
}

/// Layout of a packaged install: the backend tree and the exported UI tree sit
/// next to each other inside the resource directory.
pub fn packaged_install_layout(resource_dir: &Path) -> InstallLayout {
    InstallLayout {
        backend_dir: resource_dir.join("backend"),
        frontend_dir: resource_dir.join("frontend-out"),
        packaged: true,
    }
}

pub fn dev_install_layout() -> Option<InstallLayout> {
    let explicit = env::var(SOURCE_DIR_ENV)
        .ok()
        .map(|value| PathBuf::from(value.trim()))
        .filter(|value| !value.as_os_str().is_empty());
    detect_source_root_with(workspace_root_dir(), explicit).map(|root| InstallLayout {
        backend_dir: root.join("backend"),
        frontend_dir: root.join("frontend").join("out"),
        packaged: false,
    })
}

fn detect_source_root_with(
    workspace_root: PathBuf,
    explicit_source_dir: Option<PathBuf>,
) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(explicit) = explicit_source_dir {
        candidates.push(explicit);
    }
    if let Some(parent) = workspace_root.parent() {
        candidates.push(parent.to_path_buf());
    }
    candidates.push(workspace_root);

    candidates
        .into_iter()
        .find(|candidate| is_source_root(candidate))
        .map(|candidate| candidate.canonicalize().unwrap_or(candidate))
}

fn is_source_root(candidate: &Path) -> bool {
    candidate.join("backend").join("app").join("main.py").is_file()
}
