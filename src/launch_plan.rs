use std::{env, path::PathBuf};

use crate::{
    InstallLayout, LaunchPlan, BACKEND_CMD_ENV, BACKEND_CWD_ENV, BACKEND_HOST_ENV,
    BACKEND_PORT_ENV, LOOPBACK_HOST, PACKAGED_BACKEND_EXE_STEM,
};

pub fn resolve_custom_launch(custom_cmd: &str, layout: &InstallLayout) -> Result<LaunchPlan, String> {
    let mut pieces = shlex::split(custom_cmd)
        .ok_or_else(|| format!("Invalid {BACKEND_CMD_ENV}: {custom_cmd}"))?;
    if pieces.is_empty() {
        return Err(format!("{BACKEND_CMD_ENV} is empty."));
    }

    let cmd = pieces.remove(0);
    let cwd = env::var(BACKEND_CWD_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| layout.backend_dir.clone());

    Ok(LaunchPlan {
        cmd,
        args: pieces,
        cwd,
        envs: Vec::new(),
        packaged_mode: layout.packaged,
    })
}

/// Packaged builds ship the backend as a standalone executable inside the
/// backend tree. It reads the address to bind from its environment.
pub fn resolve_packaged_launch(
    layout: &InstallLayout,
    backend_port: u16,
) -> Result<LaunchPlan, String> {
    let exe_name = if cfg!(target_os = "windows") {
        format!("{PACKAGED_BACKEND_EXE_STEM}.exe")
    } else {
        PACKAGED_BACKEND_EXE_STEM.to_string()
    };
    let exe_path = layout.backend_dir.join(exe_name);
    if !exe_path.is_file() {
        return Err(format!(
            "Packaged backend executable is missing: {}",
            exe_path.display()
        ));
    }

    Ok(LaunchPlan {
        cmd: exe_path.to_string_lossy().to_string(),
        args: Vec::new(),
        cwd: layout.backend_dir.clone(),
        envs: vec![
            (BACKEND_HOST_ENV.to_string(), LOOPBACK_HOST.to_string()),
            (BACKEND_PORT_ENV.to_string(), backend_port.to_string()),
        ],
        packaged_mode: true,
    })
}

pub fn resolve_dev_launch(layout: &InstallLayout, backend_port: u16) -> Result<LaunchPlan, String> {
    if !layout.backend_dir.is_dir() {
        return Err(format!(
            "Backend source directory not found: {}",
            layout.backend_dir.display()
        ));
    }
    let python_name = if cfg!(target_os = "windows") {
        "python"
    } else {
        "python3"
    };
    let python = which::which(python_name)
        .map(|path| path.to_string_lossy().to_string())
        .unwrap_or_else(|_| python_name.to_string());

    Ok(LaunchPlan {
        cmd: python,
        args: vec![
            "-m".to_string(),
            "uvicorn".to_string(),
            "app.main:app".to_string(),
            "--host".to_string(),
            LOOPBACK_HOST.to_string(),
            "--port".to_string(),
            backend_port.to_string(),
            "--log-level".to_string(),
            "warning".to_string(),
        ],
        cwd: layout.backend_dir.clone(),
        envs: vec![("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string())],
        packaged_mode: false,
    })
}

/// Custom command first, then the build-mode default.
pub fn resolve_launch_plan(layout: &InstallLayout, backend_port: u16) -> Result<LaunchPlan, String> {
    if let Ok(custom_cmd) = env::var(BACKEND_CMD_ENV) {
        if !custom_cmd.trim().is_empty() {
            return resolve_custom_launch(&custom_cmd, layout);
        }
    }
    if layout.packaged {
        resolve_packaged_launch(layout, backend_port)
    } else {
        resolve_dev_launch(layout, backend_port)
    }
}
