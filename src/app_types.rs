use std::{
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
};

/// Where the installed backend tree and the exported UI tree live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
    pub backend_dir: PathBuf,
    pub frontend_dir: PathBuf,
    pub packaged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub cmd: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub envs: Vec<(String, String)>,
    pub packaged_mode: bool,
}

/// Process-wide startup bookkeeping owned by the application controller.
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub backend_pid: Option<u32>,
    pub gateway_listening: bool,
    pub backend_ready: bool,
    pub lock_held: bool,
}

#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DesktopAppUpdateCheckResult {
    pub ok: bool,
    pub reason: Option<String>,
    pub current_version: String,
    pub latest_version: Option<String>,
    pub has_update: bool,
    pub update_applied: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct BridgeResult {
    pub ok: bool,
    pub reason: Option<String>,
}

impl BridgeResult {
    pub fn ok() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

pub struct AtomicFlagGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> AtomicFlagGuard<'a> {
    pub fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Relaxed);
        Self { flag }
    }

    pub fn try_set(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self { flag })
    }
}

impl Drop for AtomicFlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::{AtomicFlagGuard, BridgeResult};

    #[test]
    fn atomic_flag_guard_set_resets_flag_on_drop() {
        let flag = AtomicBool::new(false);
        {
            let _guard = AtomicFlagGuard::set(&flag);
            assert!(flag.load(Ordering::Relaxed));
        }
        assert!(!flag.load(Ordering::Relaxed));
    }

    #[test]
    fn atomic_flag_guard_try_set_rejects_double_set_until_drop() {
        let flag = AtomicBool::new(false);

        let guard = AtomicFlagGuard::try_set(&flag).expect("first set should succeed");
        assert!(flag.load(Ordering::Relaxed));
        assert!(AtomicFlagGuard::try_set(&flag).is_none());

        drop(guard);
        assert!(!flag.load(Ordering::Relaxed));
        assert!(AtomicFlagGuard::try_set(&flag).is_some());
    }

    #[test]
    fn bridge_result_serializes_reason_only_on_failure() {
        let ok = serde_json::to_value(BridgeResult::ok()).expect("serialize ok");
        assert_eq!(ok["ok"], true);
        assert!(ok["reason"].is_null());

        let failed = serde_json::to_value(BridgeResult::failed("busy")).expect("serialize failed");
        assert_eq!(failed["ok"], false);
        assert_eq!(failed["reason"], "busy");
    }
}
