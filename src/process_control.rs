use std::{io, process::ExitStatus, process::Stdio, time::Duration};

use tokio::process::{Child, Command};

const FORCE_STOP_WAIT_MIN_MS: u64 = 200;
#[cfg(target_os = "windows")]
const WINDOWS_GRACEFUL_STOP_NONZERO_WAIT_MS: u64 = 350;
#[cfg(target_os = "windows")]
const FORCE_STOP_WAIT_MAX_WINDOWS_MS: u64 = 2_200;
#[cfg(not(target_os = "windows"))]
const FORCE_STOP_WAIT_MAX_NON_WINDOWS_MS: u64 = 1_500;

async fn wait_for_child_exit(child: &mut Child, timeout: Duration) -> bool {
    matches!(tokio::time::timeout(timeout, child.wait()).await, Ok(Ok(_)))
}

async fn run_stop_command<F>(
    pid: u32,
    label: &str,
    program: &str,
    args: &[&str],
    log: F,
) -> io::Result<ExitStatus>
where
    F: Fn(&str) + Copy,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .stdin(Stdio::null());
    #[cfg(target_os = "windows")]
    {
        // Avoid flashing transient black console windows when invoking taskkill.
        command.creation_flags(crate::CREATE_NO_WINDOW);
    }
    let status = command.status().await;

    match &status {
        Ok(exit_status) if exit_status.success() => {}
        Ok(exit_status) => log(&format!(
            "{label} returned non-zero: pid={pid}, status={exit_status:?}"
        )),
        Err(error) => log(&format!(
            "{label} failed to start: pid={pid}, error={error}"
        )),
    }

    status
}

fn compute_followup_wait(timeout: Duration, max_extra_wait: Duration) -> Duration {
    if timeout.is_zero() {
        Duration::ZERO
    } else {
        (timeout / 4)
            .max(Duration::from_millis(FORCE_STOP_WAIT_MIN_MS))
            .min(max_extra_wait)
    }
}

fn resolve_graceful_wait_timeout<F>(
    pid: u32,
    timeout: Duration,
    non_success_wait_cap: Duration,
    graceful_status: &io::Result<ExitStatus>,
    command_label: &str,
    log: F,
) -> Duration
where
    F: Fn(&str) + Copy,
{
    match graceful_status {
        Ok(status) if status.success() => timeout,
        _ => {
            let shortened_wait = timeout.min(non_success_wait_cap);
            if shortened_wait < timeout {
                let outcome = match graceful_status {
                    Ok(status) => format!("status={status:?}"),
                    Err(error) => format!("error={error}"),
                };
                log(&format!(
                    "{command_label} not successful; shorten graceful wait: pid={pid}, {outcome}, requested_wait_ms={}, effective_wait_ms={}",
                    timeout.as_millis(),
                    shortened_wait.as_millis()
                ));
            }
            shortened_wait
        }
    }
}

/// Sends the platform termination request to `pid` and everything it spawned.
/// Windows walks the tree with `taskkill /T`; elsewhere the signal goes to the
/// process group first and falls back to the single pid.
#[cfg(target_os = "windows")]
pub async fn terminate_pid_tree<F>(pid: u32, force: bool, log: F) -> io::Result<ExitStatus>
where
    F: Fn(&str) + Copy,
{
    let pid_arg = pid.to_string();
    if force {
        run_stop_command(
            pid,
            "taskkill force stop",
            "taskkill",
            &["/pid", &pid_arg, "/t", "/f"],
            log,
        )
        .await
    } else {
        run_stop_command(
            pid,
            "taskkill graceful stop",
            "taskkill",
            &["/pid", &pid_arg, "/t"],
            log,
        )
        .await
    }
}

#[cfg(not(target_os = "windows"))]
pub async fn terminate_pid_tree<F>(pid: u32, force: bool, log: F) -> io::Result<ExitStatus>
where
    F: Fn(&str) + Copy,
{
    let signal = if force { "-KILL" } else { "-TERM" };
    let group_arg = format!("-{pid}");
    let group_status = run_stop_command(
        pid,
        &format!("kill {signal} (group)"),
        "kill",
        &[signal, "--", &group_arg],
        log,
    )
    .await;
    if matches!(&group_status, Ok(status) if status.success()) {
        return group_status;
    }
    let pid_arg = pid.to_string();
    run_stop_command(pid, &format!("kill {signal}"), "kill", &[signal, &pid_arg], log).await
}

/// Force-terminates an unrelated process, such as a stale listener left behind
/// by a crashed run.
pub async fn force_kill_pid<F>(pid: u32, log: F) -> bool
where
    F: Fn(&str) + Copy,
{
    let pid_arg = pid.to_string();
    let status = if cfg!(target_os = "windows") {
        run_stop_command(
            pid,
            "taskkill force kill",
            "taskkill",
            &["/PID", &pid_arg, "/T", "/F"],
            log,
        )
        .await
    } else {
        run_stop_command(pid, "kill -KILL", "kill", &["-KILL", &pid_arg], log).await
    };
    matches!(status, Ok(status) if status.success())
}

/// Requests a graceful stop, waits up to `timeout`, then force-kills the tree.
/// Returns whether the child was observed to exit.
pub async fn stop_child_gracefully<F>(child: &mut Child, timeout: Duration, log: F) -> bool
where
    F: Fn(&str) + Copy,
{
    let Some(pid) = child.id() else {
        // Already reaped.
        return true;
    };

    let graceful_status = terminate_pid_tree(pid, false, log).await;
    #[cfg(target_os = "windows")]
    let non_success_wait_cap = Duration::from_millis(WINDOWS_GRACEFUL_STOP_NONZERO_WAIT_MS);
    #[cfg(not(target_os = "windows"))]
    let non_success_wait_cap = timeout;
    let graceful_wait_timeout = resolve_graceful_wait_timeout(
        pid,
        timeout,
        non_success_wait_cap,
        &graceful_status,
        "graceful stop",
        log,
    );
    if wait_for_child_exit(child, graceful_wait_timeout).await {
        return true;
    }

    let force_status = terminate_pid_tree(pid, true, log).await;
    if let Err(error) = child.start_kill() {
        log(&format!("direct child kill failed: pid={pid}, error={error}"));
    }

    #[cfg(target_os = "windows")]
    let max_extra_wait = Duration::from_millis(FORCE_STOP_WAIT_MAX_WINDOWS_MS);
    #[cfg(not(target_os = "windows"))]
    let max_extra_wait = Duration::from_millis(FORCE_STOP_WAIT_MAX_NON_WINDOWS_MS);
    let followup_wait = compute_followup_wait(timeout, max_extra_wait);
    log(&format!(
        "child graceful stop timed out, force-kill issued: pid={pid}, graceful={graceful_status:?}, force={force_status:?}, followup_wait_ms={}",
        followup_wait.as_millis(),
    ));
    wait_for_child_exit(child, followup_wait).await
}
