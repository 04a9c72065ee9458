//! Reclaims the shell's well-known ports from listeners left behind by a
//! previous run that crashed without releasing its sockets.

use std::{collections::BTreeSet, time::Duration};

use crate::process_control;

const RELEASE_POLL_INTERVAL: Duration = Duration::from_millis(100);
const RELEASE_WAIT_LIMIT: Duration = Duration::from_secs(3);

/// Finds and force-terminates every process listening on `port`, except the
/// current process. Never fails: problems are logged and startup continues.
pub async fn reconcile<F>(port: u16, log: F)
where
    F: Fn(&str) + Copy,
{
    let own_pid = std::process::id();
    let listeners = match find_listener_pids(port).await {
        Ok(pids) => pids,
        Err(error) => {
            log(&format!(
                "port reconcile skipped: unable to enumerate listeners on {port}: {error}"
            ));
            return;
        }
    };

    let stale: Vec<u32> = listeners
        .into_iter()
        .filter(|pid| {
            if *pid == own_pid {
                log(&format!("port {port} is held by this process, leaving it alone"));
                false
            } else {
                true
            }
        })
        .collect();
    if stale.is_empty() {
        return;
    }

    for pid in &stale {
        log(&format!("terminating stale listener on port {port}: pid={pid}"));
        if !process_control::force_kill_pid(*pid, log).await {
            log(&format!("failed to terminate stale listener pid={pid} on port {port}"));
        }
    }

    wait_for_release(port, &stale, log).await;
}

async fn wait_for_release<F>(port: u16, killed: &[u32], log: F)
where
    F: Fn(&str) + Copy,
{
    let deadline = tokio::time::Instant::now() + RELEASE_WAIT_LIMIT;
    loop {
        match find_listener_pids(port).await {
            Ok(pids) if !pids.iter().any(|pid| killed.contains(pid)) => return,
            Ok(_) => {}
            Err(_) => return,
        }
        if tokio::time::Instant::now() >= deadline {
            log(&format!(
                "port {port} still held after terminating {killed:?}; continuing"
            ));
            return;
        }
        tokio::time::sleep(RELEASE_POLL_INTERVAL).await;
    }
}

/// PIDs that own a TCP socket in LISTEN state on `port`.
pub async fn find_listener_pids(port: u16) -> Result<Vec<u32>, String> {
    #[cfg(target_os = "linux")]
    {
        tokio::task::spawn_blocking(move || procfs::listener_pids(port))
            .await
            .map_err(|error| format!("listener scan task failed: {error}"))?
    }
    #[cfg(target_os = "windows")]
    {
        netstat_listener_pids(port).await
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        lsof_listener_pids(port).await
    }
}

#[cfg(target_os = "windows")]
async fn netstat_listener_pids(port: u16) -> Result<Vec<u32>, String> {
    let output = tokio::process::Command::new("netstat")
        .args(["-ano", "-p", "TCP"])
        .creation_flags(crate::CREATE_NO_WINDOW)
        .output()
        .await
        .map_err(|error| format!("failed to run netstat: {error}"))?;
    Ok(parse_netstat_listeners(
        &String::from_utf8_lossy(&output.stdout),
        port,
    ))
}

#[cfg(not(any(target_os = "linux", target_os = "windows")))]
async fn lsof_listener_pids(port: u16) -> Result<Vec<u32>, String> {
    let lsof = which::which("lsof").map_err(|error| format!("lsof not available: {error}"))?;
    let output = tokio::process::Command::new(lsof)
        .args(["-nP", &format!("-iTCP:{port}"), "-sTCP:LISTEN", "-t"])
        .output()
        .await
        .map_err(|error| format!("failed to run lsof: {error}"))?;
    // lsof exits 1 when nothing matches.
    let pids: BTreeSet<u32> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect();
    Ok(pids.into_iter().collect())
}

/// Parses `netstat -ano` output: `TCP  0.0.0.0:45321  0.0.0.0:0  LISTENING  1234`.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn parse_netstat_listeners(output: &str, port: u16) -> Vec<u32> {
    let suffix = format!(":{port}");
    let pids: BTreeSet<u32> = output
        .lines()
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            if columns.len() < 5 || !columns[0].eq_ignore_ascii_case("TCP") {
                return None;
            }
            if !columns[1].ends_with(&suffix) || !columns[3].eq_ignore_ascii_case("LISTENING") {
                return None;
            }
            columns[4].parse::<u32>().ok().filter(|pid| *pid > 0)
        })
        .collect();
    pids.into_iter().collect()
}

#[cfg(target_os = "linux")]
mod procfs {
    use std::{collections::BTreeSet, fs, path::Path};

    const TCP_LISTEN_STATE: &str = "0A";

    pub(super) fn listener_pids(port: u16) -> Result<Vec<u32>, String> {
        let mut inodes = BTreeSet::new();
        for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
            match fs::read_to_string(table) {
                Ok(text) => inodes.extend(listening_inodes(&text, port)),
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => return Err(format!("failed to read {table}: {error}")),
            }
        }
        if inodes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(pids_owning_inodes(Path::new("/proc"), &inodes))
    }

    /// Socket inodes in LISTEN state bound to `port` from a `/proc/net/tcp*` table.
    pub(super) fn listening_inodes(table: &str, port: u16) -> BTreeSet<u64> {
        table
            .lines()
            .skip(1)
            .filter_map(|line| {
                let columns: Vec<&str> = line.split_whitespace().collect();
                if columns.len() < 10 || columns[3] != TCP_LISTEN_STATE {
                    return None;
                }
                let (_, port_hex) = columns[1].rsplit_once(':')?;
                if u16::from_str_radix(port_hex, 16).ok()? != port {
                    return None;
                }
                columns[9].parse::<u64>().ok().filter(|inode| *inode > 0)
            })
            .collect()
    }

    fn pids_owning_inodes(proc_root: &Path, inodes: &BTreeSet<u64>) -> Vec<u32> {
        let Ok(entries) = fs::read_dir(proc_root) else {
            return Vec::new();
        };
        let mut pids = BTreeSet::new();
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u32>().ok())
            else {
                continue;
            };
            // Processes of other users are unreadable; skip them.
            let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
                continue;
            };
            let owns_socket = fds.flatten().any(|fd| {
                fs::read_link(fd.path())
                    .ok()
                    .and_then(|target| socket_inode(&target.to_string_lossy()))
                    .is_some_and(|inode| inodes.contains(&inode))
            });
            if owns_socket {
                pids.insert(pid);
            }
        }
        pids.into_iter().collect()
    }

    fn socket_inode(link_target: &str) -> Option<u64> {
        link_target
            .strip_prefix("socket:[")?
            .strip_suffix(']')?
            .parse()
            .ok()
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const SAMPLE_TABLE: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:B109 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 51234 1 0000000000000000 100 0 0 10 0
   1: 0100007F:1F40 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 51240 1 0000000000000000 100 0 0 10 0
   2: 0100007F:B109 0100007F:D4F2 01 00000000:00000000 00:00000000 00000000  1000        0 51300 1 0000000000000000 20 4 30 10 -1
   3: 0100007F:B129 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 51310 1 0000000000000000 100 0 0 10 0
";

        #[test]
        fn listening_inodes_filters_by_port_and_listen_state() {
            let inodes = listening_inodes(SAMPLE_TABLE, 45321);
            assert_eq!(inodes.into_iter().collect::<Vec<_>>(), vec![51234]);
            let backend = listening_inodes(SAMPLE_TABLE, 8000);
            assert_eq!(backend.into_iter().collect::<Vec<_>>(), vec![51240]);
            let neighbour = listening_inodes(SAMPLE_TABLE, 0xB129);
            assert_eq!(neighbour.into_iter().collect::<Vec<_>>(), vec![51310]);
        }

        #[test]
        fn socket_inode_parses_fd_link_targets() {
            assert_eq!(socket_inode("socket:[51234]"), Some(51234));
            assert_eq!(socket_inode("pipe:[51234]"), None);
            assert_eq!(socket_inode("/dev/null"), None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn parse_netstat_listeners_keeps_listening_rows_for_port() {
        let output = "
Active Connections

  Proto  Local Address          Foreign Address        State           PID
  TCP    0.0.0.0:45321          0.0.0.0:0              LISTENING       4312
  TCP    127.0.0.1:45321        127.0.0.1:50122        ESTABLISHED     4312
  TCP    127.0.0.1:8000         0.0.0.0:0              LISTENING       988
  TCP    [::]:45321             [::]:0                 LISTENING       4312
  TCP    0.0.0.0:145321         0.0.0.0:0              LISTENING       77
";
        assert_eq!(parse_netstat_listeners(output, 45321), vec![4312]);
        assert_eq!(parse_netstat_listeners(output, 8000), vec![988]);
        assert!(parse_netstat_listeners(output, 9000).is_empty());
    }

    #[tokio::test]
    async fn reconcile_on_free_port_completes_quietly() {
        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
            probe.local_addr().expect("probe addr").port()
        };
        let logs = Mutex::new(Vec::new());
        reconcile(port, |message| {
            logs.lock().expect("lock logs").push(message.to_string())
        })
        .await;
        assert!(!logs
            .lock()
            .expect("lock logs")
            .iter()
            .any(|line| line.contains("terminating")));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn reconcile_never_kills_the_current_process() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind own listener");
        let port = listener.local_addr().expect("listener addr").port();

        let pids = find_listener_pids(port).await.expect("scan listeners");
        assert!(pids.contains(&std::process::id()));

        let logs = Mutex::new(Vec::new());
        reconcile(port, |message| {
            logs.lock().expect("lock logs").push(message.to_string())
        })
        .await;

        assert!(listener.local_addr().is_ok());
        assert!(logs
            .lock()
            .expect("lock logs")
            .iter()
            .any(|line| line.contains("held by this process")));
    }

    const LISTENER_HELPER_PORT_ENV: &str = "DEMET_TEST_STALE_LISTENER_PORT";

    /// Child-process body for the stale-listener scenario; idle unless launched
    /// by that test with the port env var set.
    #[test]
    #[ignore]
    fn stale_listener_helper() {
        let Ok(port) = std::env::var(LISTENER_HELPER_PORT_ENV) else {
            return;
        };
        let _listener =
            std::net::TcpListener::bind(format!("127.0.0.1:{port}")).expect("helper bind");
        std::thread::sleep(Duration::from_secs(60));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn stale_listener_from_crashed_run_is_reclaimed() {
        let port = {
            let probe = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
            probe.local_addr().expect("probe addr").port()
        };
        let test_binary = std::env::current_exe().expect("current test binary");
        let mut helper = tokio::process::Command::new(test_binary)
            .args([
                "port_reconciler::tests::stale_listener_helper",
                "--exact",
                "--ignored",
                "--nocapture",
            ])
            .env(LISTENER_HELPER_PORT_ENV, port.to_string())
            .kill_on_drop(true)
            .spawn()
            .expect("spawn stale listener helper");
        let helper_pid = helper.id().expect("helper pid");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let pids = find_listener_pids(port).await.expect("scan listeners");
            if pids.contains(&helper_pid) {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "helper never started listening on {port}"
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        reconcile(port, |_| {}).await;

        let rebound = tokio::net::TcpListener::bind(("127.0.0.1", port)).await;
        assert!(rebound.is_ok(), "port {port} should be free after reconcile");
        let status = tokio::time::timeout(Duration::from_secs(5), helper.wait())
            .await
            .expect("helper should exit")
            .expect("wait helper");
        assert!(!status.success());
    }
}
