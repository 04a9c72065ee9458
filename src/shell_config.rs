use std::{env, time::Duration};

use url::Url;

use crate::{
    backend_config, AUTO_UPDATE_ENV, BACKEND_PORT_ENV, BACKEND_READY_POLL_INTERVAL_ENV,
    BACKEND_READY_POLL_INTERVAL_MAX_MS, BACKEND_READY_POLL_INTERVAL_MIN_MS,
    BACKEND_READY_PROBE_TIMEOUT_ENV, BACKEND_READY_PROBE_TIMEOUT_MAX_MS,
    BACKEND_READY_PROBE_TIMEOUT_MIN_MS, BACKEND_TIMEOUT_ENV, DEFAULT_BACKEND_PORT,
    DEFAULT_BACKEND_READY_POLL_INTERVAL_MS, DEFAULT_BACKEND_READY_PROBE_TIMEOUT_MS,
    DEFAULT_GATEWAY_PORT, DEFAULT_RELEASE_FEED_URL, DEV_BACKEND_TIMEOUT_MS, GATEWAY_PORT_ENV,
    HEALTH_PATH, LOOPBACK_HOST, PACKAGED_BACKEND_TIMEOUT_FALLBACK_MS, RELEASE_FEED_ENV,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessConfig {
    pub health_path: String,
    pub poll_interval: Duration,
    pub probe_timeout: Duration,
    /// `None` waits until the process exits.
    pub boot_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub gateway_port: u16,
    pub backend_port: u16,
    pub readiness: ReadinessConfig,
    /// `None` when no usable feed URL could be resolved; update checks report
    /// that instead of running.
    pub release_feed: Option<Url>,
    pub auto_update_enabled: bool,
}

impl ShellConfig {
    pub fn from_env<F>(packaged_mode: bool, log: F) -> Self
    where
        F: Fn(&str) + Copy,
    {
        let gateway_port = backend_config::parse_port_env(
            GATEWAY_PORT_ENV,
            DEFAULT_GATEWAY_PORT,
            |message| log(&message),
        );
        let backend_port = backend_config::parse_port_env(
            BACKEND_PORT_ENV,
            DEFAULT_BACKEND_PORT,
            |message| log(&message),
        );
        let poll_interval_ms = backend_config::resolve_clamped_env_ms(
            BACKEND_READY_POLL_INTERVAL_ENV,
            DEFAULT_BACKEND_READY_POLL_INTERVAL_MS,
            BACKEND_READY_POLL_INTERVAL_MIN_MS,
            BACKEND_READY_POLL_INTERVAL_MAX_MS,
            |message| log(&message),
        );
        let probe_timeout_ms = backend_config::resolve_clamped_env_ms(
            BACKEND_READY_PROBE_TIMEOUT_ENV,
            DEFAULT_BACKEND_READY_PROBE_TIMEOUT_MS,
            BACKEND_READY_PROBE_TIMEOUT_MIN_MS,
            BACKEND_READY_PROBE_TIMEOUT_MAX_MS,
            |message| log(&message),
        );
        let boot_timeout = backend_config::resolve_backend_timeout_ms(
            packaged_mode,
            BACKEND_TIMEOUT_ENV,
            DEV_BACKEND_TIMEOUT_MS,
            PACKAGED_BACKEND_TIMEOUT_FALLBACK_MS,
        );

        Self {
            gateway_port,
            backend_port,
            readiness: ReadinessConfig {
                health_path: HEALTH_PATH.to_string(),
                poll_interval: Duration::from_millis(poll_interval_ms),
                probe_timeout: Duration::from_millis(probe_timeout_ms),
                boot_timeout: Some(boot_timeout),
            },
            release_feed: resolve_release_feed(log),
            auto_update_enabled: resolve_auto_update_enabled(),
        }
    }

    pub fn backend_base_url(&self) -> String {
        format!("http://{LOOPBACK_HOST}:{}", self.backend_port)
    }

    pub fn gateway_url(&self) -> String {
        format!("http://{LOOPBACK_HOST}:{}", self.gateway_port)
    }
}

fn parse_feed_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw.trim()).map_err(|error| error.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(format!("unsupported scheme '{scheme}'")),
    }
}

fn resolve_release_feed<F>(log: F) -> Option<Url>
where
    F: Fn(&str) + Copy,
{
    if let Ok(raw) = env::var(RELEASE_FEED_ENV) {
        if !raw.trim().is_empty() {
            match parse_feed_url(&raw) {
                Ok(url) => return Some(url),
                Err(error) => log(&format!(
                    "invalid {RELEASE_FEED_ENV}='{raw}': {error}, using default feed"
                )),
            }
        }
    }
    match parse_feed_url(DEFAULT_RELEASE_FEED_URL) {
        Ok(url) => Some(url),
        Err(error) => {
            log(&format!(
                "default release feed '{DEFAULT_RELEASE_FEED_URL}' is unusable: {error}"
            ));
            None
        }
    }
}

fn resolve_auto_update_enabled() -> bool {
    !matches!(
        env::var(AUTO_UPDATE_ENV).ok().as_deref().map(str::trim),
        Some("0") | Some("false") | Some("off")
    )
}
