use std::env;
use std::time::Duration;

pub fn parse_clamped_timeout_env<F>(
    raw: &str,
    env_name: &str,
    fallback_ms: u64,
    min_ms: u64,
    max_ms: u64,
    mut log: F,
) -> u64
where
    F: FnMut(String),
{
    match raw.trim().parse::<u128>() {
        Ok(parsed) if parsed > 0 => {
            if parsed < min_ms as u128 {
                log(format!(
                    "{}='{}' is below minimum {}ms, clamped to {}ms",
                    env_name, raw, min_ms, min_ms
                ));
                min_ms
            } else if parsed > max_ms as u128 {
                log(format!(
                    "{}='{}' is above maximum {}ms, clamped to {}ms",
                    env_name, raw, max_ms, max_ms
                ));
                max_ms
            } else {
                parsed as u64
            }
        }
        _ => {
            log(format!(
                "invalid {}='{}', fallback to {}ms",
                env_name, raw, fallback_ms
            ));
            fallback_ms
        }
    }
}

pub fn resolve_clamped_env_ms<F>(
    env_name: &str,
    fallback_ms: u64,
    min_ms: u64,
    max_ms: u64,
    log: F,
) -> u64
where
    F: FnMut(String),
{
    match env::var(env_name) {
        Ok(raw) => parse_clamped_timeout_env(&raw, env_name, fallback_ms, min_ms, max_ms, log),
        Err(_) => fallback_ms,
    }
}

/// Overall boot timeout. Development uses `dev_default_timeout_ms` unless the
/// env var overrides it with a positive value; packaged builds fall back to
/// `packaged_timeout_fallback_ms`. Boot never waits forever.
pub fn resolve_backend_timeout_ms(
    packaged_mode: bool,
    timeout_env_name: &str,
    dev_default_timeout_ms: u64,
    packaged_timeout_fallback_ms: u64,
) -> Duration {
    let default_timeout_ms = if packaged_mode {
        packaged_timeout_fallback_ms
    } else {
        dev_default_timeout_ms
    };

    let timeout_ms = env::var(timeout_env_name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|timeout_ms| *timeout_ms > 0)
        .unwrap_or(default_timeout_ms);
    Duration::from_millis(timeout_ms)
}

pub fn parse_port_env<F>(env_name: &str, fallback: u16, mut log: F) -> u16
where
    F: FnMut(String),
{
    let Ok(raw) = env::var(env_name) else {
        return fallback;
    };
    match raw.trim().parse::<u16>() {
        Ok(port) if port > 0 => port,
        _ => {
            log(format!(
                "invalid {env_name}='{raw}', fallback to port {fallback}"
            ));
            fallback
        }
    }
}
