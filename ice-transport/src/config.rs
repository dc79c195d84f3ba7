//! Environment-driven configuration surface.
//!
//! Every knob is optional; absent or unparsable values fall back to the
//! defaults. List values are `;`-separated.

use log::warn;
use std::env;
use std::str::FromStr;

pub const ALLOWED_INTERFACES: &str = "ICE_ALLOWED_INTERFACES";
pub const BLOCKED_INTERFACES: &str = "ICE_BLOCKED_INTERFACES";
pub const ALLOWED_ADDRESSES: &str = "ICE_ALLOWED_ADDRESSES";
pub const BLOCKED_ADDRESSES: &str = "ICE_BLOCKED_ADDRESSES";
pub const DISABLE_IPV6: &str = "ICE_DISABLE_IPV6";
pub const DISABLE_LINK_LOCAL_ADDRESSES: &str = "ICE_DISABLE_LINK_LOCAL_ADDRESSES";
pub const BIND_RETRIES: &str = "ICE_BIND_RETRIES";
pub const IO_THREADS: &str = "ICE_IO_THREADS";
pub const SEND_BUFFER: &str = "ICE_SEND_BUFFER";
pub const RECEIVE_BUFFER: &str = "ICE_RECEIVE_BUFFER";

/// Default number of per-address bind attempts during harvesting.
pub const BIND_RETRIES_DEFAULT: u32 = 50;

/// Splits a `;`-separated list property. Returns `None` when the variable
/// is unset or contains no non-empty items.
pub fn get_string_array(name: &str) -> Option<Vec<String>> {
    let value = env::var(name).ok()?;
    let items: Vec<String> = value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

pub fn get_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => true,
            "0" | "false" | "no" => false,
            other => {
                warn!("ignoring unparsable boolean {name}={other}");
                default
            }
        },
        Err(_) => default,
    }
}

pub fn get_number<T: FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            warn!("ignoring unparsable number {name}={value}");
            default
        }),
        Err(_) => default,
    }
}

pub fn bind_retries() -> u32 {
    get_number(BIND_RETRIES, BIND_RETRIES_DEFAULT)
}

/// Acceptor tuning recognized at transport startup.
#[derive(Debug, Clone)]
pub struct AcceptorConfig {
    /// Worker-pool size hint for embedders sizing the I/O runtime.
    pub io_threads: usize,
    /// Kernel send-buffer size per socket, when set.
    pub send_buffer: Option<usize>,
    /// Kernel receive-buffer size per socket, when set.
    pub receive_buffer: Option<usize>,
    /// Whether SO_REUSEADDR is set on bind.
    pub reuse_address: bool,
    /// Whether Nagle's algorithm is disabled on TCP sessions.
    pub tcp_no_delay: bool,
    /// TCP listen backlog.
    pub backlog: i32,
    /// Whether sessions are closed when the acceptor stops.
    pub close_on_deactivation: bool,
}

impl Default for AcceptorConfig {
    fn default() -> Self {
        Self {
            io_threads: 2,
            send_buffer: None,
            receive_buffer: None,
            reuse_address: true,
            tcp_no_delay: true,
            backlog: 64,
            close_on_deactivation: true,
        }
    }
}

impl AcceptorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            io_threads: get_number(IO_THREADS, defaults.io_threads),
            send_buffer: env::var(SEND_BUFFER)
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            receive_buffer: env::var(RECEIVE_BUFFER)
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            ..defaults
        }
    }
}
