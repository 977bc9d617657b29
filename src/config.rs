use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

pub const DELAY_ENV: &str = "DELAY_SECONDS";
pub const DEFAULT_DELAY_SECS: i64 = 5;
pub const LISTEN_PORT: u16 = 3000;

/// Process-wide settings, computed once at startup and passed down by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Reported as-is in responses; a negative value means no wait.
    pub delay_secs: i64,
    pub listen_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            delay_secs: DEFAULT_DELAY_SECS,
            listen_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, LISTEN_PORT)),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let delay_secs = lookup(DELAY_ENV)
            .as_deref()
            .and_then(parse_delay)
            .unwrap_or(DEFAULT_DELAY_SECS);
        Self {
            delay_secs,
            ..Self::default()
        }
    }

    pub fn with_delay_secs(mut self, delay_secs: i64) -> Self {
        self.delay_secs = delay_secs;
        self
    }

    pub fn with_listen_addr(mut self, listen_addr: SocketAddr) -> Self {
        self.listen_addr = listen_addr;
        self
    }

    pub fn delay(&self) -> Duration {
        Duration::from_secs(u64::try_from(self.delay_secs).unwrap_or(0))
    }
}

/// Lenient integer parse: optional sign, then a `0x` hex or a decimal
/// prefix; anything after the digits is ignored. Magnitudes past `i64`
/// saturate. Zero and non-numeric values yield `None`.
fn parse_delay(raw: &str) -> Option<i64> {
    let raw = raw.trim_start();
    let (negative, rest) = match raw.as_bytes().first() {
        Some(b'-') => (true, &raw[1..]),
        Some(b'+') => (false, &raw[1..]),
        _ => (false, raw),
    };
    let (radix, rest) = match rest.get(..2) {
        Some("0x") | Some("0X") => (16, &rest[2..]),
        _ => (10, rest),
    };
    let end = rest
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }

    let magnitude = rest[..end].chars().fold(0i64, |acc, c| {
        let digit = c.to_digit(radix).map_or(0, i64::from);
        acc.saturating_mul(i64::from(radix)).saturating_add(digit)
    });
    match if negative { -magnitude } else { magnitude } {
        0 => None,
        secs => Some(secs),
    }
}
