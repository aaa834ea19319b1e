use std::{
    env, fs,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration for the relay and its Telegram front end.
#[derive(Clone, Debug)]
pub struct Config {
    // Listener
    pub bind_addr: IpAddr,
    pub port: u16,
    pub max_connections: usize,
    pub drain_timeout: Duration,

    // Per-connection limits
    pub read_timeout: Duration,
    pub max_line_bytes: usize,

    // Registry
    pub sections_file: PathBuf,

    // Blacklist
    pub fail_max: u32,
    pub block_time: Duration,

    // Telegram
    pub telegram_bot_token: String,
    pub telegram_admin_users: Vec<i64>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_vars(vars: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_addr = match vars("CATLINE_BIND_ADDR").and_then(non_empty) {
            Some(raw) => raw.trim().parse::<IpAddr>().map_err(|e| {
                Error::Config(format!("CATLINE_BIND_ADDR is not an IP address: {e}"))
            })?,
            None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        };
        let port = parse_var::<u16>(&vars, "CATLINE_PORT")?.unwrap_or(12500);
        let max_connections = parse_var::<usize>(&vars, "CATLINE_MAX_CONNECTIONS")?
            .unwrap_or(64)
            .max(1);
        let drain_timeout =
            Duration::from_millis(parse_var(&vars, "CATLINE_DRAIN_TIMEOUT_MS")?.unwrap_or(5_000));

        let read_timeout =
            Duration::from_millis(parse_var(&vars, "CATLINE_READ_TIMEOUT_MS")?.unwrap_or(10_000));
        let max_line_bytes = parse_var::<usize>(&vars, "CATLINE_MAX_LINE_BYTES")?
            .unwrap_or(8192)
            .max(16);

        let sections_file = PathBuf::from(
            vars("CATLINE_SECTIONS_FILE")
                .and_then(non_empty)
                .unwrap_or_else(|| "catline-sections.json".to_string()),
        );

        let fail_max = parse_var::<u32>(&vars, "CATLINE_FAIL_MAX")?.unwrap_or(8);
        if fail_max == 0 {
            return Err(Error::Config(
                "CATLINE_FAIL_MAX must be greater than zero".to_string(),
            ));
        }
        let block_time =
            Duration::from_secs(parse_var(&vars, "CATLINE_BLOCK_TIME_SECS")?.unwrap_or(300));

        let telegram_bot_token = vars("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        let telegram_admin_users = parse_csv_i64(vars("TELEGRAM_ADMIN_USERS"));

        Ok(Self {
            bind_addr,
            port,
            max_connections,
            drain_timeout,
            read_timeout,
            max_line_bytes,
            sections_file,
            fail_max,
            block_time,
            telegram_bot_token,
            telegram_admin_users,
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Check the settings the Telegram front end cannot run without.
    pub fn require_telegram(&self) -> Result<()> {
        if self.telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        if self.telegram_admin_users.is_empty() {
            return Err(Error::Config(
                "TELEGRAM_ADMIN_USERS environment variable is required".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T>(vars: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = vars(key).and_then(non_empty) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| Error::Config(format!("{key}={raw:?} is invalid: {e}")))
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(move |k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = from_pairs(&[]).unwrap();
        assert_eq!(cfg.port, 12500);
        assert_eq!(cfg.fail_max, 8);
        assert_eq!(cfg.block_time, Duration::from_secs(300));
        assert_eq!(cfg.sections_file, PathBuf::from("catline-sections.json"));
        assert_eq!(cfg.listen_addr().to_string(), "0.0.0.0:12500");
        assert!(cfg.require_telegram().is_err());
    }

    #[test]
    fn reads_overrides() {
        let cfg = from_pairs(&[
            ("CATLINE_BIND_ADDR", "127.0.0.1"),
            ("CATLINE_PORT", "23456"),
            ("CATLINE_FAIL_MAX", "5"),
            ("CATLINE_BLOCK_TIME_SECS", "2"),
            ("CATLINE_SECTIONS_FILE", "/var/lib/catline/sections.json"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("TELEGRAM_ADMIN_USERS", "42, 7,,x"),
        ])
        .unwrap();

        assert_eq!(cfg.listen_addr().to_string(), "127.0.0.1:23456");
        assert_eq!(cfg.fail_max, 5);
        assert_eq!(cfg.block_time, Duration::from_secs(2));
        assert_eq!(cfg.telegram_admin_users, vec![42, 7]);
        assert!(cfg.require_telegram().is_ok());
    }

    #[test]
    fn rejects_bad_numbers() {
        assert!(matches!(
            from_pairs(&[("CATLINE_PORT", "23456xx")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            from_pairs(&[("CATLINE_FAIL_MAX", "0")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            from_pairs(&[("CATLINE_BIND_ADDR", "localhost")]),
            Err(Error::Config(_))
        ));
    }
}
