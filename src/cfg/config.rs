// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    /// Everything lives under the `server` key; an empty document yields
    /// the built-in defaults.
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Listener endpoint and process-model settings.
pub struct ServerConfig {
    #[serde(default = "default_address")]
    /// Address the listening socket binds to.
    pub address: String,

    #[serde(default = "default_port")]
    /// Port the listening socket binds to.
    pub port: u16,

    #[serde(default)]
    /// Number of worker processes; 0 means "use hardware concurrency".
    pub worker_process_num: u32,

    #[serde(default)]
    /// Detach from the controlling terminal before binding.
    pub daemon: bool,

    #[serde(default)]
    /// SOCKS5 protocol knobs.
    pub protocol: ProtocolConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Session-level protocol settings.
pub struct ProtocolConfig {
    #[serde(default = "default_keep_alive_time", with = "serde_secs")]
    /// Idle time after which a quiescent session is torn down.
    pub keep_alive_time: Duration,

    #[serde(default = "default_check_duration", with = "serde_secs")]
    /// Interval between idle-deadline checks.
    pub check_duration: Duration,

    #[serde(default)]
    /// Require RFC 1929 username/password authentication.
    pub auth: bool,

    #[serde(default)]
    /// Accepted username/password pairs; consulted only when `auth` is on.
    pub credentials: Vec<Credential>,

    #[serde(skip)]
    credential_map: HashMap<String, String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

fn default_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    1080
}

fn default_keep_alive_time() -> Duration {
    Duration::from_secs(30)
}

fn default_check_duration() -> Duration {
    Duration::from_secs(1)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            worker_process_num: 0,
            daemon: false,
            protocol: ProtocolConfig::default(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            keep_alive_time: default_keep_alive_time(),
            check_duration: default_check_duration(),
            auth: false,
            credentials: Vec::new(),
            credential_map: HashMap::new(),
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(&path).with_context(|| {
            format!("failed to read config file {:?}", path.as_ref())
        })?;
        Self::parse_str(&s)
    }

    /// Parses a YAML document into a validated configuration.
    pub fn parse_str(s: &str) -> Result<Self> {
        let mut cfg: Config =
            serde_yaml::from_str(s).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(
            self.server.protocol.check_duration >= Duration::from_secs(1),
            "protocol.check_duration must be >= 1 second"
        );

        // Duplicate usernames keep the last entry.
        let proto = &mut self.server.protocol;
        proto.credential_map = proto
            .credentials
            .iter()
            .map(|c| (c.username.clone(), c.password.clone()))
            .collect();

        Ok(())
    }

    /// Worker pool size; a zero in the file falls back to the number of
    /// available cores.
    pub fn worker_count(&self) -> u32 {
        if self.server.worker_process_num > 0 {
            return self.server.worker_process_num;
        }

        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(1)
    }

    /// Credential check. Always passes when authentication is disabled.
    pub fn check_auth(&self, username: &str, password: &str) -> bool {
        if !self.server.protocol.auth {
            return true;
        }

        self.server
            .protocol
            .credential_map
            .get(username)
            .is_some_and(|p| p == password)
    }
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
