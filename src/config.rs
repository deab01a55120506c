//! Controller configuration
//!
//! Loaded from a TOML file; every field has a default, so a missing file or a
//! partial one is fine.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rc_shared::timing;
use serde::Deserialize;

use crate::engine::rewrite::{RemapRule, DEFAULT_PREAMBLE};
use crate::engine::EngineOptions;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Device ID reported to consoles
    pub device_id: String,
    /// Address the console link listens on
    pub listen_addr: String,
    pub heartbeat_interval_ms: u64,
    pub engine: EngineConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            device_id: "rc-001".into(),
            listen_addr: "0.0.0.0:7070".into(),
            heartbeat_interval_ms: timing::HEARTBEAT_INTERVAL_MS,
            engine: EngineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Wall-clock budget per run; unset means no timeout
    pub timeout_ms: Option<u64>,
    pub dispatch_interval_ms: u64,
    pub poll_interval_ms: u64,
    /// Lines placed before every script
    pub preamble: Vec<String>,
    /// Substrings that reject a script outright
    pub denylist: Vec<String>,
    /// Applied in file order
    pub remap: Vec<RemapRule>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut preamble: Vec<String> = DEFAULT_PREAMBLE.iter().map(|l| l.to_string()).collect();
        preamble.push("from hardware import Motors, Servos, Led".into());

        Self {
            timeout_ms: None,
            dispatch_interval_ms: timing::DISPATCH_INTERVAL_MS,
            poll_interval_ms: timing::SUPERVISOR_POLL_MS,
            preamble,
            denylist: [
                "exit", "quit", "sys.exit", "os.system", "import os", "__import__", "open", "eval",
                "exec", "subprocess",
            ]
            .iter()
            .map(|e| e.to_string())
            .collect(),
            remap: vec![
                RemapRule::new("MotorsController", "Motors"),
                RemapRule::new("ServosController", "Servos"),
                RemapRule::new("LEDController", "Led"),
            ],
        }
    }
}

impl EngineConfig {
    pub fn options(&self) -> EngineOptions {
        EngineOptions {
            dispatch_interval: Duration::from_millis(self.dispatch_interval_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl ControllerConfig {
    /// Load `path` if given, otherwise fall back to defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        anyhow::ensure!(
            config.engine.dispatch_interval_ms > 0 && config.engine.poll_interval_ms > 0,
            "engine intervals must be non-zero"
        );
        anyhow::ensure!(
            config.heartbeat_interval_ms > 0,
            "heartbeat_interval_ms must be non-zero"
        );
        Ok(config)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}
