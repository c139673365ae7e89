use crate::error::{Result, TvError};
use crate::render::{Colormap, FigSize};
use crate::viewer::Encoding;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::PathBuf;
use std::time::Duration;

/// Ports tried when no port is configured.
pub const DYNAMIC_PORTS: Range<u16> = 49152..65535;

/// Resolved settings. Reading the settings file is left to the caller; its content is
/// handed over as JSON and can be overridden from the environment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// host of the display surface
    pub hostname: String,
    /// set this when the port is forwarded, e.g. for remote sessions
    pub port: Option<u16>,
    /// how long `open` and `push` wait for the display surface
    pub timeout_ms: u64,
    pub cache_dir: Option<PathBuf>,
    pub figsize: FigSize,
    pub cmap: Colormap,
    pub encoding: Encoding,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: None,
            timeout_ms: 5000,
            cache_dir: None,
            figsize: FigSize::default(),
            cmap: Colormap::Gray,
            encoding: Encoding::Png,
        }
    }
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> { Ok(serde_json::from_str(json)?) }

    /// Applies `TUNNELVISION_HOST`, `TUNNELVISION_PORT` and `TUNNELVISION_TIMEOUT_MS`.
    pub fn with_env_overrides(self) -> Result<Self> { self.with_overrides(|key| std::env::var(key).ok()) }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(host) = lookup("TUNNELVISION_HOST") {
            self.hostname = host;
        }
        if let Some(port) = lookup("TUNNELVISION_PORT") {
            let port = port
                .trim()
                .parse::<u16>()
                .map_err(|e| TvError::Value(format!("TUNNELVISION_PORT '{}' is not a port: {}", port, e)))?;
            self.port = Some(port);
        }
        if let Some(timeout) = lookup("TUNNELVISION_TIMEOUT_MS") {
            self.timeout_ms = timeout.trim().parse::<u64>().map_err(|e| {
                TvError::Value(format!("TUNNELVISION_TIMEOUT_MS '{}' is not a number: {}", timeout, e))
            })?;
        }
        Ok(self)
    }

    pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_ms) }

    /// Configured port, or the first one that is free on `hostname`.
    pub fn resolve_port(&self) -> Result<u16> {
        match self.port {
            Some(port) => Ok(port),
            None => first_available_port(&self.hostname, DYNAMIC_PORTS),
        }
    }

    /// Address of the display surface, which needs an explicit port.
    pub fn viewer_addr(&self) -> Result<String> {
        match self.port {
            Some(port) => Ok(format!("{}:{}", self.hostname, port)),
            None => Err(TvError::Value(
                "no viewer port configured, set `port` or TUNNELVISION_PORT".to_string(),
            )),
        }
    }

    pub fn resolved_cache_dir(&self) -> Option<PathBuf> {
        self.cache_dir
            .clone()
            .or_else(|| BaseDirs::new().map(|dirs| dirs.cache_dir().join("tunnelvision")))
    }
}

/// First port in `range` that can be bound on `host`.
pub fn first_available_port(host: &str, range: Range<u16>) -> Result<u16> {
    for port in range.clone() {
        if std::net::TcpListener::bind((host, port)).is_ok() {
            return Ok(port);
        }
    }
    Err(TvError::Io(std::io::Error::new(
        std::io::ErrorKind::AddrInUse,
        format!("all ports from {} to {} are in use", range.start, range.end.saturating_sub(1)),
    )))
}
