//! Monitor configuration, loaded from TOML.
//!
//! Each struct implements `Default` with the conventional cgminer monitor
//! constants, so behaviour is sane when no config file is present.
//!
//! ## Loading order
//!
//! 1. `RIGVIEW_CONFIG` environment variable (path to a TOML file)
//! 2. `rigview.toml` in the current working directory
//! 3. Built-in defaults
//!
//! The loaded config is threaded explicitly through every call; there is
//! no process-global state.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

use crate::page::PageDef;

/// Root configuration for a monitor deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Static rig list and protocol timeouts
    #[serde(default)]
    pub rigs: RigConfig,

    /// UDP multicast discovery
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Report/page behaviour
    #[serde(default)]
    pub report: ReportConfig,

    /// User-defined pages; a page here overrides the built-in system page
    /// of the same name
    #[serde(default)]
    pub pages: HashMap<String, PageDef>,
}

/// Rig list and per-call socket behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RigConfig {
    /// Rig entries: `"host"`, `"host:port"` or `"host:port:name"`
    #[serde(default = "default_rig_list")]
    pub list: Vec<String>,

    /// Port used when a rig entry doesn't specify one
    #[serde(default = "default_rig_port")]
    pub default_port: u16,

    /// Socket send timeout (seconds)
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// Socket receive timeout (seconds)
    #[serde(default = "default_recv_timeout")]
    pub recv_timeout_secs: u64,

    /// Fields never stored when parsing replies, as `SECTION.Field`
    /// (e.g. `POOL.URL`, `POOL.User` to hide pool credentials)
    #[serde(default)]
    pub hide_fields: HashSet<String>,

    /// Maximum rigs polled concurrently
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_polls: usize,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            list: default_rig_list(),
            default_port: default_rig_port(),
            send_timeout_secs: default_send_timeout(),
            recv_timeout_secs: default_recv_timeout(),
            hide_fields: HashSet::new(),
            max_concurrent_polls: default_max_concurrent(),
        }
    }
}

/// Multicast discovery settings. When `enabled` is true the discovered rig
/// set replaces the static list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Multicast address all rig daemons listen on
    #[serde(default = "default_mcast_addr")]
    pub addr: String,

    /// Multicast UDP port
    #[serde(default = "default_rig_port")]
    pub port: u16,

    /// Code the daemons expect in the probe message
    #[serde(default = "default_mcast_code")]
    pub code: String,

    /// UDP port the daemons are asked to reply on
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Seconds to wait for replies in each round
    #[serde(default = "default_mcast_timeout")]
    pub timeout_secs: f64,

    /// Extra probe rounds after the first
    #[serde(default)]
    pub retries: u32,

    /// Stop probing early once this many rigs replied (0 = no threshold)
    #[serde(default)]
    pub expect: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_mcast_addr(),
            port: default_rig_port(),
            code: default_mcast_code(),
            listen_port: default_listen_port(),
            timeout_secs: default_mcast_timeout(),
            retries: 0,
            expect: 0,
        }
    }
}

/// Report-level behaviour shared by all pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Allow `bgen`/`gen` derived-field formulas. When false, fields with a
    /// `||` fallback collapse to the fallback at page-load time.
    #[serde(default)]
    pub allow_gen: bool,

    /// Emit per-rig total rows
    #[serde(default = "default_true")]
    pub rig_totals: bool,

    /// Emit a total row even when a rig has too few data rows
    #[serde(default)]
    pub force_totals: bool,

    /// Minimum data rows before a per-rig total row appears
    #[serde(default = "default_total_min_rows")]
    pub total_min_rows: usize,

    /// Also poll `notify` on the single-rig overview
    #[serde(default = "default_true")]
    pub notify: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            allow_gen: false,
            rig_totals: default_true(),
            force_totals: false,
            total_min_rows: default_total_min_rows(),
            notify: default_true(),
        }
    }
}

fn default_rig_list() -> Vec<String> {
    vec!["127.0.0.1:4028".to_string()]
}
fn default_rig_port() -> u16 {
    4028
}
fn default_send_timeout() -> u64 {
    10
}
fn default_recv_timeout() -> u64 {
    40
}
fn default_max_concurrent() -> usize {
    16
}
fn default_mcast_addr() -> String {
    "224.0.0.75".to_string()
}
fn default_mcast_code() -> String {
    "FTW".to_string()
}
fn default_listen_port() -> u16 {
    4027
}
fn default_mcast_timeout() -> f64 {
    1.5
}
fn default_total_min_rows() -> usize {
    2
}
fn default_true() -> bool {
    true
}

impl MonitorConfig {
    /// Load following the documented order. Falls back to defaults with a
    /// warning when a file exists but fails to parse.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("RIGVIEW_CONFIG") {
            return Self::load_from_path(Path::new(&path));
        }
        let local = Path::new("rigview.toml");
        if local.exists() {
            return Self::load_from_path(local);
        }
        info!("no config file found, using built-in defaults");
        Self::default()
    }

    /// Load a specific TOML file, falling back to defaults on any error.
    pub fn load_from_path(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str::<Self>(&text) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded monitor config");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "config parse failed, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config read failed, using defaults");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_original_constants() {
        let c = MonitorConfig::default();
        assert_eq!(c.rigs.default_port, 4028);
        assert_eq!(c.rigs.send_timeout_secs, 10);
        assert_eq!(c.rigs.recv_timeout_secs, 40);
        assert_eq!(c.discovery.addr, "224.0.0.75");
        assert_eq!(c.discovery.port, 4028);
        assert_eq!(c.discovery.listen_port, 4027);
        assert_eq!(c.discovery.code, "FTW");
        assert!((c.discovery.timeout_secs - 1.5).abs() < f64::EPSILON);
        assert_eq!(c.discovery.retries, 0);
        assert!(!c.report.allow_gen);
        assert!(c.report.rig_totals);
        assert!(!c.report.force_totals);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "[rigs]\nlist = [\"10.0.0.1\", \"10.0.0.2:4029:attic\"]\n\n[report]\nallow_gen = true\n"
        )
        .expect("write");
        let c = MonitorConfig::load_from_path(file.path());
        assert_eq!(c.rigs.list.len(), 2);
        assert_eq!(c.rigs.default_port, 4028);
        assert!(c.report.allow_gen);
        assert!(c.report.rig_totals);
    }

    #[test]
    fn bad_toml_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "not valid toml [").expect("write");
        let c = MonitorConfig::load_from_path(file.path());
        assert_eq!(c.rigs.default_port, 4028);
    }
}
