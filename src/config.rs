//! Configuration module for the canary.
//!
//! Loads the JSON configuration file, fills in defaults and rejects configs
//! the daemon cannot run with. The file layout is:
//!
//! ```json
//! {
//!   "pat_call": "N0CALL",
//!   "rx_aux_call": "N0CALL-1",
//!   "rig_port": "/dev/ttyUSB0",
//!   "rig_port_speed": 19200,
//!   "rig_model": "TAIT",
//!   "nodes": [
//!     { "name": "Hilltop", "frequency": 440.35, "peer": "K7HIL-10" },
//!     { "name": "Harbor", "frequency": 145.05, "peer": "K7HBR-10", "channel": 12 }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("missing {0} in config")]
    Missing(&'static str),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Largest per-node history kept in memory.
pub const MAX_HISTORY_SIZE: usize = 10_000;

/// The native driver takes frequencies as 8 or 9 digit Hz strings.
const TAIT_FREQUENCY_DIGITS: std::ops::RangeInclusive<usize> = 8..=9;

// ── File layout ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default = "default_fetch_retry_interval")]
    fetch_retry_interval_seconds: u64,
    #[serde(default = "default_fetch_retries")]
    fetch_retries_count: u32,
    #[serde(default = "default_window")]
    health_window_size: usize,
    #[serde(default = "default_history_size")]
    history_size: usize,
    #[serde(default = "default_threshold")]
    unhealthy_threshold: usize,
    #[serde(default = "default_next_pass_delay")]
    next_pass_delay: u64,
    #[serde(default)]
    dedicated_mailbox: Option<Value>,

    pat_call: Option<String>,
    rx_aux_call: Option<String>,
    sender: Option<String>,
    mailbox_base_path: Option<PathBuf>,
    #[serde(default = "default_pat_bin")]
    pat_bin_path: String,
    #[serde(default = "default_rf_transport")]
    rf_transport: String,

    rig_port: Option<String>,
    rig_port_speed: Option<Value>,
    rig_model: Option<Value>,
    #[serde(default = "default_rigctl_bin")]
    rigctl_bin_path: String,

    #[serde(default)]
    nodes: Vec<Node>,

    pre_pass_hook: Option<PathBuf>,
    post_pass_hook: Option<PathBuf>,

    #[serde(default = "default_http_address")]
    http_address: String,
    #[serde(default = "default_http_port")]
    http_port: u16,
    #[serde(default = "default_status_title")]
    status_title: String,
}

fn default_fetch_retry_interval() -> u64 {
    30
}
fn default_fetch_retries() -> u32 {
    3
}
fn default_window() -> usize {
    5
}
fn default_history_size() -> usize {
    20
}
fn default_threshold() -> usize {
    3
}
fn default_next_pass_delay() -> u64 {
    3600
}
fn default_pat_bin() -> String {
    "pat".to_string()
}
fn default_rf_transport() -> String {
    "varafm".to_string()
}
fn default_rigctl_bin() -> String {
    "rigctl".to_string()
}
fn default_http_address() -> String {
    "127.0.0.1".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_status_title() -> String {
    "Relay Canary Status".to_string()
}

// ── Public configuration ─────────────────────────────────────────────────────

/// A relay node under watch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub name: String,
    /// MHz.
    pub frequency: f64,
    /// Address of the node on the relay network.
    pub peer: String,
    /// Preprogrammed channel, used instead of `frequency` when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u16>,
}

impl Node {
    pub fn frequency_hz(&self) -> u64 {
        (self.frequency * 1e6).round() as u64
    }

    pub fn describe_tuning(&self) -> String {
        match self.channel {
            Some(channel) => format!("channel {}", channel),
            None => format!("{:.4} MHz", self.frequency),
        }
    }
}

/// Which radio backend to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RigModel {
    /// Native CCDI/CCR serial driver.
    Tait,
    /// Hamlib model number, driven through `rigctl`.
    Hamlib(u32),
}

impl FromStr for RigModel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("TAIT") {
            return Ok(RigModel::Tait);
        }
        s.parse::<u32>().map(RigModel::Hamlib).map_err(|_| {
            ConfigError::Invalid(format!(
                "rig_model {:?} must be \"TAIT\" or a Hamlib model number",
                s
            ))
        })
    }
}

impl fmt::Display for RigModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RigModel::Tait => f.write_str("TAIT"),
            RigModel::Hamlib(model) => write!(f, "hamlib:{}", model),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RigConfig {
    pub model: RigModel,
    pub port: String,
    pub speed: u32,
    pub rigctl_bin: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MailConfig {
    pub pat_bin: String,
    pub pat_call: String,
    /// Recipient of every probe.
    pub rx_aux_call: String,
    /// Reply-to on every probe.
    pub sender: String,
    pub mailbox_base: PathBuf,
    pub rf_transport: String,
    /// The mailbox belongs to the canary alone, so leftovers may be deleted.
    pub dedicated_mailbox: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthConfig {
    pub window_size: usize,
    pub history_size: usize,
    pub unhealthy_threshold: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollConfig {
    /// First wait before looking for a probe; doubles after each miss.
    pub retry_interval_seconds: u64,
    pub retries: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
    pub title: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CanaryConfig {
    pub nodes: Vec<Node>,
    pub rig: RigConfig,
    pub mail: MailConfig,
    pub health: HealthConfig,
    pub poll: PollConfig,
    /// Seconds between passes.
    pub next_pass_delay: u64,
    pub pre_pass_hook: Option<PathBuf>,
    pub post_pass_hook: Option<PathBuf>,
    pub http: HttpConfig,
}

impl CanaryConfig {
    /// Load and validate a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut cfg = Self::from_json(&text)?;

        // Environment wins over the file for the listener port.
        if let Ok(port_str) = env::var("RELAY_CANARY_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http.port = port;
            }
        }

        Ok(cfg)
    }

    /// Parse and validate configuration JSON.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(text)?;

        let pat_call = file.pat_call.ok_or(ConfigError::Missing("pat_call"))?;
        let rx_aux_call = file.rx_aux_call.ok_or(ConfigError::Missing("rx_aux_call"))?;
        let sender = file.sender.unwrap_or_else(|| pat_call.clone());
        let mailbox_base = match file.mailbox_base_path {
            Some(path) => path,
            None => {
                let home = env::var("HOME").map_err(|_| ConfigError::Missing("mailbox_base_path"))?;
                PathBuf::from(home)
                    .join(".local/share/pat/mailbox")
                    .join(&pat_call)
            }
        };

        let port = file.rig_port.ok_or(ConfigError::Missing("rig_port"))?;
        let speed = match file.rig_port_speed.ok_or(ConfigError::Missing("rig_port_speed"))? {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| ConfigError::Invalid("rig_port_speed must be a positive integer".into()))?;
        let model = match file.rig_model.ok_or(ConfigError::Missing("rig_model"))? {
            Value::String(s) => s.parse()?,
            Value::Number(n) => n
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(RigModel::Hamlib)
                .ok_or_else(|| ConfigError::Invalid(format!("rig_model {} out of range", n)))?,
            other => {
                return Err(ConfigError::Invalid(format!("rig_model {} is not valid", other)))
            }
        };

        let cfg = CanaryConfig {
            nodes: file.nodes,
            rig: RigConfig {
                model,
                port,
                speed,
                rigctl_bin: file.rigctl_bin_path,
            },
            mail: MailConfig {
                pat_bin: file.pat_bin_path,
                pat_call,
                rx_aux_call,
                sender,
                mailbox_base,
                rf_transport: file.rf_transport,
                dedicated_mailbox: parse_flag(file.dedicated_mailbox.as_ref())?,
            },
            health: HealthConfig {
                window_size: file.health_window_size,
                history_size: file.history_size,
                unhealthy_threshold: file.unhealthy_threshold,
            },
            poll: PollConfig {
                retry_interval_seconds: file.fetch_retry_interval_seconds,
                retries: file.fetch_retries_count,
            },
            next_pass_delay: file.next_pass_delay,
            pre_pass_hook: file.pre_pass_hook,
            post_pass_hook: file.post_pass_hook,
            http: HttpConfig {
                address: file.http_address,
                port: file.http_port,
                title: file.status_title,
            },
        };
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let h = &self.health;
        if h.window_size == 0 {
            return Err(ConfigError::Invalid("health_window_size must be at least 1".into()));
        }
        if h.history_size < h.window_size {
            return Err(ConfigError::Invalid(format!(
                "history_size {} is smaller than health_window_size {}",
                h.history_size, h.window_size
            )));
        }
        if h.history_size > MAX_HISTORY_SIZE {
            return Err(ConfigError::Invalid(format!(
                "history_size {} exceeds the limit of {}",
                h.history_size, MAX_HISTORY_SIZE
            )));
        }
        if h.unhealthy_threshold == 0 || h.unhealthy_threshold > h.window_size {
            return Err(ConfigError::Invalid(format!(
                "unhealthy_threshold {} must be between 1 and health_window_size {}",
                h.unhealthy_threshold, h.window_size
            )));
        }
        if self.poll.retries == 0 {
            return Err(ConfigError::Invalid("fetch_retries_count must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.name.trim().is_empty() || node.peer.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("node {:?} needs a name and a peer", node)));
            }
            if !seen.insert(node.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate node name {:?}", node.name)));
            }
            match node.channel {
                Some(channel) if channel > 999 => {
                    return Err(ConfigError::Invalid(format!(
                        "node {} channel {} out of range 0-999",
                        node.name, channel
                    )))
                }
                Some(_) if self.rig.model != RigModel::Tait => {
                    return Err(ConfigError::Invalid(format!(
                        "node {} selects a channel, which needs the TAIT rig_model",
                        node.name
                    )))
                }
                None if !(node.frequency.is_finite() && node.frequency > 0.0) => {
                    return Err(ConfigError::Invalid(format!(
                        "node {} frequency {} is not a valid MHz value",
                        node.name, node.frequency
                    )))
                }
                None if self.rig.model == RigModel::Tait
                    && !TAIT_FREQUENCY_DIGITS.contains(&node.frequency_hz().to_string().len()) =>
                {
                    return Err(ConfigError::Invalid(format!(
                        "node {} frequency {} MHz is outside the TAIT range of 10-999 MHz",
                        node.name, node.frequency
                    )))
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Command-line delay wins when given.
    pub fn override_next_pass_delay(&mut self, delay: Option<u64>) {
        if let Some(delay) = delay.filter(|d| *d > 0) {
            self.next_pass_delay = delay;
        }
    }

    /// Keep only nodes named in `filter` (by name or peer). An empty filter
    /// keeps everything.
    pub fn retain_nodes(&mut self, filter: &[String]) {
        if filter.is_empty() {
            return;
        }
        self.nodes
            .retain(|n| filter.iter().any(|f| *f == n.name || *f == n.peer));
    }
}

/// Booleans have historically been written as strings ("True", "yes", "1").
fn parse_flag(value: Option<&Value>) -> Result<bool, ConfigError> {
    match value {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => Ok(matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "t" | "y" | "yes"
        )),
        Some(Value::Number(n)) => Ok(n.as_i64() == Some(1)),
        Some(other) => Err(ConfigError::Invalid(format!("dedicated_mailbox {} is not a flag", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"{
        "pat_call": "N0CALL",
        "rx_aux_call": "N0CALL-1",
        "mailbox_base_path": "/tmp/mailbox",
        "rig_port": "/dev/ttyUSB0",
        "rig_port_speed": 19200,
        "rig_model": "TAIT",
        "nodes": [
            { "name": "Hilltop", "frequency": 440.35, "peer": "K7HIL-10" },
            { "name": "Harbor", "frequency": 145.05, "peer": "K7HBR-10", "channel": 12 }
        ]
    }"#;

    fn with(extra: &str) -> String {
        MINIMAL.replacen('{', &format!("{{ {}", extra), 1)
    }

    #[test]
    fn test_defaults() {
        let cfg = CanaryConfig::from_json(MINIMAL).unwrap();
        assert_eq!(cfg.poll.retry_interval_seconds, 30);
        assert_eq!(cfg.poll.retries, 3);
        assert_eq!(cfg.health.window_size, 5);
        assert_eq!(cfg.health.history_size, 20);
        assert_eq!(cfg.health.unhealthy_threshold, 3);
        assert_eq!(cfg.next_pass_delay, 3600);
        assert!(!cfg.mail.dedicated_mailbox);
        assert_eq!(cfg.mail.sender, "N0CALL");
        assert_eq!(cfg.mail.pat_bin, "pat");
        assert_eq!(cfg.mail.rf_transport, "varafm");
        assert_eq!(cfg.rig.model, RigModel::Tait);
        assert_eq!(cfg.rig.speed, 19200);
        assert_eq!(cfg.http.port, 8080);
        assert_eq!(cfg.nodes.len(), 2);
        assert_eq!(cfg.nodes[1].channel, Some(12));
        assert!(cfg.pre_pass_hook.is_none());
    }

    #[test]
    fn test_missing_required() {
        let text = MINIMAL.replace(r#""rig_port": "/dev/ttyUSB0","#, "");
        assert!(matches!(
            CanaryConfig::from_json(&text),
            Err(ConfigError::Missing("rig_port"))
        ));

        let text = MINIMAL.replace(r#""pat_call": "N0CALL","#, "");
        assert!(matches!(
            CanaryConfig::from_json(&text),
            Err(ConfigError::Missing("pat_call"))
        ));
    }

    #[test]
    fn test_flexible_scalars() {
        let text = with(r#""dedicated_mailbox": "True","#)
            .replace("19200", "\"9600\"")
            .replace("\"TAIT\"", "1035")
            .replace(r#", "channel": 12"#, "");
        let cfg = CanaryConfig::from_json(&text).unwrap();
        assert!(cfg.mail.dedicated_mailbox);
        assert_eq!(cfg.rig.speed, 9600);
        assert_eq!(cfg.rig.model, RigModel::Hamlib(1035));

        let hamlib = MINIMAL.replace(r#", "channel": 12"#, "");
        let cfg = CanaryConfig::from_json(&hamlib.replace("\"TAIT\"", "\"2\"")).unwrap();
        assert_eq!(cfg.rig.model, RigModel::Hamlib(2));
        assert!(CanaryConfig::from_json(&hamlib.replace("\"TAIT\"", "\"RIG_MODEL_X\"")).is_err());
    }

    #[test]
    fn test_window_constraints() {
        let text = with(r#""health_window_size": 5, "history_size": 4,"#);
        assert!(matches!(CanaryConfig::from_json(&text), Err(ConfigError::Invalid(_))));

        let text = with(r#""unhealthy_threshold": 6,"#);
        assert!(CanaryConfig::from_json(&text).is_err());

        let text = with(r#""health_window_size": 0,"#);
        assert!(CanaryConfig::from_json(&text).is_err());

        let text = with(r#""history_size": 5,"#);
        assert!(CanaryConfig::from_json(&text).is_ok());
    }

    #[test]
    fn test_history_size_capped() {
        let text = with(r#""history_size": 1000000000,"#);
        assert!(matches!(CanaryConfig::from_json(&text), Err(ConfigError::Invalid(_))));

        let text = with(&format!(r#""history_size": {},"#, MAX_HISTORY_SIZE));
        assert_eq!(CanaryConfig::from_json(&text).unwrap().health.history_size, MAX_HISTORY_SIZE);
    }

    #[test]
    fn test_channel_needs_tait() {
        let text = MINIMAL.replace("\"TAIT\"", "1035");
        match CanaryConfig::from_json(&text) {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("Harbor"), "{}", msg),
            other => panic!("expected Invalid, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_tait_frequency_range() {
        // 1 MHz is 7 digits of Hz, 1500 MHz is 10
        for mhz in ["1.0", "1500.0"] {
            let text = MINIMAL.replace("440.35", mhz);
            assert!(
                matches!(CanaryConfig::from_json(&text), Err(ConfigError::Invalid(_))),
                "{} MHz accepted",
                mhz
            );
        }
        assert!(CanaryConfig::from_json(&MINIMAL.replace("440.35", "10.0")).is_ok());
        assert!(CanaryConfig::from_json(&MINIMAL.replace("440.35", "999.99")).is_ok());

        // Hamlib radios take any positive frequency
        let hamlib = MINIMAL
            .replace("\"TAIT\"", "1035")
            .replace(r#", "channel": 12"#, "")
            .replace("440.35", "1500.0");
        assert!(CanaryConfig::from_json(&hamlib).is_ok());
    }

    #[test]
    fn test_duplicate_node_rejected() {
        let text = MINIMAL.replace("Harbor", "Hilltop");
        assert!(CanaryConfig::from_json(&text).is_err());
    }

    #[test]
    fn test_node_filter_and_delay_override() {
        let mut cfg = CanaryConfig::from_json(MINIMAL).unwrap();
        cfg.override_next_pass_delay(Some(0));
        assert_eq!(cfg.next_pass_delay, 3600);
        cfg.override_next_pass_delay(Some(60));
        assert_eq!(cfg.next_pass_delay, 60);

        cfg.retain_nodes(&[]);
        assert_eq!(cfg.nodes.len(), 2);
        cfg.retain_nodes(&["K7HBR-10".to_string()]);
        assert_eq!(cfg.nodes.len(), 1);
        assert_eq!(cfg.nodes[0].name, "Harbor");
    }

    #[test]
    fn test_node_tuning() {
        let cfg = CanaryConfig::from_json(MINIMAL).unwrap();
        assert_eq!(cfg.nodes[0].frequency_hz(), 440_350_000);
        assert_eq!(cfg.nodes[0].describe_tuning(), "440.3500 MHz");
        assert_eq!(cfg.nodes[1].describe_tuning(), "channel 12");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let cfg = CanaryConfig::load(file.path()).unwrap();
        assert_eq!(cfg.mail.rx_aux_call, "N0CALL-1");

        assert!(matches!(
            CanaryConfig::load("/nonexistent/canary.json"),
            Err(ConfigError::Io { .. })
        ));
    }
}
