// packages/runner/src/catalog/descriptor.rs
//! Experiment descriptors
//!
//! One descriptor per catalog block. Descriptors are immutable once parsed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The two mutually exclusive network-layer architectures under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackKind {
    /// Default-routed IPv4 stack
    Ip,
    /// XIA stack; relies on link-layer neighbor discovery
    Xia,
}

impl StackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackKind::Ip => "ip",
            StackKind::Xia => "xia",
        }
    }

    /// Whether peers must be discovered before traffic can flow
    pub fn needs_discovery(&self) -> bool {
        matches!(self, StackKind::Xia)
    }
}

impl FromStr for StackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ip" => Ok(StackKind::Ip),
            "xia" => Ok(StackKind::Xia),
            other => Err(format!("stack must be either 'ip' or 'xia', got '{}'", other)),
        }
    }
}

impl fmt::Display for StackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination-addressing mode, passed through to the traffic-writers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestMode(String);

impl DestMode {
    pub fn new(mode: impl Into<String>) -> Self {
        Self(mode.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `via` mode needs an extra address record on XIA hosts
    pub fn is_via(&self) -> bool {
        self.0 == "via"
    }
}

impl fmt::Display for DestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Independent variables of one trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameters {
    pub stack: StackKind,
    pub dest_mode: DestMode,
    /// Controller route updates per second; 0 means a static table
    pub update_rate: u64,
    /// Packet length in bytes
    pub packet_len: u32,
    pub zipf: f64,
    /// Number of router ports, which is also the container count
    pub port_count: usize,
    /// Trial number, starting at 1
    pub trial: u32,
}

impl Parameters {
    /// Parse the whitespace-separated parameter line
    pub fn parse_line(line: &str) -> Result<Self, String> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 7 {
            return Err(format!("expected 7 parameters, found {}", fields.len()));
        }

        let params = Self {
            stack: fields[0].parse()?,
            dest_mode: DestMode::new(fields[1]),
            update_rate: parse_field(fields[2], "update rate")?,
            packet_len: parse_field(fields[3], "packet length")?,
            zipf: parse_field(fields[4], "zipf skew")?,
            port_count: parse_field(fields[5], "port count")?,
            trial: parse_field(fields[6], "trial number")?,
        };

        if params.port_count < 1 {
            return Err("port count must be >= 1".into());
        }
        if params.trial < 1 {
            return Err("trial number must be >= 1".into());
        }
        if params.packet_len == 0 {
            return Err("packet length must be > 0".into());
        }
        if !params.zipf.is_finite() || params.zipf < 0.0 {
            return Err(format!("zipf skew must be finite and >= 0, got {}", params.zipf));
        }
        Ok(params)
    }

    pub fn to_line(&self) -> String {
        format!(
            "{} {} {} {} {} {} {}",
            self.stack,
            self.dest_mode,
            self.update_rate,
            self.packet_len,
            self.zipf,
            self.port_count,
            self.trial
        )
    }
}

fn parse_field<T: FromStr>(raw: &str, what: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("invalid {} '{}'", what, raw))
}

/// One experiment from the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentDescriptor {
    /// 1-based sequence number
    pub seq: u64,

    /// Generator command line
    pub generator_cmd: String,

    /// Controller command line
    pub controller_cmd: String,

    pub params: Parameters,

    pub name: String,

    /// Log directory; relative paths are under the working directory
    pub log_dir: PathBuf,
}

impl ExperimentDescriptor {
    pub fn log_dir_in(&self, work_dir: &Path) -> PathBuf {
        if self.log_dir.is_absolute() {
            self.log_dir.clone()
        } else {
            work_dir.join(&self.log_dir)
        }
    }

    /// Where the controller's stdout is collected
    pub fn controller_log(&self, work_dir: &Path) -> PathBuf {
        self.log_dir_in(work_dir).join("controller.log")
    }

    pub fn generator_log(&self, work_dir: &Path) -> PathBuf {
        self.log_dir_in(work_dir).join("generator.log")
    }

    /// Private log of the traffic-writer in container `index`
    pub fn writer_log(&self, work_dir: &Path, index: usize) -> PathBuf {
        self.log_dir_in(work_dir).join(format!("writer-{}.log", index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_parameter_line() {
        let params = Parameters::parse_line("xia via 100 1500 0.8 4 2").unwrap();
        assert_eq!(params.stack, StackKind::Xia);
        assert!(params.dest_mode.is_via());
        assert_eq!(params.update_rate, 100);
        assert_eq!(params.packet_len, 1500);
        assert_eq!(params.port_count, 4);
        assert_eq!(params.trial, 2);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(Parameters::parse_line("ipv6 dst 0 64 1 1 1").is_err());
        assert!(Parameters::parse_line("ip dst 0 64 1 0 1").is_err());
        assert!(Parameters::parse_line("ip dst 0 64 1 1 0").is_err());
        assert!(Parameters::parse_line("ip dst 0 64 1 1").is_err());
        assert!(Parameters::parse_line("ip dst -3 64 1 1 1").is_err());
        assert!(Parameters::parse_line("ip dst 0 64 NaN 1 1").is_err());
    }

    #[test]
    fn test_stack_kind() {
        assert!(StackKind::Xia.needs_discovery());
        assert!(!StackKind::Ip.needs_discovery());
        assert_eq!("ip".parse::<StackKind>().unwrap(), StackKind::Ip);
    }

    #[test]
    fn test_log_paths() {
        let descriptor = ExperimentDescriptor {
            seq: 1,
            generator_cmd: "gen".into(),
            controller_cmd: "rk".into(),
            params: Parameters::parse_line("ip dst 0 64 1 2 1").unwrap(),
            name: "ip-64".into(),
            log_dir: PathBuf::from("logs/ip-64"),
        };
        let work = Path::new("/srv/exp");
        assert_eq!(
            descriptor.controller_log(work),
            PathBuf::from("/srv/exp/logs/ip-64/controller.log")
        );
        assert_eq!(
            descriptor.writer_log(work, 2),
            PathBuf::from("/srv/exp/logs/ip-64/writer-2.log")
        );
    }
}
