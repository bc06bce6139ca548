// packages/runner/src/provision/container.rs
//! Container set layout
//!
//! A container set is derived deterministically from `(count, stack)` and
//! the configuration, so teardown can rebuild it without any saved state.

use crate::catalog::StackKind;
use crate::tools::template::Vars;
use crate::utils::config::{NetworkConfig, RunnerConfig};
use crate::utils::errors::{Result, RunnerError};
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Largest set that fits the per-container /24 scheme
pub const MAX_CONTAINERS: usize = 254;

/// Address a container configures for itself
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Address {
    /// Container host address and its bridge (gateway) address
    Ip { host: Ipv4Addr, gateway: Ipv4Addr },
    /// XIA host identifier
    Xia { hid: String },
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ip { host, gateway } => write!(f, "{} via {}", host, gateway),
            Address::Xia { hid } => write!(f, "hid {}", hid),
        }
    }
}

/// One member of a container set
#[derive(Debug, Clone, Serialize)]
pub struct Container {
    /// 1-based position in the set
    pub index: usize,
    pub name: String,
    pub address: Address,
    /// File name of this container's readiness marker
    pub marker: String,
    /// Host-side bridge
    pub bridge: String,
    /// Inter-container virtual link
    pub link: String,
    /// Host path the working directory is bind-mounted onto
    pub mount_target: PathBuf,
}

impl Container {
    /// Per-container MAC suffix handed to the traffic-writer
    pub fn mac_suffix(&self) -> String {
        format!("{:02x}", self.index)
    }

    /// Bridge address in CIDR form, for IP containers
    pub fn bridge_cidr(&self) -> Option<String> {
        match &self.address {
            Address::Ip { gateway, .. } => Some(format!("{}/24", gateway)),
            Address::Xia { .. } => None,
        }
    }

    pub fn vars(&self) -> Vars {
        let vars = Vars::new()
            .with("index", self.index)
            .with("name", &self.name)
            .with("bridge", &self.bridge)
            .with("link", &self.link)
            .with("mac", self.mac_suffix());
        match &self.address {
            Address::Ip { host, gateway } => vars.with("addr", host).with("gateway", gateway),
            Address::Xia { hid } => vars.with("hid", hid),
        }
    }
}

/// Ordered set of containers for one experiment
#[derive(Debug, Clone, Serialize)]
pub struct ContainerSet {
    pub stack: StackKind,
    pub members: Vec<Container>,
}

impl ContainerSet {
    /// Lay out `count` containers of kind `stack`
    pub fn plan(count: usize, stack: StackKind, config: &RunnerConfig) -> Result<Self> {
        if count == 0 || count > MAX_CONTAINERS {
            return Err(RunnerError::ConfigError(format!(
                "container count must be within 1..={}, got {}",
                MAX_CONTAINERS, count
            )));
        }
        let (a, b) = subnet_octets(&config.network)?;
        let mount_rel = config
            .paths
            .container_mount
            .strip_prefix("/")
            .unwrap_or(&config.paths.container_mount)
            .to_path_buf();

        let members = (1..=count)
            .map(|index| {
                let base = Vars::new().with("stack", stack).with("index", index);
                let name = base.expand(&config.tools.container_name);
                let vars = base.with("name", &name);
                let address = match stack {
                    StackKind::Ip => Address::Ip {
                        host: Ipv4Addr::new(a, b, index as u8, 2),
                        gateway: Ipv4Addr::new(a, b, index as u8, 1),
                    },
                    StackKind::Xia => Address::Xia {
                        hid: format!("hid-{}", name),
                    },
                };
                Container {
                    index,
                    marker: format!("ready-{}", index),
                    bridge: vars.expand(&config.network.bridge_name),
                    link: vars.expand(&config.network.virtual_link),
                    mount_target: PathBuf::from(vars.expand(&config.tools.container_rootfs))
                        .join(&mount_rel),
                    address,
                    name,
                }
            })
            .collect();

        Ok(Self { stack, members })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Container> {
        self.members.iter()
    }
}

fn subnet_octets(network: &NetworkConfig) -> Result<(u8, u8)> {
    let parts: Vec<&str> = network.subnet_prefix.split('.').collect();
    let octets: Option<Vec<u8>> = parts.iter().map(|p| p.parse().ok()).collect();
    match octets.as_deref() {
        Some([a, b]) => Ok((*a, *b)),
        _ => Err(RunnerError::ConfigError(format!(
            "network.subnet_prefix must be two octets like '10.0', got '{}'",
            network.subnet_prefix
        ))),
    }
}

/// Translates host paths under the working directory to the path the same
/// file has inside a container
#[derive(Debug, Clone)]
pub struct MountMap {
    work_dir: PathBuf,
    container_mount: PathBuf,
}

impl MountMap {
    pub fn new(work_dir: PathBuf, container_mount: PathBuf) -> Self {
        Self {
            work_dir,
            container_mount,
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn to_container(&self, host_path: &Path) -> Result<PathBuf> {
        let rel = host_path.strip_prefix(&self.work_dir).map_err(|_| {
            RunnerError::ConfigError(format!(
                "{:?} is outside the working directory {:?} and not visible in containers",
                host_path, self.work_dir
            ))
        })?;
        Ok(self.container_mount.join(rel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_ip_set() {
        let config = RunnerConfig::default();
        let set = ContainerSet::plan(2, StackKind::Ip, &config).unwrap();
        assert_eq!(set.len(), 2);

        let second = &set.members[1];
        assert_eq!(second.index, 2);
        assert_eq!(second.name, "ip2");
        assert_eq!(second.marker, "ready-2");
        assert_eq!(second.bridge, "br2");
        assert_eq!(second.link, "veth-ip2");
        assert_eq!(second.bridge_cidr().as_deref(), Some("10.0.2.1/24"));
        assert_eq!(
            second.mount_target,
            PathBuf::from("/var/lib/lxc/ip2/rootfs/mnt/experiment")
        );
    }

    #[test]
    fn test_plan_xia_set() {
        let config = RunnerConfig::default();
        let set = ContainerSet::plan(3, StackKind::Xia, &config).unwrap();
        assert_eq!(
            set.members[0].address,
            Address::Xia {
                hid: "hid-xia1".into()
            }
        );
        assert!(set.members[0].bridge_cidr().is_none());
    }

    #[test]
    fn test_plan_bounds() {
        let config = RunnerConfig::default();
        assert!(ContainerSet::plan(0, StackKind::Ip, &config).is_err());
        assert!(ContainerSet::plan(MAX_CONTAINERS + 1, StackKind::Ip, &config).is_err());
    }

    #[test]
    fn test_bad_subnet_prefix() {
        let mut config = RunnerConfig::default();
        config.network.subnet_prefix = "10.0.0".into();
        assert!(ContainerSet::plan(1, StackKind::Ip, &config).is_err());
    }

    #[test]
    fn test_mac_suffix() {
        let config = RunnerConfig::default();
        let set = ContainerSet::plan(12, StackKind::Ip, &config).unwrap();
        assert_eq!(set.members[11].mac_suffix(), "0c");
    }

    #[test]
    fn test_mount_map() {
        let map = MountMap::new(PathBuf::from("/srv/exp"), PathBuf::from("/mnt/experiment"));
        assert_eq!(
            map.to_container(Path::new("/srv/exp/barrier/gate")).unwrap(),
            PathBuf::from("/mnt/experiment/barrier/gate")
        );
        assert!(map.to_container(Path::new("/tmp/x")).is_err());
    }
}
