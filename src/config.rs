//! Installer configuration.
//!
//! Loaded from a TOML file; every key has a default so an empty file (or no
//! file at all) gives the stock behaviour.
//!
//! ```toml
//! [domain]
//! disk_bus = "virtio"
//! mouse = "usb"
//!
//! [install]
//! poll_budget = 1800
//! ```

use std::fs;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::disk::{DEFAULT_DISK_SIZE_GIB, MAX_DISK_SIZE_GIB};
use crate::error::{Error, Result};
use crate::guest::{DomainConfig, GuestPaths, MacAddr};
use crate::install::DEFAULT_POLL_BUDGET;
use crate::media::fetch::DEFAULT_CONNECT_TIMEOUT;
use crate::network::DEFAULT_BOOT_TIMEOUT;

/// Config file name looked up under the user config directory.
pub const CONFIG_FILE_NAME: &str = "guest-installer/config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub domain: DomainSection,
    pub network: NetworkSection,
    pub install: InstallSection,
    pub paths: PathsSection,
    pub tools: ToolsSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DomainSection {
    pub nic_model: String,
    pub clock_offset: String,
    pub mouse: String,
    pub disk_bus: String,
    pub memory_kib: u64,
    pub vcpus: u32,
}

impl Default for DomainSection {
    fn default() -> Self {
        Self {
            nic_model: "rtl8139".to_string(),
            clock_offset: "utc".to_string(),
            mouse: "ps2".to_string(),
            disk_bus: "ide".to_string(),
            memory_kib: 1024 * 1024,
            vcpus: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkSection {
    /// Bridge of the control plane's private NAT network.
    pub bridge: String,
    pub mac_prefix: String,
    /// Half-open range the boot listener port is drawn from.
    pub listen_ports: [u16; 2],
    pub boot_timeout_secs: u64,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            bridge: "virbr0".to_string(),
            mac_prefix: "52:54:00".to_string(),
            listen_ports: [1024, 65535],
            boot_timeout_secs: DEFAULT_BOOT_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstallSection {
    pub poll_budget: u32,
    pub poll_interval_ms: u64,
    pub connect_timeout_secs: u64,
    pub disk_size_gib: u64,
}

impl Default for InstallSection {
    fn default() -> Self {
        Self {
            poll_budget: DEFAULT_POLL_BUDGET,
            poll_interval_ms: 1000,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            disk_size_gib: DEFAULT_DISK_SIZE_GIB,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsSection {
    pub image_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl Default for PathsSection {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("/var/lib/libvirt/images"),
            state_dir: PathBuf::from("/var/lib/guest-installer"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsSection {
    pub connect_uri: String,
    pub screenshot: String,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            connect_uri: "qemu:///system".to_string(),
            screenshot: "gvnccapture".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::parse(&raw).map_err(|e| match e {
            Error::Configuration(msg) => {
                Error::Configuration(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(raw).map_err(|e| Error::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// `<config dir>/guest-installer/config.toml` if it exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(CONFIG_FILE_NAME))
            .filter(|path| path.is_file())
    }

    fn validate(&self) -> Result<()> {
        self.domain_config()?;
        self.mac_prefix()?;
        let [start, end] = self.network.listen_ports;
        if start == 0 || start >= end {
            return Err(Error::Configuration(format!(
                "listen_ports [{start}, {end}) is empty or includes port 0"
            )));
        }
        if self.install.poll_budget == 0 {
            return Err(Error::Configuration("poll_budget must be positive".into()));
        }
        let size = self.install.disk_size_gib;
        if size == 0 || size > MAX_DISK_SIZE_GIB {
            return Err(Error::Configuration(format!(
                "disk_size_gib must be between 1 and {MAX_DISK_SIZE_GIB}, got {size}"
            )));
        }
        Ok(())
    }

    pub fn domain_config(&self) -> Result<DomainConfig> {
        Ok(DomainConfig {
            nic_model: self.domain.nic_model.clone(),
            clock_offset: self.domain.clock_offset.clone(),
            mouse: self.domain.mouse.parse()?,
            disk_bus: self.domain.disk_bus.parse()?,
            memory_kib: self.domain.memory_kib,
            vcpus: self.domain.vcpus,
        })
    }

    pub fn mac_prefix(&self) -> Result<[u8; 3]> {
        MacAddr::parse_prefix(&self.network.mac_prefix)
    }

    pub fn listen_ports(&self) -> Range<u16> {
        let [start, end] = self.network.listen_ports;
        start..end
    }

    /// Random boot listener port from the configured range.
    pub fn pick_listen_port(&self, rng: &mut impl Rng) -> u16 {
        rng.random_range(self.listen_ports())
    }

    pub fn boot_timeout(&self) -> Duration {
        Duration::from_secs(self.network.boot_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.install.poll_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.install.connect_timeout_secs)
    }

    pub fn guest_paths(&self, name: &str) -> GuestPaths {
        GuestPaths::new(&self.paths.image_dir, &self.paths.state_dir, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guest::{DiskBus, MouseType};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        let domain = config.domain_config().unwrap();

        assert_eq!(domain, DomainConfig::default());
        assert_eq!(config.network.bridge, "virbr0");
        assert_eq!(config.install.poll_budget, 1200);
        assert_eq!(config.boot_timeout(), Duration::from_secs(300));
        assert_eq!(config.listen_ports(), 1024..65535);
    }

    #[test]
    fn test_overrides() {
        let config = Config::parse(
            r#"
[domain]
disk_bus = "virtio"
mouse = "usb"

[install]
poll_budget = 30
"#,
        )
        .unwrap();
        let domain = config.domain_config().unwrap();
        assert_eq!(domain.disk_bus, DiskBus::Virtio);
        assert_eq!(domain.mouse, MouseType::Usb);
        assert_eq!(config.install.poll_budget, 30);
        assert_eq!(config.install.poll_interval_ms, 1000);
    }

    #[test]
    fn test_unknown_disk_bus_rejected() {
        let err = Config::parse("[domain]\ndisk_bus = \"scsi\"\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = Config::parse("[domain]\nbogus = 1\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_empty_port_range_rejected() {
        let err = Config::parse("[network]\nlisten_ports = [2000, 2000]\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_disk_size_out_of_range_rejected() {
        for size in ["0", "9000000000"] {
            let err = Config::parse(&format!("[install]\ndisk_size_gib = {size}\n")).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "disk_size_gib = {size}");
        }
        let config = Config::parse("").unwrap();
        assert_eq!(config.install.disk_size_gib, DEFAULT_DISK_SIZE_GIB);
        assert_eq!(config.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_pick_listen_port_in_range() {
        let config = Config::parse("[network]\nlisten_ports = [5000, 5010]\n").unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let port = config.pick_listen_port(&mut rng);
            assert!((5000..5010).contains(&port));
        }
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(&path, "[paths]\nimage_dir = \"/srv/images\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        let paths = config.guest_paths("fedora14x86_64");
        assert_eq!(
            paths.disk_image,
            PathBuf::from("/srv/images/fedora14x86_64.dsk")
        );
    }
}
