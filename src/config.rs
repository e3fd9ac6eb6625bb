use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// IP advertised to clients, used when the receiving interface cannot
    /// be resolved any other way.
    pub server_ip: Ipv4Addr,
    /// UDP port the PXE responder listens on.
    pub pxe_port: u16,
    /// TCP port the HTTP boot orchestrator listens on.
    pub http_port: u16,
    /// Path to the pxelinux bootloader served at /ldlinux.c32.
    pub bootloader_file: String,
    /// Kernel image path. Required to run; optional here so ShowConfig
    /// works on a freshly created file.
    pub kernel: Option<String>,
    /// Initrd image paths, loaded in order.
    pub initrds: Vec<String>,
    /// Kernel command line appended after the initrd list.
    pub cmdline: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_ip: Ipv4Addr::new(192, 168, 1, 1),
            pxe_port: 4011,
            http_port: 8080,
            bootloader_file: "ldlinux.c32".to_string(),
            kernel: None,
            initrds: Vec::new(),
            cmdline: String::new(),
        }
    }
}

impl Config {
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            Ok(config)
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_ip.is_unspecified() {
            return Err(Error::InvalidConfig(
                "server_ip must not be 0.0.0.0".to_string(),
            ));
        }

        if self.pxe_port == 0 || self.http_port == 0 {
            return Err(Error::InvalidConfig(
                "pxe_port and http_port must be greater than 0".to_string(),
            ));
        }

        if self.pxe_port == self.http_port {
            return Err(Error::InvalidConfig(
                "pxe_port and http_port must differ".to_string(),
            ));
        }

        if self.bootloader_file.is_empty() {
            return Err(Error::InvalidConfig(
                "bootloader_file must not be empty".to_string(),
            ));
        }

        if let Some(kernel) = &self.kernel {
            if kernel.is_empty() {
                return Err(Error::InvalidConfig(
                    "kernel must not be an empty path".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// The base URL clients are redirected to, e.g. "http://192.168.1.1:8080/".
    /// The responder substitutes the real receiving-interface IP at reply
    /// time; this form is for logs and single-homed fallback.
    pub fn http_base_url(&self, ip: Ipv4Addr) -> String {
        format!("http://{}:{}/", ip, self.http_port)
    }
}
