//! # chainboot
//!
//! A PXE boot server that chainloads network-boot clients from DHCP/UDP
//! onto plain HTTP.
//!
//! PXE firmware speaks DHCP and TFTP, both miserable to extend. chainboot
//! answers the PXE boot-menu discovery with a single DHCP-shaped reply
//! that points the client's pxelinux stack at an HTTP URL. Everything
//! after that first packet (the bootloader, its config, the kernel and
//! initrds) is served over plain HTTP.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use chainboot::{AppState, Config, FileBooter, PxeServer, StaticInterfaceResolver};
//!
//! #[tokio::main]
//! async fn main() -> chainboot::Result<()> {
//!     let config = Arc::new(Config::load_or_create("config.json")?);
//!     let resolver = Arc::new(StaticInterfaceResolver::new(config.server_ip));
//!     let pxe = PxeServer::new(Arc::clone(&config), resolver)?;
//!
//!     let booter = Arc::new(FileBooter::new(
//!         "/srv/vmlinuz".into(),
//!         vec!["/srv/initrd.img".into()],
//!         "console=ttyS0".to_string(),
//!     ));
//!     let bootloader = std::fs::read(&config.bootloader_file)?;
//!     let state = AppState::new(booter, bootloader)?;
//!
//!     tokio::select! {
//!         result = pxe.run() => result,
//!         result = chainboot::http::serve(config.http_port, state) => result,
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`PxeServer`] - UDP responder that redirects PXE discoveries to HTTP
//! - [`http`] - boot orchestrator serving bootloader, config, and blobs
//! - [`Booter`] - pluggable boot policy; [`FileBooter`] serves fixed files
//! - [`PxePacket`] - discovery parsing and reply encoding
//! - [`Config`] - service configuration (ports, advertised IP, images)

pub mod booter;
pub mod config;
pub mod error;
pub mod http;
pub mod options;
pub mod packet;
pub mod server;
pub mod token;

pub use booter::{BootSpec, Booter, FileBooter};
pub use config::Config;
pub use error::{Error, Result};
pub use http::AppState;
pub use packet::{DhcpHeader, PxePacket};
pub use server::{InterfaceResolver, PxeServer, StaticInterfaceResolver};
