//! The HTTP boot orchestrator.
//!
//! Once the PXE responder redirects a client here, three routes carry the
//! rest of the boot: the bootloader binary itself, the pxelinux config the
//! bootloader asks for by MAC, and the kernel/initrd blobs named in that
//! config. Boot policy lives behind the [`Booter`] trait; this module only
//! translates between HTTP and the policy engine.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use rand::rngs::OsRng;
use rand::RngCore;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::booter::Booter;
use crate::error::{Error, Result};
use crate::token;

/// pxelinux config that shuts down netbooting and hands control back to
/// the next local boot method.
const BOOT_FROM_DISK: &str = "
DEFAULT local
LABEL local
LOCALBOOT 0
";

/// Displayed by pxelinux while it fetches OS images, which can take a
/// while on a slow link.
const BANNER: &str = "
	        chainboot is fetching an operating system for this machine.
	        Large images take a moment. Hold tight.
";

struct Inner {
    booter: Arc<dyn Booter>,
    bootloader: Vec<u8>,
    /// Reserved for signing blob URLs; generated at startup, not yet
    /// applied to anything.
    #[allow(dead_code)]
    key: [u8; 32],
}

#[derive(Clone)]
pub struct AppState {
    inner: Arc<Inner>,
}

impl AppState {
    pub fn new(booter: Arc<dyn Booter>, bootloader: Vec<u8>) -> Result<Self> {
        let mut key = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|error| Error::KeyMaterial(error.to_string()))?;

        Ok(Self {
            inner: Arc::new(Inner {
                booter,
                bootloader,
                key,
            }),
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ldlinux.c32", get(serve_bootloader))
        .route("/pxelinux.cfg/{name}", get(serve_config))
        .route("/f/{token}", get(serve_blob))
        .with_state(state)
}

/// Runs the orchestrator until the process exits. Failing to bind the
/// listener is fatal.
pub async fn serve(port: u16, state: AppState) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!("HTTP orchestrator listening on port {}", port);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn serve_bootloader(State(state): State<AppState>) -> Response {
    let bootloader = &state.inner.bootloader;
    info!("Sending bootloader ({} bytes)", bootloader.len());
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bootloader.clone(),
    )
        .into_response()
}

async fn serve_config(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let mac = match parse_config_name(&name) {
        Some(mac) => mac,
        None => {
            debug!(
                "Config request for {:?} does not name a valid MAC address",
                name
            );
            return (StatusCode::BAD_REQUEST, "Missing MAC address in request").into_response();
        }
    };

    let spec = match state.inner.booter.boot_spec(mac) {
        Some(spec) => spec,
        None => {
            // A machine is sitting in pxelinux but policy says it should
            // not netboot. Hand back a config that resumes the local boot
            // order.
            debug!("Telling {} to boot from disk per policy", name);
            return (
                [(header::CONTENT_TYPE, "text/plain")],
                BOOT_FROM_DISK,
            )
                .into_response();
        }
    };

    // Blob ids are arbitrary bytes but pxelinux speaks URL, so every id
    // is tokenized under the blob route.
    let kernel = format!("f/{}", token::encode(&spec.kernel));
    let initrds: Vec<String> = spec
        .initrds
        .iter()
        .map(|id| format!("f/{}", token::encode(id)))
        .collect();

    let config = format!(
        "\nSAY {}\nDEFAULT linux\nLABEL linux\nLINUX {}\nAPPEND initrd={} {}\n",
        BANNER.replace('\n', "\nSAY "),
        kernel,
        initrds.join(","),
        spec.cmdline
    );

    info!("Sent boot config to {}", name);
    ([(header::CONTENT_TYPE, "text/plain")], config).into_response()
}

async fn serve_blob(State(state): State<AppState>, Path(encoded): Path<String>) -> Response {
    let blob_id = match token::decode(&encoded) {
        Ok(id) => id,
        Err(error) => {
            warn!("Bad blob token {:?}: {}", encoded, error);
            return (StatusCode::BAD_REQUEST, "Malformed file ID").into_response();
        }
    };

    let (reader, name) = match state.inner.booter.open_blob(&blob_id) {
        Ok(blob) => blob,
        Err(error) => {
            warn!("Couldn't get byte stream for {:?}: {}", encoded, error);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Couldn't get byte stream",
            )
                .into_response();
        }
    };

    info!("Streaming {}", name);
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        Body::from_stream(ReaderStream::new(reader)),
    )
        .into_response()
}

/// Extracts the MAC from a pxelinux config name of the form `01-<mac>`,
/// where `01` is the Ethernet hardware-type prefix pxelinux always sends.
/// Colon and dash separators are both accepted.
fn parse_config_name(name: &str) -> Option<[u8; 6]> {
    let mac_str = name.strip_prefix("01-")?;
    let mut parts = mac_str.split([':', '-']);
    let mut mac = [0u8; 6];
    for slot in &mut mac {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *slot = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(mac)
}
