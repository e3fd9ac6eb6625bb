//! Error types for the PXE boot server.
//!
//! All fallible operations in this crate return [`Result<T>`], which uses
//! the [`Error`] enum for error variants.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File system or network I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (config file).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Received datagram is shorter than the 240-byte BOOTP header plus
    /// magic cookie, so none of the fixed-offset fields can be read.
    #[error("packet too short: {0} bytes (minimum 240)")]
    PacketTooShort(usize),

    /// The bytes at offset 236 are not the DHCP magic cookie.
    ///
    /// The PXE port carries PXE traffic exclusively, so anything else is
    /// dropped without a reply.
    #[error("not a DHCP packet (bad magic cookie)")]
    NotDhcpPacket,

    /// An option declared a length that runs past the end of the buffer,
    /// or the option area ended without a terminator.
    #[error("malformed DHCP option: {0}")]
    MalformedOption(&'static str),

    /// Option 97 (client UUID) was present but not a 17-byte value with a
    /// leading zero byte.
    #[error("malformed option 97 (client UUID): {0} bytes")]
    MalformedGuid(usize),

    /// The discovery carried no option 97, so the sender is not a PXE client.
    #[error("discovery carries no client UUID (option 97)")]
    MissingGuid,

    /// The discovery carried no boot menu selection (sub-option 71 inside
    /// option 43).
    #[error("discovery carries no boot type (option 43/71)")]
    MissingBootType,

    /// The HTTP base URL does not fit the single length byte of the
    /// path-prefix option (210).
    #[error("HTTP server URL is {0} bytes, must fit in one byte (max 255)")]
    UrlTooLong(usize),

    /// An option value exceeds the 255-byte TLV limit.
    #[error("option {code} value is {len} bytes, must fit in one byte")]
    OptionTooLong { code: u8, len: usize },

    /// A reply was encoded before the responder filled in the
    /// environment-derived fields.
    #[error("reply field not set before encoding: {0}")]
    IncompleteReply(&'static str),

    /// A blob token failed to decode. Surfaced to HTTP clients as a 400.
    #[error("malformed blob token: {0}")]
    Token(#[from] base64::DecodeError),

    /// Invalid server configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Socket creation or configuration error.
    ///
    /// Typically occurs when binding the PXE port without sufficient
    /// privileges.
    #[error("socket error: {0}")]
    Socket(String),

    /// Startup key material could not be generated.
    #[error("cannot initialize URL signing key: {0}")]
    KeyMaterial(String),
}

/// A specialized Result type for PXE boot operations.
pub type Result<T> = std::result::Result<T, Error>;
