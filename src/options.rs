//! DHCP option (TLV) scanning and encoding.
//!
//! DHCP options are type-length-value encoded: a 1-byte code, a 1-byte
//! length, then `length` bytes of value. Code 255 terminates the option
//! area and carries no length or value; code 0 is padding and is skipped.
//!
//! The same encoding is used at two levels in a PXE exchange: the top-level
//! option area after the magic cookie, and the nested sub-options inside
//! the vendor-specific option (43). [`Options`] handles both.
//!
//! Every read is bounds-checked against the remaining buffer. A declared
//! length that runs past the end of the buffer, or an option area that
//! ends without a terminator, yields [`Error::MalformedOption`] rather
//! than a short or out-of-range read.

use crate::error::{Error, Result};

/// DHCP message type (RFC 2132 9.6).
pub const OPT_MESSAGE_TYPE: u8 = 53;
/// Server identifier (RFC 2132 9.7).
pub const OPT_SERVER_ID: u8 = 54;
/// Vendor class identifier (RFC 2132 9.13). PXE clients require the
/// literal "PXEClient" here to accept a reply as PXE-aware.
pub const OPT_VENDOR_CLASS: u8 = 60;
/// Vendor-specific information (RFC 2132 8.4), carrying nested PXE
/// sub-options.
pub const OPT_VENDOR_SPECIFIC: u8 = 43;
/// PXE boot item: the menu selection, nested inside option 43.
pub const OPT_BOOT_ITEM: u8 = 71;
/// Client machine UUID (RFC 4578): one type byte (0) plus 16 GUID bytes.
pub const OPT_CLIENT_UUID: u8 = 97;
/// pxelinux path prefix (RFC 5071): base URL prepended to every file the
/// loader fetches.
pub const OPT_PATH_PREFIX: u8 = 210;
/// pxelinux reboot time (RFC 5071): seconds before the loader retries
/// after a failed boot.
pub const OPT_REBOOT_TIME: u8 = 211;
/// Padding byte.
pub const OPT_PAD: u8 = 0;
/// End-of-options marker.
pub const OPT_END: u8 = 255;

/// DHCPACK message type value for option 53.
pub const MESSAGE_TYPE_ACK: u8 = 5;

/// A scanner over a TLV option area.
///
/// Yields `(code, value)` pairs until the terminator; the terminator itself
/// is not yielded. The scanner borrows the packet buffer, so values are
/// non-owning views into it.
#[derive(Debug, Clone, Copy)]
pub struct Options<'a> {
    rest: &'a [u8],
    done: bool,
}

impl<'a> Options<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            rest: buffer,
            done: false,
        }
    }
}

impl<'a> Iterator for Options<'a> {
    type Item = Result<(u8, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let (&code, after_code) = match self.rest.split_first() {
                Some(split) => split,
                None => {
                    self.done = true;
                    return Some(Err(Error::MalformedOption("missing terminator")));
                }
            };

            match code {
                OPT_PAD => {
                    self.rest = after_code;
                    continue;
                }
                OPT_END => {
                    self.done = true;
                    return None;
                }
                _ => {}
            }

            let (&length, after_length) = match after_code.split_first() {
                Some(split) => split,
                None => {
                    self.done = true;
                    return Some(Err(Error::MalformedOption("missing length byte")));
                }
            };

            let length = length as usize;
            if length > after_length.len() {
                self.done = true;
                return Some(Err(Error::MalformedOption(
                    "declared length exceeds buffer",
                )));
            }

            let (value, rest) = after_length.split_at(length);
            self.rest = rest;
            return Some(Ok((code, value)));
        }
    }
}

/// Builder for a TLV option area.
///
/// Rejects values that do not fit the 1-byte length field instead of
/// truncating them.
#[derive(Debug, Default)]
pub struct OptionWriter {
    buffer: Vec<u8>,
}

impl OptionWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one option. Fails with [`Error::OptionTooLong`] if the value
    /// exceeds 255 bytes.
    pub fn push(&mut self, code: u8, value: &[u8]) -> Result<()> {
        if value.len() > u8::MAX as usize {
            return Err(Error::OptionTooLong {
                code,
                len: value.len(),
            });
        }
        self.buffer.push(code);
        self.buffer.push(value.len() as u8);
        self.buffer.extend_from_slice(value);
        Ok(())
    }

    /// Appends the end-of-options marker and returns the encoded area.
    pub fn finish(mut self) -> Vec<u8> {
        self.buffer.push(OPT_END);
        self.buffer
    }
}
