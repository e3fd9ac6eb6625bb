//! PXE discovery parsing and reply encoding.
//!
//! A PXE boot-menu discovery is a DHCP packet: a fixed 236-byte BOOTP
//! header, the 4-byte magic cookie, then TLV options. The fields this
//! service cares about live at fixed offsets:
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     op (1)    |   htype (1)   |   hlen (1)    |   hops (1)    |
//! +---------------+---------------+---------------+---------------+
//! |                            xid (4)                            |
//! +-------------------------------+-------------------------------+
//! |           secs (2)            |           flags (2)           |
//! +-------------------------------+-------------------------------+
//! |                          ciaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                       yiaddr/siaddr/giaddr                    |
//! +---------------------------------------------------------------+
//! |                          chaddr (16)                          |
//! +---------------------------------------------------------------+
//! |                       sname (64), file (128)                  |
//! +---------------------------------------------------------------+
//! |                    magic cookie (4) = 99.130.83.99            |
//! +---------------------------------------------------------------+
//! |                          options (variable)                   |
//! +---------------------------------------------------------------+
//! ```
//!
//! A packet is a valid PXE discovery iff it is at least 240 bytes, carries
//! the magic cookie at offset 236, and yields both a client UUID (option
//! 97) and a boot menu selection (sub-option 71 inside option 43).
//!
//! All reads from the untrusted buffer go through [`HeaderView`] or the
//! option scanner, so a truncated or lying packet can never cause an
//! out-of-range access.

use std::fmt::Write as _;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::options::{
    Options, OptionWriter, MESSAGE_TYPE_ACK, OPT_BOOT_ITEM, OPT_CLIENT_UUID, OPT_MESSAGE_TYPE,
    OPT_PATH_PREFIX, OPT_REBOOT_TIME, OPT_SERVER_ID, OPT_VENDOR_CLASS, OPT_VENDOR_SPECIFIC,
};

/// DHCP magic cookie that identifies DHCP packets (vs plain BOOTP).
pub const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

/// Offset of the magic cookie: the fixed BOOTP header size.
const BOOTP_HEADER_SIZE: usize = 236;

/// Minimum length of a parseable discovery: header plus magic cookie.
pub const MIN_DISCOVERY_SIZE: usize = BOOTP_HEADER_SIZE + DHCP_MAGIC_COOKIE.len();

const XID_OFFSET: usize = 4;
const CIADDR_OFFSET: usize = 12;
const YIADDR_OFFSET: usize = 16;
const SIADDR_OFFSET: usize = 20;
const CHADDR_OFFSET: usize = 28;
const FILE_OFFSET: usize = 108;

/// BOOTP operation code for server replies.
const BOOTREPLY: u8 = 2;

/// Hardware type and address length for Ethernet.
const HTYPE_ETHERNET: u8 = 1;
const HLEN_ETHERNET: u8 = 6;

/// Placeholder boot-filename in replies. The downstream boot stage serves
/// one fixed loader regardless of the requested name, so this only has to
/// look reasonable in packet dumps.
const BOOT_FILENAME: &[u8] = b"boot";

/// Seconds before the loader reboots and retries after a failed boot
/// (option 211 payload).
const REBOOT_DELAY: [u8; 4] = [0, 0, 0, 5];

/// A bounds-checked view over the fixed-offset portion of a packet.
///
/// Every accessor fails with [`Error::PacketTooShort`] instead of reading
/// past the supplied buffer.
struct HeaderView<'a> {
    data: &'a [u8],
}

impl<'a> HeaderView<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        self.data
            .get(offset..offset + len)
            .ok_or(Error::PacketTooShort(self.data.len()))
    }

    fn array<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(offset, N)?);
        Ok(out)
    }

    fn ipv4(&self, offset: usize) -> Result<Ipv4Addr> {
        Ok(Ipv4Addr::from(self.array::<4>(offset)?))
    }
}

/// The DHCP header fields shared by a discovery and its reply.
///
/// Populated from fixed byte offsets in the wire format; immutable once
/// parsed. The reply-side fields a discovery does not carry (`server_ip`)
/// are composed alongside, not inherited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhcpHeader {
    /// Transaction ID chosen by the client, echoed verbatim in the reply.
    pub xid: [u8; 4],

    /// Client hardware (MAC) address.
    pub mac: [u8; 6],

    /// Client IP address from the ciaddr field.
    pub client_ip: Ipv4Addr,
}

impl DhcpHeader {
    /// Formats the MAC as a colon-separated string, e.g. "aa:bb:cc:dd:ee:ff".
    pub fn format_mac(&self) -> String {
        let mut result = String::with_capacity(self.mac.len() * 3);
        for (index, byte) in self.mac.iter().enumerate() {
            if index > 0 {
                result.push(':');
            }
            let _ = write!(result, "{:02x}", byte);
        }
        result
    }
}

/// A parsed PXE boot-menu discovery plus the fields needed to build its
/// reply.
///
/// [`parse`](Self::parse) fills everything that comes from the wire.
/// `server_ip` and `http_server` are environment-derived: the responder
/// loop fills them in once it knows which interface the broadcast arrived
/// on. [`encode_reply`](Self::encode_reply) refuses to run before that
/// happens.
#[derive(Debug, Clone)]
pub struct PxePacket {
    /// Header fields shared with the reply.
    pub header: DhcpHeader,

    /// Client machine UUID, the 16 bytes following the type byte of
    /// option 97.
    pub guid: [u8; 16],

    /// The boot menu selection from sub-option 71, echoed back verbatim.
    /// Opaque to this service; length is not fixed.
    pub boot_type: Vec<u8>,

    /// This host's IP on the receiving interface. Set by the responder.
    pub server_ip: Option<Ipv4Addr>,

    /// Base URL the client should fetch everything else from. Set by the
    /// responder.
    pub http_server: Option<String>,
}

impl PxePacket {
    /// Parses a PXE boot-menu discovery from raw datagram bytes.
    ///
    /// A pure function of its input: the environment-derived reply fields
    /// are left unset.
    ///
    /// # Errors
    ///
    /// - [`Error::PacketTooShort`] if the buffer is under 240 bytes
    /// - [`Error::NotDhcpPacket`] if the magic cookie is missing
    /// - [`Error::MalformedOption`] if an option overruns the buffer
    /// - [`Error::MalformedGuid`] if option 97 is not 17 bytes with a
    ///   leading zero
    /// - [`Error::MissingGuid`] / [`Error::MissingBootType`] if the
    ///   discovery lacks option 97 or sub-option 71
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < MIN_DISCOVERY_SIZE {
            return Err(Error::PacketTooShort(data.len()));
        }

        let view = HeaderView::new(data);
        if view.bytes(BOOTP_HEADER_SIZE, DHCP_MAGIC_COOKIE.len())? != DHCP_MAGIC_COOKIE {
            return Err(Error::NotDhcpPacket);
        }

        let header = DhcpHeader {
            xid: view.array(XID_OFFSET)?,
            mac: view.array(CHADDR_OFFSET)?,
            client_ip: view.ipv4(CIADDR_OFFSET)?,
        };

        let mut guid = None;
        let mut boot_type = None;

        for option in Options::new(&data[MIN_DISCOVERY_SIZE..]) {
            let (code, value) = option?;
            match code {
                OPT_VENDOR_SPECIFIC => {
                    // First sub-option 71 wins; duplicates inside one
                    // option 43 are ignored.
                    for sub in Options::new(value) {
                        let (sub_code, sub_value) = sub?;
                        if sub_code == OPT_BOOT_ITEM {
                            boot_type = Some(sub_value.to_vec());
                            break;
                        }
                    }
                }
                OPT_CLIENT_UUID => {
                    if value.len() != 17 || value[0] != 0 {
                        return Err(Error::MalformedGuid(value.len()));
                    }
                    let mut bytes = [0u8; 16];
                    bytes.copy_from_slice(&value[1..]);
                    guid = Some(bytes);
                }
                _ => {}
            }
        }

        let guid = guid.ok_or(Error::MissingGuid)?;
        let boot_type = boot_type.ok_or(Error::MissingBootType)?;

        Ok(Self {
            header,
            guid,
            boot_type,
            server_ip: None,
            http_server: None,
        })
    }

    /// Formats the client MAC as a colon-separated string.
    pub fn format_mac(&self) -> String {
        self.header.format_mac()
    }

    /// Encodes the DHCPACK-shaped reply that redirects the client to HTTP.
    ///
    /// The layout is byte-exact for compatibility with PXE ROM and
    /// pxelinux implementations that expect these specific option numbers
    /// and placements.
    ///
    /// # Errors
    ///
    /// - [`Error::IncompleteReply`] if the responder has not set
    ///   `server_ip` or `http_server`
    /// - [`Error::UrlTooLong`] if the base URL exceeds the 255-byte option
    ///   limit
    /// - [`Error::OptionTooLong`] if the echoed boot type does
    pub fn encode_reply(&self) -> Result<Vec<u8>> {
        let server_ip = self.server_ip.ok_or(Error::IncompleteReply("server_ip"))?;
        let http_server = self
            .http_server
            .as_deref()
            .ok_or(Error::IncompleteReply("http_server"))?;
        if http_server.len() > u8::MAX as usize {
            return Err(Error::UrlTooLong(http_server.len()));
        }

        let mut header = ReplyHeader::new();
        header.set_reply_ethernet();
        header.set_broadcast();
        header.set_xid(self.header.xid);
        header.set_client_ip(self.header.client_ip);
        header.set_server_ip(server_ip);
        header.set_mac(self.header.mac);
        header.set_boot_filename();

        let mut uuid = [0u8; 17];
        uuid[1..].copy_from_slice(&self.guid);

        let mut boot_item = OptionWriter::new();
        boot_item.push(OPT_BOOT_ITEM, &self.boot_type)?;

        let mut options = OptionWriter::new();
        options.push(OPT_MESSAGE_TYPE, &[MESSAGE_TYPE_ACK])?;
        options.push(OPT_SERVER_ID, &server_ip.octets())?;
        options.push(OPT_VENDOR_CLASS, b"PXEClient")?;
        options.push(OPT_CLIENT_UUID, &uuid)?;
        options.push(OPT_VENDOR_SPECIFIC, &boot_item.finish())?;
        options.push(OPT_PATH_PREFIX, http_server.as_bytes())?;
        options.push(OPT_REBOOT_TIME, &REBOOT_DELAY)?;

        let mut reply = Vec::with_capacity(MIN_DISCOVERY_SIZE + 64);
        reply.extend_from_slice(header.as_bytes());
        reply.extend_from_slice(&DHCP_MAGIC_COOKIE);
        reply.extend_from_slice(&options.finish());
        Ok(reply)
    }
}

/// The fixed 236-byte reply header, written through named setters so every
/// field placement is explicit and stays inside the buffer.
struct ReplyHeader {
    buffer: [u8; BOOTP_HEADER_SIZE],
}

impl ReplyHeader {
    fn new() -> Self {
        Self {
            buffer: [0u8; BOOTP_HEADER_SIZE],
        }
    }

    fn set_reply_ethernet(&mut self) {
        self.buffer[0] = BOOTREPLY;
        self.buffer[1] = HTYPE_ETHERNET;
        self.buffer[2] = HLEN_ETHERNET;
    }

    /// Sets the broadcast bit so the client's PXE stack accepts the reply
    /// before it has an address configured.
    fn set_broadcast(&mut self) {
        self.buffer[10] = 0x80;
    }

    fn set_xid(&mut self, xid: [u8; 4]) {
        self.buffer[XID_OFFSET..XID_OFFSET + 4].copy_from_slice(&xid);
    }

    fn set_client_ip(&mut self, ip: Ipv4Addr) {
        self.buffer[YIADDR_OFFSET..YIADDR_OFFSET + 4].copy_from_slice(&ip.octets());
    }

    fn set_server_ip(&mut self, ip: Ipv4Addr) {
        self.buffer[SIADDR_OFFSET..SIADDR_OFFSET + 4].copy_from_slice(&ip.octets());
    }

    fn set_mac(&mut self, mac: [u8; 6]) {
        self.buffer[CHADDR_OFFSET..CHADDR_OFFSET + 6].copy_from_slice(&mac);
    }

    fn set_boot_filename(&mut self) {
        self.buffer[FILE_OFFSET..FILE_OFFSET + BOOT_FILENAME.len()].copy_from_slice(BOOT_FILENAME);
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MAC: [u8; 6] = [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff];
    const TEST_GUID: [u8; 16] = [
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f,
        0x10,
    ];
    const TEST_BOOT_TYPE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

    fn create_discovery(with_guid: bool, with_boot_type: bool) -> Vec<u8> {
        let mut packet = vec![0u8; 300];
        packet[0] = 1; // BOOTREQUEST
        packet[1] = HTYPE_ETHERNET;
        packet[2] = HLEN_ETHERNET;
        packet[4..8].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        packet[12..16].copy_from_slice(&[192, 168, 1, 50]);
        packet[28..34].copy_from_slice(&TEST_MAC);
        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);

        let mut index = 240;
        if with_boot_type {
            packet[index] = 43;
            packet[index + 1] = 7;
            packet[index + 2] = 71;
            packet[index + 3] = 4;
            packet[index + 4..index + 8].copy_from_slice(&TEST_BOOT_TYPE);
            packet[index + 8] = 255;
            index += 9;
        }
        if with_guid {
            packet[index] = 97;
            packet[index + 1] = 17;
            packet[index + 2] = 0;
            packet[index + 3..index + 19].copy_from_slice(&TEST_GUID);
            index += 19;
        }
        packet[index] = 255;
        packet
    }

    fn parsed_with_reply_fields() -> PxePacket {
        let mut packet = PxePacket::parse(&create_discovery(true, true)).unwrap();
        packet.server_ip = Some(Ipv4Addr::new(192, 168, 1, 1));
        packet.http_server = Some("http://192.168.1.1:8080/".to_string());
        packet
    }

    #[test]
    fn test_parse_valid_discovery() {
        let packet = PxePacket::parse(&create_discovery(true, true)).unwrap();

        assert_eq!(packet.header.xid, [0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(packet.header.mac, TEST_MAC);
        assert_eq!(packet.header.client_ip, Ipv4Addr::new(192, 168, 1, 50));
        assert_eq!(packet.guid, TEST_GUID);
        assert_eq!(packet.boot_type, TEST_BOOT_TYPE);
        assert!(packet.server_ip.is_none());
        assert!(packet.http_server.is_none());
        assert_eq!(packet.format_mac(), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_short_packet_rejected() {
        for len in [0, 100, 239] {
            let result = PxePacket::parse(&vec![0u8; len]);
            assert!(matches!(result, Err(Error::PacketTooShort(l)) if l == len));
        }
    }

    #[test]
    fn test_bad_magic_cookie_rejected() {
        let mut packet = create_discovery(true, true);
        packet[236..240].copy_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(
            PxePacket::parse(&packet),
            Err(Error::NotDhcpPacket)
        ));
    }

    #[test]
    fn test_missing_guid_rejected() {
        let result = PxePacket::parse(&create_discovery(false, true));
        assert!(matches!(result, Err(Error::MissingGuid)));
    }

    #[test]
    fn test_missing_boot_type_rejected() {
        let result = PxePacket::parse(&create_discovery(true, false));
        assert!(matches!(result, Err(Error::MissingBootType)));
    }

    #[test]
    fn test_incomplete_discovery_rejected_without_reply() {
        // Neither option present: the GUID check fires first.
        let result = PxePacket::parse(&create_discovery(false, false));
        assert!(matches!(result, Err(Error::MissingGuid)));
    }

    #[test]
    fn test_malformed_guid_rejected() {
        let mut packet = vec![0u8; 300];
        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);
        packet[240] = 97;
        packet[241] = 5;
        packet[242..247].copy_from_slice(&[0, 1, 2, 3, 4]);
        packet[247] = 255;

        let result = PxePacket::parse(&packet);
        assert!(matches!(result, Err(Error::MalformedGuid(5))));
    }

    #[test]
    fn test_guid_with_nonzero_type_byte_rejected() {
        let mut packet = create_discovery(true, true);
        // The 17-byte option 97 value starts two bytes after the 9-byte
        // option 43 block.
        assert_eq!(packet[249], 97);
        packet[251] = 1;

        let result = PxePacket::parse(&packet);
        assert!(matches!(result, Err(Error::MalformedGuid(17))));
    }

    #[test]
    fn test_first_boot_item_wins() {
        let mut packet = vec![0u8; 300];
        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);

        // Option 43 with two sub-option 71 entries.
        let mut index = 240;
        packet[index] = 43;
        packet[index + 1] = 13;
        packet[index + 2] = 71;
        packet[index + 3] = 4;
        packet[index + 4..index + 8].copy_from_slice(&[1, 1, 1, 1]);
        packet[index + 8] = 71;
        packet[index + 9] = 4;
        packet[index + 10..index + 14].copy_from_slice(&[2, 2, 2, 2]);
        packet[index + 14] = 255;
        index += 15;

        packet[index] = 97;
        packet[index + 1] = 17;
        packet[index + 2] = 0;
        packet[index + 3..index + 19].copy_from_slice(&TEST_GUID);
        index += 19;
        packet[index] = 255;

        let parsed = PxePacket::parse(&packet).unwrap();
        assert_eq!(parsed.boot_type, vec![1, 1, 1, 1]);
    }

    #[test]
    fn test_unknown_options_ignored() {
        let mut packet = create_discovery(true, true);
        // Replace the terminator with an unknown option, then re-terminate.
        let insert = 240 + 9 + 19;
        assert_eq!(packet[insert], 255);
        packet[insert] = 200;
        packet[insert + 1] = 4;
        packet[insert + 2..insert + 6].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        packet[insert + 6] = 255;

        let parsed = PxePacket::parse(&packet).unwrap();
        assert_eq!(parsed.guid, TEST_GUID);
        assert_eq!(parsed.boot_type, TEST_BOOT_TYPE);
    }

    #[test]
    fn test_truncated_option_rejected() {
        let mut packet = vec![0u8; 242];
        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);
        packet[240] = 43;
        packet[241] = 50;

        let result = PxePacket::parse(&packet);
        assert!(matches!(result, Err(Error::MalformedOption(_))));
    }

    #[test]
    fn test_encode_reply_header_offsets() {
        let packet = parsed_with_reply_fields();
        let reply = packet.encode_reply().unwrap();

        assert_eq!(reply[0], BOOTREPLY);
        assert_eq!(reply[1], HTYPE_ETHERNET);
        assert_eq!(reply[2], HLEN_ETHERNET);
        assert_eq!(reply[10], 0x80);
        assert_eq!(&reply[4..8], &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(&reply[16..20], &[192, 168, 1, 50]);
        assert_eq!(&reply[20..24], &[192, 168, 1, 1]);
        assert_eq!(&reply[28..34], &TEST_MAC);
        assert_eq!(&reply[108..112], b"boot");
        assert_eq!(&reply[236..240], &DHCP_MAGIC_COOKIE);
    }

    #[test]
    fn test_encode_reply_option_area_byte_exact() {
        let packet = parsed_with_reply_fields();
        let reply = packet.encode_reply().unwrap();
        let url = b"http://192.168.1.1:8080/";

        let mut expected = Vec::new();
        expected.extend_from_slice(&[53, 1, 5]);
        expected.extend_from_slice(&[54, 4, 192, 168, 1, 1]);
        expected.extend_from_slice(&[60, 9]);
        expected.extend_from_slice(b"PXEClient");
        expected.extend_from_slice(&[97, 17, 0]);
        expected.extend_from_slice(&TEST_GUID);
        expected.extend_from_slice(&[43, 7, 71, 4]);
        expected.extend_from_slice(&TEST_BOOT_TYPE);
        expected.push(255);
        expected.extend_from_slice(&[210, url.len() as u8]);
        expected.extend_from_slice(url);
        expected.extend_from_slice(&[211, 4, 0, 0, 0, 5]);
        expected.push(255);

        assert_eq!(&reply[240..], &expected[..]);
    }

    #[test]
    fn test_encode_reply_echoes_variable_length_boot_type() {
        let mut packet = parsed_with_reply_fields();
        packet.boot_type = vec![0x07; 9];
        let reply = packet.encode_reply().unwrap();

        let needle = {
            let mut n = vec![43, 12, 71, 9];
            n.extend_from_slice(&[0x07; 9]);
            n.push(255);
            n
        };
        assert!(reply.windows(needle.len()).any(|w| w == needle));
    }

    #[test]
    fn test_encode_without_server_fields_rejected() {
        let packet = PxePacket::parse(&create_discovery(true, true)).unwrap();
        assert!(matches!(
            packet.encode_reply(),
            Err(Error::IncompleteReply("server_ip"))
        ));

        let mut packet = packet;
        packet.server_ip = Some(Ipv4Addr::new(10, 0, 0, 1));
        assert!(matches!(
            packet.encode_reply(),
            Err(Error::IncompleteReply("http_server"))
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_url() {
        let mut packet = parsed_with_reply_fields();
        let url = format!("http://{}/", "a".repeat(300));
        let url_len = url.len();
        packet.http_server = Some(url);

        assert!(matches!(
            packet.encode_reply(),
            Err(Error::UrlTooLong(l)) if l == url_len
        ));
    }

    #[test]
    fn test_parse_then_encode_roundtrip_fields() {
        let reply = parsed_with_reply_fields().encode_reply().unwrap();

        // The reply itself is a DHCP packet; its fixed fields must echo
        // the discovery.
        let view_xid = &reply[4..8];
        assert_eq!(view_xid, &[0xde, 0xad, 0xbe, 0xef]);
        let guid_area = &reply[240..];
        let pos = guid_area.windows(2).position(|w| w == [97, 17]).unwrap();
        assert_eq!(guid_area[pos + 2], 0);
        assert_eq!(&guid_area[pos + 3..pos + 19], &TEST_GUID);
    }
}
