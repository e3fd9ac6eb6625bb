//! The PXE responder: a UDP loop that answers boot-menu discoveries with
//! a redirect to the HTTP orchestrator.
//!
//! PXE discoveries arrive as broadcasts, so the reply must advertise an IP
//! the client can actually reach on the segment the broadcast came from.
//! On Linux the socket runs with IP_PKTINFO enabled and each datagram
//! carries its receiving interface index, which an [`InterfaceResolver`]
//! turns into the advertised IP; the reply is pinned to the same interface
//! on the way out. Elsewhere the loop falls back to plain recv/send with
//! interface index 0.
//!
//! Datagrams are handled one at a time. Every per-packet failure is logged
//! and dropped; only failing to bind the port is fatal.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::packet::PxePacket;

const RECV_BUFFER_SIZE: usize = 1500;

/// Maps a receiving interface index to the server IP advertised on it.
///
/// Index 0 means the platform could not report an interface.
pub trait InterfaceResolver: Send + Sync {
    fn interface_ip(&self, interface_index: u32) -> std::io::Result<Ipv4Addr>;
}

/// Advertises one fixed IP regardless of interface. Correct for
/// single-homed hosts; multi-homed deployments supply their own resolver.
pub struct StaticInterfaceResolver {
    ip: Ipv4Addr,
}

impl StaticInterfaceResolver {
    pub fn new(ip: Ipv4Addr) -> Self {
        Self { ip }
    }
}

impl InterfaceResolver for StaticInterfaceResolver {
    fn interface_ip(&self, _interface_index: u32) -> std::io::Result<Ipv4Addr> {
        Ok(self.ip)
    }
}

pub struct PxeServer {
    config: Arc<Config>,
    socket: UdpSocket,
    resolver: Arc<dyn InterfaceResolver>,
}

impl PxeServer {
    pub fn new(config: Arc<Config>, resolver: Arc<dyn InterfaceResolver>) -> Result<Self> {
        let socket = Self::create_socket(&config)?;

        info!("PXE responder starting on port {}", config.pxe_port);

        Ok(Self {
            config,
            socket,
            resolver,
        })
    }

    fn create_socket(config: &Config) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

        socket
            .set_broadcast(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", error)))?;

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

        #[cfg(target_os = "linux")]
        pktinfo::enable(&socket)
            .map_err(|error| Error::Socket(format!("Failed to set IP_PKTINFO: {}", error)))?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.pxe_port);
        socket.bind(&bind_addr.into()).map_err(|error| {
            Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error))
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket).map_err(|error| {
            Error::Socket(format!("Failed to convert to tokio socket: {}", error))
        })?;

        Ok(tokio_socket)
    }

    /// The bound address. Useful when the configured port is 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&self) -> Result<()> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        info!("PXE responder ready and listening");

        loop {
            match self.recv(&mut buffer).await {
                Ok((size, source, interface_index)) => {
                    self.handle_discovery(&buffer[..size], source, interface_index)
                        .await;
                }
                Err(error) => {
                    error!("Error receiving packet: {}", error);
                }
            }
        }
    }

    async fn handle_discovery(&self, data: &[u8], source: SocketAddr, interface_index: u32) {
        // Non-PXE traffic and malformed packets are dropped quietly; the
        // port sees plenty of both on a busy segment.
        let mut packet = match PxePacket::parse(data) {
            Ok(packet) => packet,
            Err(error) => {
                debug!("Ignoring packet from {}: {}", source, error);
                return;
            }
        };

        let server_ip = match self.resolver.interface_ip(interface_index) {
            Ok(ip) => ip,
            Err(error) => {
                warn!(
                    "Couldn't find an IP to advertise to {} on interface {}: {}",
                    source, interface_index, error
                );
                return;
            }
        };

        let base_url = self.config.http_base_url(server_ip);
        packet.server_ip = Some(server_ip);
        packet.http_server = Some(base_url.clone());

        info!(
            "Chainloading {} ({}) to boot via {}",
            packet.format_mac(),
            source,
            base_url
        );

        let reply = match packet.encode_reply() {
            Ok(reply) => reply,
            Err(error) => {
                warn!("Failed to encode reply for {}: {}", source, error);
                return;
            }
        };

        if let Err(error) = self.send(&reply, source, interface_index).await {
            warn!("Failed to send reply to {}: {}", source, error);
        }
    }

    #[cfg(target_os = "linux")]
    async fn recv(&self, buffer: &mut [u8]) -> std::io::Result<(usize, SocketAddr, u32)> {
        pktinfo::recv(&self.socket, buffer).await
    }

    #[cfg(not(target_os = "linux"))]
    async fn recv(&self, buffer: &mut [u8]) -> std::io::Result<(usize, SocketAddr, u32)> {
        let (size, source) = self.socket.recv_from(buffer).await?;
        Ok((size, source, 0))
    }

    #[cfg(target_os = "linux")]
    async fn send(
        &self,
        buffer: &[u8],
        destination: SocketAddr,
        interface_index: u32,
    ) -> std::io::Result<usize> {
        if interface_index == 0 {
            return self.socket.send_to(buffer, destination).await;
        }
        pktinfo::send(&self.socket, buffer, destination, interface_index).await
    }

    #[cfg(not(target_os = "linux"))]
    async fn send(
        &self,
        buffer: &[u8],
        destination: SocketAddr,
        _interface_index: u32,
    ) -> std::io::Result<usize> {
        self.socket.send_to(buffer, destination).await
    }
}

/// Raw IP_PKTINFO plumbing: recvmsg/sendmsg with an in_pktinfo control
/// message, bridged into tokio through readable/writable + try_io.
#[cfg(target_os = "linux")]
mod pktinfo {
    use std::io;
    use std::mem;
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
    use std::os::fd::{AsRawFd, RawFd};

    use tokio::io::Interest;
    use tokio::net::UdpSocket;

    /// Aligned backing store for the cmsg area.
    #[repr(align(8))]
    struct ControlBuffer([u8; 64]);

    pub fn enable(socket: &socket2::Socket) -> io::Result<()> {
        let enable: libc::c_int = 1;
        let result = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::IPPROTO_IP,
                libc::IP_PKTINFO,
                &enable as *const libc::c_int as *const libc::c_void,
                mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if result < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub async fn recv(
        socket: &UdpSocket,
        buffer: &mut [u8],
    ) -> io::Result<(usize, SocketAddr, u32)> {
        loop {
            socket.readable().await?;
            match socket.try_io(Interest::READABLE, || recv_once(socket.as_raw_fd(), buffer)) {
                Ok(result) => return Ok(result),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => continue,
                Err(error) => return Err(error),
            }
        }
    }

    pub async fn send(
        socket: &UdpSocket,
        buffer: &[u8],
        destination: SocketAddr,
        interface_index: u32,
    ) -> io::Result<usize> {
        let destination = match destination {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "PXE replies are IPv4 only",
                ));
            }
        };

        loop {
            socket.writable().await?;
            match socket.try_io(Interest::WRITABLE, || {
                send_once(socket.as_raw_fd(), buffer, destination, interface_index)
            }) {
                Ok(sent) => return Ok(sent),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => continue,
                Err(error) => return Err(error),
            }
        }
    }

    fn recv_once(fd: RawFd, buffer: &mut [u8]) -> io::Result<(usize, SocketAddr, u32)> {
        let mut source: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut iov = libc::iovec {
            iov_base: buffer.as_mut_ptr() as *mut libc::c_void,
            iov_len: buffer.len(),
        };
        let mut control = ControlBuffer([0u8; 64]);

        let mut header: libc::msghdr = unsafe { mem::zeroed() };
        header.msg_name = &mut source as *mut libc::sockaddr_in as *mut libc::c_void;
        header.msg_namelen = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        header.msg_iov = &mut iov;
        header.msg_iovlen = 1;
        header.msg_control = control.0.as_mut_ptr() as *mut libc::c_void;
        header.msg_controllen = control.0.len() as _;

        let received = unsafe { libc::recvmsg(fd, &mut header, 0) };
        if received < 0 {
            return Err(io::Error::last_os_error());
        }

        let mut interface_index = 0u32;
        let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(&header) };
        while !cmsg.is_null() {
            let current = unsafe { &*cmsg };
            if current.cmsg_level == libc::IPPROTO_IP && current.cmsg_type == libc::IP_PKTINFO {
                let info = unsafe {
                    (libc::CMSG_DATA(cmsg) as *const libc::in_pktinfo).read_unaligned()
                };
                interface_index = info.ipi_ifindex as u32;
                break;
            }
            cmsg = unsafe { libc::CMSG_NXTHDR(&header, cmsg) };
        }

        let source = SocketAddrV4::new(
            Ipv4Addr::from(u32::from_be(source.sin_addr.s_addr)),
            u16::from_be(source.sin_port),
        );
        Ok((received as usize, SocketAddr::V4(source), interface_index))
    }

    fn send_once(
        fd: RawFd,
        buffer: &[u8],
        destination: SocketAddrV4,
        interface_index: u32,
    ) -> io::Result<usize> {
        let mut name: libc::sockaddr_in = unsafe { mem::zeroed() };
        name.sin_family = libc::AF_INET as libc::sa_family_t;
        name.sin_port = destination.port().to_be();
        name.sin_addr.s_addr = u32::from(*destination.ip()).to_be();

        let mut iov = libc::iovec {
            iov_base: buffer.as_ptr() as *mut libc::c_void,
            iov_len: buffer.len(),
        };
        let mut control = ControlBuffer([0u8; 64]);
        let info_len = mem::size_of::<libc::in_pktinfo>() as libc::c_uint;

        let mut header: libc::msghdr = unsafe { mem::zeroed() };
        header.msg_name = &mut name as *mut libc::sockaddr_in as *mut libc::c_void;
        header.msg_namelen = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        header.msg_iov = &mut iov;
        header.msg_iovlen = 1;
        header.msg_control = control.0.as_mut_ptr() as *mut libc::c_void;
        header.msg_controllen = unsafe { libc::CMSG_SPACE(info_len) } as _;

        unsafe {
            let cmsg = libc::CMSG_FIRSTHDR(&header);
            (*cmsg).cmsg_level = libc::IPPROTO_IP;
            (*cmsg).cmsg_type = libc::IP_PKTINFO;
            (*cmsg).cmsg_len = libc::CMSG_LEN(info_len) as _;

            let mut info: libc::in_pktinfo = mem::zeroed();
            info.ipi_ifindex = interface_index as libc::c_int;
            (libc::CMSG_DATA(cmsg) as *mut libc::in_pktinfo).write_unaligned(info);
        }

        let sent = unsafe { libc::sendmsg(fd, &header, 0) };
        if sent < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(sent as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::OPT_END;
    use crate::packet::DHCP_MAGIC_COOKIE;
    use std::time::Duration;

    fn test_config() -> Config {
        Config {
            // Port 0 gets an ephemeral port from the OS.
            pxe_port: 0,
            ..Default::default()
        }
    }

    fn test_server() -> PxeServer {
        let resolver = Arc::new(StaticInterfaceResolver::new(Ipv4Addr::new(127, 0, 0, 1)));
        PxeServer::new(Arc::new(test_config()), resolver).unwrap()
    }

    fn valid_discovery() -> Vec<u8> {
        let mut packet = vec![0u8; 300];
        packet[0] = 1;
        packet[4..8].copy_from_slice(&[1, 2, 3, 4]);
        packet[28..34].copy_from_slice(&[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        packet[236..240].copy_from_slice(&DHCP_MAGIC_COOKIE);
        let options = [43, 7, 71, 4, 0, 0, 0, 1, 255, 97, 17, 0];
        packet[240..240 + options.len()].copy_from_slice(&options);
        // 16 GUID bytes of zero already in place; terminate after them.
        packet[240 + options.len() + 16] = OPT_END;
        packet
    }

    #[test]
    fn test_static_resolver_ignores_interface_index() {
        let resolver = StaticInterfaceResolver::new(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(
            resolver.interface_ip(0).unwrap(),
            Ipv4Addr::new(10, 0, 0, 1)
        );
        assert_eq!(
            resolver.interface_ip(7).unwrap(),
            Ipv4Addr::new(10, 0, 0, 1)
        );
    }

    #[tokio::test]
    async fn test_socket_binds_ephemeral_port() {
        let server = test_server();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_responder_answers_valid_discovery() {
        let server = Arc::new(test_server());
        let server_addr = SocketAddr::from((
            Ipv4Addr::new(127, 0, 0, 1),
            server.local_addr().unwrap().port(),
        ));

        let running = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = running.run().await;
        });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(&valid_discovery(), server_addr)
            .await
            .unwrap();

        let mut buffer = [0u8; 1500];
        let (size, _) =
            tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buffer))
                .await
                .unwrap()
                .unwrap();

        let reply = &buffer[..size];
        assert_eq!(reply[0], 2);
        assert_eq!(&reply[4..8], &[1, 2, 3, 4]);
        assert_eq!(&reply[28..34], &[0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]);
        assert_eq!(&reply[236..240], &DHCP_MAGIC_COOKIE);
        let url = b"http://127.0.0.1:8080/";
        assert!(reply.windows(url.len()).any(|window| window == url));
    }

    #[tokio::test]
    async fn test_responder_ignores_garbage() {
        let server = Arc::new(test_server());
        let server_addr = SocketAddr::from((
            Ipv4Addr::new(127, 0, 0, 1),
            server.local_addr().unwrap().port(),
        ));

        let running = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = running.run().await;
        });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client
            .send_to(b"not a dhcp packet", server_addr)
            .await
            .unwrap();

        let mut buffer = [0u8; 1500];
        let result =
            tokio::time::timeout(Duration::from_millis(300), client.recv_from(&mut buffer)).await;
        assert!(result.is_err());
    }
}
