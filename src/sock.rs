use crate::addr::AddrBuilder;
use crate::log::Logger;
use libc::{
    bind, fcntl, ifreq, ioctl, recvfrom, sendto, sockaddr, sockaddr_ll, socket, socklen_t,
    AF_PACKET, ARPHRD_ETHER, F_GETFL, F_SETFL, O_NONBLOCK, SIOCGIFHWADDR, SOCK_RAW,
};
use macaddr::MacAddr6;
use std::io::{Error, ErrorKind};
use std::mem::{size_of_val, zeroed};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::sync::Arc;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

/// Encapsulate an `AF_PACKET` socket bound to one EtherType of one
/// interface.
///
/// Frames we sent ourselves and frames addressed to other stations never
/// come back out of [`PacketSocket::recv`].
pub struct PacketSocket {
    fd: AsyncFd<OwnedFd>,
    addr: MacAddr6,
    log: Arc<Logger>,
}

impl PacketSocket {
    /// Open a raw socket for `proto` on the interface of `ab` and learn the
    /// interface hardware address.
    pub fn open(ab: &AddrBuilder, proto: u16, log: Arc<Logger>) -> Result<Self, Error> {
        // Create socket.
        let s = unsafe { socket(AF_PACKET, SOCK_RAW, 0) };

        if s < 0 {
            return Err(Error::last_os_error());
        }

        // Enable non-blocking.
        let s = unsafe { OwnedFd::from_raw_fd(s) };
        let f = unsafe { fcntl(s.as_raw_fd(), F_GETFL) };

        if f < 0 || unsafe { fcntl(s.as_raw_fd(), F_SETFL, f | O_NONBLOCK) } < 0 {
            return Err(Error::last_os_error());
        }

        // Read the interface hardware address.
        let addr = hw_addr(&s, ab.name())?;

        // Bind to the interface for `proto` only.
        let ll = ab.build(proto, None);
        let len = size_of_val(&ll).try_into().unwrap();

        if unsafe { bind(s.as_raw_fd(), &ll as *const sockaddr_ll as *const sockaddr, len) } < 0 {
            return Err(Error::last_os_error());
        }

        // Register with Tokio.
        Ok(Self {
            fd: AsyncFd::with_interest(s, Interest::READABLE)?,
            addr,
            log,
        })
    }

    /// The interface hardware address.
    pub fn local_addr(&self) -> MacAddr6 {
        self.addr
    }

    /// Receive one frame addressed to us.
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize, Error> {
        loop {
            // Receive.
            let mut addr: sockaddr_ll = unsafe { zeroed() };
            let received = loop {
                if let Ok(v) = self.fd.readable().await?.try_io(|s| {
                    let mut alen: socklen_t = size_of_val(&addr).try_into().unwrap();
                    let received = unsafe {
                        recvfrom(
                            s.as_raw_fd(),
                            buf.as_mut_ptr().cast(),
                            buf.len(),
                            0,
                            &mut addr as *mut sockaddr_ll as _,
                            &mut alen,
                        )
                    };

                    if received < 0 {
                        return Err(Error::last_os_error());
                    }

                    Ok(received as usize)
                }) {
                    break v?;
                }
            };

            if received < 14 {
                continue;
            }

            // Suppress our own frames (4 = PACKET_OUTGOING).
            if addr.sll_pkttype == 4 || &buf[6..12] == self.addr.as_bytes() {
                continue;
            }

            // Drop frames for other stations.
            let dst = &buf[..6];

            if dst != self.addr.as_bytes() && dst != MacAddr6::broadcast().as_bytes() {
                self.log.trace('D', &buf[..received]);
                continue;
            }

            self.log.trace('R', &buf[..received]);

            return Ok(received);
        }
    }

    /// Send one frame verbatim.
    pub fn send(&self, addr: sockaddr_ll, buf: &[u8]) -> Result<(), Error> {
        let sent = unsafe {
            sendto(
                self.fd.as_raw_fd(),
                buf.as_ptr().cast(),
                buf.len(),
                0,
                &addr as *const sockaddr_ll as _,
                size_of_val(&addr).try_into().unwrap(),
            )
        };

        if sent < 0 {
            return Err(Error::last_os_error());
        }

        if sent as usize != buf.len() {
            return Err(Error::new(ErrorKind::WriteZero, "short send"));
        }

        self.log.trace('S', buf);

        Ok(())
    }
}

fn hw_addr(s: &OwnedFd, name: &str) -> Result<MacAddr6, Error> {
    let mut req: ifreq = unsafe { zeroed() };

    if name.len() >= req.ifr_name.len() {
        return Err(Error::new(ErrorKind::InvalidInput, "interface name too long"));
    }

    for (d, b) in req.ifr_name.iter_mut().zip(name.as_bytes()) {
        *d = *b as _;
    }

    if unsafe { ioctl(s.as_raw_fd(), SIOCGIFHWADDR, &mut req) } < 0 {
        return Err(Error::last_os_error());
    }

    let hw = unsafe { req.ifr_ifru.ifru_hwaddr };

    if hw.sa_family != ARPHRD_ETHER {
        return Err(Error::new(
            ErrorKind::Unsupported,
            format!("interface {name} is not Ethernet"),
        ));
    }

    let mut addr = [0; 6];

    for (d, b) in addr.iter_mut().zip(hw.sa_data.iter()) {
        *d = *b as u8;
    }

    Ok(MacAddr6::from(addr))
}
