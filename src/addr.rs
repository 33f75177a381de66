use libc::{if_nametoindex, sockaddr_ll, AF_PACKET};
use macaddr::MacAddr6;
use std::ffi::{c_int, CString};
use std::io::{Error, ErrorKind};
use std::mem::zeroed;

/// Builds [`sockaddr_ll`] values for one network interface.
pub struct AddrBuilder {
    name: String,
    interface: c_int,
}

impl AddrBuilder {
    /// Resolve `name` to an interface index.
    pub fn new(name: &str) -> Result<Self, Error> {
        let c = CString::new(name).map_err(|e| Error::new(ErrorKind::InvalidInput, e))?;
        let interface = unsafe { if_nametoindex(c.as_ptr()) };

        if interface == 0 {
            return Err(Error::last_os_error());
        }

        Ok(Self {
            name: name.to_owned(),
            interface: interface as c_int,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn build(&self, proto: u16, addr: Option<MacAddr6>) -> sockaddr_ll {
        let mut v: sockaddr_ll = unsafe { zeroed() };

        v.sll_family = AF_PACKET as _;
        v.sll_protocol = proto.to_be();
        v.sll_ifindex = self.interface;

        if let Some(addr) = addr {
            let addr = addr.as_bytes();

            v.sll_addr[..addr.len()].copy_from_slice(addr);
            v.sll_halen = addr.len().try_into().unwrap();
        }

        v
    }
}
