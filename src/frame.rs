use macaddr::MacAddr6;

/// EtherType of the PPPoE Discovery Stage.
pub const ETH_P_DISC: u16 = 0x8863;

/// EtherType of the PPPoE Session Stage.
pub const ETH_P_SESS: u16 = 0x8864;

pub const CODE_SESS: u8 = 0x00;
pub const CODE_PADI: u8 = 0x09;
pub const CODE_PADO: u8 = 0x07;
pub const CODE_PADR: u8 = 0x19;
pub const CODE_PADS: u8 = 0x65;
pub const CODE_PADT: u8 = 0xa7;

pub const TAG_END_OF_LIST: u16 = 0x0000;
pub const TAG_SERVICE_NAME: u16 = 0x0101;
pub const TAG_AC_NAME: u16 = 0x0102;
pub const TAG_HOST_UNIQ: u16 = 0x0103;
pub const TAG_AC_COOKIE: u16 = 0x0104;
pub const TAG_VENDOR_SPECIFIC: u16 = 0x0105;
pub const TAG_RELAY_SESSION_ID: u16 = 0x0110;
pub const TAG_SERVICE_NAME_ERROR: u16 = 0x0201;
pub const TAG_AC_SYSTEM_ERROR: u16 = 0x0202;
pub const TAG_GENERIC_ERROR: u16 = 0x0203;

/// Ethernet header plus PPPoE header.
pub const HEADER_LEN: usize = 20;

/// Size of the per-worker frame buffers.
pub const PACKET_BUF: usize = 4096;

/// Octets of zero padding written after a PADR frame.
pub const PADR_PAD: usize = 14;

/// One PPPoE frame borrowed from a receive buffer.
pub struct Frame<'a> {
    pub dst: MacAddr6,
    pub src: MacAddr6,
    pub ether_type: u16,
    pub code: u8,
    pub session_id: u16,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Borrow a frame from `data`, or `None` if it is not a PPPoE frame.
    pub fn deserialize(data: &'a [u8]) -> Option<Self> {
        // Check minimum frame length.
        if data.len() < HEADER_LEN {
            return None;
        }

        let dst = MacAddr6::from(TryInto::<[u8; 6]>::try_into(&data[..6]).unwrap());
        let src = MacAddr6::from(TryInto::<[u8; 6]>::try_into(&data[6..12]).unwrap());
        let ether_type = u16::from_be_bytes(data[12..14].try_into().unwrap());

        // Check version and type.
        let ver = data[14] & 0xf;
        let ty = data[14] >> 4;

        if ver != 1 || ty != 1 {
            return None;
        }

        // Read CODE, SESSION_ID, LENGTH and payload.
        let code = data[15];
        let session_id = u16::from_be_bytes(data[16..18].try_into().unwrap());
        let length: usize = u16::from_be_bytes(data[18..20].try_into().unwrap()).into();
        let payload = data[HEADER_LEN..].get(..length)?;

        Some(Self {
            dst,
            src,
            ether_type,
            code,
            session_id,
            payload,
        })
    }

    /// Iterate the TLV tags of a Discovery payload.
    pub fn tags(&self) -> TagIter<'a> {
        TagIter { rest: self.payload }
    }
}

/// Iterator over `(type, value)` tags.
pub struct TagIter<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for TagIter<'a> {
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.len() < 4 {
            self.rest = &[];
            return None;
        }

        // No alignment guarantee on tag headers; copy before reading.
        let mut hdr = [0; 4];

        hdr.copy_from_slice(&self.rest[..4]);

        let ty = u16::from_be_bytes(hdr[..2].try_into().unwrap());
        let length: usize = u16::from_be_bytes(hdr[2..4].try_into().unwrap()).into();
        let value = match self.rest[4..].get(..length) {
            Some(v) => v,
            None => {
                self.rest = &[];
                return None;
            }
        };

        self.rest = &self.rest[(4 + length)..];

        Some((ty, value))
    }
}

/// Build a broadcast PADI frame into `buf` and return its length.
pub fn build_padi(buf: &mut [u8], src: MacAddr6, service: Option<&str>) -> usize {
    build_discovery(buf, MacAddr6::broadcast(), src, CODE_PADI, service)
}

/// Build a PADR frame into `buf` and return its length.
///
/// The `PADR_PAD` octets past the returned length are zeroed so the caller
/// can transmit them as trailing padding.
pub fn build_padr(buf: &mut [u8], src: MacAddr6, dst: MacAddr6, service: Option<&str>) -> usize {
    let len = build_discovery(buf, dst, src, CODE_PADR, service);

    buf[len..(len + PADR_PAD)].fill(0);
    len
}

fn build_discovery(
    buf: &mut [u8],
    dst: MacAddr6,
    src: MacAddr6,
    code: u8,
    service: Option<&str>,
) -> usize {
    let name = service.unwrap_or("").as_bytes();
    let len = HEADER_LEN + 4 + name.len();

    eth_header(buf, dst, src, ETH_P_DISC);
    pppoe_header(buf, code, 0, (4 + name.len()) as u16);

    // A single Service-Name tag; the empty name matches any service.
    buf[20..22].copy_from_slice(&TAG_SERVICE_NAME.to_be_bytes());
    buf[22..24].copy_from_slice(&(name.len() as u16).to_be_bytes());
    buf[24..(24 + name.len())].copy_from_slice(name);

    len
}

/// Build a Session frame carrying `ppp` into `buf` and return its length, or
/// `None` when the payload does not fit the buffer.
pub fn build_session(
    buf: &mut [u8],
    src: MacAddr6,
    dst: MacAddr6,
    session_id: u16,
    ppp: &[u8],
) -> Option<usize> {
    let len = HEADER_LEN + ppp.len();

    if len > buf.len() {
        return None;
    }

    eth_header(buf, dst, src, ETH_P_SESS);
    pppoe_header(buf, CODE_SESS, session_id, ppp.len() as u16);
    buf[HEADER_LEN..len].copy_from_slice(ppp);

    Some(len)
}

fn eth_header(buf: &mut [u8], dst: MacAddr6, src: MacAddr6, proto: u16) {
    buf[..6].copy_from_slice(dst.as_bytes());
    buf[6..12].copy_from_slice(src.as_bytes());
    buf[12..14].copy_from_slice(&proto.to_be_bytes());
}

fn pppoe_header(buf: &mut [u8], code: u8, session_id: u16, length: u16) {
    // VER and TYPE are both 1 on everything we emit.
    buf[14] = 0x11;
    buf[15] = code;
    buf[16..18].copy_from_slice(&session_id.to_be_bytes());
    buf[18..20].copy_from_slice(&length.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local() -> MacAddr6 {
        MacAddr6::new(0x02, 0x00, 0x00, 0x00, 0x00, 0x01)
    }

    fn ac() -> MacAddr6 {
        MacAddr6::new(0x02, 0x00, 0x00, 0x00, 0x00, 0x02)
    }

    #[test]
    fn padi_round_trip() {
        let mut buf = [0; PACKET_BUF];
        let len = build_padi(&mut buf, local(), Some("service"));
        let pkt = Frame::deserialize(&buf[..len]).unwrap();

        assert_eq!(pkt.dst, MacAddr6::broadcast());
        assert_eq!(pkt.src, local());
        assert_eq!(pkt.ether_type, ETH_P_DISC);
        assert_eq!(pkt.code, CODE_PADI);
        assert_eq!(pkt.session_id, 0);

        let tags: Vec<_> = pkt.tags().collect();

        assert_eq!(tags, [(TAG_SERVICE_NAME, "service".as_bytes())]);
    }

    #[test]
    fn padi_empty_service() {
        let mut buf = [0; PACKET_BUF];
        let len = build_padi(&mut buf, local(), None);
        let pkt = Frame::deserialize(&buf[..len]).unwrap();
        let tags: Vec<_> = pkt.tags().collect();

        assert_eq!(tags, [(TAG_SERVICE_NAME, &[][..])]);
    }

    #[test]
    fn padr_pads_with_zeros() {
        let mut buf = [0xaa; PACKET_BUF];
        let len = build_padr(&mut buf, local(), ac(), None);
        let pkt = Frame::deserialize(&buf[..len]).unwrap();

        assert_eq!(pkt.dst, ac());
        assert_eq!(pkt.src, local());
        assert_eq!(pkt.code, CODE_PADR);
        assert_eq!(pkt.session_id, 0);
        assert!(buf[len..(len + PADR_PAD)].iter().all(|&b| b == 0));
    }

    #[test]
    fn session_round_trip() {
        let mut buf = [0; PACKET_BUF];
        let ppp = [0xc0, 0x21, 0x01, 0x01, 0x00, 0x04];
        let len = build_session(&mut buf, local(), ac(), 0x1234, &ppp).unwrap();

        assert_eq!(len, HEADER_LEN + ppp.len());

        let pkt = Frame::deserialize(&buf[..len]).unwrap();

        assert_eq!(pkt.dst, ac());
        assert_eq!(pkt.src, local());
        assert_eq!(pkt.ether_type, ETH_P_SESS);
        assert_eq!(pkt.code, CODE_SESS);
        assert_eq!(pkt.session_id, 0x1234);
        assert_eq!(pkt.payload, ppp);
    }

    #[test]
    fn session_too_large() {
        let mut buf = [0; 64];

        assert!(build_session(&mut buf, local(), ac(), 1, &[0; 64]).is_none());
    }

    #[test]
    fn iterates_multiple_tags() {
        let mut buf = [0; PACKET_BUF];

        eth_header(&mut buf, local(), ac(), ETH_P_DISC);

        // AC-Name "ac", empty AC-Cookie, End-of-List.
        let tags = [
            0x01, 0x02, 0x00, 0x02, b'a', b'c', 0x01, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];

        pppoe_header(&mut buf, CODE_PADO, 0, tags.len() as u16);
        buf[HEADER_LEN..(HEADER_LEN + tags.len())].copy_from_slice(&tags);

        let len = HEADER_LEN + tags.len();
        let pkt = Frame::deserialize(&buf[..len]).unwrap();
        let tags: Vec<_> = pkt.tags().collect();

        assert_eq!(
            tags,
            [
                (TAG_AC_NAME, "ac".as_bytes()),
                (TAG_AC_COOKIE, &[][..]),
                (TAG_END_OF_LIST, &[][..]),
            ]
        );
    }

    #[test]
    fn unaligned_tags() {
        let mut buf = [0; PACKET_BUF];
        let len = build_padi(&mut buf, local(), Some("odd"));

        // The same frame at an even and an odd offset of its backing buffer.
        let mut shifted = vec![0; len + 1];

        shifted[1..].copy_from_slice(&buf[..len]);

        let even: Vec<_> = Frame::deserialize(&buf[..len]).unwrap().tags().collect();
        let odd: Vec<_> = Frame::deserialize(&shifted[1..]).unwrap().tags().collect();

        assert_eq!(even, odd);
    }

    #[test]
    fn rejects_bad_version() {
        let mut buf = [0; PACKET_BUF];
        let len = build_padi(&mut buf, local(), None);

        buf[14] = 0x21;

        assert!(Frame::deserialize(&buf[..len]).is_none());
    }

    #[test]
    fn rejects_truncated_payload() {
        let mut buf = [0; PACKET_BUF];
        let len = build_session(&mut buf, local(), ac(), 1, &[1, 2, 3, 4]).unwrap();

        assert!(Frame::deserialize(&buf[..(len - 1)]).is_none());
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(Frame::deserialize(&[0; 10]).is_none());
    }
}
