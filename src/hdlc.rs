use std::error::Error;
use std::fmt::{Display, Formatter};

pub const FLAG: u8 = 0x7e;
pub const ESC: u8 = 0x7d;
pub const ADDR: u8 = 0xff;
pub const CTL: u8 = 0x03;

const ENC: u8 = 0x20;

/// Initial FCS value.
pub const FCS_INIT: u16 = 0xffff;

/// Good final FCS value.
pub const FCS_GOOD: u16 = 0xf0b8;

#[rustfmt::skip]
const FCSTAB: [u16; 256] = [
    0x0000, 0x1189, 0x2312, 0x329b, 0x4624, 0x57ad, 0x6536, 0x74bf,
    0x8c48, 0x9dc1, 0xaf5a, 0xbed3, 0xca6c, 0xdbe5, 0xe97e, 0xf8f7,
    0x1081, 0x0108, 0x3393, 0x221a, 0x56a5, 0x472c, 0x75b7, 0x643e,
    0x9cc9, 0x8d40, 0xbfdb, 0xae52, 0xdaed, 0xcb64, 0xf9ff, 0xe876,
    0x2102, 0x308b, 0x0210, 0x1399, 0x6726, 0x76af, 0x4434, 0x55bd,
    0xad4a, 0xbcc3, 0x8e58, 0x9fd1, 0xeb6e, 0xfae7, 0xc87c, 0xd9f5,
    0x3183, 0x200a, 0x1291, 0x0318, 0x77a7, 0x662e, 0x54b5, 0x453c,
    0xbdcb, 0xac42, 0x9ed9, 0x8f50, 0xfbef, 0xea66, 0xd8fd, 0xc974,
    0x4204, 0x538d, 0x6116, 0x709f, 0x0420, 0x15a9, 0x2732, 0x36bb,
    0xce4c, 0xdfc5, 0xed5e, 0xfcd7, 0x8868, 0x99e1, 0xab7a, 0xbaf3,
    0x5285, 0x430c, 0x7197, 0x601e, 0x14a1, 0x0528, 0x37b3, 0x263a,
    0xdecd, 0xcf44, 0xfddf, 0xec56, 0x98e9, 0x8960, 0xbbfb, 0xaa72,
    0x6306, 0x728f, 0x4014, 0x519d, 0x2522, 0x34ab, 0x0630, 0x17b9,
    0xef4e, 0xfec7, 0xcc5c, 0xddd5, 0xa96a, 0xb8e3, 0x8a78, 0x9bf1,
    0x7387, 0x620e, 0x5095, 0x411c, 0x35a3, 0x242a, 0x16b1, 0x0738,
    0xffcf, 0xee46, 0xdcdd, 0xcd54, 0xb9eb, 0xa862, 0x9af9, 0x8b70,
    0x8408, 0x9581, 0xa71a, 0xb693, 0xc22c, 0xd3a5, 0xe13e, 0xf0b7,
    0x0840, 0x19c9, 0x2b52, 0x3adb, 0x4e64, 0x5fed, 0x6d76, 0x7cff,
    0x9489, 0x8500, 0xb79b, 0xa612, 0xd2ad, 0xc324, 0xf1bf, 0xe036,
    0x18c1, 0x0948, 0x3bd3, 0x2a5a, 0x5ee5, 0x4f6c, 0x7df7, 0x6c7e,
    0xa50a, 0xb483, 0x8618, 0x9791, 0xe32e, 0xf2a7, 0xc03c, 0xd1b5,
    0x2942, 0x38cb, 0x0a50, 0x1bd9, 0x6f66, 0x7eef, 0x4c74, 0x5dfd,
    0xb58b, 0xa402, 0x9699, 0x8710, 0xf3af, 0xe226, 0xd0bd, 0xc134,
    0x39c3, 0x284a, 0x1ad1, 0x0b58, 0x7fe7, 0x6e6e, 0x5cf5, 0x4d7c,
    0xc60c, 0xd785, 0xe51e, 0xf497, 0x8028, 0x91a1, 0xa33a, 0xb2b3,
    0x4a44, 0x5bcd, 0x6956, 0x78df, 0x0c60, 0x1de9, 0x2f72, 0x3efb,
    0xd68d, 0xc704, 0xf59f, 0xe416, 0x90a9, 0x8120, 0xb3bb, 0xa232,
    0x5ac5, 0x4b4c, 0x79d7, 0x685e, 0x1ce1, 0x0d68, 0x3ff3, 0x2e7a,
    0xe70e, 0xf687, 0xc41c, 0xd595, 0xa12a, 0xb0a3, 0x8238, 0x93b1,
    0x6b46, 0x7acf, 0x4854, 0x59dd, 0x2d62, 0x3ceb, 0x0e70, 0x1ff9,
    0xf78f, 0xe606, 0xd49d, 0xc514, 0xb1ab, 0xa022, 0x92b9, 0x8330,
    0x7bc7, 0x6a4e, 0x58d5, 0x495c, 0x3de3, 0x2c6a, 0x1ef1, 0x0f78,
];

/// Update `fcs` with the PPP FCS-16 of `data`.
pub fn fcs16(fcs: u16, data: &[u8]) -> u16 {
    data.iter().fold(fcs, |fcs, &b| {
        (fcs >> 8) ^ FCSTAB[usize::from((fcs ^ u16::from(b)) & 0xff)]
    })
}

/// Byte-stuffing encoder for the stream to the local PPP endpoint.
pub struct Encoder {
    first: bool,
}

impl Encoder {
    pub fn new() -> Self {
        Self { first: true }
    }

    /// Frame `payload` into `out`, replacing its previous content.
    ///
    /// Only the very first frame opens with a FLAG; every later frame reuses
    /// the closing FLAG of the frame before it as its opener.
    pub fn encode(&mut self, payload: &[u8], out: &mut Vec<u8>) {
        let mut fcs = fcs16(FCS_INIT, &[ADDR, CTL]);

        fcs = fcs16(fcs, payload) ^ 0xffff;

        out.clear();

        if self.first {
            out.push(FLAG);
            self.first = false;
        }

        stuff(out, ADDR);
        stuff(out, CTL);

        for &b in payload {
            stuff(out, b);
        }

        // FCS goes out low octet first.
        stuff(out, (fcs & 0x00ff) as u8);
        stuff(out, (fcs >> 8) as u8);

        out.push(FLAG);
    }
}

fn stuff(out: &mut Vec<u8>, b: u8) {
    if b == FLAG || b == ESC || b < 0x20 {
        out.push(ESC);
        out.push(b ^ ENC);
    } else {
        out.push(b);
    }
}

/// How to treat input from the local PPP endpoint that does not start with a
/// FLAG or ADDR octet.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Reject the buffer.
    Strict,
    /// Unstuff the buffer as-is.
    Forward,
    /// Scan forward for the first FLAG and decode from there.
    Search,
}

#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer does not look like an HDLC frame.
    Invalid,
    /// No FLAG octet found while searching; the frame is dropped silently.
    NoFlag,
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid => f.write_str("invalid HDLC data"),
            Self::NoFlag => f.write_str("no frame flag found"),
        }
    }
}

impl Error for DecodeError {}

/// Unstuff one frame from the local PPP endpoint into `out`, replacing its
/// previous content.
pub fn decode(buf: &[u8], mode: Mode, out: &mut Vec<u8>) -> Result<(), DecodeError> {
    let start_ok = matches!(buf.first(), Some(&FLAG) | Some(&ADDR));
    let buf = if start_ok || mode == Mode::Forward {
        buf
    } else if mode == Mode::Search {
        match buf.iter().position(|&b| b == FLAG) {
            Some(i) => &buf[i..],
            None => return Err(DecodeError::NoFlag),
        }
    } else {
        return Err(DecodeError::Invalid);
    };

    // The endpoint stuffs CTL but not ADDR, so a frame opens with either
    // FLAG ADDR ESC CTL^0x20 or just ADDR ESC CTL^0x20.
    let skip = if buf.first() == Some(&FLAG) { 4 } else { 3 };

    if buf.len() < skip + 3 {
        return Err(DecodeError::Invalid);
    }

    out.clear();

    // Unstuff everything up to the closing FLAG.
    let end = buf.len() - 1;
    let mut i = skip;

    while i < end {
        if buf[i] == ESC && i + 1 < end {
            out.push(buf[i + 1] ^ ENC);
            i += 2;
        } else {
            out.push(buf[i]);
            i += 1;
        }
    }

    // The last two unstuffed octets are the FCS; it is not verified inbound.
    if out.len() < 2 {
        return Err(DecodeError::Invalid);
    }

    out.truncate(out.len() - 2);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(buf: &[u8], mode: Mode) -> Vec<u8> {
        let mut out = Vec::new();

        decode(buf, mode, &mut out).unwrap();
        out
    }

    #[test]
    fn round_trip() {
        let mut enc = Encoder::new();
        let mut out = Vec::new();
        let payload = [0xc0, 0x21, 0x01, 0x01, 0x00, 0x04];

        enc.encode(&payload, &mut out);
        assert_eq!(out[0], FLAG);
        assert_eq!(decoded(&out, Mode::Strict), payload);

        // Later frames have no opening FLAG of their own.
        let payload = [0x7e, 0x7d, 0x1f, 0x80, 0x00];

        enc.encode(&payload, &mut out);
        assert_eq!(out[0], ADDR);
        assert_eq!(decoded(&out, Mode::Strict), payload);
    }

    #[test]
    fn round_trip_all_octets() {
        let payload: Vec<u8> = (0..=255).collect();
        let mut enc = Encoder::new();
        let mut out = Vec::new();

        enc.encode(&payload, &mut out);
        assert_eq!(decoded(&out, Mode::Strict), payload);
    }

    #[test]
    fn fcs_residual() {
        let payload = [0xc0, 0x21, 0x01, 0x01, 0x00, 0x04];
        let mut fcs = fcs16(FCS_INIT, &[ADDR, CTL]);

        fcs = fcs16(fcs, &payload) ^ 0xffff;

        let mut full = vec![ADDR, CTL];

        full.extend_from_slice(&payload);
        full.push((fcs & 0x00ff) as u8);
        full.push((fcs >> 8) as u8);

        assert_eq!(fcs16(FCS_INIT, &full), FCS_GOOD);
    }

    #[test]
    fn lcp_configure_request() {
        let payload = [0xc0, 0x21, 0x01, 0x01, 0x00, 0x04];
        let mut fcs = fcs16(FCS_INIT, &[ADDR, CTL]);

        fcs = fcs16(fcs, &payload) ^ 0xffff;

        let mut wire = vec![FLAG, ADDR, ESC, CTL ^ 0x20];

        for &b in &payload {
            stuff(&mut wire, b);
        }

        stuff(&mut wire, (fcs & 0x00ff) as u8);
        stuff(&mut wire, (fcs >> 8) as u8);
        wire.push(FLAG);

        assert_eq!(decoded(&wire, Mode::Strict), payload);
    }

    #[test]
    fn strict_rejects_garbage() {
        let mut out = Vec::new();

        assert_eq!(
            decode(&[0x55, 0xaa, 0x00, 0x00, 0x00, 0x00], Mode::Strict, &mut out),
            Err(DecodeError::Invalid)
        );
    }

    #[test]
    fn search_finds_frame() {
        let mut enc = Encoder::new();
        let mut frame = Vec::new();

        enc.encode(&[0x21, 0x45, 0x00], &mut frame);

        let mut wire = vec![0x55, 0xaa, 0x13];

        wire.extend_from_slice(&frame);

        assert_eq!(decoded(&wire, Mode::Search), decoded(&frame, Mode::Strict));
    }

    #[test]
    fn search_without_flag_drops() {
        let mut out = Vec::new();

        assert_eq!(
            decode(&[0x55, 0xaa, 0x13], Mode::Search, &mut out),
            Err(DecodeError::NoFlag)
        );
    }

    #[test]
    fn forward_accepts_garbage_start() {
        let mut wire = vec![0x45, 0x46, 0x47];

        wire.extend_from_slice(&[0x21, 0x22, 0x23]);
        wire.extend_from_slice(&[0xaa, 0xbb]);
        wire.push(FLAG);

        assert_eq!(decoded(&wire, Mode::Forward), [0x21, 0x22, 0x23]);
    }
}
