use crate::frame::{self, Frame};
use chrono::Local;
use pretty_hex::{hex_write, HexConfig};
use std::fmt::{Display, Write as _};
use std::fs::File;
use std::io::{Error, Write};
use std::path::Path;
use std::sync::Mutex;

const TIME_FMT: &str = "%a %b %e %T %Y";

/// Sink for the verbose packet trace and the error stream.
///
/// The error stream is stderr unless redirected to a file; the trace is off
/// unless a log file was given.
pub struct Logger {
    log: Option<Mutex<File>>,
    err: Option<Mutex<File>>,
}

impl Logger {
    pub fn new(log: Option<&Path>, err: Option<&Path>) -> Result<Self, Error> {
        let log = match log {
            Some(p) => Some(Mutex::new(File::create(p)?)),
            None => None,
        };
        let err = match err {
            Some(p) => Some(Mutex::new(File::create(p)?)),
            None => None,
        };

        Ok(Self { log, err })
    }

    /// One diagnostic line on the error stream.
    pub fn error(&self, msg: impl Display) {
        match &self.err {
            Some(f) => {
                let mut f = f.lock().unwrap();
                let _ = writeln!(f, "{msg}");
            }
            None => eprintln!("{msg}"),
        }
    }

    /// One timestamped line in the verbose log.
    pub fn note(&self, msg: impl Display) {
        if let Some(f) = &self.log {
            let mut f = f.lock().unwrap();
            let _ = writeln!(f, "{} {msg}", Local::now().format(TIME_FMT));
        }
    }

    /// Trace one frame on the wire. `dir` is `R` (received), `S` (sent) or
    /// `D` (dropped by the link filter).
    pub fn trace(&self, dir: char, data: &[u8]) {
        let Some(f) = &self.log else { return };

        let mut text = String::new();

        let _ = write!(text, "{} {dir}: ", Local::now().format(TIME_FMT));

        describe(&mut text, data);
        text.push('\n');

        let mut conf = HexConfig::default();

        conf.title = false;

        let _ = hex_write(&mut text, &data, conf);

        let mut f = f.lock().unwrap();
        let _ = writeln!(f, "{text}");
    }
}

fn describe(w: &mut String, data: &[u8]) {
    let Some(pkt) = Frame::deserialize(data) else {
        let _ = write!(w, "not a PPPoE frame ({} octets)", data.len());
        return;
    };

    let _ = write!(
        w,
        "{} -> {}, {}, code {:#04x} ({}), session {:#06x}, length {}",
        pkt.src,
        pkt.dst,
        proto_name(pkt.ether_type),
        pkt.code,
        code_name(pkt.code),
        pkt.session_id,
        pkt.payload.len()
    );

    if pkt.ether_type != frame::ETH_P_DISC {
        return;
    }

    for (ty, value) in pkt.tags() {
        let _ = write!(w, "\n  tag {ty:#06x} ({})", tag_name(ty));

        if value.is_empty() {
            continue;
        }

        match ty {
            frame::TAG_SERVICE_NAME
            | frame::TAG_AC_NAME
            | frame::TAG_SERVICE_NAME_ERROR
            | frame::TAG_AC_SYSTEM_ERROR
            | frame::TAG_GENERIC_ERROR => {
                let _ = write!(w, " = '{}'", String::from_utf8_lossy(value));
            }
            _ => {
                let _ = write!(w, " =");

                for b in value {
                    let _ = write!(w, " {b:02x}");
                }
            }
        }
    }
}

fn proto_name(proto: u16) -> &'static str {
    match proto {
        frame::ETH_P_DISC => "PPPoE Discovery",
        frame::ETH_P_SESS => "PPPoE Session",
        _ => "unknown proto",
    }
}

fn code_name(code: u8) -> &'static str {
    match code {
        frame::CODE_SESS => "SESS",
        frame::CODE_PADI => "PADI",
        frame::CODE_PADO => "PADO",
        frame::CODE_PADR => "PADR",
        frame::CODE_PADS => "PADS",
        frame::CODE_PADT => "PADT",
        _ => "unknown",
    }
}

fn tag_name(ty: u16) -> &'static str {
    match ty {
        frame::TAG_END_OF_LIST => "End of list",
        frame::TAG_SERVICE_NAME => "Service name",
        frame::TAG_AC_NAME => "AC Name",
        frame::TAG_HOST_UNIQ => "Host Uniq",
        frame::TAG_AC_COOKIE => "AC Cookie",
        frame::TAG_VENDOR_SPECIFIC => "Vendor Specific",
        frame::TAG_RELAY_SESSION_ID => "Relay Session ID",
        frame::TAG_SERVICE_NAME_ERROR => "Service Name Error",
        frame::TAG_AC_SYSTEM_ERROR => "AC System Error",
        frame::TAG_GENERIC_ERROR => "Generic Error",
        _ => "Unknown",
    }
}
