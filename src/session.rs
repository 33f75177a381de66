use crate::addr::AddrBuilder;
use crate::frame::{self, Frame};
use crate::hdlc;
use crate::log::Logger;
use crate::sock::PacketSocket;
use erdp::ErrorDisplay;
use macaddr::MacAddr6;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::select;
use tokio_util::sync::CancellationToken;

/// Identity of the established session, copied read-only into both relay
/// workers.
#[derive(Clone, Copy)]
pub struct SessionInfo {
    pub local: MacAddr6,
    pub ac: MacAddr6,
    pub id: u16,
}

/// Session frames must come from the learned concentrator, on the session
/// EtherType, with the SESS code and the learned session id.
fn accepts(pkt: &Frame, info: &SessionInfo) -> bool {
    pkt.src == info.ac
        && pkt.ether_type == frame::ETH_P_SESS
        && pkt.code == frame::CODE_SESS
        && pkt.session_id == info.id
}

/// Worker relaying concentrator Session frames to the local PPP endpoint.
pub struct SessionRelay {
    sock: Arc<PacketSocket>,
    info: SessionInfo,
    log: Arc<Logger>,
}

impl SessionRelay {
    pub fn new(sock: Arc<PacketSocket>, info: SessionInfo, log: Arc<Logger>) -> Self {
        Self { sock, info, log }
    }

    pub async fn run(self, running: CancellationToken) {
        let mut stdout = tokio::io::stdout();
        let mut buf = [0; frame::PACKET_BUF];
        let mut out = Vec::with_capacity(frame::PACKET_BUF);
        let mut enc = hdlc::Encoder::new();
        #[cfg(feature = "buggy-ac")]
        let mut dups = DupWindow::new();

        loop {
            // Wait for a PPPoE session packet.
            let len = select! {
                _ = running.cancelled() => break,
                v = self.sock.recv(&mut buf) => match v {
                    Ok(v) => v,
                    Err(e) => {
                        self.log.error(format!(
                            "Failed to receive a packet from PPPoE session socket: {}.",
                            e.display()
                        ));

                        running.cancel();
                        return;
                    }
                }
            };

            let Some(pkt) = Frame::deserialize(&buf[..len]) else {
                self.log.note("malformed session frame dropped");
                continue;
            };

            if !accepts(&pkt, &self.info) {
                self.log.note(format!(
                    "session frame from {} dropped (code {:#04x}, session {:#06x})",
                    pkt.src, pkt.code, pkt.session_id
                ));

                continue;
            }

            #[cfg(feature = "buggy-ac")]
            if dups.check(&buf[..len]) {
                self.log.note("duplicate session frame dropped");
                continue;
            }

            // One HDLC frame per write.
            enc.encode(pkt.payload, &mut out);

            if let Err(e) = write_frame(&mut stdout, &out).await {
                self.log.error(format!(
                    "Failed to write to the PPP endpoint: {}.",
                    e.display()
                ));

                running.cancel();
                return;
            }
        }
    }
}

async fn write_frame(
    stdout: &mut tokio::io::Stdout,
    buf: &[u8],
) -> Result<(), std::io::Error> {
    stdout.write_all(buf).await?;
    stdout.flush().await
}

/// Worker relaying local PPP endpoint output to the concentrator.
pub struct EndpointRelay {
    sock: Arc<PacketSocket>,
    ab: Arc<AddrBuilder>,
    info: SessionInfo,
    mode: hdlc::Mode,
    log: Arc<Logger>,
}

impl EndpointRelay {
    pub fn new(
        sock: Arc<PacketSocket>,
        ab: Arc<AddrBuilder>,
        info: SessionInfo,
        mode: hdlc::Mode,
        log: Arc<Logger>,
    ) -> Self {
        Self {
            sock,
            ab,
            info,
            mode,
            log,
        }
    }

    pub async fn run(self, running: CancellationToken) {
        let mut stdin = tokio::io::stdin();
        let mut buf = [0; frame::PACKET_BUF];
        let mut ppp = Vec::with_capacity(frame::PACKET_BUF);
        let mut pkt = [0; frame::PACKET_BUF];

        loop {
            let len = select! {
                _ = running.cancelled() => break,
                v = stdin.read(&mut buf) => match v {
                    Ok(v) => v,
                    Err(e) => {
                        self.log.error(format!(
                            "Failed to read from the PPP endpoint: {}.",
                            e.display()
                        ));

                        running.cancel();
                        return;
                    }
                }
            };

            // An empty read means no data this iteration, not end of stream.
            if len == 0 {
                continue;
            }

            match hdlc::decode(&buf[..len], self.mode, &mut ppp) {
                Ok(()) => {}
                Err(hdlc::DecodeError::NoFlag) => continue,
                Err(e) => {
                    self.log
                        .error(format!("Dropping output from the PPP endpoint: {e}."));

                    continue;
                }
            }

            let len = match frame::build_session(
                &mut pkt,
                self.info.local,
                self.info.ac,
                self.info.id,
                &ppp,
            ) {
                Some(v) => v,
                None => {
                    self.log
                        .error(format!("Dropping oversized PPP frame ({} octets).", ppp.len()));

                    continue;
                }
            };

            if let Err(e) = self.sock.send(
                self.ab.build(frame::ETH_P_SESS, Some(self.info.ac)),
                &pkt[..len],
            ) {
                self.log.error(format!(
                    "Failed to send a PPPoE session packet: {}.",
                    e.display()
                ));

                running.cancel();
                return;
            }
        }
    }
}

#[cfg(feature = "buggy-ac")]
const DUP_COUNT: usize = 10;
#[cfg(feature = "buggy-ac")]
const DUP_LENGTH: usize = 20;

/// Window of recently seen frame prefixes, for concentrators that send
/// duplicate packets.
#[cfg(feature = "buggy-ac")]
struct DupWindow {
    seen: [[u8; DUP_LENGTH]; DUP_COUNT],
    next: usize,
}

#[cfg(feature = "buggy-ac")]
impl DupWindow {
    fn new() -> Self {
        Self {
            seen: [[0; DUP_LENGTH]; DUP_COUNT],
            next: 0,
        }
    }

    /// Record `data` and report whether it was already in the window.
    fn check(&mut self, data: &[u8]) -> bool {
        let mut probe = [0; DUP_LENGTH];
        let n = data.len().min(DUP_LENGTH);

        probe[..n].copy_from_slice(&data[..n]);

        if self.seen.contains(&probe) {
            return true;
        }

        self.seen[self.next] = probe;
        self.next = (self.next + 1) % DUP_COUNT;

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> SessionInfo {
        SessionInfo {
            local: MacAddr6::new(0x02, 0x00, 0x00, 0x00, 0x00, 0x01),
            ac: MacAddr6::new(0x02, 0x00, 0x00, 0x00, 0x00, 0x02),
            id: 0x1234,
        }
    }

    fn session_frame(src: MacAddr6, id: u16) -> Vec<u8> {
        let mut buf = [0; frame::PACKET_BUF];
        let len =
            frame::build_session(&mut buf, src, info().local, id, &[0xc0, 0x21]).unwrap();

        buf[..len].to_vec()
    }

    #[test]
    fn accepts_matching_frame() {
        let data = session_frame(info().ac, info().id);
        let pkt = Frame::deserialize(&data).unwrap();

        assert!(accepts(&pkt, &info()));
    }

    #[test]
    fn rejects_foreign_source() {
        let other = MacAddr6::new(0x02, 0x00, 0x00, 0x00, 0x00, 0x99);
        let data = session_frame(other, info().id);
        let pkt = Frame::deserialize(&data).unwrap();

        assert!(!accepts(&pkt, &info()));
    }

    #[test]
    fn rejects_other_session() {
        let data = session_frame(info().ac, 0x9999);
        let pkt = Frame::deserialize(&data).unwrap();

        assert!(!accepts(&pkt, &info()));
    }

    #[test]
    fn rejects_discovery_frame() {
        let mut buf = [0; frame::PACKET_BUF];
        let len = frame::build_padi(&mut buf, info().ac, None);
        let pkt = Frame::deserialize(&buf[..len]).unwrap();

        assert!(!accepts(&pkt, &info()));
    }

    #[cfg(feature = "buggy-ac")]
    #[test]
    fn duplicate_window() {
        let mut dups = DupWindow::new();
        let first = session_frame(info().ac, info().id);

        assert!(!dups.check(&first));
        assert!(dups.check(&first));

        // Old entries fall out of the window.
        for i in 0..DUP_COUNT {
            let mut frame = first.clone();

            frame[0] = 0xe0 + i as u8;
            assert!(!dups.check(&frame));
        }

        assert!(!dups.check(&first));
    }
}
