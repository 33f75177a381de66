use crate::addr::AddrBuilder;
use crate::frame::{self, Frame};
use crate::log::Logger;
use crate::session::SessionInfo;
use crate::sock::PacketSocket;
use macaddr::MacAddr6;
use std::io::Error;
use std::sync::Arc;
use tokio::select;
use tokio_util::sync::CancellationToken;

/// Client for the PPPoE Discovery Stage.
pub struct DiscoveryClient<'a> {
    sock: &'a PacketSocket,
    ab: &'a AddrBuilder,
    log: Arc<Logger>,
    padr_pad: bool,
}

/// How the Discovery Stage ended.
pub enum Outcome {
    /// PADS received; the session is live.
    Established(SessionInfo),
    /// The concentrator terminated the discovery with a PADT.
    Terminated,
    /// Shutdown was requested before a session came up.
    Cancelled,
}

impl<'a> DiscoveryClient<'a> {
    pub fn new(
        sock: &'a PacketSocket,
        ab: &'a AddrBuilder,
        log: Arc<Logger>,
        padr_pad: bool,
    ) -> Self {
        Self {
            sock,
            ab,
            log,
            padr_pad,
        }
    }

    /// Run PADI -> PADO -> PADR -> PADS to completion.
    ///
    /// There is no retransmission; a lost PADI or PADR leaves us waiting for
    /// an answer that never comes.
    pub async fn run(&self, running: &CancellationToken) -> Result<Outcome, Error> {
        let local = self.sock.local_addr();
        let mut buf = [0; frame::PACKET_BUF];

        // Initiate with a broadcast PADI carrying an empty Service-Name.
        let len = frame::build_padi(&mut buf, local, None);

        self.sock
            .send(self.ab.build(frame::ETH_P_DISC, None), &buf[..len])?;

        // The first offer wins.
        let ac = loop {
            let len = select! {
                _ = running.cancelled() => return Ok(Outcome::Cancelled),
                v = self.sock.recv(&mut buf) => v?,
            };

            let pkt = match Frame::deserialize(&buf[..len]) {
                Some(v) if v.ether_type == frame::ETH_P_DISC => v,
                _ => {
                    self.log.note("malformed discovery frame dropped");
                    continue;
                }
            };

            match pkt.code {
                frame::CODE_PADO => break pkt.src,
                frame::CODE_PADT => return Ok(Outcome::Terminated),
                code => self.log.note(format!("unexpected packet {code:#x}")),
            }
        };

        // Request a session from the offering concentrator.
        let len = self.build_padr(&mut buf, local, ac);

        self.sock
            .send(self.ab.build(frame::ETH_P_DISC, Some(ac)), &buf[..len])?;

        // Wait for the confirmation, ignoring anything not from the
        // concentrator that made the offer.
        loop {
            let len = select! {
                _ = running.cancelled() => return Ok(Outcome::Cancelled),
                v = self.sock.recv(&mut buf) => v?,
            };

            let pkt = match Frame::deserialize(&buf[..len]) {
                Some(v) if v.ether_type == frame::ETH_P_DISC => v,
                _ => {
                    self.log.note("malformed discovery frame dropped");
                    continue;
                }
            };

            if pkt.src != ac {
                continue;
            }

            match pkt.code {
                frame::CODE_PADS => {
                    return Ok(Outcome::Established(SessionInfo {
                        local,
                        ac,
                        id: pkt.session_id,
                    }));
                }
                frame::CODE_PADT => return Ok(Outcome::Terminated),
                code => self.log.note(format!("unexpected packet {code:#x}")),
            }
        }
    }

    fn build_padr(&self, buf: &mut [u8], local: MacAddr6, ac: MacAddr6) -> usize {
        let len = frame::build_padr(buf, local, ac, None);

        // Some concentrators want the 14 extra octets.
        if self.padr_pad {
            len + frame::PADR_PAD
        } else {
            len
        }
    }
}
