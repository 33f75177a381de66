use crate::addr::AddrBuilder;
use crate::disc::{DiscoveryClient, Outcome};
use crate::log::Logger;
use crate::session::{EndpointRelay, SessionRelay};
use crate::sock::PacketSocket;
use clap::{command, value_parser, Arg, ArgAction};
use erdp::ErrorDisplay;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

mod addr;
mod disc;
mod frame;
mod hdlc;
mod log;
mod session;
mod sock;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse arguments.
    let args = command!()
        .arg(
            Arg::new("interface")
                .help("Interface facing the access concentrator")
                .short('I')
                .value_name("IF")
                .default_value("eth0"),
        )
        .arg(
            Arg::new("log")
                .help("Write a verbose packet trace to this file")
                .short('L')
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("errors")
                .help("Write diagnostics to this file instead of stderr")
                .short('E')
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("forward")
                .help("Forward invalid PPP input: a = always, s = search for a frame flag")
                .short('F')
                .value_name("MODE")
                .value_parser(["a", "s"]),
        )
        .arg(
            Arg::new("no-padr-pad")
                .help("Do not pad PADR frames with 14 trailing zero octets")
                .long("no-padr-pad")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    // Open the log targets.
    let log = match Logger::new(
        args.get_one::<PathBuf>("log").map(PathBuf::as_path),
        args.get_one::<PathBuf>("errors").map(PathBuf::as_path),
    ) {
        Ok(v) => Arc::new(v),
        Err(e) => {
            eprintln!("Failed to open log file: {}.", e.display());
            return ExitCode::FAILURE;
        }
    };

    let mode = match args.get_one::<String>("forward").map(String::as_str) {
        Some("a") => hdlc::Mode::Forward,
        Some("s") => hdlc::Mode::Search,
        _ => hdlc::Mode::Strict,
    };

    // Resolve the interface.
    let interface: &String = args.get_one("interface").unwrap();
    let ab = match AddrBuilder::new(interface) {
        Ok(v) => Arc::new(v),
        Err(e) => {
            log.error(format!(
                "Failed to resolve interface {interface}: {}.",
                e.display()
            ));

            return ExitCode::FAILURE;
        }
    };

    // Create a socket for PPPoE discovery.
    let disc = match PacketSocket::open(&ab, frame::ETH_P_DISC, log.clone()) {
        Ok(v) => v,
        Err(e) => {
            log.error(format!(
                "Failed to open PPPoE discovery socket on {interface}: {}.",
                e.display()
            ));

            return ExitCode::FAILURE;
        }
    };

    // Shut down on SIGINT or SIGTERM.
    let running = CancellationToken::new();
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(v) => v,
        Err(e) => {
            log.error(format!("Failed to watch SIGINT: {}.", e.display()));
            return ExitCode::FAILURE;
        }
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(v) => v,
        Err(e) => {
            log.error(format!("Failed to watch SIGTERM: {}.", e.display()));
            return ExitCode::FAILURE;
        }
    };

    {
        let running = running.clone();

        tokio::spawn(async move {
            select! {
                _ = sigint.recv() => {}
                _ = sigterm.recv() => {}
            }

            running.cancel();
        });
    }

    // Run the Discovery Stage.
    let client = DiscoveryClient::new(&disc, &ab, log.clone(), !args.get_flag("no-padr-pad"));
    let info = match client.run(&running).await {
        Ok(Outcome::Established(v)) => v,
        Ok(Outcome::Terminated) => return ExitCode::SUCCESS,
        Ok(Outcome::Cancelled) => return ExitCode::FAILURE,
        Err(e) => {
            log.error(format!("PPPoE discovery failed: {}.", e.display()));
            return ExitCode::FAILURE;
        }
    };

    log.note(format!("session {:#06x} established with {}", info.id, info.ac));

    // Create a socket for the Session Stage and start both relay workers.
    let sess = match PacketSocket::open(&ab, frame::ETH_P_SESS, log.clone()) {
        Ok(v) => Arc::new(v),
        Err(e) => {
            log.error(format!(
                "Failed to open PPPoE session socket on {interface}: {}.",
                e.display()
            ));

            return ExitCode::FAILURE;
        }
    };

    let relay = SessionRelay::new(sess.clone(), info, log.clone());
    let endpoint = EndpointRelay::new(sess, ab, info, mode, log.clone());
    let relay = tokio::spawn(relay.run(running.clone()));
    let endpoint = tokio::spawn(endpoint.run(running.clone()));

    // Keep watching the discovery socket for a PADT from the concentrator.
    let mut buf = [0; frame::PACKET_BUF];
    let status = loop {
        let len = select! {
            _ = running.cancelled() => break ExitCode::FAILURE,
            v = disc.recv(&mut buf) => match v {
                Ok(v) => v,
                Err(e) => {
                    log.error(format!(
                        "Failed to receive a packet from PPPoE discovery socket: {}.",
                        e.display()
                    ));

                    break ExitCode::FAILURE;
                }
            },
        };

        let Some(pkt) = frame::Frame::deserialize(&buf[..len]) else {
            continue;
        };

        if pkt.src == info.ac && pkt.code == frame::CODE_PADT {
            log.note("concentrator terminated the session");
            break ExitCode::FAILURE;
        }
    };

    // Tear down both relay workers before exiting.
    running.cancel();

    let _ = relay.await;
    let _ = endpoint.await;

    status
}
