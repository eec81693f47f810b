//! ISO-TP send driver
//!
//! Sends one payload through an ISO-TP session over an in-process loopback
//! link. A mirrored session on a second thread plays the receiving ECU, so
//! the whole handshake (First Frame, Flow Control, Consecutive Frames) runs
//! end to end. Exit status is non-zero when the transfer fails or the
//! receiving end got something other than the payload.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use libisotp::isotp::{IsoTp, IsoTpConfig};
use libisotp::physical::loopback::LoopbackLink;
use libisotp::transport::pdu::SeparationTime;
use libisotp::transport::TransportLayer;
use std::thread;
use std::time::Instant;

/// Send a payload over ISO-TP (ISO 15765-2)
#[derive(Parser, Debug)]
#[command(name = "isotp-send")]
#[command(about = "Segment a payload with ISO-TP and deliver it over a loopback link", long_about = None)]
#[command(version)]
struct Args {
    /// Payload as hex bytes, spaces optional
    #[arg(default_value = "32 11 AA 33 44 88 44 88")]
    payload: String,

    /// Identifier the payload is sent on (hex with 0x prefix, or decimal)
    #[arg(long, value_parser = parse_id, default_value = "0x18DA0FFE")]
    tx_id: u32,

    /// Identifier Flow Control comes back on
    #[arg(long, value_parser = parse_id, default_value = "0x18DAF100")]
    rx_id: u32,

    /// Use 11-bit identifiers instead of 29-bit
    #[arg(long)]
    standard_id: bool,

    /// Block size advertised by the receiving end (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    block_size: u8,

    /// Raw STmin byte advertised by the receiving end
    #[arg(long, value_parser = parse_byte, default_value = "0")]
    st_min: u8,

    /// Disable the Flow Control handshake on both ends
    #[arg(long)]
    no_flow_control: bool,

    /// Pad every frame to full length with this byte
    #[arg(long, value_parser = parse_byte)]
    padding: Option<u8>,

    /// Session timeout in milliseconds
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u32,

    /// Verbosity level (-v transfers, -vv every frame)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    log::info!("isotp-send v{}", libisotp::VERSION);

    let payload = parse_payload(&args.payload)?;
    let sender_config = IsoTpConfig {
        tx_id: args.tx_id,
        rx_id: args.rx_id,
        extended_id: !args.standard_id,
        padding: args.padding,
        flow_control: !args.no_flow_control,
        timeout_ms: args.timeout_ms,
        ..Default::default()
    };
    let receiver_config = IsoTpConfig {
        tx_id: args.rx_id,
        rx_id: args.tx_id,
        block_size: args.block_size,
        st_min: SeparationTime::from_raw(args.st_min),
        ..sender_config.clone()
    };

    let (sender_link, receiver_link) = LoopbackLink::pair();
    let receiver = thread::spawn(move || -> libisotp::error::Result<Vec<u8>> {
        let mut session = IsoTp::with_physical(receiver_config, receiver_link);
        session.open()?;
        let received = session.receive();
        session.close()?;
        received
    });

    let mut sender = IsoTp::with_physical(sender_config, sender_link);
    sender.open().context("opening sending session")?;

    let started = Instant::now();
    let sent = sender.send(&payload);
    let elapsed = started.elapsed();
    let received = receiver
        .join()
        .map_err(|_| anyhow!("receiving session panicked"))?;

    sent.with_context(|| format!("sending {} bytes on 0x{:X}", payload.len(), args.tx_id))?;
    let received = received.context("receiving on the loopback peer")?;
    if received != payload {
        bail!(
            "receiver got {} bytes that differ from the {} bytes sent",
            received.len(),
            payload.len()
        );
    }

    if !args.quiet {
        println!(
            "sent {} bytes 0x{:X} -> 0x{:X} in {:?}",
            payload.len(),
            args.tx_id,
            args.rx_id,
            elapsed
        );
    }
    Ok(())
}

fn parse_id(s: &str) -> std::result::Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid identifier '{}': {}", s, e))
}

fn parse_byte(s: &str) -> std::result::Result<u8, String> {
    let id = parse_id(s)?;
    u8::try_from(id).map_err(|_| format!("'{}' does not fit in one byte", s))
}

fn parse_payload(s: &str) -> Result<Vec<u8>> {
    let digits: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    if !digits.is_ascii() {
        bail!("payload must be hex digits");
    }
    if digits.len() % 2 != 0 {
        bail!("payload has an odd number of hex digits");
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .with_context(|| format!("invalid hex byte '{}'", &digits[i..i + 2]))
        })
        .collect()
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;
    use std::io::Write;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_identifiers_and_bytes() {
        assert_eq!(parse_id("0x18DA0FFE"), Ok(0x18DA0FFE));
        assert_eq!(parse_id("2024"), Ok(2024));
        assert!(parse_id("0xZZ").is_err());
        assert_eq!(parse_byte("0xF1"), Ok(0xF1));
        assert!(parse_byte("256").is_err());
    }

    #[test]
    fn parses_hex_payloads() {
        assert_eq!(
            parse_payload("32 11 AA 33 44 88 44 88").unwrap(),
            vec![0x32, 0x11, 0xAA, 0x33, 0x44, 0x88, 0x44, 0x88]
        );
        assert_eq!(parse_payload("3e00").unwrap(), vec![0x3E, 0x00]);
        assert!(parse_payload("").unwrap().is_empty());
        assert!(parse_payload("ABC").is_err());
        assert!(parse_payload("GG").is_err());
    }
}
