use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, UdpSocket};
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

fn read_lines(fpath: &Path) -> Result<Vec<String>> {
    let reader = BufReader::new(std::fs::File::open(fpath).context("opening input")?);
    let mut lines = Vec::default();
    for line in reader.lines() {
        let line = line.context("reading input")?;
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    if lines.is_empty() {
        bail!("{fpath:?} contains no sentences");
    }
    Ok(lines)
}

/// Hand each line, CRLF terminated, to `send`, waiting `interval` before each.
fn paced<F>(lines: &[String], interval: Duration, forever: bool, mut send: F) -> Result<usize>
where
    F: FnMut(&[u8]) -> Result<()>,
{
    let mut sent = 0;
    loop {
        for line in lines {
            sleep(interval);
            debug!("sending {line}");
            send(format!("{line}\r\n").as_bytes())?;
            sent += 1;
        }
        if !forever {
            return Ok(sent);
        }
    }
}

/// Send each line of `fpath` as a datagram to `target`, waiting `interval` before each send.
///
/// Returns the number of datagrams sent.
pub fn replay(fpath: &Path, target: SocketAddr, interval: Duration, forever: bool) -> Result<usize> {
    let lines = read_lines(fpath)?;
    let bind: SocketAddr = if target.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let socket = UdpSocket::bind(bind).context("binding socket")?;
    info!(%target, ?interval, count = lines.len(), "replaying {fpath:?}");

    paced(&lines, interval, forever, |dat| {
        socket
            .send_to(dat, target)
            .with_context(|| format!("sending to {target}"))?;
        Ok(())
    })
}

/// Write each line of `fpath` to `dst`, e.g., the controlling side of a pseudo-terminal.
pub fn replay_to<W: Write>(
    fpath: &Path,
    dst: &mut W,
    interval: Duration,
    forever: bool,
) -> Result<usize> {
    let lines = read_lines(fpath)?;
    paced(&lines, interval, forever, |dat| {
        dst.write_all(dat).context("writing sentence")?;
        dst.flush().context("flushing sentence")
    })
}

/// Create a pseudo-terminal pair and write each line of `fpath` to it. A listener reads the
/// device path that is logged at startup, e.g., `aischomp serial /dev/pts/3`.
#[cfg(unix)]
pub fn replay_pty(fpath: &Path, interval: Duration, forever: bool) -> Result<usize> {
    use serialport::SerialPort;

    let (mut controller, device) =
        serialport::TTYPort::pair().context("creating pseudo-terminal")?;
    let name = device.name().unwrap_or_default();
    info!(device = %name, ?interval, "replaying {fpath:?}");
    // Held open so writes succeed before a listener attaches
    let sent = replay_to(fpath, &mut controller, interval, forever)?;
    drop(device);
    Ok(sent)
}

#[cfg(not(unix))]
pub fn replay_pty(_: &Path, _: Duration, _: bool) -> Result<usize> {
    bail!("pseudo-terminals are only available on unix")
}
