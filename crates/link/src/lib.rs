//! Single owner of the serial handle.
//!
//! All traffic on the port goes through one task: inbound telemetry lines are
//! polled off the port and stored as the latest reading, outbound commands
//! arrive over an mpsc channel and are written in between polls. Because
//! reads and writes are serialized here, the baud switch around a write can
//! never interleave with a read.

use anyhow::{Context, Result};
use log::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::select;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};

use state::SharedRelay;

/// Baud rate the controller transmits telemetry at.
pub const IDLE_BAUD: u32 = 9600;
/// Baud rate the controller clocks inbound commands at.
pub const COMMAND_BAUD: u32 = 19200;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const FAULT_BACKOFF: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 256;

/// Frame an outbound command: lower-cased, newline-terminated.
pub fn frame_command(command: &str) -> Vec<u8> {
    let mut framed = command.to_lowercase().into_bytes();
    framed.push(b'\n');
    framed
}

/// Pop the next complete line out of `pending`, leaving a trailing partial
/// line in place for the next poll. A CR before the newline is dropped.
pub fn next_line(pending: &mut Vec<u8>) -> Option<Result<String>> {
    let pos = pending.iter().position(|&b| b == b'\n')?;
    let mut raw: Vec<u8> = pending.drain(..=pos).collect();
    raw.pop();
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    Some(String::from_utf8(raw).context("telemetry line is not valid utf-8"))
}

/// Run the serial link for the life of the process.
///
/// If the port cannot be opened the failure is recorded once and the task
/// parks, draining the command channel so posting clients never block on a
/// full channel.
pub async fn run_link(
    port_path: String,
    relay: SharedRelay,
    mut command_rx: mpsc::Receiver<String>,
) -> Result<()> {
    let mut port = match tokio_serial::new(&port_path, IDLE_BAUD).open_native_async() {
        Ok(port) => port,
        Err(e) => {
            error!("failed to open serial port {port_path}: {e}");
            relay
                .push_device_error(format!("failed to open serial port {port_path}: {e}"))
                .await;
            while command_rx.recv().await.is_some() {
                warn!("dropping command, serial port {port_path} never opened");
            }
            return Ok(());
        }
    };
    if let Err(e) = port.set_exclusive(true) {
        warn!("cannot take exclusive access to {port_path}: {e}");
    }

    let mut pending = Vec::new();
    loop {
        select! {
            command = command_rx.recv() => {
                let Some(command) = command else { return Ok(()) };
                debug!("relaying command: {command}");
                if let Err(e) = write_command(&mut port, &command).await {
                    error!("serial write failed: {e:#}");
                    relay.push_device_error(format!("serial write failed: {e:#}")).await;
                }
            }
            _ = sleep(POLL_INTERVAL) => {
                if let Err(e) = poll_telemetry(&mut port, &mut pending, &relay).await {
                    error!("serial read failed: {e:#}");
                    relay.push_device_error(format!("serial read failed: {e:#}")).await;
                    sleep(FAULT_BACKOFF).await;
                }
            }
        }
    }
}

async fn poll_telemetry(
    port: &mut SerialStream,
    pending: &mut Vec<u8>,
    relay: &SharedRelay,
) -> Result<()> {
    while port.bytes_to_read()? > 0 {
        let mut buf = [0u8; READ_CHUNK];
        let n = port.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&buf[..n]);
    }
    while let Some(line) = next_line(pending) {
        match line {
            Ok(line) => {
                debug!("telemetry: {line}");
                relay.set_reading(line).await;
            }
            Err(e) => {
                relay
                    .push_device_error(format!("bad telemetry line: {e:#}"))
                    .await;
            }
        }
    }
    Ok(())
}

async fn write_command(port: &mut SerialStream, command: &str) -> Result<()> {
    port.set_baud_rate(COMMAND_BAUD)?;
    port.write_all(&frame_command(command)).await?;
    port.flush().await?;
    port.set_baud_rate(IDLE_BAUD)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use state::Relay;

    #[test]
    fn commands_are_lowercased_and_newline_terminated() {
        assert_eq!(frame_command("FORWARD"), b"forward\n");
        assert_eq!(frame_command("Speed:120"), b"speed:120\n");
        assert_eq!(frame_command(""), b"\n");
    }

    #[test]
    fn lines_split_on_newline_and_drop_cr() {
        let mut pending = b"ok\r\ntemp=21\npart".to_vec();
        assert_eq!(next_line(&mut pending).unwrap().unwrap(), "ok");
        assert_eq!(next_line(&mut pending).unwrap().unwrap(), "temp=21");
        assert!(next_line(&mut pending).is_none());
        assert_eq!(pending, b"part");

        pending.extend_from_slice(b"ial\n");
        assert_eq!(next_line(&mut pending).unwrap().unwrap(), "partial");
    }

    #[test]
    fn invalid_utf8_line_errors_without_eating_the_rest() {
        let mut pending = vec![0xFF, 0xFE, b'\n', b'o', b'k', b'\n'];
        assert!(next_line(&mut pending).unwrap().is_err());
        assert_eq!(next_line(&mut pending).unwrap().unwrap(), "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn open_failure_is_logged_and_commands_are_drained() {
        let relay = Relay::new();
        let (command_tx, command_rx) = mpsc::channel(8);
        let task = tokio::spawn(run_link(
            "/dev/relay-test-no-such-port".into(),
            relay.clone(),
            command_rx,
        ));

        sleep(Duration::from_millis(50)).await;
        assert!(relay.device_errors().await.contains("failed to open"));

        // Posting still works; the command is dropped, not queued forever.
        command_tx.send("forward".into()).await.unwrap();
        drop(command_tx);
        task.await.unwrap().unwrap();
    }
}
