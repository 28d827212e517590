use async_trait::async_trait;
use log::{debug, error, info, warn};

use super::exchange::EchoExchange;
use super::frame::Frame;
use super::retry::{Pause, RetryCoordinator, RetryPolicy, RetryState, ShutdownAwarePause};
use crate::commands::{CommandHandler, CommandOutcome};
use crate::config::{MeterConfig, SerialConfig};
use crate::serial::{self, Transport};
use crate::shutdown::{Cancelled, Shutdown};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStatus {
    /// The meter echoed the frame
    Acknowledged,
    /// Every attempt ended without a matching echo
    NotAcknowledged,
    /// The serial port could not be opened, nothing was sent
    TransportUnavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetOutcome {
    pub status: ResetStatus,
    pub attempts: u32,
    pub port: String,
    pub sent: Frame,
    pub last_response: Vec<u8>,
    pub detail: Option<String>,
}

impl ResetOutcome {
    pub fn is_success(&self) -> bool {
        return self.status == ResetStatus::Acknowledged;
    }
}

/// Resets the energy counter of a meter with the raw `0x42` command.
/// The command bypasses Modbus, so it gets its own serial session every time.
pub struct ResetCommand {
    address: u8,
    serial: SerialConfig,
    policy: RetryPolicy,
}

impl ResetCommand {
    pub fn new(meter: &MeterConfig) -> Self {
        return ResetCommand {
            address: meter.address,
            serial: meter.serial.clone(),
            policy: RetryPolicy::from(&meter.retry),
        };
    }

    pub fn frame(&self) -> Frame {
        return Frame::reset(self.address);
    }

    pub async fn execute(&self, shutdown: Shutdown) -> Result<ResetOutcome, Cancelled> {
        let frame = self.frame();
        info!("send command 'reset' {}", frame);

        let session = match serial::open(&self.serial) {
            Ok(s) => s,
            Err(e) => {
                error!("Cannot send reset command, reason: {}", e);
                return Ok(ResetOutcome {
                    status: ResetStatus::TransportUnavailable,
                    attempts: 0,
                    port: self.serial.port.clone(),
                    sent: frame,
                    last_response: Vec::new(),
                    detail: Some(e.to_string()),
                });
            }
        };

        let mut pause = ShutdownAwarePause::new(shutdown.clone());
        return self.execute_on(session, shutdown, &mut pause).await;
    }

    /// Runs the retry loop on an already opened transport. The transport is
    /// dropped, and with it released, on every way out of this function.
    pub async fn execute_on<T, P>(&self, transport: T, shutdown: Shutdown, pause: &mut P) -> Result<ResetOutcome, Cancelled>
    where
        T: Transport,
        P: Pause + ?Sized,
    {
        let frame = self.frame();
        let mut exchange = EchoExchange::new(transport, shutdown);
        let port = exchange.transport_name().to_string();
        debug!("serial port: {}", port);

        let mut coordinator = RetryCoordinator::new(self.policy);
        let state = match coordinator.run(&frame, &mut exchange, pause).await {
            Ok(s) => s,
            Err(c) => {
                warn!("Command 'reset' on {} interrupted by shutdown", port);
                return Err(c);
            }
        };

        let (status, attempts) = match state {
            RetryState::Succeeded { attempts } => {
                info!("Command 'reset' successful");
                (ResetStatus::Acknowledged, attempts)
            }
            RetryState::Exhausted { attempts } => {
                error!("Command 'reset' failed for serial port: {} after {} attempts, last response {}",
                       port, attempts, hex::encode_upper(exchange.last_response()));
                (ResetStatus::NotAcknowledged, attempts)
            }
            other => {
                /* run() only hands back terminal states */
                error!("Command 'reset' on {} ended in state {:?}", port, other);
                (ResetStatus::NotAcknowledged, 0)
            }
        };

        return Ok(ResetOutcome {
            status,
            attempts,
            port,
            sent: frame,
            last_response: exchange.last_response().to_vec(),
            detail: None,
        });
    }
}

#[async_trait]
impl CommandHandler for ResetCommand {
    async fn handle(&self, command: &str, shutdown: Shutdown) -> Result<CommandOutcome, Cancelled> {
        let outcome = self.execute(shutdown).await?;

        let message = match outcome.status {
            ResetStatus::Acknowledged => format!("reset acknowledged after {} attempt(s)", outcome.attempts),
            ResetStatus::NotAcknowledged => format!("no echo from the meter after {} attempt(s)", outcome.attempts),
            ResetStatus::TransportUnavailable => outcome.detail.clone().unwrap_or_else(|| "serial port unavailable".to_string()),
        };

        let received = match outcome.status {
            ResetStatus::TransportUnavailable => None,
            _ => Some(hex::encode_upper(&outcome.last_response)),
        };

        return Ok(CommandOutcome {
            command: command.to_string(),
            success: outcome.is_success(),
            message,
            sent: Some(outcome.sent.to_hex()),
            received,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peacefair::exchange::tests::ScriptedTransport;
    use crate::peacefair::retry::tests::RecordingPause;
    use crate::serial::StreamTransport;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn command() -> ResetCommand {
        return ResetCommand::new(&MeterConfig::with_port("test", "/dev/does-not-exist-pf2m"));
    }

    #[tokio::test]
    async fn test_echo_succeeds_first_time() {
        let cmd = command();
        assert_eq!(cmd.frame().as_bytes(), &[0x01, 0x42, 0x80, 0x11]);

        let transport = ScriptedTransport::new(vec![vec![0x01, 0x42, 0x80, 0x11]]);
        let released = transport.released.clone();
        let mut pause = RecordingPause::default();

        let outcome = cmd.execute_on(transport, Shutdown::never(), &mut pause).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.port, "scripted");
        assert_eq!(outcome.last_response, vec![0x01, 0x42, 0x80, 0x11]);
        assert!(pause.pauses.is_empty());
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_stray_byte_does_not_shift_the_echo() {
        let (local, mut meter) = duplex(64);
        meter.write_all(&[0xAA]).await.unwrap();
        tokio::spawn(async move {
            let mut request = [0u8; 4];
            while meter.read_exact(&mut request).await.is_ok() {
                if meter.write_all(&request).await.is_err() {
                    break;
                }
            }
        });

        let transport = StreamTransport::new("duplex", local, Duration::from_millis(200));
        let mut pause = RecordingPause::default();
        let outcome = command().execute_on(transport, Shutdown::never(), &mut pause).await.unwrap();

        assert_eq!(outcome.status, ResetStatus::Acknowledged);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.last_response, vec![0x01, 0x42, 0x80, 0x11]);
        assert!(pause.pauses.is_empty());
    }

    #[tokio::test]
    async fn test_late_tail_of_previous_attempt_is_dropped() {
        let (local, mut meter) = duplex(64);
        tokio::spawn(async move {
            let mut request = [0u8; 4];
            /* first answer arrives in two parts, the tail only after the read window */
            if meter.read_exact(&mut request).await.is_err() {
                return;
            }
            let _ = meter.write_all(&request[..2]).await;
            tokio::time::sleep(Duration::from_millis(150)).await;
            let _ = meter.write_all(&request[2..]).await;

            while meter.read_exact(&mut request).await.is_ok() {
                if meter.write_all(&request).await.is_err() {
                    break;
                }
            }
        });

        let transport = StreamTransport::new("duplex", local, Duration::from_millis(50));
        let mut pause = ShutdownAwarePause::new(Shutdown::never());
        let cmd = ResetCommand { policy: RetryPolicy { max_attempts: 3, delay: Duration::from_millis(300) }, ..command() };
        let outcome = cmd.execute_on(transport, Shutdown::never(), &mut pause).await.unwrap();

        assert_eq!(outcome.status, ResetStatus::Acknowledged);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(outcome.last_response, vec![0x01, 0x42, 0x80, 0x11]);
    }

    #[tokio::test]
    async fn test_no_echo_exhausts_and_releases() {
        let transport = ScriptedTransport::new(vec![vec![], vec![0x01, 0x42], vec![0x00; 4]]);
        let released = transport.released.clone();
        let mut pause = RecordingPause::default();

        let outcome = command().execute_on(transport, Shutdown::never(), &mut pause).await.unwrap();
        assert_eq!(outcome.status, ResetStatus::NotAcknowledged);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.last_response, vec![0x00; 4]);
        assert_eq!(pause.pauses, vec![Duration::from_millis(500); 2]);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_before_second_attempt_releases_transport() {
        let transport = ScriptedTransport::new(vec![vec![], vec![0x01, 0x42, 0x80, 0x11]]);
        let released = transport.released.clone();
        let mut pause = RecordingPause { cancel_at: Some(0), ..Default::default() };

        let res = command().execute_on(transport, Shutdown::never(), &mut pause).await;
        assert_eq!(res, Err(Cancelled));
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unavailable_port_is_not_fatal() {
        let outcome = command().execute(Shutdown::never()).await.unwrap();
        assert_eq!(outcome.status, ResetStatus::TransportUnavailable);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.port, "/dev/does-not-exist-pf2m");
        assert!(outcome.detail.is_some());
    }

    #[tokio::test]
    async fn test_handler_reports_failure_as_outcome() {
        let outcome = command().handle("66", Shutdown::never()).await.unwrap();
        assert_eq!(outcome.command, "66");
        assert!(!outcome.success);
        assert_eq!(outcome.sent.as_deref(), Some("01428011"));
        assert_eq!(outcome.received, None);
    }
}
