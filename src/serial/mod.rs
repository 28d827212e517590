use std::io;
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, error};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tokio_serial::{ClearBuffer, SerialPort, SerialStream};

use crate::config::{SerialConfig, SerialParity, SerialStopBits};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("unable to open serial port {port}: {source}")]
    Open { port: String, source: tokio_serial::Error },
    #[error("serial I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Raw byte channel to a device. Implementations own their handle and release it on drop.
#[async_trait]
pub trait Transport: Send {
    /// Identity of the channel for log messages, the port path for serial lines
    fn name(&self) -> &str;

    /// Drops whatever is waiting in the input buffer, so a read only sees bytes sent after this call
    async fn discard_input(&mut self) -> Result<(), TransportError>;

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Reads until `len` bytes arrived, the read timeout elapsed or the stream ended.
    /// Returning fewer bytes than asked for is not an error.
    async fn read_up_to(&mut self, len: usize) -> Result<Vec<u8>, TransportError>;
}

/// Streams with an input buffer of their own that can be flushed without reading it
pub trait ClearInput {
    fn clear_input(&mut self) -> io::Result<()> {
        return Ok(());
    }
}

impl ClearInput for SerialStream {
    fn clear_input(&mut self) -> io::Result<()> {
        return self.clear(ClearBuffer::Input).map_err(io::Error::from);
    }
}

/// Transport over any async byte stream with a bounded read window
pub struct StreamTransport<S> {
    name: String,
    stream: Option<S>,
    read_timeout: Duration,
}

/// A serial line opened exclusively for one operation
pub type SerialSession = StreamTransport<SerialStream>;

impl<S> StreamTransport<S> {
    pub fn new(name: &str, stream: S, read_timeout: Duration) -> Self {
        return StreamTransport {
            name: name.to_string(),
            stream: Some(stream),
            read_timeout,
        };
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            debug!("Closing {}", self.name);
        }
    }

    fn stream(&mut self) -> Result<&mut S, TransportError> {
        return self.stream.as_mut().ok_or_else(|| {
            TransportError::Io(io::Error::new(io::ErrorKind::NotConnected, "transport already closed"))
        });
    }
}

impl<S> Drop for StreamTransport<S> {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + ClearInput + Unpin + Send,
{
    fn name(&self) -> &str {
        return &self.name;
    }

    async fn discard_input(&mut self) -> Result<(), TransportError> {
        let name = self.name.clone();
        let stream = self.stream()?;
        stream.clear_input()?;

        /* whatever is already readable goes too, without waiting for more */
        let mut buf = [0u8; 64];
        let mut dropped = 0;
        loop {
            match tokio::time::timeout(Duration::ZERO, stream.read(&mut buf)).await {
                Ok(Ok(n)) if n > 0 => dropped += n,
                Ok(Err(e)) if e.kind() != io::ErrorKind::TimedOut => return Err(e.into()),
                _ => break,
            }
        }

        if dropped > 0 {
            debug!("Discarded {} stale byte(s) on {}", dropped, name);
        }
        return Ok(());
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream()?;
        stream.write_all(bytes).await?;
        stream.flush().await?;
        return Ok(());
    }

    async fn read_up_to(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + self.read_timeout;
        let stream = self.stream()?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;

        while filled < len {
            match tokio::time::timeout_at(deadline, stream.read(&mut buf[filled..])).await {
                Err(_) => break,
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => filled += n,
                Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => break,
                Ok(Err(e)) => return Err(e.into()),
            }
        }

        buf.truncate(filled);
        return Ok(buf);
    }
}

fn data_bits(bits: u8) -> tokio_serial::DataBits {
    return match bits {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        _ => tokio_serial::DataBits::Eight,
    };
}

impl From<SerialParity> for tokio_serial::Parity {
    fn from(parity: SerialParity) -> Self {
        return match parity {
            SerialParity::None => tokio_serial::Parity::None,
            SerialParity::Odd => tokio_serial::Parity::Odd,
            SerialParity::Even => tokio_serial::Parity::Even,
        };
    }
}

impl From<SerialStopBits> for tokio_serial::StopBits {
    fn from(stop_bits: SerialStopBits) -> Self {
        return match stop_bits {
            SerialStopBits::One => tokio_serial::StopBits::One,
            SerialStopBits::Two => tokio_serial::StopBits::Two,
        };
    }
}

/// Opens a fresh serial session, the port is closed again when the session is dropped
pub fn open(config: &SerialConfig) -> Result<SerialSession, TransportError> {
    let builder = tokio_serial::new(&config.port, config.baudrate)
        .data_bits(data_bits(config.data_bits))
        .parity(config.parity.into())
        .stop_bits(config.stop_bits.into())
        .timeout(config.read_timeout());

    let stream = SerialStream::open(&builder).map_err(|e| {
        error!("Opening serial port {} failed: {}", config.port, e);
        TransportError::Open { port: config.port.clone(), source: e }
    })?;

    debug!("Opened {} with {} baud", config.port, config.baudrate);
    return Ok(StreamTransport::new(&config.port, stream, config.read_timeout()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    impl ClearInput for DuplexStream {}
    impl ClearInput for tokio_test::io::Mock {}

    #[tokio::test]
    async fn test_echo_over_mock_stream() {
        let mock = tokio_test::io::Builder::new()
            .write(&[0x01, 0x42, 0x80, 0x11])
            .read(&[0x01, 0x42, 0x80, 0x11])
            .build();
        let mut transport = StreamTransport::new("mock", mock, Duration::from_millis(100));

        transport.write(&[0x01, 0x42, 0x80, 0x11]).await.unwrap();
        let received = transport.read_up_to(4).await.unwrap();
        assert_eq!(received, vec![0x01, 0x42, 0x80, 0x11]);
    }

    #[tokio::test]
    async fn test_collects_split_response() {
        let mock = tokio_test::io::Builder::new()
            .read(&[0x01, 0x42])
            .read(&[0x80, 0x11])
            .build();
        let mut transport = StreamTransport::new("mock", mock, Duration::from_millis(100));

        assert_eq!(transport.read_up_to(4).await.unwrap(), vec![0x01, 0x42, 0x80, 0x11]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_read_on_timeout() {
        let (local, mut remote) = duplex(64);
        let mut transport = StreamTransport::new("duplex", local, Duration::from_millis(500));

        remote.write_all(&[0x01, 0x42]).await.unwrap();
        let received = transport.read_up_to(4).await.unwrap();
        assert_eq!(received, vec![0x01, 0x42]);
        drop(remote);
    }

    #[tokio::test]
    async fn test_short_read_on_end_of_stream() {
        let (local, remote) = duplex(64);
        drop(remote);
        let mut transport = StreamTransport::new("duplex", local, Duration::from_secs(1));

        assert!(transport.read_up_to(4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discard_drops_pending_bytes_only() {
        let (local, mut remote) = duplex(64);
        let mut transport = StreamTransport::new("duplex", local, Duration::from_millis(100));

        remote.write_all(&[0xAA, 0x01, 0x42]).await.unwrap();
        transport.discard_input().await.unwrap();
        remote.write_all(&[0x01, 0x42, 0x80, 0x11]).await.unwrap();

        assert_eq!(transport.read_up_to(4).await.unwrap(), vec![0x01, 0x42, 0x80, 0x11]);
    }

    #[tokio::test]
    async fn test_discard_on_quiet_line_returns() {
        let (local, _remote) = duplex(64);
        let mut transport = StreamTransport::new("duplex", local, Duration::from_secs(1));

        let res = tokio::time::timeout(Duration::from_secs(1), transport.discard_input()).await;
        assert!(matches!(res, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_closed_transport_refuses_io() {
        let (local, _remote) = duplex(64);
        let mut transport = StreamTransport::new("duplex", local, Duration::from_secs(1));
        transport.release();

        assert!(matches!(transport.write(&[0x00]).await, Err(TransportError::Io(_))));
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let config = SerialConfig::with_port("/dev/does-not-exist-pf2m");
        match open(&config) {
            Err(TransportError::Open { port, .. }) => assert_eq!(port, "/dev/does-not-exist-pf2m"),
            Err(e) => panic!("unexpected error {e:?}"),
            Ok(_) => panic!("opened a port that does not exist"),
        }
    }
}
