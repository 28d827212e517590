use async_trait::async_trait;
use log::{debug, warn};

use super::frame::Frame;
use crate::serial::Transport;
use crate::shutdown::{Cancelled, Shutdown};

/// One write/read/compare cycle against the device
#[async_trait]
pub trait Exchange: Send {
    async fn exchange(&mut self, frame: &Frame) -> Result<bool, Cancelled>;
}

/// Writes the frame and waits for the meter to echo it back unchanged.
/// Anything but an identical echo is a failed attempt, only a shutdown is an error.
pub async fn send_and_verify<T: Transport + ?Sized>(
    transport: &mut T,
    frame: &Frame,
    shutdown: &mut Shutdown,
) -> Result<(bool, Vec<u8>), Cancelled> {
    if shutdown.is_signalled() {
        return Err(Cancelled);
    }

    debug!("Sending {} to {}", frame, transport.name());
    let io = async {
        transport.discard_input().await?;
        transport.write(frame.as_bytes()).await?;
        debug!("Waiting for response on {}", transport.name());
        transport.read_up_to(frame.len()).await
    };

    let received = tokio::select! {
        res = io => res,
        _ = shutdown.signalled() => return Err(Cancelled),
    };

    let received = match received {
        Ok(r) => r,
        Err(e) => {
            warn!("Exchange on {} failed: {}", transport.name(), e);
            return Ok((false, Vec::new()));
        }
    };

    debug!("Received response: {}", hex::encode_upper(&received));
    return Ok((received == frame.as_bytes(), received));
}

/// [`Exchange`] over a transport it owns, remembering the last response for diagnostics
pub struct EchoExchange<T> {
    transport: T,
    shutdown: Shutdown,
    last_response: Vec<u8>,
}

impl<T: Transport> EchoExchange<T> {
    pub fn new(transport: T, shutdown: Shutdown) -> Self {
        return EchoExchange { transport, shutdown, last_response: Vec::new() };
    }

    pub fn transport_name(&self) -> &str {
        return self.transport.name();
    }

    pub fn last_response(&self) -> &[u8] {
        return &self.last_response;
    }
}

#[async_trait]
impl<T: Transport> Exchange for EchoExchange<T> {
    async fn exchange(&mut self, frame: &Frame) -> Result<bool, Cancelled> {
        let (matched, received) = send_and_verify(&mut self.transport, frame, &mut self.shutdown).await?;
        self.last_response = received;
        return Ok(matched);
    }
}
