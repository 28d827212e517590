use thiserror::Error;
use tokio::sync::watch;

/// Returned whenever a wait was interrupted by the shutdown signal
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled by shutdown")]
pub struct Cancelled;

/// Fires the shutdown signal for every [`Shutdown`] handed out by it
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    return (ShutdownTrigger { tx }, Shutdown { rx });
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        return Shutdown { rx: self.tx.subscribe() };
    }
}

impl Shutdown {
    /// A signal that is never fired
    pub fn never() -> Self {
        let (_, shutdown) = channel();
        return shutdown;
    }

    pub fn is_signalled(&self) -> bool {
        return *self.rx.borrow();
    }

    /// Resolves once shutdown was requested. A dropped trigger means nobody can
    /// request it anymore, so we stay pending forever in that case.
    pub async fn signalled(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
