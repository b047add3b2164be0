//! Non-fatal pump notifications

use log::warn;
use std::time::Duration;
use tokio::sync::mpsc;

use super::errors::SendError;

/// Lifecycle and delivery events published by a pump
#[derive(Debug, Clone, PartialEq)]
pub enum PumpEvent {
    /// A run started
    Started { cadence: Duration, has_sink: bool },

    /// The running pump was restarted with another sink
    SinkSwapped { cadence: Duration, has_sink: bool },

    /// The pump stopped
    Stopped,

    /// A sink rejected a frame, the pump keeps running
    SendFailed { sequence: u64, error: SendError },
}

/// Optional event channel, publishing never blocks
#[derive(Clone, Default)]
pub(crate) struct EventPublisher {
    tx: Option<mpsc::Sender<PumpEvent>>,
}

impl EventPublisher {
    pub(crate) fn new(tx: Option<mpsc::Sender<PumpEvent>>) -> Self {
        Self { tx }
    }

    pub(crate) fn publish(&self, event: PumpEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Pump event channel full, dropping {:?}", event);
            }
            // nobody is listening anymore
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}
