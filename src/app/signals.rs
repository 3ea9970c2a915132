//! In-process wake-up signals between pipeline stages.
//!
//! Signals are advisory: a notification sent while nobody waits is kept as a
//! single permit, never queued, and the interval trigger of every job still
//! guarantees progress when a signal is lost.

use futures::future::select_all;
use tokio::sync::Notify;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// New rows were queued for simulation
    NewInteractions,
    /// Rows reached `succeeded` and can be executed
    InteractionsSimulated,
}

impl Signal {
    pub const ALL: [Signal; 2] = [Self::NewInteractions, Self::InteractionsSimulated];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewInteractions => "new_interactions",
            Self::InteractionsSimulated => "interactions_simulated",
        }
    }

    fn index(&self) -> usize {
        match self {
            Self::NewInteractions => 0,
            Self::InteractionsSimulated => 1,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One `Notify` per signal
#[derive(Debug, Default)]
pub struct SignalBus {
    channels: [Notify; 2],
}

impl SignalBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, signal: Signal) {
        debug!(signal = %signal, "Signal emitted");
        self.channels[signal.index()].notify_one();
    }

    /// Resolve once any of `signals` fires, pending forever when empty
    pub async fn wait_any(&self, signals: &[Signal]) -> Signal {
        if signals.is_empty() {
            return std::future::pending().await;
        }
        let waits = signals.iter().map(|signal| {
            Box::pin(async move {
                self.channels[signal.index()].notified().await;
                *signal
            })
        });
        let (signal, _, _) = select_all(waits).await;
        signal
    }
}
