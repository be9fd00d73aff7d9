//! Message types for talking to the event loop task
//!
//! Control commands are request/response pairs: the caller sends a command
//! over the loop's mpsc channel and awaits the answer on a oneshot channel.
//! The loop handles them between iterations, so they never interleave with
//! registry mutations.

use tokio::sync::oneshot;

use crate::transport::Cursor;

/// Commands that can be sent to the event loop
#[derive(Debug)]
pub enum LoopCommand {
    /// Run a metric check now, regardless of the schedule
    ///
    /// The next scheduled check moves to one interval after this one.
    CheckNow {
        respond_to: oneshot::Sender<anyhow::Result<f64>>,
    },

    /// Snapshot of counters and state
    GetStats {
        respond_to: oneshot::Sender<LoopStats>,
    },
}

/// Event loop statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopStats {
    /// Registered subscribers
    pub subscribers: usize,

    /// Last successfully fetched metric value
    pub last_value: Option<f64>,

    /// Inbound cursor
    pub cursor: Cursor,

    pub checks_attempted: u64,
    pub checks_failed: u64,

    /// Crossing notifications delivered
    pub alerts_sent: u64,

    /// Outbound sends (alerts and replies) that failed
    pub send_failures: u64,
}
