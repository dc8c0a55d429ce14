//! In-process connections
//!
//! A [`Connection`] is one end of a pair of bounded crossbeam channels carrying
//! encoded frames. Each direction is an explicit queue, so issuing a mutation
//! locally and applying it remotely are decoupled.

use crate::error::SyncError;
use crate::message::{decode, encode, Frame};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use parking_lot::RwLock;
use std::sync::Arc;

/// Traffic counters of one connection end
#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    /// Frames sent
    pub frames_sent: u64,
    /// Frames received
    pub frames_received: u64,
    /// Encoded bytes sent
    pub bytes_sent: u64,
    /// Encoded bytes received
    pub bytes_received: u64,
    /// Frames refused because the outbound queue was full
    pub backlog_refusals: u64,
    /// Most frames ever waiting in the outbound queue
    pub peak_backlog: usize,
}

/// One end of a connection
#[derive(Debug)]
pub struct Connection {
    outbound: Sender<Vec<u8>>,
    inbound: Receiver<Vec<u8>>,
    stats: Arc<RwLock<LinkStats>>,
}

/// Create both ends of a connection, each direction holding `capacity` frames
pub fn connect_pair(capacity: usize) -> (Connection, Connection) {
    let capacity = capacity.max(1);
    let (a_tx, b_rx) = bounded(capacity);
    let (b_tx, a_rx) = bounded(capacity);
    (
        Connection {
            outbound: a_tx,
            inbound: a_rx,
            stats: Arc::new(RwLock::new(LinkStats::default())),
        },
        Connection {
            outbound: b_tx,
            inbound: b_rx,
            stats: Arc::new(RwLock::new(LinkStats::default())),
        },
    )
}

impl Connection {
    /// Queue a frame without blocking
    pub fn send(&self, frame: &Frame) -> Result<(), SyncError> {
        let bytes = encode(frame)?;
        let len = bytes.len() as u64;
        match self.outbound.try_send(bytes) {
            Ok(()) => {
                let mut stats = self.stats.write();
                stats.frames_sent += 1;
                stats.bytes_sent += len;
                let backlog = self.outbound.len();
                if backlog > stats.peak_backlog {
                    stats.peak_backlog = backlog;
                }
                log::trace!("Sent {} frame ({} bytes)", frame.kind(), len);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.stats.write().backlog_refusals += 1;
                Err(SyncError::Backlog)
            }
            Err(TrySendError::Disconnected(_)) => Err(SyncError::Disconnected),
        }
    }

    /// Next frame, if one is waiting
    pub fn try_recv(&self) -> Result<Option<Frame>, SyncError> {
        match self.inbound.try_recv() {
            Ok(bytes) => {
                {
                    let mut stats = self.stats.write();
                    stats.frames_received += 1;
                    stats.bytes_received += bytes.len() as u64;
                }
                decode(&bytes).map(Some)
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SyncError::Disconnected),
        }
    }

    /// Every frame currently waiting.
    ///
    /// Frames that fail to decode are logged and skipped. A closed connection
    /// is only reported once nothing is left to read.
    pub fn drain(&self) -> Result<Vec<Frame>, SyncError> {
        let mut frames = Vec::new();
        loop {
            match self.try_recv() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return Ok(frames),
                Err(SyncError::Disconnected) if !frames.is_empty() => return Ok(frames),
                Err(SyncError::Disconnected) => return Err(SyncError::Disconnected),
                Err(e) => log::warn!("Dropping undecodable frame: {}", e),
            }
        }
    }

    /// Frames waiting to be read
    pub fn pending(&self) -> usize {
        self.inbound.len()
    }

    /// Traffic counters
    pub fn stats(&self) -> LinkStats {
        self.stats.read().clone()
    }
}
