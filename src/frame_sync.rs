use crate::raster::Raster;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded};
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Rendering,
    AwaitingConsumer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncError {
    /// The other side of the handshake is gone.
    Disconnected,
    /// A consumer asked the producer to stop waiting and render again.
    Interrupted,
    /// A thread panicked while holding the raster.
    Poisoned,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "frame peer disconnected"),
            Self::Interrupted => write!(f, "frame wait interrupted"),
            Self::Poisoned => write!(f, "frame raster lock poisoned"),
        }
    }
}

impl std::error::Error for SyncError {}

/// Sink that sees every published frame while the raster is still locked.
pub trait FrameTap {
    fn capture(&mut self, raster: &Raster, frame: u64) -> io::Result<()>;
}

#[derive(Debug)]
pub struct PublishedFrame {
    pub frame: u64,
    /// A failing tap does not stop the frame from being published.
    pub tap_error: Option<io::Error>,
}

#[derive(Debug, Clone, Copy)]
enum Release {
    Consumed(u64),
    Interrupt,
}

/// Producer half of the single-slot frame handoff.
///
/// Each frame is drawn under the raster lock, announced on the "frame ready"
/// channel, and then the producer blocks in [`FrameSync::wait_consumed`] until
/// some consumer sends "frame consumed" for that exact frame. Frame N is never
/// overwritten before a consumer has released it.
pub struct FrameSync {
    raster: Arc<Mutex<Raster>>,
    ready_tx: Sender<u64>,
    ready_drain: Receiver<u64>,
    consumed_rx: Receiver<Release>,
    state: SyncState,
    frame: u64,
}

/// Consumer half; cheap to clone for several sinks.
#[derive(Clone)]
pub struct FrameConsumer {
    raster: Arc<Mutex<Raster>>,
    ready_rx: Receiver<u64>,
    consumed_tx: Sender<Release>,
}

/// Proof that a ready notice was received. Releasing it lets the producer go on.
#[derive(Debug)]
#[must_use = "the producer stays blocked until the token is released"]
pub struct FrameToken {
    frame: u64,
}

impl FrameToken {
    pub fn frame(&self) -> u64 {
        self.frame
    }
}

/// Builds a connected producer/consumer pair around a `width`x`height` raster.
pub fn frame_channel(width: usize, height: usize) -> (FrameSync, FrameConsumer) {
    let raster = Arc::new(Mutex::new(Raster::new(width, height)));
    let (ready_tx, ready_rx) = bounded(1);
    let (consumed_tx, consumed_rx) = bounded(1);
    let producer = FrameSync {
        raster: Arc::clone(&raster),
        ready_tx,
        ready_drain: ready_rx.clone(),
        consumed_rx,
        state: SyncState::Rendering,
        frame: 0,
    };
    let consumer = FrameConsumer {
        raster,
        ready_rx,
        consumed_tx,
    };
    (producer, consumer)
}

impl FrameSync {
    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Number of the last published frame; 0 before the first one.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Draws the next frame, lets `tap` see it, and announces it as ready.
    ///
    /// Must be called in [`SyncState::Rendering`]; a second call without an
    /// intervening [`FrameSync::wait_consumed`] is refused with `Interrupted`
    /// so the caller waits first.
    pub fn render_frame(
        &mut self,
        tap: Option<&mut dyn FrameTap>,
        draw: impl FnOnce(&mut Raster),
    ) -> Result<PublishedFrame, SyncError> {
        if self.state == SyncState::AwaitingConsumer {
            return Err(SyncError::Interrupted);
        }
        let frame = self.frame + 1;
        let tap_error = {
            let mut raster = self.raster.lock().map_err(|_| SyncError::Poisoned)?;
            draw(&mut raster);
            tap.and_then(|t| t.capture(&raster, frame).err())
        };
        self.frame = frame;

        // A notice left over from an interrupted frame would name a stale frame.
        while self.ready_drain.try_recv().is_ok() {}
        match self.ready_tx.try_send(frame) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => return Err(SyncError::Disconnected),
        }
        self.state = SyncState::AwaitingConsumer;
        Ok(PublishedFrame { frame, tap_error })
    }

    /// Blocks until the current frame is released.
    ///
    /// There is no timeout: a consumer that never releases stalls the producer.
    /// On `Interrupted` the state is back to `Rendering` and the caller simply
    /// renders again.
    pub fn wait_consumed(&mut self) -> Result<u64, SyncError> {
        if self.state == SyncState::Rendering {
            return Ok(self.frame);
        }
        loop {
            match self.consumed_rx.recv() {
                Ok(Release::Consumed(n)) if n == self.frame => {
                    self.state = SyncState::Rendering;
                    return Ok(n);
                }
                Ok(Release::Consumed(n)) => {
                    log::trace!(target: "frame_sync", "ignoring release of stale frame {n}");
                }
                Ok(Release::Interrupt) => {
                    self.state = SyncState::Rendering;
                    return Err(SyncError::Interrupted);
                }
                Err(_) => return Err(SyncError::Disconnected),
            }
        }
    }
}

impl FrameConsumer {
    /// Waits up to `timeout` for a ready frame. `Ok(None)` on timeout.
    pub fn wait_ready(&self, timeout: Duration) -> Result<Option<FrameToken>, SyncError> {
        match self.ready_rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(FrameToken { frame })),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SyncError::Disconnected),
        }
    }

    /// Non-blocking variant of [`FrameConsumer::wait_ready`].
    pub fn try_ready(&self) -> Result<Option<FrameToken>, SyncError> {
        match self.ready_rx.try_recv() {
            Ok(frame) => Ok(Some(FrameToken { frame })),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(SyncError::Disconnected),
        }
    }

    /// Reads the raster inside the critical section shared with the producer.
    pub fn capture<R>(&self, _token: &FrameToken, f: impl FnOnce(&Raster) -> R) -> Result<R, SyncError> {
        let raster = self.raster.lock().map_err(|_| SyncError::Poisoned)?;
        Ok(f(&raster))
    }

    pub fn release(&self, token: FrameToken) -> Result<(), SyncError> {
        self.consumed_tx
            .send(Release::Consumed(token.frame))
            .map_err(|_| SyncError::Disconnected)
    }

    /// Wakes a producer blocked in `wait_consumed` without consuming a frame.
    pub fn interrupt(&self) {
        match self.consumed_tx.try_send(Release::Interrupt) {
            Ok(()) | Err(TrySendError::Full(_)) => {}
            Err(TrySendError::Disconnected(_)) => {
                log::debug!(target: "frame_sync", "interrupt after producer exit");
            }
        }
    }
}
