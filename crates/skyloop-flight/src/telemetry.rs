//! Telemetry transport
//!
//! [`ChannelTelemetry`] puts events on a bounded channel with `try_send`
//! and drops them when it is full. [`TelemetryRecorder`] drains the other
//! end on its own thread and writes one JSON object per line.

use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use skyloop_core::telemetry::{TelemetryEvent, TelemetrySink};

use crate::error::RuntimeError;

/// Log every this many dropped events
const DROP_LOG_INTERVAL: u64 = 1000;

/// Drop-if-full channel sink
#[derive(Debug, Clone)]
pub struct ChannelTelemetry {
    tx: SyncSender<TelemetryEvent>,
    dropped: Arc<AtomicU64>,
}

impl ChannelTelemetry {
    /// Sink holding at most `capacity` undelivered events, and its receiver
    pub fn bounded(capacity: usize) -> (Self, Receiver<TelemetryEvent>) {
        let (tx, rx) = mpsc::sync_channel(capacity);
        let sink = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, rx)
    }

    /// Events dropped so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl TelemetrySink for ChannelTelemetry {
    fn try_emit(&self, event: TelemetryEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped == 1 || dropped % DROP_LOG_INTERVAL == 0 {
                    warn!("telemetry consumer behind, {dropped} events dropped");
                }
                false
            }
        }
    }
}

/// Background JSON-lines writer
#[derive(Debug)]
pub struct TelemetryRecorder {
    handle: JoinHandle<Result<u64, RuntimeError>>,
}

impl TelemetryRecorder {
    /// Drain `rx` into `writer` until every sender is gone
    pub fn spawn<W>(rx: Receiver<TelemetryEvent>, writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        let handle = thread::spawn(move || -> Result<u64, RuntimeError> {
            let mut out = BufWriter::new(writer);
            let mut written = 0u64;
            for event in rx {
                serde_json::to_writer(&mut out, &event)?;
                out.write_all(b"\n")?;
                written += 1;
            }
            out.flush()?;
            debug!("telemetry recorder wrote {written} events");
            Ok(written)
        });
        Self { handle }
    }

    /// Wait for the channel to close; returns the number of events written
    pub fn join(self) -> Result<u64, RuntimeError> {
        self.handle
            .join()
            .map_err(|_| RuntimeError::ThreadPanicked("telemetry recorder"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyloop_core::supervisor::MissionState;
    use std::sync::Mutex;

    fn state_change(t: f64) -> TelemetryEvent {
        TelemetryEvent::StateChange {
            timestamp: t,
            from: MissionState::Idle,
            to: MissionState::Arming,
        }
    }

    #[test]
    fn test_full_channel_drops_without_blocking() {
        let (sink, rx) = ChannelTelemetry::bounded(2);
        assert!(sink.try_emit(state_change(0.0)));
        assert!(sink.try_emit(state_change(1.0)));
        assert!(!sink.try_emit(state_change(2.0)));
        assert_eq!(sink.dropped(), 1);

        assert_eq!(rx.recv().unwrap().timestamp(), 0.0);
        assert!(sink.try_emit(state_change(3.0)));
    }

    #[test]
    fn test_disconnected_receiver_counts_as_drop() {
        let (sink, rx) = ChannelTelemetry::bounded(4);
        drop(rx);
        assert!(!sink.try_emit(state_change(0.0)));
        assert_eq!(sink.dropped(), 1);
    }

    /// Writer whose contents stay readable after the recorder took ownership
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_recorder_writes_json_lines() {
        let (sink, rx) = ChannelTelemetry::bounded(16);
        let buffer = SharedBuffer::default();
        let recorder = TelemetryRecorder::spawn(rx, buffer.clone());

        for k in 0..3 {
            sink.try_emit(state_change(k as f64));
        }
        drop(sink);
        assert_eq!(recorder.join().unwrap(), 3);

        let text = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let parsed: TelemetryEvent = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(parsed, state_change(2.0));
    }
}
