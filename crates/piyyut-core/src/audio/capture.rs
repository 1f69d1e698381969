//! Live capture buffering
//!
//! A device pushes chunks from its own thread into a bounded queue through a
//! [`ChunkSink`]. Pushing never blocks; when the queue is full the chunk is
//! dropped and counted. The queue is drained exactly once, when the capture
//! ends.

use super::{read_audio, Waveform};
use crate::error::RecordingError;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Capture buffering parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Maximum number of queued chunks before new ones are dropped
    pub queue_capacity: usize,
    /// Frames per chunk for devices that let us choose
    pub chunk_frames: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 65536,
            chunk_frames: 1024,
        }
    }
}

/// Producer side of a capture, handed to the device
#[derive(Debug, Clone)]
pub struct ChunkSink {
    tx: Sender<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
    fault: Arc<Mutex<Option<String>>>,
}

impl ChunkSink {
    /// Enqueue a copy of `samples`. Returns false if the chunk was dropped.
    pub fn append_chunk(&self, samples: &[f32]) -> bool {
        if samples.is_empty() {
            return true;
        }
        match self.tx.try_send(samples.to_vec()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::warn!("Capture queue full, dropped chunk ({} so far)", n);
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Record a driver-side failure; the first one wins
    pub fn report_fault(&self, message: impl Into<String>) {
        let message = message.into();
        if let Ok(mut fault) = self.fault.lock() {
            if fault.is_none() {
                log::warn!("Capture device fault: {}", message);
                *fault = Some(message);
            }
        }
    }

    fn fault(&self) -> Option<String> {
        self.fault.lock().ok().and_then(|f| f.clone())
    }
}

/// Source of live audio
pub trait InputDevice: Send {
    fn name(&self) -> String;
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;

    /// Start delivering interleaved chunks to `sink`
    fn open(&mut self, sink: ChunkSink) -> anyhow::Result<()>;

    /// Stop delivering; no chunk may be appended after this returns
    fn close(&mut self);
}

/// An in-progress capture
#[derive(Debug)]
pub struct CaptureHandle {
    id: u64,
    rx: Receiver<Vec<f32>>,
    sink: ChunkSink,
    sample_rate: u32,
    channels: u16,
}

impl CaptureHandle {
    /// Fault reported by the device so far, if any
    pub fn fault(&self) -> Option<String> {
        self.sink.fault()
    }

    pub fn dropped_chunks(&self) -> usize {
        self.sink.dropped.load(Ordering::Relaxed)
    }
}

/// Outcome of a finished capture
#[derive(Debug, Clone)]
pub struct CapturedAudio {
    /// Canonical mono waveform of everything that arrived
    pub waveform: Waveform,
    pub dropped_chunks: usize,
    /// Set when the device failed part-way; `waveform` holds what was recovered
    pub fault: Option<String>,
}

/// Owns the input device and turns captures into waveforms
pub struct SignalIngestion {
    device: Box<dyn InputDevice>,
    config: CaptureConfig,
    target_rate: u32,
    active: Option<u64>,
    next_id: u64,
}

impl SignalIngestion {
    pub fn new(device: Box<dyn InputDevice>, config: CaptureConfig, target_rate: u32) -> Self {
        Self {
            device,
            config,
            target_rate,
            active: None,
            next_id: 1,
        }
    }

    pub fn device_name(&self) -> String {
        self.device.name()
    }

    pub fn is_capturing(&self) -> bool {
        self.active.is_some()
    }

    pub fn begin_capture(&mut self) -> crate::Result<CaptureHandle> {
        if self.active.is_some() {
            return Err(RecordingError::Device(
                "a capture is already active".to_string(),
            ));
        }

        let (tx, rx) = bounded(self.config.queue_capacity.max(1));
        let sink = ChunkSink {
            tx,
            dropped: Arc::new(AtomicUsize::new(0)),
            fault: Arc::new(Mutex::new(None)),
        };

        self.device
            .open(sink.clone())
            .map_err(|e| RecordingError::Device(format!("{:#}", e)))?;

        let id = self.next_id;
        self.next_id += 1;
        self.active = Some(id);

        log::info!(
            "Capture {} started on '{}' ({}Hz x{})",
            id,
            self.device.name(),
            self.device.sample_rate(),
            self.device.channels()
        );

        Ok(CaptureHandle {
            id,
            rx,
            sink,
            sample_rate: self.device.sample_rate(),
            channels: self.device.channels(),
        })
    }

    pub fn end_capture(&mut self, handle: CaptureHandle) -> crate::Result<CapturedAudio> {
        if self.active != Some(handle.id) {
            return Err(RecordingError::Device(
                "capture handle does not belong to the active capture".to_string(),
            ));
        }

        self.device.close();
        self.active = None;

        let mut samples = Vec::new();
        let mut chunks = 0usize;
        for chunk in handle.rx.try_iter() {
            samples.extend_from_slice(&chunk);
            chunks += 1;
        }

        let dropped_chunks = handle.dropped_chunks();
        let fault = handle.fault();
        log::info!(
            "Capture {} stopped: {} chunks, {} samples, {} dropped",
            handle.id,
            chunks,
            samples.len(),
            dropped_chunks
        );

        if samples.is_empty() {
            return Err(match fault {
                Some(message) => RecordingError::Device(message),
                None => RecordingError::EmptyCapture,
            });
        }

        let waveform = Waveform::new(samples, handle.sample_rate, handle.channels)
            .into_canonical(self.target_rate)
            .map_err(RecordingError::io)?;

        Ok(CapturedAudio {
            waveform,
            dropped_chunks,
            fault,
        })
    }
}

/// Plays a pre-recorded buffer as if it were a microphone
///
/// Chunks are pushed from a worker thread as fast as the queue accepts them.
/// A replay is finite, so `close` waits for the feed to finish.
pub struct ReplayInput {
    name: String,
    waveform: Arc<Waveform>,
    chunk_frames: usize,
    disconnect_after: Option<usize>,
    available: bool,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ReplayInput {
    pub fn new(waveform: Waveform, chunk_frames: usize) -> Self {
        Self {
            name: "replay".to_string(),
            waveform: Arc::new(waveform),
            chunk_frames: chunk_frames.max(1),
            disconnect_after: None,
            available: true,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Replay a decoded file at its native rate and layout
    pub fn from_file(path: &Path, chunk_frames: usize) -> anyhow::Result<Self> {
        let waveform = read_audio(path)?;
        let mut input = Self::new(waveform, chunk_frames);
        input.name = format!("replay:{}", path.display());
        Ok(input)
    }

    /// Report a disconnect after `chunks` chunks have been delivered
    pub fn disconnect_after(mut self, chunks: usize) -> Self {
        self.disconnect_after = Some(chunks);
        self
    }

    /// A device that refuses to open
    pub fn disconnected() -> Self {
        let mut input = Self::new(Waveform::mono(Vec::new(), 44100), 1);
        input.available = false;
        input
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("Replay worker for '{}' panicked", self.name);
            }
        }
    }
}

impl InputDevice for ReplayInput {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn sample_rate(&self) -> u32 {
        self.waveform.sample_rate
    }

    fn channels(&self) -> u16 {
        self.waveform.channels
    }

    fn open(&mut self, sink: ChunkSink) -> anyhow::Result<()> {
        if !self.available {
            anyhow::bail!("input device '{}' is not available", self.name);
        }
        self.join_worker();
        self.stop.store(false, Ordering::SeqCst);

        let waveform = Arc::clone(&self.waveform);
        let stop = Arc::clone(&self.stop);
        let chunk_len = self.chunk_frames * waveform.channels as usize;
        let disconnect_after = self.disconnect_after;

        self.worker = Some(std::thread::spawn(move || {
            for (i, chunk) in waveform.samples.chunks(chunk_len).enumerate() {
                if stop.load(Ordering::SeqCst) {
                    return;
                }
                if disconnect_after == Some(i) {
                    sink.report_fault("input device disconnected");
                    return;
                }
                sink.append_chunk(chunk);
            }
        }));

        Ok(())
    }

    fn close(&mut self) {
        self.join_worker();
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for ReplayInput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.join_worker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize) -> Waveform {
        Waveform::mono((0..frames).map(|i| i as f32 / frames as f32).collect(), 44100)
    }

    #[test]
    fn test_capture_preserves_arrival_order() {
        let source = ramp(10_000);
        let device = ReplayInput::new(source.clone(), 256);
        let mut ingestion = SignalIngestion::new(Box::new(device), CaptureConfig::default(), 44100);

        let handle = ingestion.begin_capture().unwrap();
        let captured = ingestion.end_capture(handle).unwrap();

        assert_eq!(captured.dropped_chunks, 0);
        assert!(captured.fault.is_none());
        assert_eq!(captured.waveform, source);
    }

    #[test]
    fn test_full_queue_drops_instead_of_blocking() {
        let device = ReplayInput::new(ramp(10 * 64), 64);
        let config = CaptureConfig {
            queue_capacity: 2,
            chunk_frames: 64,
        };
        let mut ingestion = SignalIngestion::new(Box::new(device), config, 44100);

        let handle = ingestion.begin_capture().unwrap();
        let captured = ingestion.end_capture(handle).unwrap();

        assert_eq!(captured.dropped_chunks, 8);
        assert_eq!(captured.waveform.samples.len(), 2 * 64);
        // The survivors are the first two chunks
        assert_eq!(captured.waveform.samples[0], 0.0);
    }

    #[test]
    fn test_second_begin_is_rejected() {
        let mut ingestion =
            SignalIngestion::new(Box::new(ReplayInput::new(ramp(100), 10)), CaptureConfig::default(), 44100);
        let handle = ingestion.begin_capture().unwrap();
        assert!(matches!(ingestion.begin_capture(), Err(RecordingError::Device(_))));
        ingestion.end_capture(handle).unwrap();
        assert!(!ingestion.is_capturing());
    }

    #[test]
    fn test_empty_capture() {
        let device = ReplayInput::new(Waveform::mono(Vec::new(), 44100), 10);
        let mut ingestion = SignalIngestion::new(Box::new(device), CaptureConfig::default(), 44100);
        let handle = ingestion.begin_capture().unwrap();
        assert_eq!(ingestion.end_capture(handle).unwrap_err(), RecordingError::EmptyCapture);
    }

    #[test]
    fn test_unavailable_device() {
        let mut ingestion =
            SignalIngestion::new(Box::new(ReplayInput::disconnected()), CaptureConfig::default(), 44100);
        assert!(matches!(ingestion.begin_capture(), Err(RecordingError::Device(_))));
        assert!(!ingestion.is_capturing());
    }

    #[test]
    fn test_disconnect_keeps_partial_buffer() {
        let device = ReplayInput::new(ramp(1000), 100).disconnect_after(3);
        let mut ingestion = SignalIngestion::new(Box::new(device), CaptureConfig::default(), 44100);

        let handle = ingestion.begin_capture().unwrap();
        let captured = ingestion.end_capture(handle).unwrap();

        assert_eq!(captured.waveform.samples.len(), 300);
        assert_eq!(captured.fault.as_deref(), Some("input device disconnected"));
    }

    #[test]
    fn test_stereo_capture_is_canonicalized() {
        let stereo = Waveform::new(vec![0.5, -0.5, 1.0, 0.0], 44100, 2);
        let mut ingestion =
            SignalIngestion::new(Box::new(ReplayInput::new(stereo, 1)), CaptureConfig::default(), 44100);
        let handle = ingestion.begin_capture().unwrap();
        let captured = ingestion.end_capture(handle).unwrap();
        assert_eq!(captured.waveform.channels, 1);
        assert_eq!(captured.waveform.samples, vec![0.0, 0.5]);
    }
}
