//! Microphone input through the host's default capture device

use super::{ChunkSink, InputDevice};
use anyhow::{Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, SampleFormat, SizedSample};
use crossbeam_channel::{bounded, Sender};
use std::thread::JoinHandle;

/// Default host input device
///
/// The cpal stream is not `Send`, so it lives on a dedicated thread that is
/// parked until `close`.
pub struct CpalInput {
    name: String,
    sample_rate: u32,
    channels: u16,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CpalInput {
    pub fn default_device() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .context("No input device available")?;
        let config = device
            .default_input_config()
            .context("Input device has no usable configuration")?;

        Ok(Self {
            name: device.name().unwrap_or_else(|_| "default".to_string()),
            sample_rate: config.sample_rate().0,
            channels: config.channels(),
            stop_tx: None,
            worker: None,
        })
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sink: ChunkSink,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let fault_sink = sink.clone();
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let chunk: Vec<f32> = data.iter().map(|&s| f32::from_sample_(s)).collect();
            sink.append_chunk(&chunk);
        },
        move |err| fault_sink.report_fault(err.to_string()),
        None,
    )?;
    Ok(stream)
}

fn run_stream(sink: ChunkSink) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .context("No input device available")?;
    let supported = device.default_input_config()?;
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    let stream = match format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, sink)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, sink)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, sink)?,
        other => anyhow::bail!("Unsupported input sample format: {:?}", other),
    };
    stream.play().context("Failed to start input stream")?;
    Ok(stream)
}

impl InputDevice for CpalInput {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn open(&mut self, sink: ChunkSink) -> Result<()> {
        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let worker = std::thread::spawn(move || match run_stream(sink) {
            Ok(stream) => {
                let _ = ready_tx.send(Ok(()));
                let _ = stop_rx.recv();
                drop(stream);
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        });

        let ready = ready_rx
            .recv()
            .context("Input stream thread exited before starting")?;
        if let Err(e) = ready {
            let _ = worker.join();
            return Err(e);
        }

        self.stop_tx = Some(stop_tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("Input stream thread for '{}' panicked", self.name);
            }
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.close();
    }
}
