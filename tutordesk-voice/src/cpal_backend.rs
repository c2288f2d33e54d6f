//! Microphone capture using cpal

use anyhow::{Result, anyhow, bail};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

use crate::traits::AudioRecorder;
use crate::types::AudioClip;
use crate::utils::{downmix_to_mono, resample_to_16khz};

/// Mono samples at the device rate
#[derive(Default)]
struct Captured {
    all: Vec<f32>,
    recent: Vec<f32>,
}

fn build_and_run_stream<T, F>(
    device: &Device,
    config: &StreamConfig,
    captured: Arc<Mutex<Captured>>,
    convert_fn: F,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    F: Fn(T) -> f32 + Send + 'static,
{
    let channels = config.channels;
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let interleaved: Vec<f32> = data.iter().map(|&sample| convert_fn(sample)).collect();
            let mono = downmix_to_mono(&interleaved, channels);
            match captured.lock() {
                Ok(mut guard) => {
                    guard.recent.extend_from_slice(&mono);
                    guard.all.extend(mono);
                }
                Err(_) => warn!("Audio stream: capture buffer poisoned, dropping samples"),
            }
        },
        |err| error!("Audio stream error: {}", err),
        None,
    )?;

    stream.play()?;
    info!("Audio stream started and playing");
    Ok(stream)
}

/// Signals the capture thread to stop when dropped
struct CaptureThread {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl CaptureThread {
    fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Audio capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// Records from the default input device
pub struct CpalRecorder {
    captured: Arc<Mutex<Captured>>,
    sample_rate: u32,
    thread: Option<CaptureThread>,
}

impl CpalRecorder {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available"))?;
        let sample_rate = device.default_input_config()?.sample_rate().0;

        Ok(Self {
            captured: Arc::new(Mutex::new(Captured::default())),
            sample_rate,
            thread: None,
        })
    }

    fn take_captured(&self) -> Vec<f32> {
        match self.captured.lock() {
            Ok(mut guard) => {
                guard.recent.clear();
                std::mem::take(&mut guard.all)
            }
            Err(_) => Vec::new(),
        }
    }
}

impl AudioRecorder for CpalRecorder {
    /// cpal::Stream is !Send, so a dedicated thread owns it until stopped.
    fn start(&mut self) -> Result<()> {
        if self.thread.is_some() {
            bail!("Recorder is already running");
        }
        self.take_captured();

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, String>>();
        let captured = self.captured.clone();

        let thread = std::thread::spawn(move || {
            info!("Audio capture thread started");
            let host = cpal::default_host();
            let Some(device) = host.default_input_device() else {
                let _ = ready_tx.send(Err("No audio input device".to_string()));
                return;
            };

            let supported = match device.default_input_config() {
                Ok(c) => c,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("Failed to get audio config: {}", e)));
                    return;
                }
            };
            let sample_format = supported.sample_format();
            let config: StreamConfig = supported.config();

            macro_rules! handle_format {
                ($sample_type:ty, $converter:expr) => {
                    build_and_run_stream::<$sample_type, _>(&device, &config, captured.clone(), $converter)
                };
            }

            let stream_result = match sample_format {
                SampleFormat::I8 => handle_format!(i8, |sample| f32::from(sample) / i8::MAX as f32),
                SampleFormat::I16 => handle_format!(i16, |sample| f32::from(sample) / i16::MAX as f32),
                SampleFormat::I32 => handle_format!(i32, |sample| (sample as f32) / i32::MAX as f32),
                SampleFormat::U8 => handle_format!(u8, |sample| {
                    (f32::from(sample) - (1u8 << 7) as f32) / ((1u8 << 7) - 1) as f32
                }),
                SampleFormat::U16 => handle_format!(u16, |sample| {
                    (f32::from(sample) - (1u16 << 15) as f32) / ((1u16 << 15) - 1) as f32
                }),
                SampleFormat::F32 => handle_format!(f32, |sample| sample),
                SampleFormat::F64 => handle_format!(f64, |sample| sample as f32),
                _ => Err(anyhow!("Unsupported sample format: {:?}", sample_format)),
            };

            let _stream = match stream_result {
                Ok(s) => {
                    let _ = ready_tx.send(Ok(config.sample_rate.0));
                    s
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };

            match stop_rx.recv() {
                Ok(_) => info!("Audio capture thread received stop signal"),
                Err(e) => warn!("Audio capture thread stop channel closed: {}", e),
            }
        });

        match ready_rx.recv() {
            Ok(Ok(rate)) => self.sample_rate = rate,
            Ok(Err(e)) => bail!("{}", e),
            Err(_) => bail!("Audio thread failed to start"),
        }

        self.thread = Some(CaptureThread {
            stop_tx,
            thread: Some(thread),
        });
        Ok(())
    }

    fn recent_samples(&mut self) -> Vec<f32> {
        match self.captured.lock() {
            Ok(mut guard) => std::mem::take(&mut guard.recent),
            Err(_) => Vec::new(),
        }
    }

    fn stop(&mut self) -> Result<AudioClip> {
        let thread = self.thread.take().ok_or_else(|| anyhow!("Recorder is not running"))?;
        thread.stop();
        let samples = self.take_captured();
        Ok(AudioClip::new(resample_to_16khz(&samples, self.sample_rate)))
    }

    fn cancel(&mut self) {
        if let Some(thread) = self.thread.take() {
            thread.stop();
        }
        self.take_captured();
    }
}
