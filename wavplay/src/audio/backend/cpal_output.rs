//! System audio output using cpal
//!
//! `cpal::Stream` is not `Send`, so each opened stream lives on a dedicated
//! `wavplay-audio` thread and is driven by commands over a channel. PCM is
//! decoded to `f32` on the writing thread and travels to the audio callback
//! through a lock-free ring buffer sized from the sink's buffer capacity; the
//! callback converts it to the device sample format and outputs silence on
//! underrun.
//!
//! When the device has no config at the file's rate, the stream opens with
//! the device default config and the writer resamples on the way in.

use super::{AudioBackend, BackendFactory};
use crate::audio::resample::{block_output_frames, StreamResampler};
use crate::audio::sink::{ChannelLayout, SinkParams};
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// Smallest period, in frames, reported as the device minimum
const MIN_PERIOD_FRAMES: u32 = 1024;

/// Period assumed when the device does not report its buffer range
const DEFAULT_PERIOD_FRAMES: u32 = 2048;

/// Opens streams on a system output device
#[derive(Debug, Clone, Default)]
pub struct CpalDevice {
    device_name: Option<String>,
}

impl CpalDevice {
    /// `None` selects the system default device.
    pub fn new(device_name: Option<String>) -> Self {
        Self { device_name }
    }

    /// Names of all output devices on the default host
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();
        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }
}

/// Find the requested device, falling back to the default device.
fn resolve_device(device_name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();

    if let Some(name) = device_name {
        let mut devices = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("Failed to enumerate devices: {}", e)))?;
        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            info!("Using audio device: {}", name);
            return Ok(device);
        }
        warn!(
            "Requested device '{}' not found, falling back to default device",
            name
        );
    }

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::AudioOutput("No default output device found".to_string()))?;
    info!(
        "Using default audio device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );
    Ok(device)
}

/// Device minimum in bytes from a period size in frames.
fn min_buffer_from_frames(frames: u32, channels: u16, bits_per_sample: u16) -> i64 {
    let bytes_per_sample = i64::from(bits_per_sample / 8).max(1);
    i64::from(frames) * i64::from(channels.max(1)) * bytes_per_sample
}

impl BackendFactory for CpalDevice {
    fn min_buffer_bytes(
        &self,
        _sample_rate_hz: u32,
        layout: ChannelLayout,
        bits_per_sample: u16,
    ) -> Result<i64> {
        let device = resolve_device(self.device_name.as_deref())?;
        let default_config = device
            .default_output_config()
            .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;

        let frames = match default_config.buffer_size() {
            cpal::SupportedBufferSize::Range { min, .. } => (*min).max(MIN_PERIOD_FRAMES),
            cpal::SupportedBufferSize::Unknown => DEFAULT_PERIOD_FRAMES,
        };
        let channels = layout
            .channel_count()
            .unwrap_or_else(|| default_config.channels());

        let bytes = min_buffer_from_frames(frames, channels, bits_per_sample);
        debug!(
            "Device minimum buffer: {} frames x {} ch = {} b",
            frames, channels, bytes
        );
        Ok(bytes)
    }

    fn open(&self, params: &SinkParams) -> Result<Box<dyn AudioBackend>> {
        let rendered = Arc::new(AtomicU64::new(0));

        let (command_tx, command_rx) = mpsc::channel::<StreamCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<StreamSetup>>();

        let device_name = self.device_name.clone();
        let stream_params = params.clone();
        let stream_rendered = Arc::clone(&rendered);

        // Stream is !Send; build and drive it on its own thread
        let thread = std::thread::Builder::new()
            .name("wavplay-audio".to_string())
            .spawn(move || {
                stream_thread(
                    device_name,
                    stream_params,
                    stream_rendered,
                    command_rx,
                    ready_tx,
                )
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn audio thread: {}", e)))?;

        let setup = match ready_rx.recv() {
            Ok(Ok(setup)) => setup,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                let _ = thread.join();
                return Err(Error::AudioOutput(
                    "Audio thread exited during setup".to_string(),
                ));
            }
        };

        let device_rate = setup.device_rate;
        let writer = match FrameWriter::new(setup.producer, params, device_rate) {
            Ok(writer) => writer,
            Err(e) => {
                let _ = command_tx.send(StreamCommand::Shutdown);
                let _ = thread.join();
                return Err(e);
            }
        };

        Ok(Box::new(CpalBackend {
            writer,
            commands: command_tx,
            thread: Some(thread),
            rendered,
            source_rate: params.sample_rate_hz,
            device_rate,
            playing: false,
        }))
    }
}

/// What the audio thread hands back once its stream is built
struct StreamSetup {
    producer: HeapProd<f32>,
    device_rate: u32,
}

enum StreamCommand {
    Play(mpsc::Sender<Result<()>>),
    Pause(mpsc::Sender<Result<()>>),
    Shutdown,
}

fn stream_thread(
    device_name: Option<String>,
    params: SinkParams,
    rendered: Arc<AtomicU64>,
    commands: mpsc::Receiver<StreamCommand>,
    ready: mpsc::Sender<Result<StreamSetup>>,
) {
    let stream = match build_stream(device_name.as_deref(), &params, rendered) {
        Ok((stream, setup)) => {
            let _ = ready.send(Ok(setup));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    while let Ok(command) = commands.recv() {
        match command {
            StreamCommand::Play(reply) => {
                let result = stream
                    .play()
                    .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {}", e)));
                let _ = reply.send(result);
            }
            StreamCommand::Pause(reply) => {
                let result = stream
                    .pause()
                    .map_err(|e| Error::SinkStateFault(format!("Failed to pause stream: {}", e)));
                let _ = reply.send(result);
            }
            StreamCommand::Shutdown => break,
        }
    }

    drop(stream);
    debug!("Audio thread exiting");
}

/// Pick a device config matching the PCM rate, preferring the source layout.
///
/// Falls back to the device default config when no config covers the rate;
/// the writer then resamples.
fn select_config(device: &Device, params: &SinkParams) -> Result<(StreamConfig, SampleFormat)> {
    let rate = cpal::SampleRate(params.sample_rate_hz);
    let wanted_channels = params.channel_layout.channel_count();

    let candidates: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to get device configs: {}", e)))?
        .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .filter(|c| {
            matches!(
                c.sample_format(),
                SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
            )
        })
        .collect();

    let chosen = candidates
        .iter()
        .find(|c| Some(c.channels()) == wanted_channels)
        .or_else(|| candidates.first());

    if let Some(chosen) = chosen {
        let sample_format = chosen.sample_format();
        let config = chosen.clone().with_sample_rate(rate).config();
        return Ok((config, sample_format));
    }

    // Fallback: use default config
    let default_config = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("Failed to get default config: {}", e)))?;
    info!(
        "Device has no {} Hz output, resampling to {} Hz",
        params.sample_rate_hz,
        default_config.sample_rate().0
    );
    let sample_format = default_config.sample_format();
    Ok((default_config.config(), sample_format))
}

/// Ring size in samples: the sink capacity at the device rate, and always
/// room for two resampled blocks.
fn ring_capacity_samples(params: &SinkParams, device_rate: u32) -> usize {
    let channels = usize::from(params.channel_count.max(1));
    let source_rate = params.sample_rate_hz.max(1);
    let frames = (params.buffer_capacity_bytes / params.frame_bytes().max(1)) as u64;
    let mut device_frames = (frames * u64::from(device_rate) / u64::from(source_rate)) as usize;
    if device_rate != source_rate {
        device_frames = device_frames.max(2 * block_output_frames(source_rate, device_rate));
    }
    device_frames.max(1) * channels
}

fn build_stream(
    device_name: Option<&str>,
    params: &SinkParams,
    rendered: Arc<AtomicU64>,
) -> Result<(cpal::Stream, StreamSetup)> {
    let device = resolve_device(device_name)?;
    let (config, sample_format) = select_config(&device, params)?;
    let device_rate = config.sample_rate.0;

    debug!(
        "Stream config: sample_rate={}, channels={}, format={:?}",
        device_rate, config.channels, sample_format
    );

    let ring = HeapRb::<f32>::new(ring_capacity_samples(params, device_rate));
    let (producer, consumer) = ring.split();
    let reader = FrameReader::new(consumer, usize::from(params.channel_count.max(1)), rendered);

    let stream = match sample_format {
        SampleFormat::F32 => build_typed_stream::<f32>(&device, &config, reader),
        SampleFormat::I16 => build_typed_stream::<i16>(&device, &config, reader),
        SampleFormat::U16 => build_typed_stream::<u16>(&device, &config, reader),
        sample_format => Err(Error::AudioOutput(format!(
            "Unsupported sample format: {:?}",
            sample_format
        ))),
    }?;

    Ok((
        stream,
        StreamSetup {
            producer,
            device_rate,
        },
    ))
}

fn build_typed_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut reader: FrameReader,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32> + Send + 'static,
{
    let out_channels = usize::from(config.channels.max(1));

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                for frame in data.chunks_mut(out_channels) {
                    reader.fill_frame(frame);
                }
            },
            move |err| {
                error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {}", e)))
}

/// Pulls interleaved frames out of the ring buffer on the audio thread
struct FrameReader {
    consumer: HeapCons<f32>,
    frame: Vec<f32>,
    /// Frames rendered, at the device rate
    rendered: Arc<AtomicU64>,
}

impl FrameReader {
    fn new(consumer: HeapCons<f32>, channels: usize, rendered: Arc<AtomicU64>) -> Self {
        Self {
            consumer,
            frame: vec![0.0; channels.max(1)],
            rendered,
        }
    }

    fn fill_frame<T: Sample + FromSample<f32>>(&mut self, out: &mut [T]) {
        if self.consumer.occupied_len() < self.frame.len() {
            out.fill(T::EQUILIBRIUM);
            return;
        }

        self.consumer.pop_slice(&mut self.frame);
        self.rendered.fetch_add(1, Ordering::Relaxed);

        let channels = self.frame.len();
        for (c, slot) in out.iter_mut().enumerate() {
            *slot = T::from_sample(self.frame[c % channels]);
        }
    }
}

/// Decodes PCM bytes into the ring on the writing thread, resampling when
/// the device runs at another rate
struct FrameWriter {
    producer: HeapProd<f32>,
    resampler: Option<StreamResampler>,
    bytes_per_sample: usize,
    /// Bytes of a frame split across writes
    partial: Vec<u8>,
    frame: Vec<f32>,
    resampled: Vec<f32>,
}

impl FrameWriter {
    fn new(producer: HeapProd<f32>, params: &SinkParams, device_rate: u32) -> Result<Self> {
        let channels = usize::from(params.channel_count.max(1));
        let resampler = if device_rate != params.sample_rate_hz {
            Some(StreamResampler::new(
                params.sample_rate_hz,
                device_rate,
                channels,
            )?)
        } else {
            None
        };

        Ok(Self {
            producer,
            resampler,
            bytes_per_sample: params.bytes_per_sample().max(1),
            partial: Vec::new(),
            frame: vec![0.0; channels],
            resampled: Vec::new(),
        })
    }

    fn frame_bytes(&self) -> usize {
        self.bytes_per_sample * self.frame.len()
    }

    fn has_room(&self) -> bool {
        let vacant = self.producer.vacant_len();
        match &self.resampler {
            Some(resampler) if resampler.block_due() => vacant >= resampler.max_block_samples(),
            Some(_) => true,
            None => vacant >= self.frame.len(),
        }
    }

    fn push_frame(&mut self, bytes: &[u8]) -> Result<()> {
        for (sample, raw) in self
            .frame
            .iter_mut()
            .zip(bytes.chunks_exact(self.bytes_per_sample))
        {
            *sample = pcm_to_f32(raw);
        }

        match self.resampler.as_mut() {
            Some(resampler) => {
                self.resampled.clear();
                resampler.push_frame(&self.frame, &mut self.resampled)?;
                self.producer.push_slice(&self.resampled);
            }
            None => {
                self.producer.push_slice(&self.frame);
            }
        }
        Ok(())
    }

    /// Queue whole frames while the ring has room; a trailing partial frame
    /// is held until the next write. Returns the bytes accepted.
    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let frame_bytes = self.frame_bytes();
        let mut accepted = 0;

        while accepted < data.len() {
            let rest = &data[accepted..];
            let needed = frame_bytes - self.partial.len();
            if rest.len() < needed {
                self.partial.extend_from_slice(rest);
                accepted += rest.len();
                break;
            }
            if !self.has_room() {
                break;
            }

            if self.partial.is_empty() {
                self.push_frame(&rest[..needed])?;
            } else {
                let mut frame = std::mem::take(&mut self.partial);
                frame.extend_from_slice(&rest[..needed]);
                self.push_frame(&frame)?;
                frame.clear();
                self.partial = frame;
            }
            accepted += needed;
        }

        Ok(accepted)
    }
}

/// One little-endian PCM sample to [-1.0, 1.0).
///
/// 8-bit is unsigned; wider samples are truncated to their top 16 bits.
fn pcm_to_f32(bytes: &[u8]) -> f32 {
    match bytes.len() {
        0 => 0.0,
        1 => (f32::from(bytes[0]) - 128.0) / 128.0,
        n => f32::from(i16::from_le_bytes([bytes[n - 2], bytes[n - 1]])) / 32768.0,
    }
}

struct CpalBackend {
    writer: FrameWriter,
    commands: mpsc::Sender<StreamCommand>,
    thread: Option<JoinHandle<()>>,
    rendered: Arc<AtomicU64>,
    source_rate: u32,
    device_rate: u32,
    playing: bool,
}

impl CpalBackend {
    fn request(&self, command: fn(mpsc::Sender<Result<()>>) -> StreamCommand) -> Result<()> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.commands
            .send(command(reply_tx))
            .map_err(|_| Error::AudioOutput("Audio thread is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| Error::AudioOutput("Audio thread is gone".to_string()))?
    }

    fn shutdown(&mut self) {
        let _ = self.commands.send(StreamCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Audio thread panicked");
            }
        }
    }
}

impl AudioBackend for CpalBackend {
    fn play(&mut self) -> Result<()> {
        self.request(StreamCommand::Play)?;
        self.playing = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.playing {
            return Err(Error::SinkStateFault("stream is not playing".to_string()));
        }
        self.playing = false;
        self.request(StreamCommand::Pause)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        if self.thread.is_none() {
            return Err(Error::InvalidState("stream released".to_string()));
        }
        self.writer.write(data)
    }

    fn position_frames(&mut self) -> u64 {
        let rendered = self.rendered.load(Ordering::Relaxed);
        rendered * u64::from(self.source_rate) / u64::from(self.device_rate.max(1))
    }

    fn release(&mut self) -> Result<()> {
        self.playing = false;
        self.shutdown();
        Ok(())
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}
