//! Playback stream lifecycle
//!
//! A [`PlaybackContext`] owns one backend connection and one output
//! stream. Both live on a dedicated thread (cpal streams are not
//! `Send`), driven over acknowledged command channels, so the context
//! handle itself can move freely between threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Sender, bounded};

use crate::config::OutputConfig;
use crate::devices::device_identity_hash;
use crate::error::{EchoPortError, Result};

/// Producer of interleaved f32 samples for a playback stream.
///
/// Called on the backend's real-time audio thread with
/// `(buffer, channels, frames)` and must fill exactly
/// `channels * frames` samples. It must not block, allocate, or
/// perform I/O.
pub type SampleProducer = dyn Fn(&mut [f32], u16, u32) + Send + Sync;

enum Command {
    Start(Sender<Result<()>>),
    Stop(Sender<Result<()>>),
    Close(Sender<()>),
}

enum DeviceSelection {
    ById { api_id: u32, device_id: u64 },
    Default,
}

/// An opened playback stream bound to one backend/device pair.
///
/// Lifecycle: opened -> (started <-> stopped) -> closed. [`close`]
/// consumes the context, so no operation can follow it; dropping an
/// unclosed context closes it.
///
/// [`close`]: PlaybackContext::close
pub struct PlaybackContext {
    cmd_tx: Sender<Command>,
    thread: Option<JoinHandle<()>>,
    api_name: String,
    device_name: String,
}

impl PlaybackContext {
    /// Open the device with identity `device_id` on backend `api_id`
    /// (values from the enumeration catalog) in the reference output
    /// format. The producer, if any, is fixed for the context's
    /// lifetime; without one the stream plays silence.
    ///
    /// Fails without leaking if the backend cannot be initialized, the
    /// device list cannot be queried, no device matches, or the stream
    /// cannot be opened in the requested format.
    pub fn open_device(
        api_id: u32,
        device_id: u64,
        producer: Option<Arc<SampleProducer>>,
    ) -> Result<Self> {
        Self::open_device_with_config(api_id, device_id, producer, OutputConfig::default())
    }

    pub fn open_device_with_config(
        api_id: u32,
        device_id: u64,
        producer: Option<Arc<SampleProducer>>,
        config: OutputConfig,
    ) -> Result<Self> {
        Self::spawn(DeviceSelection::ById { api_id, device_id }, producer, config)
    }

    /// Open the platform's default output device. The backend choice is
    /// the platform's, not the enumerator's.
    pub fn open_default_device(producer: Option<Arc<SampleProducer>>) -> Result<Self> {
        Self::open_default_device_with_config(producer, OutputConfig::default())
    }

    pub fn open_default_device_with_config(
        producer: Option<Arc<SampleProducer>>,
        config: OutputConfig,
    ) -> Result<Self> {
        Self::spawn(DeviceSelection::Default, producer, config)
    }

    fn spawn(
        selection: DeviceSelection,
        producer: Option<Arc<SampleProducer>>,
        config: OutputConfig,
    ) -> Result<Self> {
        let (cmd_tx, cmd_rx) = bounded::<Command>(1);
        let (init_tx, init_rx) = bounded::<Result<(String, String)>>(1);

        let thread = thread::Builder::new()
            .name("echoport-output".to_string())
            .spawn(move || {
                let (stream, names, active, in_flight) =
                    match open_stream(selection, producer, &config) {
                        Ok(opened) => opened,
                        Err(e) => {
                            let _ = init_tx.send(Err(e));
                            return;
                        }
                    };
                let _ = init_tx.send(Ok(names));

                for cmd in cmd_rx.iter() {
                    match cmd {
                        Command::Start(ack) => {
                            active.store(true, Ordering::Release);
                            let res = stream.play().map_err(|e| {
                                EchoPortError::Stream(format!("failed to start stream: {}", e))
                            });
                            let _ = ack.send(res);
                        }
                        Command::Stop(ack) => {
                            active.store(false, Ordering::Release);
                            let res = stream.pause().map_err(|e| {
                                EchoPortError::Stream(format!("failed to stop stream: {}", e))
                            });
                            // Callback invocations already underway must
                            // finish before stop returns.
                            while in_flight.load(Ordering::Acquire) != 0 {
                                thread::yield_now();
                            }
                            let _ = ack.send(res);
                        }
                        Command::Close(ack) => {
                            drop(stream);
                            let _ = ack.send(());
                            return;
                        }
                    }
                }
            })
            .map_err(|e| EchoPortError::Stream(format!("failed to spawn playback thread: {}", e)))?;

        match init_rx.recv() {
            Ok(Ok((api_name, device_name))) => Ok(Self {
                cmd_tx,
                thread: Some(thread),
                api_name,
                device_name,
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(EchoPortError::Stream(
                    "playback thread terminated during open".to_string(),
                ))
            }
        }
    }

    /// Human-readable name of the backend this stream runs on.
    pub fn api_name(&self) -> &str {
        &self.api_name
    }

    /// Name of the opened output device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Begin callback invocations. Returns once the stream is accepting
    /// them. Starting a started context is idempotent.
    pub fn start(&self) -> Result<()> {
        self.roundtrip(Command::Start)
    }

    /// Halt callback invocations. Does not return until no invocation
    /// is in flight, so producer-side state can be torn down safely
    /// afterwards.
    pub fn stop(&self) -> Result<()> {
        self.roundtrip(Command::Stop)
    }

    fn roundtrip(&self, build: fn(Sender<Result<()>>) -> Command) -> Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.cmd_tx
            .send(build(ack_tx))
            .map_err(|_| EchoPortError::Stream("playback thread is gone".to_string()))?;
        ack_rx
            .recv()
            .map_err(|_| EchoPortError::Stream("playback thread is gone".to_string()))?
    }

    /// Release the stream and the backend connection.
    pub fn close(mut self) -> Result<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<()> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        let (ack_tx, ack_rx) = bounded(1);
        if self.cmd_tx.send(Command::Close(ack_tx)).is_ok() {
            let _ = ack_rx.recv();
        }
        thread
            .join()
            .map_err(|_| EchoPortError::Stream("playback thread panicked".to_string()))
    }
}

impl Drop for PlaybackContext {
    fn drop(&mut self) {
        let _ = self.close_inner();
    }
}

type OpenedStream = (cpal::Stream, (String, String), Arc<AtomicBool>, Arc<AtomicU32>);

fn open_stream(
    selection: DeviceSelection,
    producer: Option<Arc<SampleProducer>>,
    config: &OutputConfig,
) -> Result<OpenedStream> {
    let (host, device) = match selection {
        DeviceSelection::ById { api_id, device_id } => {
            let host_id = *cpal::ALL_HOSTS.get(api_id as usize).ok_or_else(|| {
                EchoPortError::Backend(format!("unknown backend index {}", api_id))
            })?;
            let host = cpal::host_from_id(host_id).map_err(|e| {
                EchoPortError::Backend(format!("{} unavailable: {}", host_id.name(), e))
            })?;
            let device = find_output_device(&host, device_id)?;
            (host, device)
        }
        DeviceSelection::Default => {
            let host = cpal::default_host();
            let device = host.default_output_device().ok_or_else(|| {
                EchoPortError::Device("no default output device available".to_string())
            })?;
            (host, device)
        }
    };

    let api_name = host.id().name().to_string();
    let device_name = device
        .name()
        .unwrap_or_else(|_| "<unknown>".to_string());

    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: match config.buffer_size {
            Some(frames) => cpal::BufferSize::Fixed(frames),
            None => cpal::BufferSize::Default,
        },
    };

    let active = Arc::new(AtomicBool::new(false));
    let in_flight = Arc::new(AtomicU32::new(0));
    let channels = config.channels;
    let cb_active = active.clone();
    let cb_in_flight = in_flight.clone();

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                cb_in_flight.fetch_add(1, Ordering::AcqRel);
                if cb_active.load(Ordering::Acquire) {
                    fill_output(data, channels, producer.as_deref());
                } else {
                    data.fill(0.0);
                }
                cb_in_flight.fetch_sub(1, Ordering::AcqRel);
            },
            move |err| {
                log::error!("audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| EchoPortError::Stream(format!("failed to open output stream: {}", e)))?;

    // Some hosts run the stream as soon as it is built; hold it until
    // start is requested.
    if let Err(e) = stream.pause() {
        log::debug!("could not hold new stream paused: {}", e);
    }

    Ok((stream, (api_name, device_name), active, in_flight))
}

fn find_output_device(host: &cpal::Host, device_id: u64) -> Result<cpal::Device> {
    let devices = host.output_devices().map_err(|e| {
        EchoPortError::Backend(format!(
            "failed to query devices on {}: {}",
            host.id().name(),
            e
        ))
    })?;
    for device in devices {
        let Ok(name) = device.name() else { continue };
        if device_identity_hash(name.as_bytes()) == device_id {
            return Ok(device);
        }
    }
    Err(EchoPortError::Device(format!(
        "no output device matches id {:#018x}",
        device_id
    )))
}

/// One dispatcher invocation: forward the buffer to the producer, or
/// write silence when none is registered. A trailing partial frame is
/// zeroed rather than left unwritten.
pub(crate) fn fill_output(buffer: &mut [f32], channels: u16, producer: Option<&SampleProducer>) {
    match producer {
        Some(producer) => {
            let channels_usize = channels as usize;
            let frames = buffer.len() / channels_usize;
            let filled = frames * channels_usize;
            producer(&mut buffer[..filled], channels, frames as u32);
            buffer[filled..].fill(0.0);
        }
        None => buffer.fill(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn no_producer_fills_silence() {
        let mut buffer = vec![1.0f32; 512];
        fill_output(&mut buffer, 2, None);
        assert!(buffer.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn producer_call_is_forwarded_verbatim() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_cb = seen.clone();
        let producer: Arc<SampleProducer> = Arc::new(move |buffer, channels, frames| {
            assert_eq!(channels, 2);
            assert_eq!(frames, 128);
            assert_eq!(buffer.len(), 256);
            for (i, sample) in buffer.iter_mut().enumerate() {
                *sample = i as f32;
            }
            seen_cb.fetch_add(1, Ordering::SeqCst);
        });

        let mut buffer = vec![0.0f32; 256];
        fill_output(&mut buffer, 2, Some(&*producer));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(buffer[1], 1.0);
        assert_eq!(buffer[255], 255.0);
    }

    #[test]
    fn trailing_partial_frame_is_zeroed() {
        let producer: Arc<SampleProducer> = Arc::new(|buffer, _, _| buffer.fill(0.5));
        let mut buffer = vec![1.0f32; 257];
        fill_output(&mut buffer, 2, Some(&*producer));
        assert_eq!(buffer[255], 0.5);
        assert_eq!(buffer[256], 0.0);
    }

    #[test]
    fn open_unknown_backend_index_fails() {
        let result = PlaybackContext::open_device(u32::MAX, 0, None);
        assert!(matches!(result, Err(EchoPortError::Backend(_))));
    }

    #[test]
    fn open_unmatched_device_id_fails() {
        // Whatever backends exist here, nothing should hash to this id.
        let bogus = device_identity_hash(b"\xff\xfe\xfd no such device \x00\x01");
        for api_id in 0..cpal::ALL_HOSTS.len() as u32 {
            let result = PlaybackContext::open_device(api_id, bogus, None);
            assert!(result.is_err());
        }
    }

    /// Open the default device, or skip the test on machines without one.
    fn try_open(producer: Option<Arc<SampleProducer>>) -> Option<PlaybackContext> {
        PlaybackContext::open_default_device(producer).ok()
    }

    #[test]
    fn open_describe_close() {
        let Some(context) = try_open(None) else { return };
        assert!(!context.api_name().is_empty());
        assert!(!context.device_name().is_empty());
        context.close().unwrap();
    }

    #[test]
    fn start_stop_close_does_not_hang() {
        let Some(context) = try_open(None) else { return };
        context.start().unwrap();
        context.stop().unwrap();
        context.close().unwrap();
    }

    #[test]
    fn start_is_idempotent() {
        let Some(context) = try_open(None) else { return };
        context.start().unwrap();
        context.start().unwrap();
        context.stop().unwrap();
        context.close().unwrap();
    }

    #[test]
    fn stopped_stream_can_restart() {
        let Some(context) = try_open(None) else { return };
        context.start().unwrap();
        context.stop().unwrap();
        context.start().unwrap();
        context.stop().unwrap();
        context.close().unwrap();
    }

    #[test]
    fn drop_without_close_is_clean() {
        let Some(context) = try_open(None) else { return };
        context.start().unwrap();
        drop(context);
    }

    #[test]
    fn producer_runs_after_start_not_before() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_cb = calls.clone();
        let producer: Arc<SampleProducer> = Arc::new(move |buffer, _, _| {
            buffer.fill(0.0);
            calls_cb.fetch_add(1, Ordering::SeqCst);
        });

        let Some(context) = try_open(Some(producer)) else { return };
        thread::sleep(Duration::from_millis(100));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        context.start().unwrap();
        thread::sleep(Duration::from_millis(200));
        context.stop().unwrap();
        let after_stop = calls.load(Ordering::SeqCst);
        assert!(after_stop > 0, "producer never ran while started");

        // Stop is a barrier: no further invocations reach the producer.
        thread::sleep(Duration::from_millis(100));
        assert_eq!(calls.load(Ordering::SeqCst), after_stop);
        context.close().unwrap();
    }
}
