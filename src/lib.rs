pub mod config;
pub mod decoder;
pub mod devices;
pub mod error;
pub mod ffi;
pub mod playback;

pub use config::OutputConfig;
pub use decoder::AudioDecoder;
pub use devices::{BackendFailure, DeviceInfo, device_identity_hash, enumerate_devices};
pub use error::{EchoPortError, describe_result_code};
pub use playback::{PlaybackContext, SampleProducer};

#[cfg(test)]
mod tests {
    use crate::decoder::AudioDecoder;
    use crate::devices::enumerate_devices;
    use crate::playback::{PlaybackContext, SampleProducer};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Build a one-second stereo sine WAV in memory
    fn make_sine_wav() -> Vec<u8> {
        let sample_rate = 44100u32;
        let channels = 2u16;
        let samples: Vec<i16> = (0..sample_rate as usize * channels as usize)
            .map(|i| (((i / 2) as f32 * 0.06).sin() * 12000.0) as i16)
            .collect();

        let data_size = (samples.len() * 2) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&(36 + data_size).to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&channels.to_le_bytes());
        buf.extend_from_slice(&sample_rate.to_le_bytes());
        buf.extend_from_slice(&(sample_rate * channels as u32 * 2).to_le_bytes());
        buf.extend_from_slice(&(channels * 2).to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&data_size.to_le_bytes());
        for &s in &samples {
            buf.extend_from_slice(&s.to_le_bytes());
        }
        buf
    }

    #[test]
    fn open_enumerated_device_by_identity() {
        let (catalog, total) = enumerate_devices(usize::MAX);
        assert!(catalog.len() <= total);
        let Some(device) = catalog.first() else { return };

        // The catalog entry is enough to reach the same device again.
        let context = match PlaybackContext::open_device(device.api_id, device.id, None) {
            Ok(context) => context,
            // A listed device can still refuse the reference format.
            Err(_) => return,
        };
        assert_eq!(context.api_name(), device.api_name);
        context.start().unwrap();
        context.stop().unwrap();
        context.close().unwrap();
    }

    #[test]
    fn decoded_audio_drives_playback() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mut decoder = AudioDecoder::open_memory(make_sine_wav()).unwrap();
        assert_eq!(decoder.sample_rate(), 44100);
        assert_eq!(decoder.channels(), 2);

        let channels = decoder.channels() as usize;
        let mut samples = vec![0.0f32; decoder.length_in_frames() as usize * channels];
        let frames = decoder.read(&mut samples).unwrap();
        assert_eq!(frames as u64, decoder.length_in_frames());

        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));
        let producer_samples = samples.clone();
        let producer_position = position.clone();
        let producer: Arc<SampleProducer> = Arc::new(move |buffer, _channels, _frames| {
            for sample in buffer.iter_mut() {
                let pos = producer_position.fetch_add(1, Ordering::Relaxed);
                *sample = producer_samples.get(pos).copied().unwrap_or(0.0);
            }
        });

        let Ok(context) = PlaybackContext::open_default_device(Some(producer)) else {
            return; // no output hardware here
        };
        context.start().unwrap();
        std::thread::sleep(Duration::from_millis(150));
        context.stop().unwrap();
        context.close().unwrap();
    }
}
