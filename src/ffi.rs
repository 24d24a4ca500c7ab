//! C-callable surface
//!
//! The stable ABI over the device catalog, playback contexts, and the
//! file decoder. Every handle returned here is owned by the caller
//! until passed back to its paired free/close export; misuse (null
//! handles, null buffers) yields sentinel values, never a crash.

use std::ffi::{CStr, CString, c_char, c_int};
use std::ptr;
use std::slice;
use std::sync::Arc;

use crate::decoder::AudioDecoder;
use crate::devices::enumerate_devices;
use crate::error::{
    RESULT_DECODE_FAILED, RESULT_INVALID_HANDLE, RESULT_SEEK_FAILED, RESULT_SUCCESS,
};
use crate::playback::{PlaybackContext, SampleProducer};

/// One catalog entry as it crosses the C boundary. The `name` and `api`
/// strings are owned by the caller and must be released through
/// [`ep_free_audio_device_infos`].
#[repr(C)]
pub struct EpAudioDeviceInfo {
    pub name: *mut c_char,
    pub id: u64,
    pub api: *mut c_char,
    pub api_id: u32,
}

/// Sample producer callback: fills `channels * frame_count` interleaved
/// f32 samples into `buffer`.
pub type EpDataCallback = extern "C" fn(buffer: *mut f32, channels: u32, frame_count: u32);

/// Opaque playback context handle.
pub struct EpAudioContext {
    context: Option<PlaybackContext>,
    api_name: CString,
    device_name: CString,
}

/// Opaque decoder handle.
pub struct EpAudioDecoder {
    decoder: AudioDecoder,
}

fn into_c_string(s: &str) -> *mut c_char {
    CString::new(s.replace('\0', ""))
        .map(CString::into_raw)
        .unwrap_or(ptr::null_mut())
}

fn producer_from_callback(callback: EpDataCallback) -> Arc<SampleProducer> {
    Arc::new(move |buffer: &mut [f32], channels: u16, frames: u32| {
        callback(buffer.as_mut_ptr(), channels as u32, frames);
    })
}

fn wrap_context(context: PlaybackContext) -> *mut EpAudioContext {
    let api_name = CString::new(context.api_name().replace('\0', "")).unwrap_or_default();
    let device_name = CString::new(context.device_name().replace('\0', "")).unwrap_or_default();
    Box::into_raw(Box::new(EpAudioContext {
        context: Some(context),
        api_name,
        device_name,
    }))
}

/// Write up to `max_count` playback device descriptions into `infos`
/// and return the total number of devices found, which may exceed
/// `max_count` (call with 0 first to size the buffer). Only
/// `min(total, max_count)` entries are written; pass that count to
/// [`ep_free_audio_device_infos`].
///
/// # Safety
/// `infos` must be null or valid for `max_count` writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ep_get_audio_device_infos(
    infos: *mut EpAudioDeviceInfo,
    max_count: i32,
) -> i32 {
    let capacity = if infos.is_null() {
        0
    } else {
        max_count.max(0) as usize
    };
    let (catalog, total) = enumerate_devices(capacity);

    if capacity > 0 {
        let out = unsafe { slice::from_raw_parts_mut(infos, capacity) };
        for slot in out.iter_mut() {
            slot.name = ptr::null_mut();
            slot.id = 0;
            slot.api = ptr::null_mut();
            slot.api_id = 0;
        }
        for (slot, device) in out.iter_mut().zip(catalog) {
            slot.name = into_c_string(&device.name);
            slot.id = device.id;
            slot.api = into_c_string(&device.api_name);
            slot.api_id = device.api_id;
        }
    }

    total.min(i32::MAX as usize) as i32
}

/// Release the strings of `count` catalog entries previously written by
/// [`ep_get_audio_device_infos`].
///
/// # Safety
/// `infos` must be null or point at `count` entries written by
/// `ep_get_audio_device_infos` and not yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ep_free_audio_device_infos(infos: *mut EpAudioDeviceInfo, count: i32) {
    if infos.is_null() || count <= 0 {
        return;
    }
    let entries = unsafe { slice::from_raw_parts_mut(infos, count as usize) };
    for entry in entries {
        if !entry.name.is_null() {
            drop(unsafe { CString::from_raw(entry.name) });
            entry.name = ptr::null_mut();
        }
        if !entry.api.is_null() {
            drop(unsafe { CString::from_raw(entry.api) });
            entry.api = ptr::null_mut();
        }
    }
}

/// Open the device with identity `id` on backend `api_id`. Returns null
/// on any failure.
#[unsafe(no_mangle)]
pub extern "C" fn ep_init_audio_device(
    api_id: u32,
    id: u64,
    callback: Option<EpDataCallback>,
) -> *mut EpAudioContext {
    let producer = callback.map(producer_from_callback);
    match PlaybackContext::open_device(api_id, id, producer) {
        Ok(context) => wrap_context(context),
        Err(_) => ptr::null_mut(),
    }
}

/// Open the platform's default output device. Returns null on failure.
#[unsafe(no_mangle)]
pub extern "C" fn ep_init_audio_device_auto(callback: Option<EpDataCallback>) -> *mut EpAudioContext {
    let producer = callback.map(producer_from_callback);
    match PlaybackContext::open_default_device(producer) {
        Ok(context) => wrap_context(context),
        Err(_) => ptr::null_mut(),
    }
}

/// # Safety
/// `context` must be null or a live handle from an init call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ep_get_audio_device_api(context: *const EpAudioContext) -> *const c_char {
    match unsafe { context.as_ref() } {
        Some(ctx) => ctx.api_name.as_ptr(),
        None => ptr::null(),
    }
}

/// # Safety
/// `context` must be null or a live handle from an init call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ep_get_audio_device_name(context: *const EpAudioContext) -> *const c_char {
    match unsafe { context.as_ref() } {
        Some(ctx) => ctx.device_name.as_ptr(),
        None => ptr::null(),
    }
}

/// # Safety
/// `context` must be null or a live handle from an init call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ep_audio_device_start(context: *const EpAudioContext) -> c_int {
    match unsafe { context.as_ref() }.and_then(|c| c.context.as_ref()) {
        Some(playback) => match playback.start() {
            Ok(()) => RESULT_SUCCESS,
            Err(e) => e.result_code(),
        },
        None => RESULT_INVALID_HANDLE,
    }
}

/// # Safety
/// `context` must be null or a live handle from an init call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ep_audio_device_stop(context: *const EpAudioContext) -> c_int {
    match unsafe { context.as_ref() }.and_then(|c| c.context.as_ref()) {
        Some(playback) => match playback.stop() {
            Ok(()) => RESULT_SUCCESS,
            Err(e) => e.result_code(),
        },
        None => RESULT_INVALID_HANDLE,
    }
}

/// Close the stream and release the handle. The pointer is invalid
/// afterwards.
///
/// # Safety
/// `context` must be null or a live handle from an init call, passed
/// here at most once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ep_free_audio_device(context: *mut EpAudioContext) -> c_int {
    if context.is_null() {
        return RESULT_INVALID_HANDLE;
    }
    let mut boxed = unsafe { Box::from_raw(context) };
    match boxed.context.take() {
        Some(playback) => match playback.close() {
            Ok(()) => RESULT_SUCCESS,
            Err(e) => e.result_code(),
        },
        None => RESULT_SUCCESS,
    }
}

/// Describe a result code returned by any export. Always returns a
/// valid string, unknown codes included.
#[unsafe(no_mangle)]
pub extern "C" fn ep_audio_get_error_message(code: c_int) -> *const c_char {
    let message: &'static CStr = match code {
        RESULT_SUCCESS => c"no error",
        crate::error::RESULT_ERROR => c"generic error",
        RESULT_INVALID_HANDLE => c"invalid or null handle",
        crate::error::RESULT_BACKEND_UNAVAILABLE => c"audio backend unavailable",
        crate::error::RESULT_DEVICE_NOT_FOUND => c"audio device not found",
        crate::error::RESULT_STREAM_FAILED => c"stream operation failed",
        RESULT_DECODE_FAILED => c"decode failed",
        RESULT_SEEK_FAILED => c"seek failed",
        crate::error::RESULT_IO_FAILED => c"input/output failed",
        _ => c"unknown error",
    };
    message.as_ptr()
}

/// Open a decoder for the audio file at `filename`. Returns null on
/// failure.
///
/// # Safety
/// `filename` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ep_audio_decoder_open(filename: *const c_char) -> *mut EpAudioDecoder {
    if filename.is_null() {
        return ptr::null_mut();
    }
    let Ok(path) = unsafe { CStr::from_ptr(filename) }.to_str() else {
        return ptr::null_mut();
    };
    match AudioDecoder::open(path) {
        Ok(decoder) => Box::into_raw(Box::new(EpAudioDecoder { decoder })),
        Err(_) => ptr::null_mut(),
    }
}

/// Open a decoder over an in-memory encoded stream. The bytes are
/// copied; the caller's buffer is not retained. Returns null on
/// failure.
///
/// # Safety
/// `data` must be null or valid for `data_size` reads.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ep_audio_decoder_open_memory(
    data: *const u8,
    data_size: usize,
) -> *mut EpAudioDecoder {
    if data.is_null() || data_size == 0 {
        return ptr::null_mut();
    }
    let bytes = unsafe { slice::from_raw_parts(data, data_size) }.to_vec();
    match AudioDecoder::open_memory(bytes) {
        Ok(decoder) => Box::into_raw(Box::new(EpAudioDecoder { decoder })),
        Err(_) => ptr::null_mut(),
    }
}

/// Release a decoder handle. Null is ignored.
///
/// # Safety
/// `decoder` must be null or a live handle from an open call, passed
/// here at most once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ep_audio_decoder_close(decoder: *mut EpAudioDecoder) {
    if !decoder.is_null() {
        drop(unsafe { Box::from_raw(decoder) });
    }
}

/// # Safety
/// `decoder` must be null or a live handle from an open call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ep_audio_decoder_get_sample_rate(decoder: *const EpAudioDecoder) -> c_int {
    match unsafe { decoder.as_ref() } {
        Some(dec) => dec.decoder.sample_rate() as c_int,
        None => 0,
    }
}

/// # Safety
/// `decoder` must be null or a live handle from an open call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ep_audio_decoder_get_channels(decoder: *const EpAudioDecoder) -> c_int {
    match unsafe { decoder.as_ref() } {
        Some(dec) => dec.decoder.channels() as c_int,
        None => 0,
    }
}

/// Total decodable frames; 0 when unknown or on a null handle.
///
/// # Safety
/// `decoder` must be null or a live handle from an open call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ep_audio_decoder_get_length(decoder: *const EpAudioDecoder) -> c_int {
    match unsafe { decoder.as_ref() } {
        Some(dec) => dec.decoder.length_in_frames().min(c_int::MAX as u64) as c_int,
        None => 0,
    }
}

/// Decode up to `frame_count` interleaved f32 frames into `buffer`.
/// Returns the frames produced (0 at end of stream or on a null
/// handle/buffer), negative on a hard decode error.
///
/// # Safety
/// `buffer` must be null or valid for `frame_count * channels` writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ep_audio_decoder_read(
    decoder: *mut EpAudioDecoder,
    buffer: *mut f32,
    frame_count: c_int,
) -> c_int {
    let Some(dec) = (unsafe { decoder.as_mut() }) else {
        return 0;
    };
    if buffer.is_null() || frame_count <= 0 {
        return 0;
    }
    let samples = frame_count as usize * dec.decoder.channels() as usize;
    let out = unsafe { slice::from_raw_parts_mut(buffer, samples) };
    match dec.decoder.read(out) {
        Ok(frames) => frames as c_int,
        Err(_) => RESULT_DECODE_FAILED,
    }
}

/// Reposition the read cursor to an absolute frame index. Returns 0 on
/// success, negative on failure.
///
/// # Safety
/// `decoder` must be null or a live handle from an open call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ep_audio_decoder_seek(
    decoder: *mut EpAudioDecoder,
    frame_position: c_int,
) -> c_int {
    let Some(dec) = (unsafe { decoder.as_mut() }) else {
        return RESULT_INVALID_HANDLE;
    };
    if frame_position < 0 {
        return RESULT_SEEK_FAILED;
    }
    match dec.decoder.seek(frame_position as u64) {
        Ok(()) => RESULT_SUCCESS,
        Err(e) => e.result_code(),
    }
}

/// 1 once the stream is fully drained, 0 otherwise (including on a
/// null handle).
///
/// # Safety
/// `decoder` must be null or a live handle from an open call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ep_audio_decoder_is_at_end(decoder: *const EpAudioDecoder) -> c_int {
    match unsafe { decoder.as_ref() } {
        Some(dec) => dec.decoder.is_at_end() as c_int,
        None => 0,
    }
}
