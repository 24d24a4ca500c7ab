//! Playback device discovery across the platform's audio backends

use cpal::traits::{DeviceTrait, HostTrait};
use log::{debug, warn};
use xxhash_rust::xxh64::xxh64;

/// Derive the stable 64-bit identity of a device from its backend-side
/// identifier bytes. Deterministic across processes and runs; not
/// comparable across different backends exposing the same hardware.
pub fn device_identity_hash(descriptor: &[u8]) -> u64 {
    xxh64(descriptor, 0)
}

/// One entry of the playback device catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device name as reported by the backend, verbatim
    pub name: String,
    /// Identity hash of the backend's device identifier
    pub id: u64,
    /// Human-readable backend name
    pub api_name: String,
    /// Backend index, valid as an argument to open-by-id
    pub api_id: u32,
}

/// Why a backend contributed nothing to the catalog.
#[derive(Debug)]
pub enum BackendFailure {
    /// The backend is not present on this system. Not an error.
    Unavailable,
    /// The backend initialized but its device list could not be queried.
    QueryFailed(String),
}

/// Query the playback devices of a single backend.
pub fn backend_devices(
    api_id: u32,
    host_id: cpal::HostId,
) -> std::result::Result<Vec<DeviceInfo>, BackendFailure> {
    let host = cpal::host_from_id(host_id).map_err(|_| BackendFailure::Unavailable)?;
    let devices = host
        .output_devices()
        .map_err(|e| BackendFailure::QueryFailed(e.to_string()))?;

    let mut infos = Vec::new();
    for device in devices {
        let name = match device.name() {
            Ok(name) => name,
            Err(e) => {
                debug!("skipping unnameable device on {}: {}", host_id.name(), e);
                continue;
            }
        };
        infos.push(DeviceInfo {
            id: device_identity_hash(name.as_bytes()),
            name,
            api_name: host_id.name().to_string(),
            api_id,
        });
    }
    Ok(infos)
}

/// Enumerate playback devices across every compiled-in backend.
///
/// Returns the catalog, truncated to `max_count` entries, together with
/// the total number of devices found. The total keeps counting past
/// `max_count`, so a caller can probe with `max_count = 0` to learn the
/// true size and then re-call with a large enough capacity.
///
/// Backends that are not installed are skipped silently; backends whose
/// device list cannot be queried are skipped with a warning. Catalog
/// order is backend order, then each backend's own device order; entries
/// are neither sorted nor deduplicated across backends.
pub fn enumerate_devices(max_count: usize) -> (Vec<DeviceInfo>, usize) {
    let mut catalog = Vec::new();
    let mut total = 0usize;

    for (api_id, host_id) in cpal::ALL_HOSTS.iter().enumerate() {
        match backend_devices(api_id as u32, *host_id) {
            Ok(devices) => {
                for device in devices {
                    if total < max_count {
                        catalog.push(device);
                    }
                    total += 1;
                }
            }
            Err(BackendFailure::Unavailable) => {
                debug!("audio backend {} not available", host_id.name());
            }
            Err(BackendFailure::QueryFailed(e)) => {
                warn!("failed to query devices on {}: {}", host_id.name(), e);
            }
        }
    }

    (catalog, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_hash_is_deterministic() {
        let a = device_identity_hash(b"Built-in Output");
        let b = device_identity_hash(b"Built-in Output");
        assert_eq!(a, b);
    }

    #[test]
    fn identity_hash_is_byte_sensitive() {
        assert_ne!(
            device_identity_hash(b"Built-in Output"),
            device_identity_hash(b"Built-in output")
        );
        assert_ne!(device_identity_hash(b""), device_identity_hash(b"\0"));
    }

    #[test]
    fn probe_with_zero_capacity_writes_nothing() {
        let (catalog, total) = enumerate_devices(0);
        assert!(catalog.is_empty());
        // The total is still the real device count.
        let (full, full_total) = enumerate_devices(total);
        assert_eq!(full_total, total);
        assert_eq!(full.len(), total);
    }

    #[test]
    fn catalog_never_exceeds_capacity() {
        let (catalog, total) = enumerate_devices(1);
        assert!(catalog.len() <= 1);
        assert!(total >= catalog.len());
    }

    #[test]
    fn enumeration_is_stable_across_calls() {
        let (first, _) = enumerate_devices(usize::MAX);
        let (second, _) = enumerate_devices(usize::MAX);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.name, b.name);
            assert_eq!(a.api_id, b.api_id);
        }
    }

    #[test]
    fn catalog_ids_match_their_names() {
        let (catalog, _) = enumerate_devices(usize::MAX);
        for device in &catalog {
            assert_eq!(device.id, device_identity_hash(device.name.as_bytes()));
            assert!((device.api_id as usize) < cpal::ALL_HOSTS.len());
            assert!(!device.api_name.is_empty());
        }
    }

    #[test]
    fn unavailable_and_query_failed_are_distinct() {
        // Backend absence and query failure travel as different variants
        // so callers (and logs) can tell "not installed" from "broken".
        let absence = BackendFailure::Unavailable;
        let failure = BackendFailure::QueryFailed("boom".to_string());
        assert!(matches!(absence, BackendFailure::Unavailable));
        match failure {
            BackendFailure::QueryFailed(msg) => assert_eq!(msg, "boom"),
            BackendFailure::Unavailable => panic!("wrong variant"),
        }
    }
}
