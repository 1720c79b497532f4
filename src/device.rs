//! Device driver abstraction and registry
//!
//! Every mounted resource (filesystem, pipe set) is a device owned by
//! the coordinating context. Devices are identified by a host-wide id
//! and by their source URI. A process-local registry layers over the
//! host-global one so workspace filesystems can be created once and
//! shared across processes while pipes and composed roots stay private.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use url::Url;

use crate::fs::FileSystemDevice;
use crate::wasi::Errno;

/// Host-wide device identifier. Allocated monotonically, never reused
/// within a host lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev:{}", self.0)
    }
}

/// Character devices carry the byte-stream capability set (stdio pipes).
pub trait CharacterDevice: Send + Sync {
    fn id(&self) -> DeviceId;

    fn uri(&self) -> &Url;

    /// Read up to `max` bytes, blocking until data, EOF, or destruction.
    fn read(&self, max: usize) -> Result<Vec<u8>, Errno>;

    /// Write all bytes, blocking on back-pressure.
    fn write(&self, bytes: &[u8]) -> Result<usize, Errno>;

    /// Buffered bytes available for reading right now.
    fn bytes_available(&self) -> u64;
}

/// A registered device: a tagged union over the driver kinds.
#[derive(Clone)]
pub enum Device {
    FileSystem(Arc<dyn FileSystemDevice>),
    Character(Arc<dyn CharacterDevice>),
}

impl Device {
    pub fn id(&self) -> DeviceId {
        match self {
            Device::FileSystem(d) => d.id(),
            Device::Character(d) => d.id(),
        }
    }

    pub fn uri(&self) -> &Url {
        match self {
            Device::FileSystem(d) => d.uri(),
            Device::Character(d) => d.uri(),
        }
    }

    pub fn as_filesystem(&self) -> Option<&Arc<dyn FileSystemDevice>> {
        match self {
            Device::FileSystem(d) => Some(d),
            Device::Character(_) => None,
        }
    }

    pub fn as_character(&self) -> Option<&Arc<dyn CharacterDevice>> {
        match self {
            Device::Character(d) => Some(d),
            Device::FileSystem(_) => None,
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::FileSystem(d) => write!(f, "Device::FileSystem({}, {})", d.id(), d.uri()),
            Device::Character(d) => write!(f, "Device::Character({}, {})", d.id(), d.uri()),
        }
    }
}

/// Registry lookup failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error("no such device: {0}")]
    NoSuchDevice(DeviceId),
    #[error("no device for uri: {0}")]
    NoSuchUri(String),
}

/// One flat table of devices, keyed by id with a secondary URI index.
#[derive(Default)]
pub struct DeviceTable {
    by_id: HashMap<DeviceId, Device>,
    by_uri: HashMap<String, DeviceId>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, device: Device) {
        self.by_uri.insert(device.uri().to_string(), device.id());
        self.by_id.insert(device.id(), device);
    }

    pub fn has(&self, id: DeviceId) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn has_uri(&self, uri: &Url) -> bool {
        self.by_uri.contains_key(uri.as_str())
    }

    pub fn get(&self, id: DeviceId) -> Option<Device> {
        self.by_id.get(&id).cloned()
    }

    pub fn get_by_uri(&self, uri: &Url) -> Option<Device> {
        self.by_uri.get(uri.as_str()).and_then(|id| self.get(*id))
    }

    pub fn remove(&mut self, id: DeviceId) -> Option<Device> {
        let device = self.by_id.remove(&id)?;
        self.by_uri.remove(device.uri().as_str());
        Some(device)
    }

    pub fn remove_by_uri(&mut self, uri: &Url) -> Option<Device> {
        let id = self.by_uri.remove(uri.as_str())?;
        self.by_id.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn entries(&self) -> Vec<(DeviceId, Device)> {
        self.by_id.iter().map(|(id, d)| (*id, d.clone())).collect()
    }
}

/// Shared handle to the host-global device table.
pub type SharedDeviceTable = Arc<Mutex<DeviceTable>>;

/// Process-local registry layered over the host-global table.
///
/// Lookups check the local table first and fall back to the global one;
/// removal and iteration compose both layers without duplication.
pub struct DeviceRegistry {
    local: DeviceTable,
    global: SharedDeviceTable,
}

impl DeviceRegistry {
    pub fn new(global: SharedDeviceTable) -> Self {
        Self {
            local: DeviceTable::new(),
            global,
        }
    }

    /// Register a process-private device.
    pub fn add(&mut self, device: Device) {
        self.local.add(device);
    }

    pub fn has(&self, id: DeviceId) -> bool {
        self.local.has(id) || self.global.lock().unwrap().has(id)
    }

    pub fn has_uri(&self, uri: &Url) -> bool {
        self.local.has_uri(uri) || self.global.lock().unwrap().has_uri(uri)
    }

    pub fn get(&self, id: DeviceId) -> Result<Device, DeviceError> {
        if let Some(d) = self.local.get(id) {
            return Ok(d);
        }
        self.global
            .lock()
            .unwrap()
            .get(id)
            .ok_or(DeviceError::NoSuchDevice(id))
    }

    pub fn get_by_uri(&self, uri: &Url) -> Result<Device, DeviceError> {
        if let Some(d) = self.local.get_by_uri(uri) {
            return Ok(d);
        }
        self.global
            .lock()
            .unwrap()
            .get_by_uri(uri)
            .ok_or_else(|| DeviceError::NoSuchUri(uri.to_string()))
    }

    pub fn remove(&mut self, id: DeviceId) -> Option<Device> {
        self.local
            .remove(id)
            .or_else(|| self.global.lock().unwrap().remove(id))
    }

    pub fn remove_by_uri(&mut self, uri: &Url) -> Option<Device> {
        self.local
            .remove_by_uri(uri)
            .or_else(|| self.global.lock().unwrap().remove_by_uri(uri))
    }

    /// Devices visible to this process (local first, then global ones
    /// not shadowed by a local entry).
    pub fn entries(&self) -> Vec<(DeviceId, Device)> {
        let mut out = self.local.entries();
        let global = self.global.lock().unwrap();
        for (id, device) in global.entries() {
            if !self.local.has(id) {
                out.push((id, device));
            }
        }
        out
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
