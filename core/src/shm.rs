//! Shared-memory bus region
//!
//! The virtual bus backend shares a single canonical pin word between
//! processes through a named POSIX shared-memory object. The simulator
//! process creates (and on exit unlinks) the region as primary; device
//! emulators, monitors and tests attach non-primary.
//!
//! The region holds the pin word plus a spin lock word. Reads are one
//! atomic load (a sample can never tear); multi-bit updates take the
//! lock so concurrent writers cannot interleave a read-modify-write.

use std::fs::File;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result};
use log::*;
use memmap2::{MmapMut, MmapOptions};
use nix::fcntl::OFlag;
use nix::sys::mman::{shm_open, shm_unlink};
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;

/// Region name used by all tools unless overridden
pub const DEFAULT_REGION: &str = "/limpet-bus";

#[repr(C)]
struct BusRegion {
    lock: AtomicU32,
    signals: AtomicU32,
}

pub struct SharedMemory {
    map: MmapMut,
    name: String,
    primary: bool,
}

impl SharedMemory {
    /// Opens the named bus region. The primary creates it and unlinks
    /// it again on drop; non-primary opens fail until a primary exists.
    pub fn new(name: &str, primary: bool) -> Result<Self> {
        let mut oflag = OFlag::O_RDWR;
        if primary {
            oflag |= OFlag::O_CREAT;
        }
        let fd = shm_open(name, oflag, Mode::S_IRWXU | Mode::S_IRWXG)
            .with_context(|| format!("open shared memory region {name}"))?;
        ftruncate(&fd, size_of::<BusRegion>() as i64).context("size shared memory region")?;

        let file = File::from(fd);
        let map = unsafe {
            MmapOptions::new()
                .len(size_of::<BusRegion>())
                .map_mut(&file)
                .context("map shared memory region")?
        };
        debug!(
            "Shared bus region {name} mapped ({})",
            if primary { "primary" } else { "attached" }
        );

        Ok(Self {
            map,
            name: name.to_owned(),
            primary,
        })
    }

    fn region(&self) -> &BusRegion {
        // The mapping is exactly one BusRegion; shm objects are
        // page-aligned and zero-initialized on creation
        unsafe { &*self.map.as_ptr().cast::<BusRegion>() }
    }

    /// Atomically reads the pin word
    pub fn read(&self) -> u32 {
        self.region().signals.load(Ordering::Acquire)
    }

    /// Applies a read-modify-write under the region's write lock
    pub fn update(&self, f: impl FnOnce(u32) -> u32) {
        let r = self.region();
        while r
            .lock
            .compare_exchange_weak(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        let v = r.signals.load(Ordering::Relaxed);
        r.signals.store(f(v), Ordering::Release);
        r.lock.store(0, Ordering::Release);
    }
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        if self.primary {
            if let Err(e) = shm_unlink(self.name.as_str()) {
                warn!("Failed to unlink shared memory region {}: {e}", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region_name(tag: &str) -> String {
        format!("/limpet-test-{}-{tag}", std::process::id())
    }

    #[test]
    fn update_and_read() {
        let name = region_name("rw");
        let shm = SharedMemory::new(&name, true).unwrap();
        assert_eq!(shm.read(), 0);
        shm.update(|v| v | 0x8001);
        assert_eq!(shm.read(), 0x8001);
        shm.update(|v| v & !1);
        assert_eq!(shm.read(), 0x8000);
    }

    #[test]
    fn secondary_sees_primary_writes() {
        let name = region_name("shared");
        let primary = SharedMemory::new(&name, true).unwrap();
        let secondary = SharedMemory::new(&name, false).unwrap();
        primary.update(|_| 0xDEAD_BEEF);
        assert_eq!(secondary.read(), 0xDEAD_BEEF);
        secondary.update(|v| v ^ 0xFFFF_0000);
        assert_eq!(primary.read(), 0x2152_BEEF);
    }

    #[test]
    fn attach_without_primary_fails() {
        let name = region_name("absent");
        assert!(SharedMemory::new(&name, false).is_err());
    }
}
