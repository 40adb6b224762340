//! System timer
//!
//! Monotonic microsecond/nanosecond clocks and the busy-wait sleeps the
//! handshake timing depends on. On Raspberry Pi class hardware this
//! reads the BCM free-running system timer (microseconds) and the ARM
//! timer free-running counter (core-clock ticks, for nanosecond
//! resolution); sub-microsecond sleeps busy-wait because the required
//! precision is far below the OS scheduler's granularity. Off-hardware
//! the clocks derive from [`std::time::Instant`] and sleeps use the
//! regular nanosecond sleep.

use std::fs::OpenOptions;
use std::os::fd::AsRawFd;
use std::ptr;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use log::*;
use memmap2::{MmapMut, MmapOptions};

/// BCM system timer peripheral offset from the peripheral base
const SYST_OFFSET: usize = 0x0000_3000;
/// ARM timer peripheral offset from the peripheral base
const ARMT_OFFSET: usize = 0x0000_B400;

/// System timer: low 32 bits of the free-running microsecond counter
const SYST_CLO: usize = 1;
/// System timer: high 32 bits
const SYST_CHI: usize = 2;
/// ARM timer control register
const ARMT_CTRL: usize = 2;
/// ARM timer free-running counter
const ARMT_FREERUN: usize = 8;

/// ARM timer control: 23-bit mode, timer enabled, free-running counter
/// enabled, free-run prescale 0 (counter runs at the core clock)
const ARMT_CTRL_FREERUN: u32 = 0x0000_0282;

/// Mailbox property interface ioctl: _IOWR(100, 0, char *)
const VCIO_IOCTL_PROPERTY: nix::libc::c_ulong = 0xC008_6400;
/// Mailbox tag: get clock rate
const MBOX_TAG_GET_CLOCK_RATE: u32 = 0x0003_0002;
/// Mailbox clock id: core
const MBOX_CLOCK_CORE: u32 = 4;

/// Core clock assumed when the mailbox query fails
const DEFAULT_CORE_MHZ: u32 = 500;

enum Backend {
    /// Free-running hardware counters on a mapped peripheral window
    Rpi {
        _map: MmapMut,
        syst: *const u32,
        armt: *mut u32,
        /// Core clock in MHz; the ARM free-running counter ticks at
        /// this rate per microsecond
        core_mhz: u32,
        /// Software extension of the 32-bit tick counter to 64 bits
        ticks64: AtomicU64,
    },
    Host {
        epoch: Instant,
    },
}

// The raw pointers reference the process-wide MMIO mapping held alive
// by `_map`; plain loads/stores of device registers are safe from any
// thread.
unsafe impl Send for Backend {}
unsafe impl Sync for Backend {}

static BACKEND: OnceLock<Backend> = OnceLock::new();

fn backend() -> &'static Backend {
    BACKEND.get_or_init(|| Backend::Host {
        epoch: Instant::now(),
    })
}

/// Queries the core clock frequency from the VideoCore mailbox
fn mailbox_core_clock_hz() -> Result<u32> {
    let f = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/vcio")
        .context("open /dev/vcio")?;

    // Property message: size, request code, tag, value size, request,
    // clock id, value, end tag
    let mut msg: [u32; 8] = [8 * 4, 0, MBOX_TAG_GET_CLOCK_RATE, 8, 4, MBOX_CLOCK_CORE, 0, 0];
    let rc = unsafe {
        nix::libc::ioctl(
            f.as_raw_fd(),
            VCIO_IOCTL_PROPERTY as _,
            msg.as_mut_ptr().cast::<nix::libc::c_void>(),
        )
    };
    if rc < 0 {
        return Err(std::io::Error::last_os_error()).context("mailbox property ioctl");
    }
    if msg[1] != 0x8000_0000 {
        return Err(anyhow!("mailbox request failed: {:08X}", msg[1]));
    }
    Ok(msg[6])
}

pub struct SysTimer;

impl SysTimer {
    /// Initializes the hardware timer backend on a Raspberry Pi.
    ///
    /// Maps the system and ARM timer registers from `/dev/mem`,
    /// programs the ARM free-running counter and queries the core
    /// clock to scale it. Must be called before the first clock read;
    /// later calls (and calls after the host fallback was selected)
    /// are ignored.
    pub fn init_rpi(peripheral_base: u64) -> Result<()> {
        if BACKEND.get().is_some() {
            return Ok(());
        }

        let mem = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/mem")
            .context("open /dev/mem")?;
        let mut map = unsafe {
            MmapOptions::new()
                .offset(peripheral_base)
                .len(0x0001_0000)
                .map_mut(&mem)
                .context("map timer registers")?
        };

        let base = map.as_mut_ptr().cast::<u32>();
        let syst = unsafe { base.add(SYST_OFFSET / 4) }.cast_const();
        let armt = unsafe { base.add(ARMT_OFFSET / 4) };

        unsafe { ptr::write_volatile(armt.add(ARMT_CTRL), ARMT_CTRL_FREERUN) };

        let core_mhz = match mailbox_core_clock_hz() {
            Ok(hz) => hz / 1_000_000,
            Err(e) => {
                warn!("Core clock query failed ({e:#}), assuming {DEFAULT_CORE_MHZ} MHz");
                DEFAULT_CORE_MHZ
            }
        };
        debug!("System timer on hardware, core clock {core_mhz} MHz");

        let _ = BACKEND.set(Backend::Rpi {
            _map: map,
            syst,
            armt,
            core_mhz,
            ticks64: AtomicU64::new(0),
        });
        Ok(())
    }

    /// Low 32 bits of the free-running microsecond counter
    pub fn now_us() -> u32 {
        match backend() {
            Backend::Rpi { syst, .. } => unsafe { ptr::read_volatile(syst.add(SYST_CLO)) },
            Backend::Host { epoch } => epoch.elapsed().as_micros() as u32,
        }
    }

    /// Low 32 bits of a free-running nanosecond counter. Wraps every
    /// few seconds; only usable for short interval measurements.
    pub fn now_ns() -> u32 {
        match backend() {
            Backend::Rpi { armt, core_mhz, .. } => {
                let ticks = unsafe { ptr::read_volatile(armt.cast_const().add(ARMT_FREERUN)) };
                ((u64::from(ticks) * 1000) / u64::from(*core_mhz)) as u32
            }
            Backend::Host { epoch } => epoch.elapsed().as_nanos() as u32,
        }
    }

    /// Full-width monotonic nanosecond tick, used to timestamp bus
    /// samples
    pub fn monotonic_ns() -> u64 {
        match backend() {
            Backend::Rpi {
                armt,
                core_mhz,
                ticks64,
                ..
            } => {
                let now = unsafe { ptr::read_volatile(armt.cast_const().add(ARMT_FREERUN)) };
                // Fold the 32-bit counter into a 64-bit tick count,
                // assuming this is called at least once per wrap
                let prev = ticks64.load(Ordering::Relaxed);
                let mut ext = (prev & !0xFFFF_FFFF) | u64::from(now);
                if ext < prev {
                    ext += 1 << 32;
                }
                ticks64.store(ext, Ordering::Relaxed);
                (ext * 1000) / u64::from(*core_mhz)
            }
            Backend::Host { epoch } => epoch.elapsed().as_nanos() as u64,
        }
    }

    /// Full-width microsecond counter
    pub fn monotonic_us() -> u64 {
        match backend() {
            Backend::Rpi { syst, .. } => loop {
                let hi = unsafe { ptr::read_volatile(syst.add(SYST_CHI)) };
                let lo = unsafe { ptr::read_volatile(syst.add(SYST_CLO)) };
                if hi == unsafe { ptr::read_volatile(syst.add(SYST_CHI)) } {
                    break (u64::from(hi) << 32) | u64::from(lo);
                }
            },
            Backend::Host { epoch } => epoch.elapsed().as_micros() as u64,
        }
    }

    /// Busy-waits for the given number of microseconds on hardware
    pub fn sleep_us(us: u32) {
        match backend() {
            Backend::Rpi { .. } => {
                let start = Self::now_us();
                while Self::now_us().wrapping_sub(start) < us {}
            }
            Backend::Host { .. } => std::thread::sleep(Duration::from_micros(u64::from(us))),
        }
    }

    /// Busy-waits for the given number of nanoseconds on hardware
    pub fn sleep_ns(ns: u32) {
        match backend() {
            Backend::Rpi { armt, core_mhz, .. } => {
                let diff = ((u64::from(*core_mhz) * u64::from(ns)) / 1000) as u32;
                let start = unsafe { ptr::read_volatile(armt.cast_const().add(ARMT_FREERUN)) };
                loop {
                    let now = unsafe { ptr::read_volatile(armt.cast_const().add(ARMT_FREERUN)) };
                    if now.wrapping_sub(start) >= diff {
                        break;
                    }
                }
            }
            Backend::Host { .. } => std::thread::sleep(Duration::from_nanos(u64::from(ns))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clocks_are_monotonic() {
        let a = SysTimer::monotonic_ns();
        SysTimer::sleep_us(100);
        let b = SysTimer::monotonic_ns();
        assert!(b > a);
        assert!(b - a >= 100_000);
    }

    #[test]
    fn us_tracks_ns() {
        let us0 = SysTimer::monotonic_us();
        SysTimer::sleep_us(2000);
        let us1 = SysTimer::monotonic_us();
        assert!(us1 - us0 >= 2000);
    }
}
