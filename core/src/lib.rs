pub mod board;
pub mod bus;
pub mod capture;
pub mod gpio;
pub mod loopback;
pub mod sample;
pub mod sbc;
pub mod shm;
pub mod signal;
pub mod timer;

pub fn build_version() -> String {
    format!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}
