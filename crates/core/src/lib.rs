//! Host-side memory forensics over IEEE 1394 ("FireWire").
//!
//! Enumerates attached FireWire devices, reads and writes physical
//! memory on them by exploiting the bus's DMA capability, and reports
//! identity scraped from each device's Configuration Status ROM.
//!
//! This crate is the portable layer: bus/device lifecycle, the
//! pipelined request engine, and the SBP-2 publisher. Platform backends
//! live in sibling crates and are selected at compile time by
//! `target_os`.

pub mod backend;
pub mod bus;
pub mod config;
pub mod device;
pub mod engine;
pub mod sbp2;

pub use backend::{PlatformBus, PlatformDevice, PlatformError, Sbp2Status};
pub use bus::{Bus, Enumerated};
pub use config::EngineConfig;
pub use device::Device;
pub use firewire_forensics_shared::{result_to_str, Direction, Request, ResultCode};

#[cfg(target_os = "linux")]
pub fn alloc_bus() -> Result<Bus, ResultCode> {
    let platform = firewire_forensics_platform_linux::LinuxBus::alloc().map_err(|e| {
        log::warn!("failed to allocate firewire bus: {e}");
        if e.is_permission_denied() {
            ResultCode::NoPerm
        } else {
            ResultCode::OtherError
        }
    })?;
    Ok(Bus::new(Box::new(platform)))
}

#[cfg(target_os = "macos")]
pub fn alloc_bus() -> Result<Bus, ResultCode> {
    let platform = firewire_forensics_platform_macos::MacBus::alloc().map_err(|e| {
        log::warn!("failed to allocate firewire bus: {e}");
        ResultCode::OtherError
    })?;
    Ok(Bus::new(Box::new(platform)))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn alloc_bus() -> Result<Bus, ResultCode> {
    Err(ResultCode::OtherError)
}
