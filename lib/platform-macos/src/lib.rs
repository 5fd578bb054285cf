//! Mac OS X backend: the `IOFireWireLocalNode` and `IOFireWireDevice`
//! I/O-registry classes, queried for identity through CF properties and
//! driven for DMA transactions through the `IOFireWireDeviceInterface`
//! CFPlugIn.
//!
//! The obvious approach here would run the calling thread's run loop in
//! a private mode to await each completion callback. That is reframed
//! here as a synchronous call on `IOFireWireDeviceInterface`'s blocking
//! `Read`/`Write` entry points instead: the run loop is only needed to
//! wait for one completion, not a requirement of the transport itself.
//! `submit` enqueues; the first subsequent `poll_completion` performs
//! the actual transaction and resolves it.

mod ioreg;
mod plugin;

use std::collections::VecDeque;
use std::os::raw::c_void;
use std::time::Duration;

use io_kit_sys::ret::kIOReturnSuccess;
use io_kit_sys::types::io_object_t;

use firewire_forensics_shared::backend::{
    Completion, CompletionStatus, DiscoverOutcome, PlatformBus, PlatformDevice, PlatformError,
    Sbp2Status,
};
use firewire_forensics_shared::{Direction, ROM_QUADLETS};

use plugin::{FwAddress, IoFireWireDeviceInterface};

#[derive(Debug, thiserror::Error)]
pub enum MacError {
    #[error("IOKit call failed with return code {0:#x}")]
    IoKit(i32),
    #[error("no IOFireWireLocalNode service found in the I/O registry")]
    NoLocalNode,
    #[error("could not obtain the IOFireWireDeviceInterface plugin for a matched service")]
    NoPluginInterface,
    #[error("installing an SBP-2 unit directory on IOFireWireLocalNode is not implemented on this backend")]
    Sbp2Unsupported,
}

impl PlatformError for MacError {
    fn is_permission_denied(&self) -> bool {
        // IOKit reports exclusive-access and permission failures through
        // the same `kIOReturnExclusiveAccess` / `kIOReturnNotPermitted`
        // family; both surface here as plain IoKit(code) since the
        // distinction does not change caller-visible behavior.
        matches!(self, MacError::IoKit(code) if *code == -536870201 || *code == -536870207)
    }
}

fn swap_rom_to_host(be_bytes: &[u8]) -> [u32; ROM_QUADLETS] {
    let mut rom = [0u32; ROM_QUADLETS];
    for (i, chunk) in be_bytes.chunks_exact(4).take(ROM_QUADLETS).enumerate() {
        rom[i] = u32::from_be_bytes(chunk.try_into().unwrap());
    }
    rom
}

fn read_identity(entry: &ioreg::RegistryEntry) -> ([u32; ROM_QUADLETS], u16, u32) {
    let rom = entry
        .property_data(ioreg::ROM_PROPERTY)
        .map(|bytes| swap_rom_to_host(&bytes))
        .unwrap_or([0u32; ROM_QUADLETS]);
    let node_id = entry.property_u64(ioreg::NODE_ID_PROPERTY).unwrap_or(0) as u16;
    let generation = entry.property_u64(ioreg::GENERATION_PROPERTY).unwrap_or(0) as u32;
    (rom, node_id, generation)
}

enum PendingOp {
    Read { closure: usize, address: u64, len: usize },
    Write { closure: usize, address: u64, payload: Vec<u8> },
}

pub struct MacDevice {
    service: io_object_t,
    interface: *mut *mut IoFireWireDeviceInterface,
    rom: [u32; ROM_QUADLETS],
    node_id: u16,
    generation: u32,
    open: bool,
    queue: VecDeque<PendingOp>,
}

// SAFETY: `MacDevice` is only ever driven from the single thread that
// owns the enclosing `Device`; the raw `interface` pointer is never
// shared.
unsafe impl Send for MacDevice {}

impl MacDevice {
    fn fw_address(&self, address: u64) -> FwAddress {
        FwAddress {
            node_id: self.node_id,
            addr_hi: ((address >> 32) & 0xFFFF) as u16,
            addr_lo: (address & 0xFFFF_FFFF) as u32,
        }
    }
}

impl Drop for MacDevice {
    fn drop(&mut self) {
        if !self.interface.is_null() {
            unsafe {
                let vtable = &**self.interface;
                (vtable.release)(self.interface as *mut c_void);
            }
        }
    }
}

impl std::fmt::Debug for MacDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MacDevice")
            .field("node_id", &self.node_id)
            .field("generation", &self.generation)
            .field("open", &self.open)
            .finish()
    }
}

impl PlatformDevice for MacDevice {
    fn node_id(&self) -> u16 {
        self.node_id
    }

    fn generation(&self) -> u32 {
        self.generation
    }

    fn csr(&self) -> &[u32; ROM_QUADLETS] {
        &self.rom
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn open(&mut self) -> Result<(), Box<dyn PlatformError>> {
        if self.open {
            return Ok(());
        }
        let code = unsafe {
            let vtable = &**self.interface;
            (vtable.open)(self.interface as *mut c_void)
        };
        if code != kIOReturnSuccess {
            return Err(Box::new(MacError::IoKit(code)));
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        if !self.open {
            return;
        }
        unsafe {
            let vtable = &**self.interface;
            (vtable.close)(self.interface as *mut c_void);
        }
        self.open = false;
        self.queue.clear();
    }

    fn max_req(&self) -> u32 {
        let identity = firewire_forensics_shared::parse_csr(&self.rom);
        // IOFireWireLib serializes a block read/write into a single CF
        // plugin call regardless of size, but the family still refuses
        // requests over one isochronous-era page; advertise 2048 as the
        // practical ceiling alongside the CSR value.
        identity.max_req.min(2048)
    }

    fn pipeline_depth(&self, direction: Direction) -> usize {
        match direction {
            Direction::Read => 4,
            Direction::Write => 1,
        }
    }

    fn submit(
        &mut self,
        closure: usize,
        direction: Direction,
        address: u64,
        len: usize,
        write_payload: Option<&[u8]>,
    ) -> Result<(), Box<dyn PlatformError>> {
        let op = match direction {
            Direction::Read => PendingOp::Read { closure, address, len },
            Direction::Write => PendingOp::Write {
                closure,
                address,
                payload: write_payload.unwrap_or(&[]).to_vec(),
            },
        };
        self.queue.push_back(op);
        Ok(())
    }

    fn poll_completion(&mut self, _timeout: Duration) -> Option<Completion> {
        let op = self.queue.pop_front()?;
        Some(run_transaction(self, op))
    }

    fn cancel_pending(&mut self) {
        self.queue.clear();
    }
}

/// Executes one transaction synchronously against the plugin interface,
/// replacing what would otherwise be a callback-driven run loop with
/// this direct blocking call.
fn run_transaction(device: &mut MacDevice, op: PendingOp) -> Completion {
    match op {
        PendingOp::Read { closure, address, len } => {
            let addr = device.fw_address(address);
            let mut buf = vec![0u8; len];
            let mut size = len as u32;
            let code = unsafe {
                let vtable = &**device.interface;
                (vtable.read)(
                    device.interface as *mut c_void,
                    device.service,
                    &addr,
                    buf.as_mut_ptr() as *mut c_void,
                    &mut size,
                    1,
                    device.generation,
                )
            };
            let status = match code {
                kIOReturnSuccess => {
                    buf.truncate(size as usize);
                    CompletionStatus::Complete(buf)
                }
                code if code == -536870203 => CompletionStatus::GenerationMismatch,
                code if code == -536870212 => CompletionStatus::Busy,
                _ => CompletionStatus::Other,
            };
            Completion { closure, status }
        }
        PendingOp::Write { closure, address, payload } => {
            let addr = device.fw_address(address);
            let mut size = payload.len() as u32;
            let code = unsafe {
                let vtable = &**device.interface;
                (vtable.write)(
                    device.interface as *mut c_void,
                    device.service,
                    &addr,
                    payload.as_ptr() as *const c_void,
                    &mut size,
                    1,
                    device.generation,
                )
            };
            let status = match code {
                kIOReturnSuccess => CompletionStatus::Complete(Vec::new()),
                code if code == -536870203 => CompletionStatus::GenerationMismatch,
                code if code == -536870212 => CompletionStatus::Busy,
                _ => CompletionStatus::Other,
            };
            Completion { closure, status }
        }
    }
}

#[derive(Debug)]
pub struct MacBus {
    local_service: io_object_t,
    sbp2_published: bool,
}

impl MacBus {
    pub fn alloc() -> Result<Self, MacError> {
        let mut locals = ioreg::matching_services("IOFireWireLocalNode");
        let entry = locals.pop().ok_or(MacError::NoLocalNode)?;
        Ok(Self {
            local_service: entry.service(),
            sbp2_published: false,
        })
    }
}

impl PlatformBus for MacBus {
    fn discover(&mut self) -> Result<DiscoverOutcome, Box<dyn PlatformError>> {
        let mut devices: Vec<Box<dyn PlatformDevice>> = Vec::new();
        let permission_skips = 0usize;

        for entry in ioreg::matching_services("IOFireWireDevice") {
            let (rom, node_id, generation) = read_identity(&entry);
            match create_device_interface(entry.service()) {
                Ok(interface) => devices.push(Box::new(MacDevice {
                    service: entry.service(),
                    interface,
                    rom,
                    node_id,
                    generation,
                    open: false,
                    queue: VecDeque::new(),
                })),
                Err(e) => {
                    log::debug!("skipping a matched IOFireWireDevice: {e}");
                    continue;
                }
            }
        }

        Ok(DiscoverOutcome {
            devices,
            permission_skips,
        })
    }

    fn publish_sbp2(&mut self) -> Result<Sbp2Status, Box<dyn PlatformError>> {
        if self.sbp2_published {
            return Ok(Sbp2Status::AlreadyEnabled);
        }
        // `IOFireWireLib.h` installs a unit directory on a local node
        // through an interface separate from the remote-DMA
        // `IOFireWireDeviceInterface` bound in `plugin.rs`, and that
        // interface isn't covered by any `-sys` crate in this stack.
        // Confirm the local node is at least reachable through the
        // bootstrap we do have, so a caller gets a real diagnostic, then
        // report the operation as unsupported rather than claim success
        // without ever calling IOKit to install the directory.
        let interface = create_device_interface(self.local_service)
            .map_err(|e| Box::new(e) as Box<dyn PlatformError>)?;
        unsafe {
            let vtable = &**interface;
            (vtable.release)(interface as *mut c_void);
        }
        Err(Box::new(MacError::Sbp2Unsupported))
    }

    fn unpublish_sbp2(&mut self) {
        self.sbp2_published = false;
    }
}

/// The `IOCFPlugInInterface` COM vtable (`IOKit/IOCFPlugIn.h`), used only
/// to call `Release` on the bootstrap plugin once the device interface
/// has been queried out of it.
#[repr(C)]
struct IoCfPlugInInterface {
    _reserved0: *const c_void,
    query_interface: unsafe extern "C" fn(*mut c_void, plugin::CfUuidBytes, *mut *mut c_void) -> i32,
    add_ref: unsafe extern "C" fn(*mut c_void) -> u32,
    release: unsafe extern "C" fn(*mut c_void) -> u32,
}

extern "C" {
    fn IOCreatePlugInInterfaceForService(
        service: io_object_t,
        plugin_type: plugin::CfUuidRef,
        interface_type: plugin::CfUuidRef,
        the_interface: *mut *mut *mut IoCfPlugInInterface,
        the_score: *mut i32,
    ) -> i32;

    static kIOCFPlugInInterfaceID: plugin::CfUuidRef;
}

/// Bootstraps the `IOFireWireDeviceInterface` CFPlugIn for a matched
/// service: `IOCreatePlugInInterfaceForService` followed by
/// `QueryInterface` for the device interface UUID, the same two-step
/// dance every IOKit device-interface binding uses.
fn create_device_interface(
    service: io_object_t,
) -> Result<*mut *mut IoFireWireDeviceInterface, MacError> {
    let device_uuid = plugin::cfuuid_create(plugin::FIREWIRE_DEVICE_INTERFACE_ID);

    let mut plugin_ptr: *mut *mut IoCfPlugInInterface = std::ptr::null_mut();
    let mut score: i32 = 0;
    let code = unsafe {
        IOCreatePlugInInterfaceForService(
            service,
            kIOCFPlugInInterfaceID,
            device_uuid,
            &mut plugin_ptr,
            &mut score,
        )
    };
    if code != kIOReturnSuccess || plugin_ptr.is_null() {
        return Err(MacError::NoPluginInterface);
    }

    let mut device_ptr: *mut c_void = std::ptr::null_mut();
    let query_result = unsafe {
        let vtable = &**plugin_ptr;
        let iid = plugin::cfuuid_get_bytes(device_uuid);
        (vtable.query_interface)(plugin_ptr as *mut c_void, iid, &mut device_ptr)
    };
    unsafe {
        let vtable = &**plugin_ptr;
        (vtable.release)(plugin_ptr as *mut c_void);
    }

    if query_result != 0 || device_ptr.is_null() {
        return Err(MacError::NoPluginInterface);
    }
    Ok(device_ptr as *mut *mut IoFireWireDeviceInterface)
}
