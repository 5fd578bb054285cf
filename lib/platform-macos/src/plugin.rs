//! Minimal COM-style binding to `IOFireWireLib`'s `IOFireWireDeviceInterface`.
//! `io-kit-sys` only covers the generic I/O-registry and plugin
//! bootstrap calls; the FireWire-specific interface is a CFPlugIn COM
//! vtable from `IOFireWireLib.h` that has no existing `-sys` crate.
//! Only the slots this backend calls are named; everything before them
//! is kept as an opaque reserved pointer so the struct's layout still
//! lines up with the real vtable.

use std::os::raw::c_void;

use io_kit_sys::ret::IOReturn;
use io_kit_sys::types::io_object_t;
use mach2::kern_return::kern_return_t;

pub type Boolean = u8;

#[repr(C)]
pub struct FwAddress {
    pub node_id: u16,
    pub addr_hi: u16,
    pub addr_lo: u32,
}

/// Layout mirrors `IOFireWireDeviceInterface` from `IOFireWireLib.h`:
/// the three `IUnknown` slots, then plugin/device lifecycle slots this
/// backend never calls (kept opaque), then the read/write pair used for
/// DMA transactions.
#[repr(C)]
pub struct IoFireWireDeviceInterface {
    pub _reserved0: *const c_void,
    pub query_interface: unsafe extern "C" fn(this: *mut c_void, iid: *const c_void, ppv: *mut *mut c_void) -> kern_return_t,
    pub add_ref: unsafe extern "C" fn(this: *mut c_void) -> u32,
    pub release: unsafe extern "C" fn(this: *mut c_void) -> u32,
    pub _reserved_lifecycle: [*const c_void; 6],
    pub open: unsafe extern "C" fn(this: *mut c_void) -> IOReturn,
    pub open_with_session_ref: unsafe extern "C" fn(this: *mut c_void, session: io_object_t) -> IOReturn,
    pub close: unsafe extern "C" fn(this: *mut c_void),
    pub _reserved_notify: [*const c_void; 4],
    pub read: unsafe extern "C" fn(
        this: *mut c_void,
        device: io_object_t,
        addr: *const FwAddress,
        buf: *mut c_void,
        size: *mut u32,
        fail_on_reset: Boolean,
        generation: u32,
    ) -> IOReturn,
    pub write: unsafe extern "C" fn(
        this: *mut c_void,
        device: io_object_t,
        addr: *const FwAddress,
        buf: *const c_void,
        size: *mut u32,
        fail_on_reset: Boolean,
        generation: u32,
    ) -> IOReturn,
}

/// `REFIID` as CFPlugIn passes it: a 16-byte UUID by value, not a
/// pointer (`IOKit/IOCFPlugIn.h`'s `IUNKNOWN_C_GUTS`).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct CfUuidBytes(pub [u8; 16]);

/// Opaque `CFUUIDRef`, kept as a raw pointer rather than pulling in
/// `core-foundation`'s higher-level `CFUUID` wrapper, since every use
/// here is a single create/get-bytes/release round trip.
pub type CfUuidRef = *const c_void;

/// `kIOFireWireDeviceInterfaceID` from `IOFireWireLib.h`. Unlike
/// `kIOCFPlugInInterfaceID`, this constant is built in the header via
/// `CFUUIDGetConstantUUIDWithBytes` rather than exported as a linkable
/// symbol, so the 16 bytes are reproduced here directly.
pub const FIREWIRE_DEVICE_INTERFACE_ID: [u8; 16] = [
    0x98, 0x1f, 0xa9, 0x30, 0x3a, 0xdb, 0x11, 0xd5, 0x85, 0xd4, 0x00, 0x30, 0x65, 0x4a, 0x9e, 0x5d,
];

extern "C" {
    #[allow(improper_ctypes)]
    fn CFUUIDCreateWithBytes(
        alloc: *const c_void,
        b0: u8,
        b1: u8,
        b2: u8,
        b3: u8,
        b4: u8,
        b5: u8,
        b6: u8,
        b7: u8,
        b8: u8,
        b9: u8,
        b10: u8,
        b11: u8,
        b12: u8,
        b13: u8,
        b14: u8,
        b15: u8,
    ) -> CfUuidRef;

    fn CFUUIDGetUUIDBytes(uuid: CfUuidRef) -> CfUuidBytes;
}

/// Build a `CFUUIDRef` for a 16-byte interface ID, for use as the
/// `interfaceType` argument to `IOCreatePlugInInterfaceForService`.
pub fn cfuuid_create(bytes: [u8; 16]) -> CfUuidRef {
    unsafe {
        CFUUIDCreateWithBytes(
            std::ptr::null(),
            bytes[0],
            bytes[1],
            bytes[2],
            bytes[3],
            bytes[4],
            bytes[5],
            bytes[6],
            bytes[7],
            bytes[8],
            bytes[9],
            bytes[10],
            bytes[11],
            bytes[12],
            bytes[13],
            bytes[14],
            bytes[15],
        )
    }
}

/// Read a `CFUUIDRef`'s bytes back out, for passing to `QueryInterface`
/// as the `REFIID` argument.
pub fn cfuuid_get_bytes(uuid: CfUuidRef) -> CfUuidBytes {
    unsafe { CFUUIDGetUUIDBytes(uuid) }
}
