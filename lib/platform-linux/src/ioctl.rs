//! `firewire-cdev` wire structures and ioctl numbers, as described by
//! `linux/firewire-cdev.h`. Only the subset this backend uses is
//! reproduced: info query, descriptor publication, and request
//! submission. Completions and bus-reset notices arrive as events read
//! off the device fd, not through an ioctl.

use nix::{ioctl_readwrite, ioctl_write_ptr};

pub const FW_CDEV_VERSION: u32 = 5;

pub const FW_CDEV_EVENT_BUS_RESET: u32 = 0x00;
pub const FW_CDEV_EVENT_RESPONSE: u32 = 0x01;

pub const RCODE_COMPLETE: u32 = 0x00;
pub const RCODE_CONFLICT_ERROR: u32 = 0x04;
pub const RCODE_DATA_ERROR: u32 = 0x05;
pub const RCODE_TYPE_ERROR: u32 = 0x06;
pub const RCODE_ADDRESS_ERROR: u32 = 0x07;
pub const RCODE_GENERATION: u32 = 0x0b;
/// Driver-internal extension (not on the wire): no ack was ever seen for
/// the request, which `firewire-core` reports as this pseudo-rcode.
pub const RCODE_CANCELLED: u32 = 0x10;

pub const TCODE_WRITE_QUADLET_REQUEST: u32 = 0x0;
pub const TCODE_WRITE_BLOCK_REQUEST: u32 = 0x1;
pub const TCODE_READ_QUADLET_REQUEST: u32 = 0x4;
pub const TCODE_READ_BLOCK_REQUEST: u32 = 0x5;

#[repr(C)]
#[derive(Debug, Default)]
pub struct FwCdevGetInfo {
    pub version: u32,
    pub rom_length: u32,
    pub rom: u64,
    pub bus_reset: u64,
    pub bus_reset_closure: u64,
    pub card: u32,
}

#[repr(C)]
#[derive(Debug, Default)]
pub struct FwCdevEventBusReset {
    pub closure: u64,
    pub kind: u32,
    pub node_id: u32,
    pub local_node_id: u32,
    pub bm_node_id: u32,
    pub irm_node_id: u32,
    pub root_node_id: u32,
    pub generation: u32,
}

#[repr(C)]
#[derive(Debug, Default)]
pub struct FwCdevSendRequest {
    pub tcode: u32,
    pub length: u32,
    pub offset: u64,
    pub closure: u64,
    pub data: u64,
    pub generation: u32,
}

#[repr(C)]
#[derive(Debug, Default)]
pub struct FwCdevEventResponseHeader {
    pub closure: u64,
    pub kind: u32,
    pub rcode: u32,
    pub length: u32,
}

#[repr(C)]
#[derive(Debug, Default)]
pub struct FwCdevAddDescriptor {
    pub immediate: u32,
    pub key: u32,
    pub data: u64,
    pub length: u32,
    pub handle: u32,
}

#[repr(C)]
#[derive(Debug, Default)]
pub struct FwCdevRemoveDescriptor {
    pub handle: u32,
}

const FW_CDEV_MAGIC: u8 = b'#';

ioctl_readwrite!(get_info, FW_CDEV_MAGIC, 0x00, FwCdevGetInfo);
ioctl_write_ptr!(send_request, FW_CDEV_MAGIC, 0x01, FwCdevSendRequest);
ioctl_readwrite!(add_descriptor, FW_CDEV_MAGIC, 0x06, FwCdevAddDescriptor);
ioctl_write_ptr!(
    remove_descriptor,
    FW_CDEV_MAGIC,
    0x07,
    FwCdevRemoveDescriptor
);
