//! I/O-registry matching and property lookup: the `IOFireWireLocalNode`
//! and `IOFireWireDevice` classes are matched through the standard
//! IOKit service-matching dictionary, and identity is read back as CF
//! properties rather than through the COM interface.

use std::ffi::CString;

use core_foundation::base::{CFType, TCFType};
use core_foundation::data::CFData;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use io_kit_sys::keys::kIOMasterPortDefault;
use io_kit_sys::ret::kIOReturnSuccess;
use io_kit_sys::types::{io_iterator_t, io_object_t, io_service_t};
use io_kit_sys::{
    IOIteratorNext, IOObjectRelease, IORegistryEntryCreateCFProperty, IOServiceGetMatchingServices,
    IOServiceMatching,
};

/// Property holding the 1024-byte CSR, big-endian.
pub const ROM_PROPERTY: &str = "FireWire Device ROM / Offset 0";
pub const NODE_ID_PROPERTY: &str = "FireWire Node ID";
pub const GENERATION_PROPERTY: &str = "FireWire Generation ID";

/// One matched registry entry, released on drop.
pub struct RegistryEntry(io_object_t);

impl RegistryEntry {
    pub fn service(&self) -> io_service_t {
        self.0
    }

    pub fn property_data(&self, key: &str) -> Option<Vec<u8>> {
        let cf_key = CFString::new(key);
        let value = unsafe {
            IORegistryEntryCreateCFProperty(
                self.0,
                cf_key.as_concrete_TypeRef(),
                core_foundation::base::kCFAllocatorDefault,
                0,
            )
        };
        if value.is_null() {
            return None;
        }
        let cf_type = unsafe { CFType::wrap_under_create_rule(value) };
        cf_type
            .downcast::<CFData>()
            .map(|data| data.bytes().to_vec())
    }

    pub fn property_u64(&self, key: &str) -> Option<u64> {
        let cf_key = CFString::new(key);
        let value = unsafe {
            IORegistryEntryCreateCFProperty(
                self.0,
                cf_key.as_concrete_TypeRef(),
                core_foundation::base::kCFAllocatorDefault,
                0,
            )
        };
        if value.is_null() {
            return None;
        }
        let cf_type = unsafe { CFType::wrap_under_create_rule(value) };
        cf_type
            .downcast::<CFNumber>()
            .and_then(|n| n.to_i64())
            .map(|n| n as u64)
    }
}

impl Drop for RegistryEntry {
    fn drop(&mut self) {
        unsafe {
            IOObjectRelease(self.0);
        }
    }
}

/// Match every service of `class_name` currently in the I/O registry.
pub fn matching_services(class_name: &str) -> Vec<RegistryEntry> {
    let mut out = Vec::new();
    let Ok(c_name) = CString::new(class_name) else {
        return out;
    };
    let matching = unsafe { IOServiceMatching(c_name.as_ptr()) };
    if matching.is_null() {
        return out;
    }

    let mut iterator: io_iterator_t = 0;
    let result = unsafe {
        IOServiceGetMatchingServices(kIOMasterPortDefault, matching as *mut _, &mut iterator)
    };
    if result != kIOReturnSuccess {
        return out;
    }

    loop {
        let service = unsafe { IOIteratorNext(iterator) };
        if service == 0 {
            break;
        }
        out.push(RegistryEntry(service));
    }
    unsafe {
        IOObjectRelease(iterator);
    }
    out
}
