//! Re-export of the canonical SBP-2 unit directory. Lives in
//! `firewire-forensics-shared` so platform backends can install it
//! without depending back on this crate.

pub use firewire_forensics_shared::sbp2::{
    crc16, encode_entry, header_and_entries, LINUX_UNIT_DIRECTORY_KEY, UNIT_DIRECTORY,
};
