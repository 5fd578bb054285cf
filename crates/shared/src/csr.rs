//! Pure decoder for the FireWire Configuration Status ROM (CSR).
//!
//! Takes a 256-quadlet ROM snapshot in host endianness and extracts the
//! identity fields a [`crate::result::ResultCode`]-returning caller needs:
//! GUID, max request size, and vendor/model id + name. Every backend feeds
//! the same ROM bytes through this one function, so ingest-side byte
//! swapping (IOKit hands back big-endian quadlets) happens in the backend,
//! never here.

/// Number of 32-bit quadlets in a CSR snapshot.
pub const ROM_QUADLETS: usize = 256;

/// Bytes available for a vendor/product name, including the trailing NUL.
pub const NAME_BUF_LEN: usize = 64;

/// Default max request size when the bus-info block is absent or malformed.
pub const DEFAULT_MAX_REQ: u32 = 512;

const KEY_VENDOR_ID: u8 = 0x03;
const KEY_MODEL_ID: u8 = 0x17;
const KEY_DESCRIPTOR_LEAF: u8 = 0x81;
const BUS_NAME_1394: u32 = 0x3133_3934; // ASCII "1394"

/// Fields recovered from a CSR snapshot. Absent fields keep their
/// zero/empty default rather than being `Option`, matching the C struct
/// this is decoded into at the call site.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CsrInfo {
    pub guid: u64,
    pub max_req: u32,
    pub vendor_id: u32,
    pub vendor_name: String,
    pub product_id: u32,
    pub product_name: String,
}

/// Decode a 256-quadlet ROM snapshot. Never fails: a malformed or absent
/// bus-info block (inclusive length under 5 quadlets) simply yields
/// [`CsrInfo::default`] fields — default max_req of 512, empty names,
/// GUID left at zero — rather than an error a caller would need to
/// handle on every read.
pub fn parse_csr(rom: &[u32; ROM_QUADLETS]) -> CsrInfo {
    let mut info = CsrInfo {
        max_req: DEFAULT_MAX_REQ,
        ..CsrInfo::default()
    };

    // Bus-info length field: quadlets following the header quadlet itself
    // (bus name, capabilities, two GUID words). The inclusive length also
    // counts the header, so a well-formed block has inclusive_len >= 5.
    let trailing = ((rom[0] >> 16) & 0xFF) as usize;
    let inclusive_len = trailing + 1;
    if inclusive_len < 5 || inclusive_len > ROM_QUADLETS {
        return info;
    }

    if rom[1] == BUS_NAME_1394 {
        let lgsz = (rom[2] >> 12) & 0xF;
        info.max_req = 2u32 << lgsz;
    }

    info.guid = (u64::from(rom[3]) << 32) | u64::from(rom[4]);

    let diroff = inclusive_len;
    let mut i = diroff;
    while i < ROM_QUADLETS {
        let entry = rom[i];
        let key = (entry >> 24) as u8;
        let value = entry & 0x00FF_FFFF;

        match key {
            KEY_VENDOR_ID => {
                info.vendor_id = value;
                if let Some(name) = try_decode_following_leaf(rom, diroff, i) {
                    info.vendor_name = name;
                }
            }
            KEY_MODEL_ID => {
                info.product_id = value;
                if let Some(name) = try_decode_following_leaf(rom, diroff, i) {
                    info.product_name = name;
                }
            }
            _ => {}
        }

        i += 1;
    }

    info
}

/// If the entry immediately after `entry_idx` is a descriptor-leaf pointer
/// (key 0x81), resolve and decode the text leaf it points at.
fn try_decode_following_leaf(rom: &[u32; ROM_QUADLETS], diroff: usize, entry_idx: usize) -> Option<String> {
    let next_idx = entry_idx + 1;
    if next_idx >= ROM_QUADLETS {
        return None;
    }
    let next = rom[next_idx];
    let next_key = (next >> 24) as u8;
    if next_key != KEY_DESCRIPTOR_LEAF {
        return None;
    }

    let pointer = (next & 0x00FF_FFFF) as usize;
    let i = next_idx - diroff;
    let leafoff = diroff.checked_add(i)?.checked_add(pointer)?;
    decode_text_leaf(rom, leafoff)
}

/// Decode a minimal-ASCII text descriptor leaf at `leafoff`: valid only if
/// the two quadlets following its length/crc header (spec-id, language)
/// are both zero.
fn decode_text_leaf(rom: &[u32; ROM_QUADLETS], leafoff: usize) -> Option<String> {
    if leafoff + 2 >= ROM_QUADLETS {
        return None;
    }
    let header = rom[leafoff];
    let spec_id = rom[leafoff + 1];
    let language = rom[leafoff + 2];
    if spec_id != 0 || language != 0 {
        return None;
    }

    let trailing_quads = ((header >> 16) & 0xFFFF) as usize;
    let nquad = trailing_quads + 1;
    if nquad < 3 {
        return None;
    }
    let text_quads = nquad - 3;
    let available = ROM_QUADLETS.saturating_sub(leafoff + 3);
    let text_quads = text_quads.min(available);

    let mut bytes = Vec::with_capacity((NAME_BUF_LEN - 1).min(text_quads * 4));
    let max_bytes = NAME_BUF_LEN - 1;
    'outer: for q in 0..text_quads {
        let quad = rom[leafoff + 3 + q];
        for shift in [24, 16, 8, 0] {
            if bytes.len() >= max_bytes {
                break 'outer;
            }
            bytes.push((quad >> shift) as u8);
        }
    }

    // Minimal-ASCII leaves are NUL-padded; drop that padding from the
    // Rust-side string but keep the original truncation-to-max_bytes
    // behavior for anything that wasn't padding.
    while bytes.last() == Some(&0) {
        bytes.pop();
    }

    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom_from(quads: &[u32]) -> [u32; ROM_QUADLETS] {
        let mut rom = [0u32; ROM_QUADLETS];
        rom[..quads.len()].copy_from_slice(quads);
        rom
    }

    #[test]
    fn minimal_csr_without_descriptor_leaf() {
        let rom = rom_from(&[
            0x0404_0000,
            0x3133_3934,
            0x0000_a000,
            0x0011_2233,
            0x4455_6677,
            0x0300_0123,
        ]);
        let info = parse_csr(&rom);
        assert_eq!(info.max_req, 2 << 10);
        assert_eq!(info.guid, 0x0011_2233_4455_6677);
        assert_eq!(info.vendor_id, 0x0000_0123);
        assert_eq!(info.vendor_name, "");
        assert_eq!(info.product_id, 0);
    }

    #[test]
    fn short_bus_info_block_keeps_defaults() {
        let rom = rom_from(&[0x0000_0000, 0x3133_3934]);
        let info = parse_csr(&rom);
        assert_eq!(info.max_req, DEFAULT_MAX_REQ);
        assert_eq!(info.guid, 0);
        assert_eq!(info.vendor_id, 0);
        assert_eq!(info.vendor_name, "");
    }

    #[test]
    fn non_1394_bus_name_keeps_default_max_req() {
        let rom = rom_from(&[0x0404_0000, 0xDEAD_BEEF, 0, 0x1111_1111, 0x2222_2222]);
        let info = parse_csr(&rom);
        assert_eq!(info.max_req, DEFAULT_MAX_REQ);
    }

    #[test]
    fn descriptor_leaf_decodes_vendor_name() {
        // bus info block: header(trailing=4), "1394", caps, guid hi/lo -> inclusive_len=5
        // directory starts at index 5: vendor id entry, then a leaf pointer entry.
        let mut rom = [0u32; ROM_QUADLETS];
        rom[0] = 0x0404_0000;
        rom[1] = BUS_NAME_1394;
        rom[2] = 0x0000_a000;
        rom[3] = 0x0011_2233;
        rom[4] = 0x4455_6677;
        rom[5] = (KEY_VENDOR_ID as u32) << 24 | 0x0000_42; // vendor id entry at index 5
        rom[6] = (KEY_DESCRIPTOR_LEAF as u32) << 24 | 0x0000_02; // pointer: leaf at (diroff=5)+(i=1)+2 = 8
        rom[8] = 0x0002_0000; // leaf header: 2 trailing quadlets -> nquad=3 -> 0 text quadlets? need >=1
        // adjust to carry one text quadlet: 3 trailing -> nquad=4 -> 1 text quadlet (4 bytes)
        rom[8] = 0x0003_0000;
        rom[9] = 0; // spec id
        rom[10] = 0; // language
        rom[11] = u32::from_be_bytes(*b"Acme");

        let info = parse_csr(&rom);
        assert_eq!(info.vendor_id, 0x42);
        assert_eq!(info.vendor_name, "Acme");
    }

    #[test]
    fn text_leaf_truncates_to_name_buffer() {
        let mut rom = [0u32; ROM_QUADLETS];
        rom[0] = 0x0404_0000;
        rom[1] = BUS_NAME_1394;
        rom[2] = 0x0000_a000;
        rom[3] = 0x0011_2233;
        rom[4] = 0x4455_6677;
        rom[5] = (KEY_MODEL_ID as u32) << 24;
        rom[6] = (KEY_DESCRIPTOR_LEAF as u32) << 24 | 0x0000_02;
        // 20 text quadlets (80 bytes) of 'A' -- longer than the 63-byte name buffer.
        rom[8] = (20u32 + 2) << 16;
        rom[9] = 0;
        rom[10] = 0;
        for q in 0..20 {
            rom[11 + q] = u32::from_be_bytes(*b"AAAA");
        }

        let info = parse_csr(&rom);
        assert_eq!(info.product_name.len(), NAME_BUF_LEN - 1);
        assert!(info.product_name.chars().all(|c| c == 'A'));
    }
}
