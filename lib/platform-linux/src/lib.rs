//! Linux backend: `/dev/fw*` character devices driven through the
//! `firewire-cdev` ioctl family. One node on the bus is the host's own
//! controller ("local node"); discovery skips it and [`LinuxBus`] keeps
//! its fd open for SBP-2 publication.
//!
//! Pipeline depth is 1 for both directions: older kernels serialize
//! `firewire-cdev` completions per fd, so keeping more than one
//! transaction in flight risks a completion being delivered for the
//! wrong closure.

mod ioctl;
mod sysfs;

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::fd::AsFd;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use firewire_forensics_shared::backend::{
    Completion, CompletionStatus, DiscoverOutcome, PlatformBus, PlatformDevice, PlatformError,
    Sbp2Status,
};
use firewire_forensics_shared::sbp2;
use firewire_forensics_shared::{Direction, ROM_QUADLETS};

/// `firewire-cdev` accepts payloads up to one page in a single
/// transaction; CSR-advertised `max_rec` is capped against this.
const KERNEL_MAX_REQUEST: u32 = 4096;

#[derive(Debug, thiserror::Error)]
pub enum LinuxError {
    #[error("i/o error on firewire device node: {0}")]
    Io(#[from] io::Error),
    #[error("ioctl failed: {0}")]
    Ioctl(#[from] nix::Error),
    #[error("no local firewire controller node found under /dev ({permission_skips} skipped for permissions)")]
    NoLocalNode { permission_skips: usize },
}

impl PlatformError for LinuxError {
    fn is_permission_denied(&self) -> bool {
        match self {
            LinuxError::Io(e) => e.kind() == io::ErrorKind::PermissionDenied,
            LinuxError::Ioctl(e) => matches!(e, nix::Error::EACCES | nix::Error::EPERM),
            LinuxError::NoLocalNode { permission_skips } => *permission_skips > 0,
        }
    }
}

fn fw_device_nodes() -> io::Result<Vec<u32>> {
    let mut indices = Vec::new();
    for entry in std::fs::read_dir("/dev")? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(digits) = name.strip_prefix("fw") {
            if let Ok(index) = digits.parse::<u32>() {
                indices.push(index);
            }
        }
    }
    indices.sort_unstable();
    Ok(indices)
}

struct OpenedNode {
    file: File,
    rom: [u32; ROM_QUADLETS],
    node_id: u16,
    local_node_id: u16,
    generation: u32,
}

fn open_node(index: u32) -> Result<OpenedNode, LinuxError> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(format!("/dev/fw{index}"))?;

    let mut rom_buf = [0u32; ROM_QUADLETS];
    let mut bus_reset = ioctl::FwCdevEventBusReset::default();
    let mut info = ioctl::FwCdevGetInfo {
        version: ioctl::FW_CDEV_VERSION,
        rom_length: (ROM_QUADLETS * 4) as u32,
        rom: rom_buf.as_mut_ptr() as u64,
        bus_reset: &mut bus_reset as *mut _ as u64,
        bus_reset_closure: 0,
        card: 0,
    };
    unsafe {
        ioctl::get_info(file.as_raw_fd(), &mut info)?;
    }

    Ok(OpenedNode {
        file,
        rom: rom_buf,
        node_id: bus_reset.node_id as u16,
        local_node_id: bus_reset.local_node_id as u16,
        generation: bus_reset.generation,
    })
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    closure: usize,
    direction: Direction,
    expected_len: usize,
}

#[derive(Debug)]
pub struct LinuxDevice {
    file: File,
    rom: [u32; ROM_QUADLETS],
    node_id: u16,
    generation: u32,
    open: bool,
    pending: Option<Pending>,
}

impl PlatformDevice for LinuxDevice {
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
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.pending = None;
    }

    fn max_req(&self) -> u32 {
        let identity = firewire_forensics_shared::parse_csr(&self.rom);
        identity.max_req.min(KERNEL_MAX_REQUEST)
    }

    fn pipeline_depth(&self, _direction: Direction) -> usize {
        1
    }

    fn submit(
        &mut self,
        closure: usize,
        direction: Direction,
        address: u64,
        len: usize,
        write_payload: Option<&[u8]>,
    ) -> Result<(), Box<dyn PlatformError>> {
        let tcode = match (direction, len == 4) {
            (Direction::Read, true) => ioctl::TCODE_READ_QUADLET_REQUEST,
            (Direction::Read, false) => ioctl::TCODE_READ_BLOCK_REQUEST,
            (Direction::Write, true) => ioctl::TCODE_WRITE_QUADLET_REQUEST,
            (Direction::Write, false) => ioctl::TCODE_WRITE_BLOCK_REQUEST,
        };
        let data_ptr = match write_payload {
            Some(buf) => buf.as_ptr() as u64,
            None => 0,
        };
        let request = ioctl::FwCdevSendRequest {
            tcode,
            length: len as u32,
            offset: address,
            closure: closure as u64,
            data: data_ptr,
            generation: self.generation,
        };
        unsafe {
            ioctl::send_request(self.file.as_raw_fd(), &request)
                .map_err(LinuxError::from)
                .map_err(|e| Box::new(e) as Box<dyn PlatformError>)?;
        }
        self.pending = Some(Pending {
            closure,
            direction,
            expected_len: len,
        });
        Ok(())
    }

    fn poll_completion(&mut self, timeout: Duration) -> Option<Completion> {
        let pending = self.pending?;
        let borrowed = self.file.as_fd();
        let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
        let timeout_ms: i32 = timeout.as_millis().min(i32::MAX as u128) as i32;
        let poll_timeout = PollTimeout::try_from(timeout_ms).unwrap_or(PollTimeout::MAX);
        let ready = poll(&mut fds, poll_timeout).ok()?;
        if ready == 0 {
            return None;
        }

        let mut buf = vec![0u8; 16 + pending.expected_len.max(4)];
        let n = self.file.read(&mut buf).ok()?;
        if n < 12 {
            return None;
        }
        let kind = u32::from_ne_bytes(buf[8..12].try_into().unwrap());

        self.pending = None;

        if kind == ioctl::FW_CDEV_EVENT_BUS_RESET {
            self.generation = u32::from_ne_bytes(buf[n.saturating_sub(4)..n].try_into().unwrap_or([0; 4]));
            return Some(Completion {
                closure: pending.closure,
                status: CompletionStatus::GenerationMismatch,
            });
        }
        if kind != ioctl::FW_CDEV_EVENT_RESPONSE || n < 20 {
            return Some(Completion {
                closure: pending.closure,
                status: CompletionStatus::Other,
            });
        }
        let rcode = u32::from_ne_bytes(buf[12..16].try_into().unwrap());
        let length = u32::from_ne_bytes(buf[16..20].try_into().unwrap()) as usize;

        let status = match rcode {
            ioctl::RCODE_COMPLETE => {
                let payload = if pending.direction == Direction::Read {
                    buf.get(20..20 + length).map(|p| p.to_vec()).unwrap_or_default()
                } else {
                    Vec::new()
                };
                CompletionStatus::Complete(payload)
            }
            ioctl::RCODE_GENERATION => CompletionStatus::GenerationMismatch,
            ioctl::RCODE_CONFLICT_ERROR => CompletionStatus::Busy,
            _ => CompletionStatus::Other,
        };

        Some(Completion {
            closure: pending.closure,
            status,
        })
    }

    fn cancel_pending(&mut self) {
        self.pending = None;
    }
}

#[derive(Debug)]
pub struct LinuxBus {
    local: File,
    local_index: u32,
    descriptor_handle: Option<u32>,
}

impl LinuxBus {
    pub fn alloc() -> Result<Self, LinuxError> {
        let mut permission_skips = 0usize;
        for index in fw_device_nodes()? {
            let node = match open_node(index) {
                Ok(node) => node,
                Err(e) => {
                    if e.is_permission_denied() {
                        log::debug!("permission denied opening /dev/fw{index}: {e}");
                        permission_skips += 1;
                    } else {
                        log::debug!("skipping /dev/fw{index}: {e}");
                    }
                    continue;
                }
            };
            if node.node_id == node.local_node_id {
                log::debug!("using /dev/fw{index} as the local controller node");
                return Ok(Self {
                    local: node.file,
                    local_index: index,
                    descriptor_handle: None,
                });
            }
        }
        Err(LinuxError::NoLocalNode { permission_skips })
    }
}

impl PlatformBus for LinuxBus {
    fn discover(&mut self) -> Result<DiscoverOutcome, Box<dyn PlatformError>> {
        let mut devices: Vec<Box<dyn PlatformDevice>> = Vec::new();
        let mut permission_skips = 0usize;
        let mut seen = HashSet::new();

        let indices = fw_device_nodes().map_err(LinuxError::from).map_err(box_err)?;
        for index in indices {
            if index == self.local_index || !seen.insert(index) {
                continue;
            }
            match open_node(index) {
                Ok(node) => {
                    if node.node_id == node.local_node_id {
                        continue;
                    }
                    if log::log_enabled!(log::Level::Debug) {
                        let vendor = sysfs::vendor_name(index);
                        let model = sysfs::model_name(index);
                        if vendor.is_some() || model.is_some() {
                            log::debug!(
                                "/dev/fw{index}: sysfs vendor={:?} model={:?}",
                                vendor.unwrap_or_default(),
                                model.unwrap_or_default()
                            );
                        }
                    }
                    devices.push(Box::new(LinuxDevice {
                        file: node.file,
                        rom: node.rom,
                        node_id: node.node_id,
                        generation: node.generation,
                        open: false,
                        pending: None,
                    }));
                }
                Err(e) if e.is_permission_denied() => {
                    log::debug!("permission denied opening /dev/fw{index}: {e}");
                    permission_skips += 1;
                }
                Err(e) => {
                    log::debug!("skipping /dev/fw{index}: {e}");
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
        if self.descriptor_handle.is_some() {
            return Ok(Sbp2Status::AlreadyEnabled);
        }
        let block = sbp2::header_and_entries();
        let mut add = ioctl::FwCdevAddDescriptor {
            immediate: 0,
            key: sbp2::LINUX_UNIT_DIRECTORY_KEY,
            data: block.as_ptr() as u64,
            length: block.len() as u32,
            handle: 0,
        };
        unsafe {
            ioctl::add_descriptor(self.local.as_raw_fd(), &mut add)
                .map_err(LinuxError::from)
                .map_err(box_err)?;
        }
        self.descriptor_handle = Some(add.handle);
        Ok(Sbp2Status::Enabled)
    }

    fn unpublish_sbp2(&mut self) {
        if let Some(handle) = self.descriptor_handle.take() {
            let remove = ioctl::FwCdevRemoveDescriptor { handle };
            let _ = unsafe { ioctl::remove_descriptor(self.local.as_raw_fd(), &remove) };
        }
    }
}

fn box_err(e: LinuxError) -> Box<dyn PlatformError> {
    Box::new(e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_request_ceiling_is_one_page() {
        assert_eq!(KERNEL_MAX_REQUEST, 4096);
    }

    #[test]
    fn sysfs_attr_path_ignores_missing_files() {
        assert_eq!(sysfs::model_name(999_999), None);
        assert_eq!(sysfs::vendor_name(999_999), None);
    }
}
