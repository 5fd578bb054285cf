//! A remote FireWire node. Created only by
//! [`crate::bus::Bus::enumerate`]; mutated only by open/close and the
//! user-data setters; destroyed only by bus destruction or the next
//! enumeration.

use std::any::Any;
use std::sync::{Arc, Weak};

use firewire_forensics_shared::{parse_csr, CsrInfo, Direction, Request, ResultCode, ROM_QUADLETS};

use crate::backend::PlatformDevice;
use crate::bus::BusToken;
use crate::config::EngineConfig;
use crate::engine;

/// One enumerated, possibly-opened node.
pub struct Device {
    platform: Box<dyn PlatformDevice>,
    bus_token: Weak<BusToken>,
    node_id: u16,
    generation: u32,
    identity: CsrInfo,
    csr: [u32; ROM_QUADLETS],
    config: EngineConfig,
    user_data: Option<Box<dyn Any>>,
}

impl Device {
    pub(crate) fn from_platform(platform: Box<dyn PlatformDevice>, bus_token: &Arc<BusToken>) -> Self {
        let csr = *platform.csr();
        let identity = parse_csr(&csr);
        Self {
            node_id: platform.node_id(),
            generation: platform.generation(),
            identity,
            csr,
            platform,
            bus_token: Arc::downgrade(bus_token),
            config: EngineConfig::default(),
            user_data: None,
        }
    }

    /// Replace this device's engine configuration (currently: the
    /// per-completion timeout used by every read/write call).
    pub fn configure(&mut self, config: EngineConfig) {
        self.config = config;
    }

    /// Whether this `Device` was produced by enumerating `bus`.
    /// Implemented as a non-owning weak back-reference rather than a
    /// raw back-pointer, so a dangling token (its Bus already dropped)
    /// simply compares unequal instead of dangling.
    pub fn belongs_to(&self, bus: &crate::bus::Bus) -> bool {
        self.bus_token.as_ptr() == bus.token_ptr()
    }

    pub fn node_id(&self) -> u16 {
        self.node_id
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn guid(&self) -> u64 {
        self.identity.guid
    }

    pub fn max_req(&self) -> u32 {
        self.identity.max_req
    }

    pub fn vendor_id(&self) -> u32 {
        self.identity.vendor_id
    }

    pub fn vendor_name(&self) -> &str {
        &self.identity.vendor_name
    }

    pub fn product_id(&self) -> u32 {
        self.identity.product_id
    }

    pub fn product_name(&self) -> &str {
        &self.identity.product_name
    }

    /// Copy out the 1024-byte CSR snapshot captured at discovery.
    pub fn csr(&self) -> [u32; ROM_QUADLETS] {
        self.csr
    }

    pub fn is_open(&self) -> bool {
        self.platform.is_open()
    }

    /// Idempotent: opening an already-open device succeeds without effect.
    pub fn open(&mut self) -> Result<(), ResultCode> {
        if self.platform.is_open() {
            return Ok(());
        }
        self.platform.open().map_err(|e| {
            log::warn!("open failed for node {:#06x}: {e}", self.node_id);
            ResultCode::IoError
        })
    }

    /// Idempotent: closing an already-closed device is a no-op.
    pub fn close(&mut self) {
        if !self.platform.is_open() {
            return;
        }
        self.platform.close();
    }

    pub fn set_user_data<T: 'static>(&mut self, data: T) {
        self.user_data = Some(Box::new(data));
    }

    pub fn user_data<T: 'static>(&self) -> Option<&T> {
        self.user_data.as_deref().and_then(<dyn Any>::downcast_ref)
    }

    pub fn user_data_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.user_data.as_deref_mut().and_then(<dyn Any>::downcast_mut)
    }

    pub fn clear_user_data(&mut self) {
        self.user_data = None;
    }

    /// Single physically-addressed read.
    pub fn read(&mut self, address: u64, buffer: &mut [u8]) -> Result<(), ResultCode> {
        let mut requests = [Request::new(address, buffer)];
        self.read_vectored(&mut requests)
    }

    /// Single physically-addressed write.
    pub fn write(&mut self, address: u64, buffer: &mut [u8]) -> Result<(), ResultCode> {
        let mut requests = [Request::new(address, buffer)];
        self.write_vectored(&mut requests)
    }

    /// Batched read over an ordered sequence of request records.
    pub fn read_vectored(&mut self, requests: &mut [Request]) -> Result<(), ResultCode> {
        self.run_batch(Direction::Read, requests)
    }

    /// Batched write over an ordered sequence of request records.
    pub fn write_vectored(&mut self, requests: &mut [Request]) -> Result<(), ResultCode> {
        self.run_batch(Direction::Write, requests)
    }

    fn run_batch(&mut self, direction: Direction, requests: &mut [Request]) -> Result<(), ResultCode> {
        assert!(
            self.platform.is_open(),
            "request issued on a closed FireWire device"
        );
        engine::run_batch(self.platform.as_mut(), direction, requests, self.config.timeout())
            .map_err(ResultCode::from)
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("node_id", &self.node_id)
            .field("generation", &self.generation)
            .field("guid", &format_args!("{:#018x}", self.identity.guid))
            .field("vendor_name", &self.identity.vendor_name)
            .field("product_name", &self.identity.product_name)
            .field("is_open", &self.platform.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Completion, PlatformError};
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Debug)]
    struct StubDevice {
        open: bool,
        open_calls: Rc<Cell<usize>>,
        close_calls: Rc<Cell<usize>>,
    }

    impl PlatformDevice for StubDevice {
        fn node_id(&self) -> u16 {
            1
        }
        fn generation(&self) -> u32 {
            1
        }
        fn csr(&self) -> &[u32; ROM_QUADLETS] {
            const ZERO: [u32; ROM_QUADLETS] = [0; ROM_QUADLETS];
            &ZERO
        }
        fn is_open(&self) -> bool {
            self.open
        }
        fn open(&mut self) -> Result<(), Box<dyn PlatformError>> {
            self.open = true;
            self.open_calls.set(self.open_calls.get() + 1);
            Ok(())
        }
        fn close(&mut self) {
            self.open = false;
            self.close_calls.set(self.close_calls.get() + 1);
        }
        fn max_req(&self) -> u32 {
            512
        }
        fn pipeline_depth(&self, _direction: Direction) -> usize {
            1
        }
        fn submit(
            &mut self,
            _closure: usize,
            _direction: Direction,
            _address: u64,
            _len: usize,
            _write_payload: Option<&[u8]>,
        ) -> Result<(), Box<dyn PlatformError>> {
            Ok(())
        }
        fn poll_completion(&mut self, _timeout: Duration) -> Option<Completion> {
            None
        }
        fn cancel_pending(&mut self) {}
    }

    fn new_device() -> (Device, Rc<Cell<usize>>, Rc<Cell<usize>>) {
        let open_calls = Rc::new(Cell::new(0));
        let close_calls = Rc::new(Cell::new(0));
        let stub = StubDevice {
            open: false,
            open_calls: open_calls.clone(),
            close_calls: close_calls.clone(),
        };
        let token = Arc::new(BusToken);
        let device = Device::from_platform(Box::new(stub), &token);
        (device, open_calls, close_calls)
    }

    #[test]
    fn open_is_idempotent() {
        let (mut device, open_calls, _close_calls) = new_device();
        device.open().unwrap();
        device.open().unwrap();
        assert!(device.is_open());
        assert_eq!(open_calls.get(), 1);
    }

    #[test]
    fn close_is_idempotent() {
        let (mut device, _open_calls, close_calls) = new_device();
        device.open().unwrap();
        device.close();
        device.close();
        assert!(!device.is_open());
        assert_eq!(close_calls.get(), 1);
    }

    #[test]
    fn close_without_open_is_a_no_op() {
        let (mut device, _open_calls, close_calls) = new_device();
        device.close();
        assert!(!device.is_open());
        assert_eq!(close_calls.get(), 0);
    }
}
