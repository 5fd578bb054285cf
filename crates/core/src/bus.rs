//! One logical handle to the host's FireWire subsystem. Owns its
//! platform state, its device list (in discovery order), and any SBP-2
//! publication.

use std::any::Any;
use std::sync::Arc;

use firewire_forensics_shared::ResultCode;

use crate::backend::{PlatformBus, Sbp2Status};
use crate::device::Device;

/// Zero-sized identity marker a [`Device`] holds a weak reference to, so
/// that `device.belongs_to(bus)` can be checked without Device owning a
/// real back-pointer into Bus, avoiding an owning cycle between the two.
#[derive(Debug)]
pub(crate) struct BusToken;

/// Outcome of [`Bus::enumerate`]. `NoPermission` is returned instead of
/// `Found` only when *zero* devices were enumerated and at least one
/// node was skipped for lack of access; the device list is simply
/// empty in that case, it is not suppressed.
pub enum Enumerated<'a> {
    Found(&'a [Device]),
    NoPermission,
}

impl<'a> Enumerated<'a> {
    pub fn devices(&self) -> &'a [Device] {
        match self {
            Enumerated::Found(devices) => devices,
            Enumerated::NoPermission => &[],
        }
    }
}

pub struct Bus {
    platform: Box<dyn PlatformBus>,
    token: Arc<BusToken>,
    devices: Vec<Device>,
    sbp2_enabled: bool,
    destroy_callback: Option<Box<dyn FnMut(&Device)>>,
    user_data: Option<Box<dyn Any>>,
}

impl Bus {
    /// Wrap an already-allocated platform bus handle.
    pub fn new(platform: Box<dyn PlatformBus>) -> Self {
        Self {
            platform,
            token: Arc::new(BusToken),
            devices: Vec::new(),
            sbp2_enabled: false,
            destroy_callback: None,
            user_data: None,
        }
    }

    pub(crate) fn token_ptr(&self) -> *const BusToken {
        Arc::as_ptr(&self.token)
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn is_sbp2_enabled(&self) -> bool {
        self.sbp2_enabled
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

    /// Enable the SBP-2 unit directory on the host controller. Idempotent
    /// once it has succeeded: a second call returns
    /// `Ok(Sbp2Status::AlreadyEnabled)` rather than re-publishing.
    pub fn enable_sbp2(&mut self) -> Result<Sbp2Status, ResultCode> {
        if self.sbp2_enabled {
            return Ok(Sbp2Status::AlreadyEnabled);
        }
        let status = self.platform.publish_sbp2().map_err(|e| {
            log::warn!("sbp2 publish failed: {e}");
            if e.is_permission_denied() {
                ResultCode::NoPerm
            } else {
                ResultCode::IoError
            }
        })?;
        self.sbp2_enabled = true;
        Ok(status)
    }

    /// Re-enumerate devices on this bus. Destroys the previous device
    /// list first (firing whatever destruction callback was registered
    /// at the *previous* call to `enumerate`), then stores `on_destroy`
    /// for the *next* invalidation.
    pub fn enumerate(
        &mut self,
        on_destroy: Option<Box<dyn FnMut(&Device)>>,
    ) -> Result<Enumerated<'_>, ResultCode> {
        self.clear_devices();

        let outcome = self.platform.discover().map_err(|e| {
            log::warn!("device discovery failed: {e}");
            ResultCode::OtherError
        })?;

        if outcome.permission_skips > 0 {
            log::debug!(
                "{} firewire node(s) skipped during enumeration due to permissions",
                outcome.permission_skips
            );
        }

        self.devices = outcome
            .devices
            .into_iter()
            .map(|platform_device| Device::from_platform(platform_device, &self.token))
            .collect();
        self.destroy_callback = on_destroy;

        if self.devices.is_empty() && outcome.permission_skips > 0 {
            Ok(Enumerated::NoPermission)
        } else {
            Ok(Enumerated::Found(&self.devices))
        }
    }

    /// Cascade-destroy: close every device, fire the destruction
    /// callback once per device, drop the device list, then release
    /// platform state including any SBP-2 publication. Idempotent.
    pub fn destroy(&mut self) {
        self.clear_devices();
        if self.sbp2_enabled {
            self.platform.unpublish_sbp2();
            self.sbp2_enabled = false;
        }
    }

    fn clear_devices(&mut self) {
        let mut callback = self.destroy_callback.take();
        for mut device in self.devices.drain(..) {
            device.close();
            if let Some(callback) = callback.as_mut() {
                callback(&device);
            }
        }
    }
}

impl Drop for Bus {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("devices", &self.devices.len())
            .field("sbp2_enabled", &self.sbp2_enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DiscoverOutcome, PlatformDevice, PlatformError};
    use firewire_forensics_shared::{Direction, ROM_QUADLETS};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    #[derive(Debug)]
    struct StubError;
    impl std::fmt::Display for StubError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "stub error")
        }
    }
    impl std::error::Error for StubError {}
    impl PlatformError for StubError {
        fn is_permission_denied(&self) -> bool {
            false
        }
    }

    #[derive(Debug)]
    struct StubDevice {
        node_id: u16,
        open: bool,
    }
    impl PlatformDevice for StubDevice {
        fn node_id(&self) -> u16 {
            self.node_id
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
            Ok(())
        }
        fn close(&mut self) {
            self.open = false;
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
        fn poll_completion(&mut self, _timeout: Duration) -> Option<crate::backend::Completion> {
            None
        }
        fn cancel_pending(&mut self) {}
    }

    #[derive(Debug, Default)]
    struct StubBus {
        /// Each `discover()` call pops the next generation off the front.
        generations: std::collections::VecDeque<Vec<u16>>,
        permission_skips: usize,
        sbp2: bool,
    }
    impl StubBus {
        fn with_nodes(nodes: Vec<u16>) -> Self {
            Self {
                generations: std::collections::VecDeque::from(vec![nodes]),
                ..Default::default()
            }
        }
    }
    impl PlatformBus for StubBus {
        fn discover(&mut self) -> Result<DiscoverOutcome, Box<dyn PlatformError>> {
            let nodes = self.generations.pop_front().unwrap_or_default();
            let devices = nodes
                .into_iter()
                .map(|node_id| Box::new(StubDevice { node_id, open: false }) as Box<dyn PlatformDevice>)
                .collect();
            Ok(DiscoverOutcome {
                devices,
                permission_skips: self.permission_skips,
            })
        }
        fn publish_sbp2(&mut self) -> Result<Sbp2Status, Box<dyn PlatformError>> {
            if self.sbp2 {
                Ok(Sbp2Status::AlreadyEnabled)
            } else {
                self.sbp2 = true;
                Ok(Sbp2Status::Enabled)
            }
        }
        fn unpublish_sbp2(&mut self) {
            self.sbp2 = false;
        }
    }

    #[test]
    fn enable_sbp2_is_idempotent() {
        let mut bus = Bus::new(Box::new(StubBus::default()));
        assert_eq!(bus.enable_sbp2().unwrap(), Sbp2Status::Enabled);
        assert_eq!(bus.enable_sbp2().unwrap(), Sbp2Status::AlreadyEnabled);
    }

    #[test]
    fn destroy_fires_callback_exactly_once_per_device() {
        let mut bus = Bus::new(Box::new(StubBus::with_nodes(vec![1, 2, 3])));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_for_cb = seen.clone();
        bus.enumerate(Some(Box::new(move |device: &Device| {
            seen_for_cb.borrow_mut().push(device.node_id());
        })))
        .unwrap();
        assert_eq!(bus.devices().len(), 3);

        bus.destroy();
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
        assert!(bus.devices().is_empty());
    }

    #[test]
    fn reenumeration_invalidates_previous_list_before_returning_new_one() {
        let mut bus = Bus::new(Box::new(StubBus {
            generations: std::collections::VecDeque::from(vec![vec![1, 2], vec![7]]),
            ..Default::default()
        }));
        let destroyed = Rc::new(RefCell::new(Vec::new()));
        let destroyed_for_cb = destroyed.clone();
        bus.enumerate(Some(Box::new(move |device: &Device| {
            destroyed_for_cb.borrow_mut().push(device.node_id());
        })))
        .unwrap();

        let enumerated = bus.enumerate(None).unwrap();
        assert_eq!(enumerated.devices().len(), 1);
        assert_eq!(enumerated.devices()[0].node_id(), 7);
        assert_eq!(*destroyed.borrow(), vec![1, 2]);
    }

    #[test]
    fn devices_belong_to_their_enumerating_bus() {
        let mut bus = Bus::new(Box::new(StubBus::with_nodes(vec![42])));
        bus.enumerate(None).unwrap();
        let device = &bus.devices()[0];
        assert!(device.belongs_to(&bus));

        let other = Bus::new(Box::new(StubBus::default()));
        assert!(!device.belongs_to(&other));
    }
}
