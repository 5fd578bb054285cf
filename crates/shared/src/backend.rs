//! The explicit backend capability: a vtable-like interface the
//! portable `Bus` and `Device` in the core crate dispatch through,
//! exposing discovery, open/close, request submission, and SBP-2
//! publication. Linux and IOKit share no state, so trait-object
//! dispatch is used instead of a tagged enum. The traits live here,
//! rather than in the core crate, so that platform backends can
//! implement them without depending on the core crate that in turn
//! selects backends by `target_os`.

use std::time::Duration;

use crate::csr::ROM_QUADLETS;
use crate::request::Direction;

/// A platform-specific failure. Each backend defines its own
/// `thiserror`-derived error type and converts it into
/// [`crate::result::ResultCode`] at the crate boundary.
pub trait PlatformError: std::error::Error + Send + Sync + 'static {
    fn is_permission_denied(&self) -> bool;
}

/// Result of one discovery pass: the foreign nodes found, plus a tally
/// of nodes skipped because they could not be opened due to
/// permissions. An enumeration with devices.is_empty() and
/// permission_skips > 0 is reported as [`crate::result::ResultCode::NoPerm`].
pub struct DiscoverOutcome {
    pub devices: Vec<Box<dyn PlatformDevice>>,
    pub permission_skips: usize,
}

/// Outcome of enabling SBP-2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sbp2Status {
    /// The unit directory was installed and a bus reset was triggered.
    Enabled,
    /// A previous call already installed the directory; this call was a
    /// no-op. Kept as a distinct variant rather than collapsing into
    /// `Enabled` so a caller can tell the two apart (see DESIGN.md).
    AlreadyEnabled,
}

/// One submitted request's outcome, as classified by the backend.
/// `closure` is the index into the caller's batch so out-of-order
/// completions route to the right buffer.
#[derive(Debug)]
pub struct Completion {
    pub closure: usize,
    pub status: CompletionStatus,
}

#[derive(Debug)]
pub enum CompletionStatus {
    /// Transaction retired normally. Carries the response payload for
    /// reads (empty for writes); the engine checks payload length
    /// against the requested length for reads.
    Complete(Vec<u8>),
    Busy,
    GenerationMismatch,
    Other,
}

/// The host's own FireWire controller bus, as exposed to the portable
/// layer. Concrete backends own their file descriptors / IOKit
/// connections and release them on `Drop`.
pub trait PlatformBus: std::fmt::Debug {
    /// Enumerate foreign nodes currently attached to this bus.
    fn discover(&mut self) -> Result<DiscoverOutcome, Box<dyn PlatformError>>;

    /// Install the canonical SBP-2 unit directory on the local node.
    fn publish_sbp2(&mut self) -> Result<Sbp2Status, Box<dyn PlatformError>>;

    /// Revoke the SBP-2 publication, if any. Idempotent.
    fn unpublish_sbp2(&mut self);
}

/// One foreign node, as exposed to the portable layer.
pub trait PlatformDevice: std::fmt::Debug {
    fn node_id(&self) -> u16;
    fn generation(&self) -> u32;
    /// 256-quadlet CSR snapshot in host endianness.
    fn csr(&self) -> &[u32; ROM_QUADLETS];

    fn is_open(&self) -> bool;
    fn open(&mut self) -> Result<(), Box<dyn PlatformError>>;
    fn close(&mut self);

    /// Maximum request size this device's transport can carry, capped
    /// by whichever is smaller of the CSR-advertised value and a
    /// backend/kernel ceiling.
    fn max_req(&self) -> u32;

    /// How many requests of `direction` this backend will keep
    /// in-flight at once (Linux 1 either direction; IOKit 4 reads, 1
    /// write).
    fn pipeline_depth(&self, direction: Direction) -> usize;

    /// Submit one request without blocking for its completion.
    /// `write_payload` is `Some` for writes, `None` for reads.
    fn submit(
        &mut self,
        closure: usize,
        direction: Direction,
        address: u64,
        len: usize,
        write_payload: Option<&[u8]>,
    ) -> Result<(), Box<dyn PlatformError>>;

    /// Block up to `timeout` for exactly one completion. `None` means
    /// the timeout elapsed with nothing pending.
    fn poll_completion(&mut self, timeout: Duration) -> Option<Completion>;

    /// Abandon any requests still in the pipeline after a batch abort.
    fn cancel_pending(&mut self);
}
