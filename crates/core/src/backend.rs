//! Re-export of the backend capability contract. The traits live in
//! `firewire-forensics-shared` so that platform backend crates can
//! implement them without depending back on this crate, which in turn
//! selects a backend by `target_os`.

pub use firewire_forensics_shared::{
    Completion, CompletionStatus, DiscoverOutcome, PlatformBus, PlatformDevice, PlatformError,
    Sbp2Status,
};
