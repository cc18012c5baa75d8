//! Bus client library boundary
//!
//! The message-bus library is an external collaborator: it owns the wire
//! protocol, the watch handles, and message delivery. This module pins
//! down the slice of its surface the bridge depends on, so the bridge
//! itself stays independent of the concrete binding.

use std::os::unix::io::RawFd;
use std::rc::Rc;

use bitflags::bitflags;
use thiserror::Error;

bitflags! {
    /// Per-direction readiness/interest flags of a watch.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WatchFlags: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const ERROR    = 1 << 2;
    }
}

/// Reply to a well-known service name request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameReply {
    /// This connection became the primary owner of the name.
    PrimaryOwner,
    /// Another connection owns the name; this one was queued.
    InQueue,
    /// Another connection owns the name and refused replacement.
    Exists,
    /// This connection already owned the name.
    AlreadyOwner,
}

/// Result of one dispatch call.
///
/// `Remaining` guarantees progress, not drainage: more buffered messages
/// may still be queued and the caller must dispatch again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    Remaining,
    Complete,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connection failed: {0}")]
    Connect(String),
    #[error("service name request failed: {0}")]
    NameRequest(String),
}

/// A native watch: the library's registration of interest in one
/// descriptor. The library owns the handle; the bridge holds non-owning
/// references and must match add/remove calls exactly once each.
pub trait WatchHandle {
    fn fd(&self) -> RawFd;

    /// Disabled watches contribute nothing to a tick.
    fn enabled(&self) -> bool;

    /// Direction flags the library wants monitored (READABLE/WRITABLE).
    fn interest(&self) -> WatchFlags;

    /// Invoke the native handler with the directions that became ready.
    /// May reenter the watch hooks (add/remove) on the same thread.
    fn handle(&self, ready: WatchFlags);
}

/// Watch-management callbacks installed into the library as its sole
/// watch strategy.
pub trait WatchHooks {
    /// Register interest in a watch. `false` signals allocation failure,
    /// which the library treats as fatal per its own contract.
    fn add_watch(&self, watch: Rc<dyn WatchHandle>) -> bool;

    /// Drop interest in a watch. Must tolerate handles that were never
    /// added or were already removed.
    fn remove_watch(&self, watch: &Rc<dyn WatchHandle>);
}

/// One established bus connection.
pub trait BusSession {
    /// Claim a well-known name on the bus.
    fn request_name(&self, name: &str, replace_existing: bool) -> Result<NameReply, BusError>;

    /// Install watch-management hooks. The library immediately reports
    /// its current watches through `add_watch`.
    fn set_watch_hooks(&self, hooks: Rc<dyn WatchHooks>);

    /// Deliver at most one already-buffered message to its handlers.
    /// Protocol-level errors are resolved inside the library.
    fn dispatch(&self) -> DispatchStatus;

    /// Synchronously write out any outbound buffered data.
    fn flush(&self);
}
