//! Host-owned descriptor readiness context
//!
//! One `FdSets` instance is shared by every module within a tick. Modules
//! add interest bits for their own descriptors during the prepare phase and
//! never clear bits they did not set; the host resets the context at the
//! top of each tick and replaces interest with readiness after the wait.

use std::collections::BTreeSet;
use std::os::unix::io::RawFd;

/// Descriptor watermark plus read/write/error sets.
///
/// Before the wait the sets carry interest; after the wait they carry
/// readiness. Marking is additive: a bit set by one module stays set for
/// all modules until the next tick.
#[derive(Debug, Clone)]
pub struct FdSets {
    max_fd: RawFd,
    read: BTreeSet<RawFd>,
    write: BTreeSet<RawFd>,
    error: BTreeSet<RawFd>,
}

impl FdSets {
    pub fn new() -> Self {
        Self {
            max_fd: -1,
            read: BTreeSet::new(),
            write: BTreeSet::new(),
            error: BTreeSet::new(),
        }
    }

    /// Clear all sets and the watermark (host only, top of tick).
    pub fn reset(&mut self) {
        self.max_fd = -1;
        self.read.clear();
        self.write.clear();
        self.error.clear();
    }

    /// Mark read interest on a descriptor.
    pub fn watch_read(&mut self, fd: RawFd) {
        self.bump(fd);
        self.read.insert(fd);
    }

    /// Mark write interest on a descriptor.
    pub fn watch_write(&mut self, fd: RawFd) {
        self.bump(fd);
        self.write.insert(fd);
    }

    /// Mark error interest on a descriptor.
    pub fn watch_error(&mut self, fd: RawFd) {
        self.bump(fd);
        self.error.insert(fd);
    }

    pub fn readable(&self, fd: RawFd) -> bool {
        self.read.contains(&fd)
    }

    pub fn writable(&self, fd: RawFd) -> bool {
        self.write.contains(&fd)
    }

    pub fn errored(&self, fd: RawFd) -> bool {
        self.error.contains(&fd)
    }

    /// Highest watched descriptor, -1 when nothing is watched.
    pub fn max_fd(&self) -> RawFd {
        self.max_fd
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty() && self.error.is_empty()
    }

    fn bump(&mut self, fd: RawFd) {
        if fd > self.max_fd {
            self.max_fd = fd;
        }
    }

    pub(crate) fn read_fds(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.read.iter().copied()
    }

    pub(crate) fn write_fds(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.write.iter().copied()
    }

    pub(crate) fn error_fds(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.error.iter().copied()
    }

    /// Replace interest with post-wait readiness (host only).
    pub(crate) fn apply_ready(
        &mut self,
        read: BTreeSet<RawFd>,
        write: BTreeSet<RawFd>,
        error: BTreeSet<RawFd>,
    ) {
        self.read = read;
        self.write = write;
        self.error = error;
    }

    /// Drop all readiness, e.g. after an interrupted wait (host only).
    pub(crate) fn clear_ready(&mut self) {
        self.read.clear();
        self.write.clear();
        self.error.clear();
    }
}

impl Default for FdSets {
    fn default() -> Self {
        Self::new()
    }
}
