//! Centralized readiness loop
//!
//! The host is the only driver in the process: modules declare descriptor
//! interest once per tick, the host performs the single select(2) call,
//! and modules then consume the readiness it produced. Modules never run
//! their own loops and never block.

mod fdset;

pub use fdset::FdSets;

use std::collections::BTreeSet;
use std::mem;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};

/// Global flag for shutdown requested via signal (SIGTERM/SIGINT/SIGHUP)
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Per-module lifecycle contract.
///
/// Creation is expressed as factory functions returning `Option<Self>`;
/// `None` means the module is disabled and is never scheduled.
pub trait EventModule {
    /// Declare descriptor interest for this tick (before the wait).
    fn prepare_fds(&mut self, fds: &mut FdSets);

    /// Consume readiness produced by the wait.
    fn process_events(&mut self, fds: &FdSets);

    /// Optional teardown hook, invoked once at host shutdown.
    fn shutdown(&mut self) {}
}

struct ModuleSlot {
    name: &'static str,
    module: Box<dyn EventModule>,
}

/// The module host: owns the shared descriptor context and the tick loop.
pub struct Host {
    modules: Vec<ModuleSlot>,
    fds: FdSets,
    timeout: Option<Duration>,
}

impl Host {
    /// `timeout` bounds one wait; `None` blocks until a descriptor is
    /// ready or a signal arrives.
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            modules: Vec::new(),
            fds: FdSets::new(),
            timeout,
        }
    }

    /// Register a module under a fixed name. A `None` module failed to
    /// initialize: it is logged and never scheduled.
    pub fn register<M: EventModule + 'static>(&mut self, name: &'static str, module: Option<M>) {
        match module {
            Some(m) => {
                info!("module enabled: {}", name);
                self.modules.push(ModuleSlot {
                    name,
                    module: Box::new(m),
                });
            }
            None => info!("module disabled: {}", name),
        }
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// One readiness tick: reset context, gather interest from every
    /// module, wait, then hand readiness to every module in registration
    /// order. Returns the number of ready descriptors.
    pub fn tick(&mut self) -> Result<usize> {
        self.fds.reset();
        for slot in &mut self.modules {
            slot.module.prepare_fds(&mut self.fds);
        }

        let ready = wait_ready(&mut self.fds, self.timeout)?;

        for slot in &mut self.modules {
            slot.module.process_events(&self.fds);
        }
        Ok(ready)
    }

    /// Run ticks until a shutdown signal is observed.
    pub fn run(&mut self) -> Result<()> {
        while !shutdown_requested() {
            self.tick()?;
        }
        info!("shutdown requested, leaving event loop");
        Ok(())
    }

    /// Invoke every module's teardown hook.
    pub fn shutdown(&mut self) {
        for slot in &mut self.modules {
            debug!("shutting down module: {}", slot.name);
            slot.module.shutdown();
        }
    }
}

/// Wait for readiness on the gathered descriptors and replace the
/// context's interest sets with the ready subsets.
///
/// An interrupted wait (EINTR, e.g. a shutdown signal) counts as an empty
/// tick so the run loop can observe the shutdown flag.
fn wait_ready(fds: &mut FdSets, timeout: Option<Duration>) -> Result<usize> {
    let mut rset: libc::fd_set = unsafe { mem::zeroed() };
    let mut wset: libc::fd_set = unsafe { mem::zeroed() };
    let mut eset: libc::fd_set = unsafe { mem::zeroed() };
    unsafe {
        libc::FD_ZERO(&mut rset);
        libc::FD_ZERO(&mut wset);
        libc::FD_ZERO(&mut eset);
        for fd in fds.read_fds() {
            libc::FD_SET(fd, &mut rset);
        }
        for fd in fds.write_fds() {
            libc::FD_SET(fd, &mut wset);
        }
        for fd in fds.error_fds() {
            libc::FD_SET(fd, &mut eset);
        }
    }

    let mut tv = timeout.map(|d| libc::timeval {
        tv_sec: d.as_secs() as libc::time_t,
        tv_usec: d.subsec_micros() as libc::suseconds_t,
    });
    let tv_ptr = tv
        .as_mut()
        .map_or(std::ptr::null_mut(), |t| t as *mut libc::timeval);

    let ret = unsafe { libc::select(fds.max_fd() + 1, &mut rset, &mut wset, &mut eset, tv_ptr) };
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            fds.clear_ready();
            return Ok(0);
        }
        return Err(err).context("select failed");
    }

    let read: BTreeSet<RawFd> = fds
        .read_fds()
        .filter(|&fd| unsafe { libc::FD_ISSET(fd, &rset) })
        .collect();
    let write: BTreeSet<RawFd> = fds
        .write_fds()
        .filter(|&fd| unsafe { libc::FD_ISSET(fd, &wset) })
        .collect();
    let error: BTreeSet<RawFd> = fds
        .error_fds()
        .filter(|&fd| unsafe { libc::FD_ISSET(fd, &eset) })
        .collect();
    fds.apply_ready(read, write, error);

    Ok(ret as usize)
}

/// Install SIGTERM/SIGINT/SIGHUP handlers that request a clean shutdown.
pub fn setup_shutdown_handler() {
    unsafe {
        libc::signal(
            libc::SIGTERM,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGINT,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
        libc::signal(
            libc::SIGHUP,
            shutdown_signal_handler as *const () as libc::sighandler_t,
        );
    }
}

extern "C" fn shutdown_signal_handler(_signo: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}
