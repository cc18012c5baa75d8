//! D-Bus event-source bridge
//!
//! Adapts the bus library's push-style watch registration (add-watch /
//! remove-watch / dispatch) to the host's pull-based readiness loop. The
//! module owns the connection and the watch registry; per tick it projects
//! enabled watches onto the host's descriptor context, then translates the
//! resulting readiness back into per-watch flags and drains buffered
//! messages.

pub mod libdbus;
pub mod registry;
pub mod session;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use log::{debug, info, trace, warn};

use crate::host::{EventModule, FdSets};
use registry::WatchRegistry;
use session::{BusError, BusSession, DispatchStatus, NameReply, WatchFlags, WatchHandle, WatchHooks};

/// Typed capability handed to sibling modules at wiring time. It never
/// transfers ownership: once the bus module is gone the handle yields
/// nothing.
#[derive(Clone)]
pub struct BusHandle {
    session: Weak<dyn BusSession>,
}

impl BusHandle {
    pub fn session(&self) -> Option<Rc<dyn BusSession>> {
        self.session.upgrade()
    }
}

/// Watch-management hooks backed by the module's registry.
struct RegistryHooks {
    registry: Rc<RefCell<WatchRegistry>>,
}

impl WatchHooks for RegistryHooks {
    fn add_watch(&self, watch: Rc<dyn WatchHandle>) -> bool {
        trace!("add watch: fd={}", watch.fd());
        self.registry.borrow_mut().add(watch)
    }

    fn remove_watch(&self, watch: &Rc<dyn WatchHandle>) {
        trace!("remove watch: fd={}", watch.fd());
        self.registry.borrow_mut().remove(watch);
    }
}

/// The bus service module: one connection, one watch registry.
pub struct BusModule {
    conn: Rc<dyn BusSession>,
    registry: Rc<RefCell<WatchRegistry>>,
}

impl BusModule {
    /// Establish the connection and claim the well-known service name.
    ///
    /// Any failure disables the module (`None`); the host keeps running
    /// without cross-process notification. All failure paths release the
    /// connection, including a lost name contest.
    pub fn create<F>(connect: F, service_name: &str) -> Option<Self>
    where
        F: FnOnce() -> Result<Rc<dyn BusSession>, BusError>,
    {
        let conn = match connect() {
            Ok(conn) => conn,
            Err(e) => {
                debug!("bus: {}", e);
                return None;
            }
        };

        match conn.request_name(service_name, true) {
            Ok(NameReply::PrimaryOwner) => {}
            Ok(reply) => {
                warn!(
                    "bus: service name '{}' not acquired (reply: {:?})",
                    service_name, reply
                );
                return None;
            }
            Err(e) => {
                debug!("bus: {}", e);
                return None;
            }
        }

        let registry = Rc::new(RefCell::new(WatchRegistry::default()));
        conn.set_watch_hooks(Rc::new(RegistryHooks {
            registry: Rc::clone(&registry),
        }));
        conn.flush();

        info!("bus: primary owner of '{}'", service_name);
        Some(Self { conn, registry })
    }

    /// Capability for sibling modules sharing the connection.
    pub fn handle(&self) -> BusHandle {
        BusHandle {
            session: Rc::downgrade(&self.conn),
        }
    }
}

impl EventModule for BusModule {
    /// Readiness publisher: project every enabled watch onto the shared
    /// context. Strictly additive; disabled watches contribute nothing,
    /// not even to the watermark.
    fn prepare_fds(&mut self, fds: &mut FdSets) {
        // Watch getters never reenter the hooks, so holding the borrow
        // across the traversal is fine here.
        for watch in self.registry.borrow().watches() {
            if !watch.enabled() {
                continue;
            }
            let fd = watch.fd();
            let interest = watch.interest();
            if interest.contains(WatchFlags::READABLE) {
                fds.watch_read(fd);
            }
            if interest.contains(WatchFlags::WRITABLE) {
                fds.watch_write(fd);
            }
            // Every watched descriptor is monitored for errors
            fds.watch_error(fd);
        }
    }

    /// Dispatch engine: hand readiness to each still-registered enabled
    /// watch, then drain all buffered messages.
    fn process_events(&mut self, fds: &FdSets) {
        // Handlers may add or remove watches while we traverse, so walk a
        // snapshot and re-validate membership per entry. The snapshot's
        // `Rc`s keep visited handles alive.
        let snapshot = self.registry.borrow().snapshot();
        for (key, watch) in snapshot {
            if !self.registry.borrow().contains(key) {
                // Removed by a nested handler earlier this tick
                continue;
            }
            if !watch.enabled() {
                continue;
            }
            let fd = watch.fd();
            let mut ready = WatchFlags::empty();
            if fds.readable(fd) {
                ready |= WatchFlags::READABLE;
            }
            if fds.writable(fd) {
                ready |= WatchFlags::WRITABLE;
            }
            if fds.errored(fd) {
                ready |= WatchFlags::ERROR;
            }
            if !ready.is_empty() {
                watch.handle(ready);
            }
        }

        // A single dispatch only guarantees progress, so repeat until the
        // library reports empty. The extra reference outlives any nested
        // teardown a message handler might trigger.
        let conn = Rc::clone(&self.conn);
        while conn.dispatch() == DispatchStatus::Remaining {}
    }
}
