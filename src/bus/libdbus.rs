//! Session-bus adapter over the libdbus binding
//!
//! Implements the [`BusSession`] boundary on top of `dbus::channel::Channel`.
//! The binding does not expose the raw watch callbacks, but a private
//! channel has exactly one socket whose interest is fixed at creation, so
//! the adapter synthesizes a single watch handle for it when the hooks are
//! installed.

use std::cell::RefCell;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::Duration;

use dbus::channel::{BusType, Channel};
use dbus::Message;
use log::{debug, trace};

use super::session::{BusError, BusSession, DispatchStatus, NameReply, WatchFlags, WatchHandle, WatchHooks};

/// One private connection to the session bus.
pub struct DBusSession {
    channel: Rc<RefCell<Channel>>,
}

impl DBusSession {
    /// Open a private session-bus connection. Fails when no session bus is
    /// reachable (headless systems, stripped-down sessions).
    pub fn connect() -> Result<Self, BusError> {
        let mut channel = Channel::get_private(BusType::Session)
            .map_err(|e| BusError::Connect(e.to_string()))?;
        channel.set_watch_enabled(true);
        debug!("connected to session bus as {:?}", channel.unique_name());
        Ok(Self {
            channel: Rc::new(RefCell::new(channel)),
        })
    }
}

/// The synthesized watch for the channel's socket.
struct ChannelWatch {
    fd: RawFd,
    interest: WatchFlags,
    channel: Rc<RefCell<Channel>>,
}

impl WatchHandle for ChannelWatch {
    fn fd(&self) -> RawFd {
        self.fd
    }

    fn enabled(&self) -> bool {
        true
    }

    fn interest(&self) -> WatchFlags {
        self.interest
    }

    /// Perform the channel's non-blocking I/O step. Incoming bytes land in
    /// the receive buffer for the following dispatch calls.
    fn handle(&self, ready: WatchFlags) {
        trace!("bus socket ready: {:?}", ready);
        if let Err(e) = self
            .channel
            .borrow()
            .read_write(Some(Duration::from_millis(0)))
        {
            debug!("bus i/o failed: {:?}", e);
        }
    }
}

impl BusSession for DBusSession {
    fn request_name(&self, name: &str, replace_existing: bool) -> Result<NameReply, BusError> {
        let flags: u32 = if replace_existing { 2 } else { 0 };
        let msg = Message::new_method_call(
            "org.freedesktop.DBus",
            "/org/freedesktop/DBus",
            "org.freedesktop.DBus",
            "RequestName",
        )
        .map_err(BusError::NameRequest)?
        .append2(name, flags);
        let reply = self
            .channel
            .borrow()
            .send_with_reply_and_block(msg, Duration::from_millis(5000))
            .map_err(|e| BusError::NameRequest(e.to_string()))?;
        let code: u32 = reply
            .read1()
            .map_err(|e| BusError::NameRequest(e.to_string()))?;
        Ok(match code {
            1 => NameReply::PrimaryOwner,
            2 => NameReply::InQueue,
            3 => NameReply::Exists,
            4 => NameReply::AlreadyOwner,
            other => {
                return Err(BusError::NameRequest(format!(
                    "unexpected RequestName reply code {other}"
                )))
            }
        })
    }

    fn set_watch_hooks(&self, hooks: Rc<dyn WatchHooks>) {
        let watch = self.channel.borrow().watch();
        let mut interest = WatchFlags::empty();
        if watch.read {
            interest |= WatchFlags::READABLE;
        }
        if watch.write {
            interest |= WatchFlags::WRITABLE;
        }
        hooks.add_watch(Rc::new(ChannelWatch {
            fd: watch.fd,
            interest,
            channel: Rc::clone(&self.channel),
        }));
    }

    fn dispatch(&self) -> DispatchStatus {
        match self.channel.borrow_mut().pop_message() {
            Some(msg) => {
                trace!("bus message: {:?}", msg);
                DispatchStatus::Remaining
            }
            None => DispatchStatus::Complete,
        }
    }

    fn flush(&self) {
        self.channel.borrow_mut().flush();
    }
}
