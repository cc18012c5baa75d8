//! XIM frontend backend
//!
//! Serves legacy X Input Method clients over the display connection. The
//! backend participates in the host loop like any other module: it watches
//! the display socket for readability and lets the protocol machinery
//! process pending requests when the socket fires. Trigger keys decide
//! when the input method is toggled on a client window.

use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use log::{debug, trace, warn};
use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::bus::BusHandle;
use crate::config::XimConfig;
use crate::host::{EventModule, FdSets};

pub const SHIFT_MASK: u32 = 1 << 0;
pub const CONTROL_MASK: u32 = 1 << 2;
pub const ALT_MASK: u32 = 1 << 3;

/// One key chord that toggles the input method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerKey {
    pub keysym: u32,
    pub modifiers: u32,
}

/// The configured trigger-key set.
#[derive(Debug, Clone, Default)]
pub struct TriggerKeys {
    keys: Vec<TriggerKey>,
}

impl TriggerKeys {
    /// Parse chord strings like "ctrl+space" or "ctrl+shift+u". Unknown
    /// chords are skipped with a warning rather than failing the backend.
    pub fn parse(specs: &[String]) -> Self {
        let mut keys = Vec::new();
        for spec in specs {
            match parse_chord(spec) {
                Some(key) => keys.push(key),
                None => warn!("ignoring unparseable trigger key: '{}'", spec),
            }
        }
        Self { keys }
    }

    /// Whether a key event matches any configured trigger. Only the
    /// shift/control/alt bits of `state` are significant.
    pub fn matches(&self, keysym: u32, state: u32) -> bool {
        let state = state & (SHIFT_MASK | CONTROL_MASK | ALT_MASK);
        self.keys
            .iter()
            .any(|k| k.keysym == keysym && k.modifiers == state)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn parse_chord(spec: &str) -> Option<TriggerKey> {
    let mut modifiers = 0u32;
    let mut keysym = None;
    for part in spec.split('+') {
        match part.trim().to_lowercase().as_str() {
            "ctrl" | "control" => modifiers |= CONTROL_MASK,
            "shift" => modifiers |= SHIFT_MASK,
            "alt" => modifiers |= ALT_MASK,
            name => keysym = keysym_from_name(name),
        }
    }
    keysym.map(|keysym| TriggerKey { keysym, modifiers })
}

/// Keysym values for the names trigger configs actually use. Latin-1
/// keysyms equal their character codes.
fn keysym_from_name(name: &str) -> Option<u32> {
    match name {
        "space" => Some(0x20),
        "return" | "enter" => Some(0xff0d),
        "tab" => Some(0xff09),
        "escape" => Some(0xff1b),
        _ => {
            let mut chars = name.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphanumeric() => Some(c as u32),
                _ => None,
            }
        }
    }
}

/// Protocol-side collaborator: owns the display connection and the XIM
/// request machinery.
pub trait XimServer {
    /// Descriptor of the display connection.
    fn fd(&self) -> RawFd;

    /// Drain and handle all requests buffered on the connection.
    fn process_pending(&mut self);
}

/// Non-blocking link to the X display's unix socket.
pub struct DisplayLink {
    stream: UnixStream,
    display: String,
}

impl DisplayLink {
    /// Connect to the display named by `display` (":0", ":0.1", or a
    /// "unix:/path" override).
    pub fn connect(display: &str) -> std::io::Result<Self> {
        let path = socket_path(display);
        let stream = UnixStream::connect(&path)?;
        set_nonblocking(stream.as_raw_fd());
        debug!("display link up: {} ({})", display, path.display());
        Ok(Self {
            stream,
            display: display.to_string(),
        })
    }
}

impl XimServer for DisplayLink {
    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn process_pending(&mut self) {
        let mut buf = [0u8; 4096];
        loop {
            match nix::unistd::read(self.stream.as_raw_fd(), &mut buf) {
                Ok(0) => {
                    warn!("display connection closed: {}", self.display);
                    break;
                }
                Ok(n) => trace!("display {}: {} bytes pending", self.display, n),
                Err(nix::errno::Errno::EAGAIN) => break,
                Err(e) => {
                    warn!("display read error on {}: {}", self.display, e);
                    break;
                }
            }
        }
    }
}

fn set_nonblocking(fd: RawFd) {
    if let Ok(flags) = fcntl(fd, FcntlArg::F_GETFL) {
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        let _ = fcntl(fd, FcntlArg::F_SETFL(flags));
    }
}

/// Resolve a display name to its unix socket path. ":N" and ":N.S" use
/// the conventional /tmp/.X11-unix location; "unix:/path" is explicit.
fn socket_path(display: &str) -> PathBuf {
    if let Some(path) = display.strip_prefix("unix:") {
        return PathBuf::from(path);
    }
    let name = display.strip_prefix(':').unwrap_or(display);
    let number = name.split('.').next().unwrap_or("0");
    PathBuf::from(format!("/tmp/.X11-unix/X{}", number))
}

/// The XIM backend module.
pub struct XimBackend {
    server: Box<dyn XimServer>,
    window: u64,
    screen: i32,
    trigger_keys: TriggerKeys,
    bus: Option<BusHandle>,
}

impl XimBackend {
    /// Bring up the backend against the configured display. A missing
    /// display disables the module; the host keeps running without XIM
    /// clients.
    pub fn create(cfg: &XimConfig, bus: Option<BusHandle>) -> Option<Self> {
        let server = match DisplayLink::connect(&cfg.display) {
            Ok(link) => link,
            Err(e) => {
                warn!("xim: cannot open display '{}': {}", cfg.display, e);
                return None;
            }
        };
        Some(Self::with_server(Box::new(server), cfg, bus))
    }

    pub fn with_server(server: Box<dyn XimServer>, cfg: &XimConfig, bus: Option<BusHandle>) -> Self {
        let trigger_keys = TriggerKeys::parse(&cfg.trigger_keys);
        if trigger_keys.is_empty() {
            warn!("xim: no usable trigger keys configured");
        }
        Self {
            server,
            window: 0,
            screen: cfg.screen,
            trigger_keys,
            bus,
        }
    }

    /// Whether a forwarded key event should toggle the input method.
    #[allow(dead_code)]
    pub fn is_trigger(&self, keysym: u32, state: u32) -> bool {
        self.trigger_keys.matches(keysym, state)
    }

    #[allow(dead_code)]
    pub fn screen(&self) -> i32 {
        self.screen
    }

    /// Server window id, 0 until the XIM service window is created.
    #[allow(dead_code)]
    pub fn window(&self) -> u64 {
        self.window
    }

    /// Whether the bus side of the host is still available for
    /// cross-process notification.
    #[allow(dead_code)]
    pub fn bus_available(&self) -> bool {
        self.bus
            .as_ref()
            .map_or(false, |h| h.session().is_some())
    }
}

impl EventModule for XimBackend {
    fn prepare_fds(&mut self, fds: &mut FdSets) {
        let fd = self.server.fd();
        fds.watch_read(fd);
        fds.watch_error(fd);
    }

    fn process_events(&mut self, fds: &FdSets) {
        let fd = self.server.fd();
        if fds.readable(fd) || fds.errored(fd) {
            self.server.process_pending();
        }
    }

    fn shutdown(&mut self) {
        debug!("xim backend shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn specs(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_trigger_parse_ctrl_space() {
        let keys = TriggerKeys::parse(&specs(&["ctrl+space"]));
        assert!(keys.matches(0x20, CONTROL_MASK));
        assert!(!keys.matches(0x20, 0));
        assert!(!keys.matches(0x20, CONTROL_MASK | SHIFT_MASK));
        assert!(!keys.matches(b'a' as u32, CONTROL_MASK));
    }

    #[test]
    fn test_trigger_parse_multiple_chords() {
        let keys = TriggerKeys::parse(&specs(&["ctrl+space", "ctrl+shift+u"]));
        assert!(keys.matches(0x20, CONTROL_MASK));
        assert!(keys.matches(b'u' as u32, CONTROL_MASK | SHIFT_MASK));
        assert!(!keys.matches(b'u' as u32, CONTROL_MASK));
    }

    #[test]
    fn test_trigger_ignores_unrelated_modifier_bits() {
        let keys = TriggerKeys::parse(&specs(&["ctrl+space"]));
        // NumLock and similar bits outside shift/control/alt are masked off
        let numlock = 1 << 4;
        assert!(keys.matches(0x20, CONTROL_MASK | numlock));
    }

    #[test]
    fn test_trigger_parse_skips_garbage() {
        let keys = TriggerKeys::parse(&specs(&["ctrl+", "hyper+q2x", "alt+return"]));
        assert!(keys.matches(0xff0d, ALT_MASK));
        assert!(!keys.matches(0x20, CONTROL_MASK));
    }

    #[test]
    fn test_socket_path_resolution() {
        assert_eq!(
            socket_path(":0"),
            PathBuf::from("/tmp/.X11-unix/X0")
        );
        assert_eq!(
            socket_path(":1.0"),
            PathBuf::from("/tmp/.X11-unix/X1")
        );
        assert_eq!(
            socket_path("unix:/run/x/sock"),
            PathBuf::from("/run/x/sock")
        );
    }

    struct FakeServer {
        fd: RawFd,
        processed: Rc<Cell<usize>>,
    }

    impl XimServer for FakeServer {
        fn fd(&self) -> RawFd {
            self.fd
        }
        fn process_pending(&mut self) {
            self.processed.set(self.processed.get() + 1);
        }
    }

    fn test_config() -> XimConfig {
        XimConfig {
            enabled: true,
            display: ":0".to_string(),
            screen: 0,
            trigger_keys: vec!["ctrl+space".to_string()],
        }
    }

    #[test]
    fn test_backend_declares_read_and_error_interest() {
        let processed = Rc::new(Cell::new(0));
        let mut backend = XimBackend::with_server(
            Box::new(FakeServer {
                fd: 11,
                processed: processed.clone(),
            }),
            &test_config(),
            None,
        );

        let mut fds = FdSets::new();
        backend.prepare_fds(&mut fds);
        assert!(fds.readable(11));
        assert!(fds.errored(11));
        assert!(!fds.writable(11));
    }

    #[test]
    fn test_backend_processes_only_when_ready() {
        let processed = Rc::new(Cell::new(0));
        let mut backend = XimBackend::with_server(
            Box::new(FakeServer {
                fd: 11,
                processed: processed.clone(),
            }),
            &test_config(),
            None,
        );

        let fds = FdSets::new();
        backend.process_events(&fds);
        assert_eq!(processed.get(), 0);

        let mut fds = FdSets::new();
        fds.watch_read(11);
        backend.process_events(&fds);
        assert_eq!(processed.get(), 1);

        let mut fds = FdSets::new();
        fds.watch_error(11);
        backend.process_events(&fds);
        assert_eq!(processed.get(), 2);
    }
}
