//! `select()`-based wait over every registered listener, with a 15-second
//! timeout so lifecycle changes and child reaping still happen when no
//! client connects.

use crate::error::DaemonError;
use crate::registry::Registry;
use nix::sys::select::{select, FdSet};
use nix::sys::time::TimeVal;
use std::os::unix::io::{AsRawFd, BorrowedFd, RawFd};

const SELECT_TIMEOUT_SECS: i64 = 15;

pub enum PollOutcome {
    /// The wait was interrupted by a signal; caller should re-check lifecycle state.
    Interrupted,
    /// Timed out with no ready listeners.
    TimedOut,
    /// One accepted connection per ready listener, as `(listen_fd, accepted_fd)`.
    Ready(Vec<(RawFd, RawFd)>),
}

/// Blocks on every fd in `registry` for up to 15 seconds, then accepts one
/// connection per ready listener. An empty registry is treated as fatal
/// (checked once per call, so a reload that drops every plugin is caught the
/// next time this is called).
pub fn poll_once(registry: &Registry, plugin_dir: &str) -> Result<PollOutcome, DaemonError> {
    if registry.is_empty() {
        return Err(DaemonError::NoPlugins {
            plugin_dir: plugin_dir.to_string(),
        });
    }

    let mut fdset = FdSet::new();
    for entry in registry.iter() {
        fdset.insert(unsafe { borrow(entry.listen_fd) });
    }

    let mut timeout = TimeVal::new(SELECT_TIMEOUT_SECS, 0);
    let max_fd = unsafe { borrow(registry.max_fd()) };

    match select(
        Some(max_fd.as_raw_fd() + 1),
        Some(&mut fdset),
        None,
        None,
        Some(&mut timeout),
    ) {
        Ok(0) => Ok(PollOutcome::TimedOut),
        Ok(_) => {
            let mut accepted = Vec::new();
            for entry in registry.iter() {
                if fdset.contains(unsafe { borrow(entry.listen_fd) }) {
                    match accept(entry.listen_fd) {
                        Ok(conn_fd) => accepted.push((entry.listen_fd, conn_fd)),
                        Err(e) => log::info!("error accepting on plugin {}: {e}", entry.name),
                    }
                }
            }
            Ok(PollOutcome::Ready(accepted))
        }
        Err(nix::Error::EINTR) => Ok(PollOutcome::Interrupted),
        Err(e) => Err(DaemonError::Io {
            context: "selecting on plugin sockets".to_string(),
            source: std::io::Error::from_raw_os_error(e as i32),
        }),
    }
}

unsafe fn borrow(fd: RawFd) -> BorrowedFd<'static> {
    unsafe { BorrowedFd::borrow_raw(fd) }
}

fn accept(listen_fd: RawFd) -> std::io::Result<RawFd> {
    let fd = unsafe { libc::accept(listen_fd, std::ptr::null_mut(), std::ptr::null_mut()) };
    if fd == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(fd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PluginEntry;
    use std::os::unix::io::IntoRawFd;
    use std::os::unix::net::{UnixListener, UnixStream};

    #[test]
    fn empty_registry_is_fatal() {
        let registry = Registry::new();
        let result = poll_once(&registry, "/usr/bin");
        assert!(matches!(result, Err(DaemonError::NoPlugins { .. })));
    }

    #[test]
    fn accepts_connection_on_ready_listener() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo");
        let listener = UnixListener::bind(&path).unwrap();
        let fd = listener.into_raw_fd();

        let mut registry = Registry::new();
        registry
            .insert(PluginEntry {
                name: "foo".into(),
                executable_path: "/bin/true".into(),
                listen_fd: fd,
                requires_root: false,
            })
            .unwrap();

        let client = UnixStream::connect(&path).unwrap();

        match poll_once(&registry, "/usr/bin").unwrap() {
            PollOutcome::Ready(accepted) => {
                assert_eq!(accepted.len(), 1);
                assert_eq!(accepted[0].0, fd);
                unsafe { libc::close(accepted[0].1) };
            }
            _ => panic!("expected a ready listener"),
        }

        drop(client);
    }
}
