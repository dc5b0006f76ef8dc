//! Peer-credential lookup on an accepted Unix-domain connection, used by the
//! privilege controller to decide whether a client is trusted to keep a
//! plugin running as root.

use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};
use std::os::unix::io::{BorrowedFd, RawFd};

/// Returns the connecting peer's UID, or `None` if the kernel can't tell us
/// (the conservative caller treats `None` the same as "not root").
pub fn peer_uid(fd: RawFd) -> Option<u32> {
    let borrowed: BorrowedFd<'_> = unsafe { BorrowedFd::borrow_raw(fd) };
    getsockopt(&borrowed, PeerCredentials).ok().map(|c| c.uid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::os::unix::net::UnixStream;

    #[test]
    fn peer_uid_of_local_socket_pair_is_current_uid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sock");
        let listener = UnixListener::bind(&path).unwrap();

        let _client = UnixStream::connect(&path).unwrap();
        let (server_side, _addr) = listener.accept().unwrap();

        use std::os::unix::io::AsRawFd;
        let uid = peer_uid(server_side.as_raw_fd());
        assert_eq!(uid, Some(unsafe { libc::getuid() }));
    }
}
