//! Creation and teardown of the per-plugin Unix-domain listening sockets.
//! Uses raw libc socket calls rather than `std::os::unix::net::UnixListener`
//! because the supervisor needs an explicit `listen` backlog and an explicit
//! `chmod`, neither of which std exposes.

use std::ffi::CString;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

const LISTEN_BACKLOG: i32 = 5;
const SOCKET_MODE: libc::mode_t = 0o666;

pub fn socket_path(socket_dir: &Path, plugin_name: &str) -> PathBuf {
    socket_dir.join(plugin_name)
}

/// Removes `path` if it refers to an existing socket file. No-op if nothing
/// is there; any other filesystem error is returned.
pub fn unlink_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Binds a listening `AF_UNIX`/`SOCK_STREAM` socket at `path`, mode 0666,
/// backlog 5. Replaces any existing file at that path first.
pub fn create_listener(path: &Path) -> std::io::Result<RawFd> {
    unlink_if_present(path)?;

    let path_str = path
        .to_str()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "non-utf8 socket path"))?;
    let c_path = CString::new(path_str)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "nul byte in socket path"))?;
    let bytes = c_path.as_bytes_with_nul();
    if bytes.len() > std::mem::size_of::<libc::sockaddr_un>() - std::mem::size_of::<libc::sa_family_t>() {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "socket path too long"));
    }

    let fd = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if fd == -1 {
        return Err(std::io::Error::last_os_error());
    }

    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    for (dst, src) in addr.sun_path.iter_mut().zip(bytes.iter()) {
        *dst = *src as libc::c_char;
    }

    let addr_len = std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;
    let rc = unsafe {
        libc::bind(
            fd,
            (&addr as *const libc::sockaddr_un).cast::<libc::sockaddr>(),
            addr_len,
        )
    };
    if rc == -1 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }

    let rc = unsafe { libc::chmod(c_path.as_ptr(), SOCKET_MODE) };
    if rc == -1 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }

    let rc = unsafe { libc::listen(fd, LISTEN_BACKLOG) };
    if rc == -1 {
        let err = std::io::Error::last_os_error();
        unsafe { libc::close(fd) };
        return Err(err);
    }

    Ok(fd)
}

/// Walks `socket_dir` removing every entry that is a Unix-domain socket file,
/// leaving everything else (plain files, directories) untouched.
pub fn sweep_stale_sockets(socket_dir: &Path) -> std::io::Result<()> {
    let read_dir = match std::fs::read_dir(socket_dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in read_dir {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if std::os::unix::fs::FileTypeExt::is_socket(&metadata.file_type()) {
            unlink_if_present(&entry.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::{FileTypeExt, PermissionsExt};

    #[test]
    fn create_listener_binds_and_chmods() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path(dir.path(), "foo");
        let fd = create_listener(&path).unwrap();

        let metadata = std::fs::metadata(&path).unwrap();
        assert!(metadata.file_type().is_socket());
        assert_eq!(metadata.permissions().mode() & 0o777, 0o666);

        unsafe { libc::close(fd) };
    }

    #[test]
    fn create_listener_replaces_stale_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket_path(dir.path(), "foo");
        std::fs::write(&path, b"stale").unwrap();

        let fd = create_listener(&path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().file_type().is_socket());
        unsafe { libc::close(fd) };
    }

    #[test]
    fn sweep_removes_only_sockets() {
        let dir = tempfile::tempdir().unwrap();
        let sock_path = dir.path().join("ghost");
        let fd = create_listener(&sock_path).unwrap();
        unsafe { libc::close(fd) };

        let keep_path = dir.path().join("keep.txt");
        std::fs::write(&keep_path, b"keep me").unwrap();

        sweep_stale_sockets(dir.path()).unwrap();

        assert!(!sock_path.exists());
        assert!(keep_path.exists());
    }

    #[test]
    fn sweep_missing_dir_is_ok() {
        sweep_stale_sockets(Path::new("/nonexistent/socket/dir")).unwrap();
    }
}
