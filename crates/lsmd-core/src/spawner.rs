//! Fork, privilege decision, and exec of one plugin child per accepted
//! connection. Everything between `fork` and `execve` observes the
//! signal-safety(7) constraints on a forked child: no logger, no locks held
//! by the parent at fork time, diagnostics only via raw writes to stderr.

use crate::peercred;
use crate::privilege::{self, ChildPrivilegeDecision};
use crate::registry::Registry;
use nix::unistd::{fork, ForkResult};
use std::ffi::CString;
use std::os::unix::io::RawFd;

pub struct SpawnConfig {
    pub allow_plugin_root_privilege: bool,
    pub valgrind: bool,
}

/// Forks and, in the child, execs `executable_path` with `conn_fd` as
/// argv[1]. The parent closes `conn_fd` and returns immediately; it never
/// waits for the child (reaping happens separately, see `lifecycle`).
///
/// # Safety
/// Must be called with `registry` still holding every other plugin's listen
/// fd; the child closes all of them (except `conn_fd`) before exec so a
/// plugin never inherits a socket belonging to a sibling.
pub fn spawn_plugin(
    registry: &mut Registry,
    plugin_name: &str,
    executable_path: &str,
    conn_fd: RawFd,
    requires_root: bool,
    daemon_is_root: bool,
    config: &SpawnConfig,
) -> std::io::Result<()> {
    log::info!("exec'ing plugin {executable_path}");

    let fork_result = unsafe { fork() }.map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;

    match fork_result {
        ForkResult::Parent { .. } => {
            if unsafe { libc::close(conn_fd) } == -1 {
                log::info!(
                    "error closing accepted socket in parent: {}",
                    std::io::Error::last_os_error()
                );
            }
            Ok(())
        }
        ForkResult::Child => {
            let peer_uid = peercred::peer_uid(conn_fd);
            let decision = privilege::decide_child_privilege(
                plugin_name,
                requires_root,
                daemon_is_root,
                config.allow_plugin_root_privilege,
                peer_uid,
            );

            if decision == ChildPrivilegeDecision::Drop {
                if let Err(e) = privilege::drop_privileges() {
                    write_stderr(&format!("lsmd: failed to drop privileges: {e}\n"));
                    unsafe { libc::_exit(1) };
                }
            }

            // Registry holds heap data for every entry; copy what we still
            // need out before tearing it down.
            let exec_path = executable_path.to_string();

            registry.clear();

            exec_child(&exec_path, conn_fd, config.valgrind)
        }
    }
}

/// Builds argv and execs the plugin (or the valgrind wrapper around it).
/// Never returns: either `execve` replaces the process image, or it fails
/// and this calls `_exit(1)` after writing a diagnostic directly to stderr.
fn exec_child(exec_path: &str, conn_fd: RawFd, valgrind: bool) -> ! {
    let fd_string = conn_fd.to_string();

    let result = if valgrind {
        let log_file = format!(
            "--log-file=/tmp/leaking_{}-{}",
            unsafe { libc::getppid() },
            unsafe { libc::getpid() }
        );
        exec_argv(
            "/usr/bin/valgrind",
            &["valgrind", "--leak-check=full", "--show-reachable=no", &log_file, exec_path, &fd_string],
        )
    } else {
        let basename = exec_path.rsplit('/').next().unwrap_or(exec_path);
        exec_argv(exec_path, &[basename, &fd_string])
    };

    let err = result.unwrap_err();
    write_stderr(&format!("lsmd: error exec'ing plugin {exec_path}: {err}\n"));
    unsafe { libc::_exit(1) };
}

fn exec_argv(path: &str, argv: &[&str]) -> std::io::Result<std::convert::Infallible> {
    let c_path = CString::new(path).map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "nul in path"))?;
    let c_argv: Vec<CString> = argv
        .iter()
        .map(|a| CString::new(*a))
        .collect::<Result<_, _>>()
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "nul in argv"))?;
    let mut argv_ptrs: Vec<*const libc::c_char> = c_argv.iter().map(|c| c.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());

    unsafe {
        libc::execv(c_path.as_ptr(), argv_ptrs.as_ptr());
    }
    Err(std::io::Error::last_os_error())
}

/// Async-signal-safe diagnostic write, used only in the narrow window
/// between fork and exec where the structured logger must not be touched.
fn write_stderr(message: &str) {
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            message.as_ptr().cast(),
            message.len(),
        );
    }
}
