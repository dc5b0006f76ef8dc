//! De-escalation from root to the `libstoragemgmt` service account, and the
//! per-child decision about whether a plugin keeps root for one connection.

use std::ffi::CString;

pub const SERVICE_USER: &str = "libstoragemgmt";

struct ServiceAccount {
    uid: libc::uid_t,
    gid: libc::gid_t,
}

fn lookup_service_user(name: &str) -> Option<ServiceAccount> {
    let c_name = CString::new(name).ok()?;
    unsafe {
        let pwd = libc::getpwnam(c_name.as_ptr());
        if pwd.is_null() {
            return None;
        }
        Some(ServiceAccount {
            uid: (*pwd).pw_uid,
            gid: (*pwd).pw_gid,
        })
    }
}

/// Drops from root to the service user. If the service user does not exist,
/// logs a warning and stays as the current user. If already running as that
/// user (or any non-root user), logs a warning but does not error.
///
/// Any syscall failure here is fatal: a half-completed privilege drop must
/// never be left in place.
pub fn drop_privileges() -> Result<(), String> {
    let Some(account) = lookup_service_user(SERVICE_USER) else {
        log::info!("missing {SERVICE_USER} user, running as existing user");
        return Ok(());
    };

    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        if account.uid != unsafe { libc::getuid() } {
            log::warn!("daemon not running as correct user");
        }
        return Ok(());
    }

    if unsafe { libc::setgid(account.gid) } == -1 {
        return Err(format!("setgid failed: {}", std::io::Error::last_os_error()));
    }
    if unsafe { libc::setgroups(1, &account.gid as *const libc::gid_t) } == -1 {
        return Err(format!("setgroups failed: {}", std::io::Error::last_os_error()));
    }
    if unsafe { libc::setuid(account.uid) } == -1 {
        return Err(format!("setuid failed: {}", std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Whether the about-to-be-exec'd plugin child should retain root, given:
/// - `requires_root`: the plugin's own `pluginconf.d/<name>.conf` setting.
/// - `daemon_is_root`: whether the supervisor process is currently UID 0.
/// - `allow_plugin_root_privilege`: the global `lsmd.conf` switch.
/// - `peer_uid`: the connecting client's UID, if it could be determined.
///
/// Mirrors the branch structure of the reference daemon's `exec_plugin`
/// exactly, including which branch logs at which point.
pub fn decide_child_privilege(
    plugin_name: &str,
    requires_root: bool,
    daemon_is_root: bool,
    allow_plugin_root_privilege: bool,
    peer_uid: Option<u32>,
) -> ChildPrivilegeDecision {
    if !requires_root {
        return ChildPrivilegeDecision::Drop;
    }

    if !daemon_is_root {
        log::warn!("plugin {plugin_name} requires root privilege, but lsmd is not running as root");
        return ChildPrivilegeDecision::Drop;
    }

    if !allow_plugin_root_privilege {
        log::warn!("plugin {plugin_name} requires root privilege but lsmd.conf disables it globally");
        return ChildPrivilegeDecision::Drop;
    }

    match peer_uid {
        Some(0) => {
            log::info!("plugin {plugin_name} is running with root privilege");
            ChildPrivilegeDecision::Retain
        }
        Some(_) => {
            log::warn!("plugin {plugin_name} requires root privilege, but client is not root");
            ChildPrivilegeDecision::Drop
        }
        None => {
            log::warn!("failed to get client socket uid for plugin {plugin_name}");
            ChildPrivilegeDecision::Drop
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildPrivilegeDecision {
    Retain,
    Drop,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_not_requiring_root_always_drops() {
        assert_eq!(
            decide_child_privilege("foo", false, true, true, Some(0)),
            ChildPrivilegeDecision::Drop
        );
    }

    #[test]
    fn daemon_not_root_drops_even_if_client_is_root() {
        assert_eq!(
            decide_child_privilege("foo", true, false, true, Some(0)),
            ChildPrivilegeDecision::Drop
        );
    }

    #[test]
    fn global_disable_drops_even_if_client_is_root() {
        assert_eq!(
            decide_child_privilege("foo", true, true, false, Some(0)),
            ChildPrivilegeDecision::Drop
        );
    }

    #[test]
    fn root_client_retains_root() {
        assert_eq!(
            decide_child_privilege("foo", true, true, true, Some(0)),
            ChildPrivilegeDecision::Retain
        );
    }

    #[test]
    fn non_root_client_drops() {
        assert_eq!(
            decide_child_privilege("foo", true, true, true, Some(1000)),
            ChildPrivilegeDecision::Drop
        );
    }

    #[test]
    fn unknown_peer_uid_drops_conservatively() {
        assert_eq!(
            decide_child_privilege("foo", true, true, true, None),
            ChildPrivilegeDecision::Drop
        );
    }
}
