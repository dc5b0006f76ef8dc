//! In-memory set of discovered plugins. An insertion-ordered `Vec` with a
//! linear fd scan is plenty at the expected scale of a handful of plugins;
//! see the design notes for why a hash index would be overkill here.

use std::os::unix::io::RawFd;

pub struct PluginEntry {
    pub name: String,
    pub executable_path: String,
    pub listen_fd: RawFd,
    pub requires_root: bool,
}

#[derive(Default)]
pub struct Registry {
    entries: Vec<PluginEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Registry { entries: Vec::new() }
    }

    /// Inserts `entry`, failing if its name collides with an existing one.
    pub fn insert(&mut self, entry: PluginEntry) -> Result<(), String> {
        if self.entries.iter().any(|e| e.name == entry.name) {
            return Err(entry.name);
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PluginEntry> {
        self.entries.iter()
    }

    pub fn find_by_fd(&self, fd: RawFd) -> Option<&PluginEntry> {
        self.entries.iter().find(|e| e.listen_fd == fd)
    }

    pub fn max_fd(&self) -> RawFd {
        self.entries.iter().map(|e| e.listen_fd).max().unwrap_or(-1)
    }

    /// Closes every listen fd and drops all entries. Does not unlink the
    /// socket files; that is the caller's job (see `socket_manager::sweep`).
    pub fn clear(&mut self) {
        for entry in self.entries.drain(..) {
            if unsafe { libc::close(entry.listen_fd) } == -1 {
                log::info!(
                    "error closing fd {} for plugin {}: {}",
                    entry.listen_fd,
                    entry.name,
                    std::io::Error::last_os_error()
                );
            }
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_duplicate_names() {
        let mut reg = Registry::new();
        reg.insert(PluginEntry {
            name: "foo".into(),
            executable_path: "/usr/bin/foo_lsmplugin".into(),
            listen_fd: 3,
            requires_root: false,
        })
        .unwrap();

        let err = reg
            .insert(PluginEntry {
                name: "foo".into(),
                executable_path: "/usr/bin/other_lsmplugin".into(),
                listen_fd: 4,
                requires_root: false,
            })
            .unwrap_err();
        assert_eq!(err, "foo");
        // avoid Drop trying to close fake fds
        std::mem::forget(reg);
    }

    #[test]
    fn find_by_fd_scans_linearly() {
        let mut reg = Registry::new();
        reg.insert(PluginEntry {
            name: "foo".into(),
            executable_path: "/x".into(),
            listen_fd: 9,
            requires_root: false,
        })
        .unwrap();
        assert!(reg.find_by_fd(9).is_some());
        assert!(reg.find_by_fd(10).is_none());
        // avoid Drop trying to close a fake fd
        std::mem::forget(reg);
    }
}
