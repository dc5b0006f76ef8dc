//! Recursive walk of the plugin directory, building up the registry.

use crate::config;
use crate::error::DaemonError;
use crate::registry::{PluginEntry, Registry};
use crate::socket_manager;
use std::path::{Path, PathBuf};

const PLUGIN_SUFFIX: &str = "_lsmplugin";

/// Scans `plugin_dir` recursively, creating a listening socket and
/// `PluginEntry` for every executable whose name ends in `_lsmplugin`.
/// Hidden directories (name starting with `.`) are skipped; hidden files are
/// not (the suffix filter alone decides).
pub fn scan(
    plugin_dir: &Path,
    socket_dir: &Path,
    conf_dir: &Path,
    allow_plugin_root_privilege: bool,
) -> Result<(Registry, bool), DaemonError> {
    let mut registry = Registry::new();
    let mut has_root_plugin = false;

    let mut paths = Vec::new();
    walk(plugin_dir, &mut paths)?;

    for path in paths {
        let Some(name) = plugin_name(&path) else {
            continue;
        };

        let requires_root = pluginconf_requires_root(conf_dir, &name, allow_plugin_root_privilege)?;
        has_root_plugin |= requires_root;

        let socket_path = socket_manager::socket_path(socket_dir, &name);
        let listen_fd = socket_manager::create_listener(&socket_path).map_err(|source| DaemonError::Io {
            context: format!("creating socket for plugin {name}"),
            source,
        })?;

        let entry = PluginEntry {
            name: name.clone(),
            executable_path: path.display().to_string(),
            listen_fd,
            requires_root,
        };

        log::info!("plugin {} added", path.display());

        if let Err(dup_name) = registry.insert(entry) {
            return Err(DaemonError::DuplicatePlugin { name: dup_name });
        }
    }

    Ok((registry, has_root_plugin))
}

/// Strips the plugin suffix from a basename, returning `None` for files that
/// don't match (this is the sole recognition rule; file mode bits are never
/// inspected).
fn plugin_name(path: &Path) -> Option<String> {
    let base = path.file_name()?.to_str()?;
    if base.len() <= PLUGIN_SUFFIX.len() {
        return None;
    }
    base.strip_suffix(PLUGIN_SUFFIX).map(|s| s.to_string())
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), DaemonError> {
    let read_dir = std::fs::read_dir(dir).map_err(|source| DaemonError::Io {
        context: format!("reading plugin directory {}", dir.display()),
        source,
    })?;

    for entry in read_dir {
        let entry = entry.map_err(|source| DaemonError::Io {
            context: format!("reading plugin directory {}", dir.display()),
            source,
        })?;
        let path = entry.path();

        let metadata = match std::fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(_) => continue,
        };

        if metadata.is_dir() {
            if path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with('.')) {
                continue;
            }
            walk(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn pluginconf_requires_root(
    conf_dir: &Path,
    plugin_name: &str,
    allow_plugin_root_privilege: bool,
) -> Result<bool, DaemonError> {
    let conf_path = conf_dir.join("pluginconf.d").join(format!("{plugin_name}.conf"));
    let requires_root = config::parse_conf_bool(&conf_path, "require-root-privilege")?.unwrap_or(false);

    if requires_root && !allow_plugin_root_privilege {
        log::warn!(
            "plugin {plugin_name} requires root privilege but lsmd.conf disables it globally"
        );
    }

    Ok(requires_root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognises_suffix_only() {
        assert_eq!(plugin_name(Path::new("/usr/bin/foo_lsmplugin")), Some("foo".to_string()));
        assert_eq!(plugin_name(Path::new("/usr/bin/notaplugin")), None);
        assert_eq!(plugin_name(Path::new("/usr/bin/_lsmplugin")), None);
    }

    #[test]
    fn scan_finds_plugins_and_skips_hidden_dirs() {
        let plugin_dir = tempfile::tempdir().unwrap();
        let socket_dir = tempfile::tempdir().unwrap();
        let conf_dir = tempfile::tempdir().unwrap();

        std::fs::write(plugin_dir.path().join("foo_lsmplugin"), b"").unwrap();
        std::fs::write(plugin_dir.path().join("notaplugin"), b"").unwrap();

        let hidden = plugin_dir.path().join(".hidden");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("bar_lsmplugin"), b"").unwrap();

        let nested = plugin_dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(nested.join("baz_lsmplugin"), b"").unwrap();

        let (registry, has_root) = scan(plugin_dir.path(), socket_dir.path(), conf_dir.path(), false).unwrap();

        let names: Vec<_> = registry.iter().map(|e| e.name.clone()).collect();
        assert!(names.contains(&"foo".to_string()));
        assert!(names.contains(&"baz".to_string()));
        assert!(!names.contains(&"bar".to_string()));
        assert_eq!(names.len(), 2);
        assert!(!has_root);
    }

    #[test]
    fn duplicate_plugin_names_are_fatal() {
        let plugin_dir = tempfile::tempdir().unwrap();
        let socket_dir = tempfile::tempdir().unwrap();
        let conf_dir = tempfile::tempdir().unwrap();

        std::fs::create_dir(plugin_dir.path().join("a")).unwrap();
        std::fs::create_dir(plugin_dir.path().join("b")).unwrap();
        std::fs::write(plugin_dir.path().join("a").join("foo_lsmplugin"), b"").unwrap();
        std::fs::write(plugin_dir.path().join("b").join("foo_lsmplugin"), b"").unwrap();

        let result = scan(plugin_dir.path(), socket_dir.path(), conf_dir.path(), false);
        assert!(matches!(result, Err(DaemonError::DuplicatePlugin { .. })));
    }
}
