use std::fmt;
use std::io;

/// Failures while loading `lsmd.conf` or a per-plugin `pluginconf.d/*.conf` file.
#[derive(Debug)]
pub enum ConfigError {
    Read { path: String, source: io::Error },
    Parse { path: String, line: usize, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "error reading config {path}: {source}")
            }
            ConfigError::Parse { path, line, message } => {
                write!(f, "config {path} parsing failed at line {line}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { .. } => None,
        }
    }
}

/// Top-level fatal daemon error. Any variant of this is a reason to log and exit(1).
#[derive(Debug)]
pub enum DaemonError {
    Config(ConfigError),
    Io { context: String, source: io::Error },
    DuplicatePlugin { name: String },
    NoPlugins { plugin_dir: String },
    Privilege(String),
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonError::Config(e) => write!(f, "{e}"),
            DaemonError::Io { context, source } => write!(f, "{context}: {source}"),
            DaemonError::DuplicatePlugin { name } => {
                write!(f, "two plugins would both register as '{name}'")
            }
            DaemonError::NoPlugins { plugin_dir } => {
                write!(f, "no plugins found in directory {plugin_dir}")
            }
            DaemonError::Privilege(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for DaemonError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DaemonError::Config(e) => Some(e),
            DaemonError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for DaemonError {
    fn from(e: ConfigError) -> Self {
        DaemonError::Config(e)
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
