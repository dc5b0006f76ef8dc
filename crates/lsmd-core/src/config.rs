//! Minimal `key = value;` config file grammar, just enough to read the two
//! boolean options lsmd cares about. No general-purpose config crate in the
//! dependency graph speaks this exact dialect, so it is hand-parsed with
//! `regex`, the way other small lookups in this codebase are done.

use crate::error::ConfigError;
use regex::Regex;
use std::path::Path;

/// Reads a single boolean key out of `path`.
///
/// - Missing file: returns `Ok(None)`, caller keeps the current default.
/// - Missing key: returns `Ok(None)`.
/// - Present but malformed file: `Err`.
pub fn parse_conf_bool(path: &Path, key_name: &str) -> Result<Option<bool>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let entry_re = Regex::new(r"^\s*([A-Za-z0-9_-]+)\s*=\s*(.+?)\s*;?\s*$").unwrap();

    for (lineno, raw_line) in contents.lines().enumerate() {
        let line = match raw_line.find('#') {
            Some(idx) => &raw_line[..idx],
            None => raw_line,
        };
        if line.trim().is_empty() {
            continue;
        }

        let caps = entry_re.captures(line).ok_or_else(|| ConfigError::Parse {
            path: path.display().to_string(),
            line: lineno + 1,
            message: format!("malformed entry: {raw_line}"),
        })?;

        if &caps[1] != key_name {
            continue;
        }

        return Ok(Some(parse_bool_value(&caps[2]).ok_or_else(|| ConfigError::Parse {
            path: path.display().to_string(),
            line: lineno + 1,
            message: format!("'{}' is not a boolean value", &caps[2]),
        })?));
    }

    Ok(None)
}

fn parse_bool_value(raw: &str) -> Option<bool> {
    match raw.trim().trim_matches('"').to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
