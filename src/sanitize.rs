use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Resolve an archive entry name beneath `root`.
///
/// The name is normalized lexically: `.` segments and empty segments are
/// dropped and `..` pops a previously pushed segment. Absolute names, drive
/// prefixes, NUL bytes, and `..` that would climb above `root` are rejected
/// with [`Error::PathEscape`]. Backslashes are treated as separators, since
/// some Windows tools store them in entry names.
pub fn resolve_entry_path(root: &Path, entry: &str) -> Result<PathBuf> {
    let escape = || Error::PathEscape {
        entry: entry.to_string(),
        resolved: root.join(entry),
    };

    if entry.contains('\0') {
        return Err(escape());
    }

    let normalized = entry.replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(escape());
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(escape());
                }
            }
            name => {
                // `C:` and similar would replace the root when joined
                let mut components = Path::new(name).components();
                match (components.next(), components.next()) {
                    (Some(Component::Normal(_)), None) => segments.push(name),
                    _ => return Err(escape()),
                }
            }
        }
    }

    Ok(segments
        .into_iter()
        .fold(root.to_path_buf(), |path, segment| path.join(segment)))
}
