//! Atomic write-temp-and-rename persistence for the registry files (§6).
//!
//! Both the `users` and `rooms` files share the same discipline: one
//! line per entry, space-separated fields, rewritten wholesale on every
//! mutation. Loading is permissive — an unparseable line is skipped with
//! a warning rather than failing the whole load.

use crate::error::PersistError;
use std::path::Path;
use tracing::warn;

/// Load a registry file line by line, parsing each line with `parse_line`.
/// Lines that fail to parse are skipped with a `tracing::warn!` — this is
/// the "permissive load" behavior required by §4.2/§6. A missing file is
/// treated as an empty registry (first run).
pub fn load_lines<T>(path: &Path, mut parse_line: impl FnMut(&str) -> Option<T>) -> Vec<T> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read registry file, starting empty");
            return Vec::new();
        }
    };

    contents
        .lines()
        .filter_map(|line| {
            if line.trim().is_empty() {
                return None;
            }
            match parse_line(line) {
                Some(entry) => Some(entry),
                None => {
                    warn!(path = %path.display(), line, "skipping unparseable registry line");
                    None
                }
            }
        })
        .collect()
}

/// Rewrite a registry file atomically: write the full contents to a
/// sibling temp file, then rename it over the target. This guarantees
/// readers never observe a partially-written file, even if the process
/// is killed mid-write.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), PersistError> {
    let tmp_path = path.with_extension("tmp");
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| PersistError::Write {
            path: path.display().to_string(),
            source,
        })?;
    }
    std::fs::write(&tmp_path, contents).map_err(|source| PersistError::Write {
        path: tmp_path.display().to_string(),
        source,
    })?;
    std::fs::rename(&tmp_path, path).map_err(|source| PersistError::Write {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_missing_file_is_empty() {
        let lines: Vec<u32> = load_lines(Path::new("/nonexistent/path/xyz"), |l| l.parse().ok());
        assert!(lines.is_empty());
    }

    fn temp_suffix() -> u64 {
        rand::random()
    }

    #[test]
    fn load_skips_unparseable_lines() {
        let dir = std::env::temp_dir().join(format!("unn-test-{}", temp_suffix()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("nums");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "1\nnotanumber\n3").unwrap();
        let lines: Vec<u32> = load_lines(&path, |l| l.parse().ok());
        assert_eq!(lines, vec![1, 3]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn write_atomic_then_load_roundtrips() {
        let dir = std::env::temp_dir().join(format!("unn-test-{}", temp_suffix()));
        let path = dir.join("sub").join("data");
        write_atomic(&path, "a\nb\nc\n").unwrap();
        let lines: Vec<String> = load_lines(&path, |l| Some(l.to_string()));
        assert_eq!(lines, vec!["a", "b", "c"]);
        std::fs::remove_dir_all(&dir).ok();
    }
}
