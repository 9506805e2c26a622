//! Relocation of transform remnants into a timestamped backup directory.
//!
//! Leftover or failed output is moved aside rather than deleted, so nothing
//! can shadow the live database and nothing is lost.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// SQLite side files that travel with a database file
pub const SIDECARS: [&str; 3] = ["-journal", "-wal", "-shm"];

/// `path` plus any of its SQLite side files that exist.
pub fn with_sidecars(path: &Path) -> Vec<PathBuf> {
    let mut out = vec![path.to_path_buf()];
    for suffix in SIDECARS {
        let mut name = OsString::from(path.as_os_str());
        name.push(suffix);
        out.push(PathBuf::from(name));
    }
    out.retain(|p| p.exists());
    out
}

/// Move every existing path into `<backup_root>/<timestamp>-<label>/`.
///
/// Returns the new locations. Paths that do not exist are skipped.
pub fn relocate(paths: &[PathBuf], backup_root: &Path, label: &str) -> Result<Vec<PathBuf>> {
    let existing: Vec<&PathBuf> = paths.iter().filter(|p| p.exists()).collect();
    if existing.is_empty() {
        return Ok(Vec::new());
    }

    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let target_dir = unique_dir(&backup_root.join(format!("{stamp}-{label}")));
    std::fs::create_dir_all(&target_dir)
        .with_context(|| format!("creating backup dir: {}", target_dir.display()))?;

    let mut moved = Vec::with_capacity(existing.len());
    for source in existing {
        let file_name = source
            .file_name()
            .with_context(|| format!("no file name in {}", source.display()))?;
        let target = target_dir.join(file_name);
        move_file(source, &target)?;
        tracing::info!(
            source = %source.display(),
            backup = %target.display(),
            "relocated transform remnant"
        );
        moved.push(target);
    }
    Ok(moved)
}

fn unique_dir(base: &Path) -> PathBuf {
    if !base.exists() {
        return base.to_path_buf();
    }
    let mut n = 1u32;
    loop {
        let mut name = OsString::from(base.as_os_str());
        name.push(format!("-{n}"));
        let candidate = PathBuf::from(name);
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Rename, or copy then remove when the backup dir is on another filesystem.
fn move_file(source: &Path, target: &Path) -> Result<()> {
    if std::fs::rename(source, target).is_ok() {
        return Ok(());
    }
    std::fs::copy(source, target).with_context(|| {
        format!("backing up {} -> {}", source.display(), target.display())
    })?;
    std::fs::remove_file(source).with_context(|| format!("removing {}", source.display()))
}
