// ============================================
// winmaint - workspace.rs
// ============================================
// Filesystem chores around the HPIA workspace:
//
//   C:\HPIA\
//   ├── HPIA_Update.log        # kept forever (append mode)
//   ├── Reports\               # kept forever
//   ├── hp-hpia.exe            # removed at cleanup
//   ├── HPImageAssistant.exe   # removed at cleanup (plus its DLLs etc.)
//   └── Softpaqs\              # removed at cleanup
//
// Nothing here is undone on failure: if a step fails, whatever was
// already deleted or moved stays that way.
// ============================================

use anyhow::{bail, Context, Result};
use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::Config;

// ============================================
// PREPARE / CLEANUP
// ============================================

/// Clear stale state from a previous run and create the folder layout.
pub fn prepare(config: &Config) -> Result<()> {
    let root = &config.workspace_root;

    if root.exists() {
        let removed = clear_except(root, &config.preserved_names())?;
        if removed > 0 {
            tracing::info!("Removed {} stale item(s) from {}", removed, root.display());
        }
    }

    for dir in [root.clone(), config.softpaq_dir(), config.report_dir()] {
        fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    Ok(())
}

/// End-of-run cleanup:
/// 1. everything under the root except the log file and report folder
/// 2. reparse-point leftovers (links/junctions) anywhere under the root
/// 3. the system temp folder HP installers unpack into (C:\SWSetup)
pub fn cleanup(config: &Config) -> Result<CleanupSummary> {
    let root = &config.workspace_root;
    let mut summary = CleanupSummary::default();

    if root.exists() {
        summary.workspace_items = clear_except(root, &config.preserved_names())?;
        summary.links = remove_reparse_points(root)?;
    }

    let temp = &config.system_temp_dir;
    if temp.exists() {
        fs::remove_dir_all(temp).with_context(|| format!("Failed to remove {}", temp.display()))?;
        summary.system_temp_removed = true;
        tracing::info!("Removed {}", temp.display());
    }

    Ok(summary)
}

/// What `cleanup` removed
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CleanupSummary {
    pub workspace_items: usize,
    pub links: usize,
    pub system_temp_removed: bool,
}

/// Remove every direct child of `root` whose name is not in `keep`.
/// Returns how many entries were removed.
pub fn clear_except(root: &Path, keep: &[&str]) -> Result<usize> {
    let mut removed = 0;

    let entries = fs::read_dir(root).with_context(|| format!("Failed to list {}", root.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list {}", root.display()))?;
        let name = entry.file_name().to_string_lossy().to_string();

        // Windows file names are case-insensitive
        if keep.iter().any(|k| k.eq_ignore_ascii_case(&name)) {
            continue;
        }

        remove_entry(&entry.path())?;
        removed += 1;
    }

    Ok(removed)
}

/// Remove a file, folder tree, or link. Links are removed themselves,
/// never the thing they point to.
fn remove_entry(path: &Path) -> Result<()> {
    let metadata =
        fs::symlink_metadata(path).with_context(|| format!("Failed to inspect {}", path.display()))?;

    let result = if is_reparse_point(&metadata) {
        remove_link(path)
    } else if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    result.with_context(|| format!("Failed to remove {}", path.display()))?;
    tracing::debug!("Removed {}", path.display());
    Ok(())
}

fn remove_link(path: &Path) -> std::io::Result<()> {
    // Directory links/junctions need remove_dir on Windows, remove_file elsewhere
    fs::remove_file(path).or_else(|_| fs::remove_dir(path))
}

// ============================================
// REPARSE POINTS
// ============================================

/// Is this entry a reparse point (symlink, junction, mount point)?
/// `metadata` must come from symlink_metadata so the link isn't followed.
#[cfg(windows)]
pub fn is_reparse_point(metadata: &Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    metadata.file_attributes() & winapi::um::winnt::FILE_ATTRIBUTE_REPARSE_POINT != 0
}

#[cfg(not(windows))]
pub fn is_reparse_point(metadata: &Metadata) -> bool {
    metadata.file_type().is_symlink()
}

/// Remove every reparse point found under `root`. Links are not followed.
pub fn remove_reparse_points(root: &Path) -> Result<usize> {
    let mut links: Vec<PathBuf> = Vec::new();

    // Collect first, delete after, so the walk never sees a half-removed tree
    for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
        let entry = entry.with_context(|| format!("Failed to scan {}", root.display()))?;
        let metadata = match fs::symlink_metadata(entry.path()) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if is_reparse_point(&metadata) {
            links.push(entry.path().to_path_buf());
        }
    }

    for link in &links {
        remove_link(link).with_context(|| format!("Failed to remove link {}", link.display()))?;
        tracing::info!("Removed link artifact {}", link.display());
    }

    Ok(links.len())
}

// ============================================
// REPORT RELOCATION
// ============================================

/// Result of moving HPIA reports into the report folder
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RelocationSummary {
    /// Files moved (destination paths)
    pub moved: Vec<PathBuf>,
    /// Files that matched the model prefix but not the extension allow-set
    pub skipped: Vec<PathBuf>,
}

/// Move report files out of `src_dir` into `dest_dir`.
///
/// A file moves only when BOTH hold:
///   - its name starts with the exact `model` string
///   - its extension is in `extensions` (case-insensitive)
/// Model matches with any other extension stay where they are.
/// Files that don't start with the model are not touched at all.
pub fn relocate_reports(
    src_dir: &Path,
    dest_dir: &Path,
    model: &str,
    extensions: &[String],
) -> Result<RelocationSummary> {
    if model.trim().is_empty() {
        bail!("Refusing to relocate reports with an empty model name");
    }

    let mut summary = RelocationSummary::default();
    if !src_dir.exists() {
        tracing::warn!("{} does not exist, no reports to move", src_dir.display());
        return Ok(summary);
    }

    fs::create_dir_all(dest_dir).with_context(|| format!("Failed to create {}", dest_dir.display()))?;

    let entries =
        fs::read_dir(src_dir).with_context(|| format!("Failed to list {}", src_dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to list {}", src_dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(model) {
            continue;
        }

        let allowed = path
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy();
                extensions.iter().any(|allowed| allowed.eq_ignore_ascii_case(&ext))
            })
            .unwrap_or(false);

        if !allowed {
            tracing::info!("Skipping {} (not a report file type)", name);
            summary.skipped.push(path);
            continue;
        }

        let dest = dest_dir.join(&name);
        move_file(&path, &dest)?;
        tracing::info!("Moved report {} -> {}", name, dest_dir.display());
        summary.moved.push(dest);
    }

    Ok(summary)
}

/// Rename, or copy + delete when the folders are on different volumes.
/// An existing file at `dest` is replaced.
fn move_file(src: &Path, dest: &Path) -> Result<()> {
    if dest.exists() {
        fs::remove_file(dest).with_context(|| format!("Failed to replace {}", dest.display()))?;
    }
    if fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    fs::copy(src, dest)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;
    fs::remove_file(src).with_context(|| format!("Failed to remove {}", src.display()))?;
    Ok(())
}

// ============================================
// TESTS
// ============================================
