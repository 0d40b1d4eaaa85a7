//! Image path and image name matching.
//!
//! Configured paths and OS-reported image paths drift (different drive
//! letter casing, forward slashes, a reinstall into another folder), so
//! matching happens in two tiers: the full path first, then the file name.

use std::path::Path;

/// How a live process matched a configured executable path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImageMatch {
    /// Full image path equals the configured path.
    FullPath,
    /// Only the file name matches, case-insensitively.
    FileName,
}

/// Last path segment, splitting on both `/` and `\`.
///
/// Windows-style paths are handled on every platform because records are
/// written on Windows.
pub fn image_file_name(path: &str) -> &str {
    let trimmed = path.trim().trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
}

fn normalize_path(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    if cfg!(windows) {
        unified.to_lowercase()
    } else {
        unified
    }
}

/// Case-insensitive image name equality.
pub fn same_image_name(a: &str, b: &str) -> bool {
    !a.is_empty() && a.to_lowercase() == b.to_lowercase()
}

/// Match a live process against a configured executable path.
///
/// `exe` is the process's full image path when the OS exposes it; `name` is
/// its image name (always available).
pub fn match_image(exe: Option<&Path>, name: &str, wanted: &str) -> Option<ImageMatch> {
    let wanted = wanted.trim();
    if wanted.is_empty() {
        return None;
    }

    if let Some(exe) = exe {
        let exe = exe.to_string_lossy();
        if normalize_path(&exe) == normalize_path(wanted) {
            return Some(ImageMatch::FullPath);
        }
    }

    if same_image_name(name, image_file_name(wanted)) {
        Some(ImageMatch::FileName)
    } else {
        None
    }
}
