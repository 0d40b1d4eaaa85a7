//! Icon extraction from executable images.
//!
//! Reads the `RT_GROUP_ICON`/`RT_ICON` resources of a PE file directly, so
//! extraction works on any host OS and never loads the executable.

mod decode;
mod pe;

pub use pe::{GroupEntry, IconResources, RT_GROUP_ICON, RT_ICON};

use crate::config::IconConfig;
use crate::error::{AppCtrlError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::path::Path;
use tracing::debug;

/// A decoded icon, re-encoded as PNG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconBitmap {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

impl IconBitmap {
    /// `data:` URL suitable for an `<img src>`.
    pub fn to_data_url(&self) -> String {
        icon_data_url(&self.png)
    }
}

/// Render PNG bytes as a `data:image/png;base64,...` URL.
pub fn icon_data_url(png: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png))
}

/// Stateless extractor; holds no resources between calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct IconExtractor;

impl IconExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract the highest-resolution icon of the executable at `path`.
    ///
    /// The first icon group is the application icon. Within it the 256px
    /// ("jumbo") image wins, then the largest, then the deepest color.
    /// Without any group the largest loose `RT_ICON` is used.
    ///
    /// # Errors
    ///
    /// - [`AppCtrlError::Io`] if the file is missing or unreadable
    /// - [`AppCtrlError::NoIcon`] if the file has no icon resource
    /// - [`AppCtrlError::InvalidIcon`] if the resource data is corrupt
    pub fn extract(&self, path: impl AsRef<Path>) -> Result<IconBitmap> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path).map_err(|e| AppCtrlError::io_with_path(e, path))?;
        if meta.len() > IconConfig::MAX_IMAGE_BYTES {
            return Err(AppCtrlError::InvalidIcon {
                path: path.to_path_buf(),
                message: format!("image of {} bytes is too large to scan", meta.len()),
            });
        }
        let data = std::fs::read(path).map_err(|e| AppCtrlError::io_with_path(e, path))?;
        self.extract_from_bytes(&data, path)
    }

    /// [`Self::extract`] over an image already in memory; `path` is only
    /// used in errors.
    pub fn extract_from_bytes(&self, data: &[u8], path: &Path) -> Result<IconBitmap> {
        let resources = pe::read_icon_resources(data, path)?;
        if resources.is_empty() {
            return Err(AppCtrlError::NoIcon(path.to_path_buf()));
        }

        let blob = select_image(&resources)
            .ok_or_else(|| AppCtrlError::NoIcon(path.to_path_buf()))?;
        let image = decode::decode_icon(blob, path)?;
        let (width, height) = image.dimensions();

        // PNG resources are already display-ready.
        let png = if decode::is_png(blob) {
            blob.to_vec()
        } else {
            decode::encode_png(&image, path)?
        };

        debug!("Extracted {}x{} icon from {}", width, height, path.display());
        Ok(IconBitmap { width, height, png })
    }
}

/// Pick the image to decode.
fn select_image(resources: &IconResources) -> Option<&[u8]> {
    if let Some(group) = resources.groups.first() {
        let mut candidates: Vec<&GroupEntry> = group.iter().collect();
        candidates.sort_by_key(|e| {
            (
                e.size == IconConfig::JUMBO_SIZE,
                e.size,
                e.bit_count,
                e.bytes_in_res,
            )
        });
        let chosen = candidates
            .into_iter()
            .rev()
            .find_map(|e| resources.icons.get(&e.icon_id));
        if let Some(blob) = chosen {
            return Some(blob.as_slice());
        }
        debug!("Icon group references no existing image; scanning loose icons");
    }

    resources
        .icons
        .values()
        .max_by_key(|blob| {
            let (w, h) = decode::dimensions(blob).unwrap_or((0, 0));
            (w.max(h), blob.len())
        })
        .map(Vec::as_slice)
}
