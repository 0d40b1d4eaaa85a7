//! Portable Executable resource reader.
//!
//! Walks just enough of the PE format to reach the resource tree:
//! DOS header, NT headers, the resource data directory, the section table,
//! then the three-level type / name / language directory.

use crate::error::{AppCtrlError, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// `RT_ICON`: one image of an icon.
pub const RT_ICON: u32 = 3;
/// `RT_GROUP_ICON`: directory of the images making up one icon.
pub const RT_GROUP_ICON: u32 = 14;

const IMAGE_DIRECTORY_ENTRY_RESOURCE: usize = 2;
const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;
const SECTION_HEADER_SIZE: usize = 40;
const GROUP_ENTRY_SIZE: usize = 14;
/// Upper bound on entries per resource directory; real files have a handful.
const MAX_DIRECTORY_ENTRIES: usize = 4096;

/// One image listed in an icon group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupEntry {
    /// Edge length in pixels (a stored 0 means 256).
    pub size: u32,
    pub bit_count: u16,
    pub bytes_in_res: u32,
    /// `RT_ICON` id holding the image.
    pub icon_id: u32,
}

/// Icon resources found in an executable.
#[derive(Debug, Default)]
pub struct IconResources {
    /// Icon groups in directory order; the first is the application icon.
    pub groups: Vec<Vec<GroupEntry>>,
    /// `RT_ICON` images by id.
    pub icons: BTreeMap<u32, Vec<u8>>,
}

impl IconResources {
    pub fn is_empty(&self) -> bool {
        self.icons.is_empty()
    }
}

/// Bounds-checked little-endian reads that fail as invalid icon data.
struct Reader<'a> {
    data: &'a [u8],
    path: &'a Path,
}

impl<'a> Reader<'a> {
    fn invalid(&self, message: impl Into<String>) -> AppCtrlError {
        AppCtrlError::InvalidIcon {
            path: self.path.to_path_buf(),
            message: message.into(),
        }
    }

    fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| self.invalid(format!("truncated at offset {offset:#x} (+{len})")))
    }

    fn u16(&self, offset: usize) -> Result<u16> {
        let b = self.slice(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&self, offset: usize) -> Result<u32> {
        let b = self.slice(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

#[derive(Debug, Clone, Copy)]
struct Section {
    virtual_address: u32,
    virtual_size: u32,
    raw_size: u32,
    raw_pointer: u32,
}

struct PeImage<'a> {
    reader: Reader<'a>,
    sections: Vec<Section>,
    /// File offset of the resource section start.
    resource_base: usize,
}

/// Read every icon resource from the image in `data`.
///
/// # Errors
///
/// - [`AppCtrlError::NoIcon`] if `data` is not a PE image or has no resources
/// - [`AppCtrlError::InvalidIcon`] if the headers or resource tree are corrupt
pub fn read_icon_resources(data: &[u8], path: &Path) -> Result<IconResources> {
    let no_icon = || AppCtrlError::NoIcon(PathBuf::from(path));

    if data.len() < 64 || &data[0..2] != b"MZ" {
        return Err(no_icon());
    }

    let reader = Reader { data, path };
    let Some(pe) = PeImage::parse(reader)? else {
        return Err(no_icon());
    };

    let mut resources = IconResources::default();
    for (id, blob) in pe.leaves_of_type(RT_ICON)? {
        resources.icons.entry(id).or_insert_with(|| blob.to_vec());
    }
    for (_, blob) in pe.leaves_of_type(RT_GROUP_ICON)? {
        resources.groups.push(parse_group(blob, &pe.reader)?);
    }

    debug!(
        "{}: {} icon groups, {} icon images",
        path.display(),
        resources.groups.len(),
        resources.icons.len()
    );
    Ok(resources)
}

impl<'a> PeImage<'a> {
    /// Returns `None` when the image has no resource directory.
    fn parse(reader: Reader<'a>) -> Result<Option<Self>> {
        let nt = reader.u32(0x3c)? as usize;
        if reader.slice(nt, 4)? != b"PE\0\0" {
            return Err(reader.invalid("missing PE signature"));
        }

        let coff = nt + 4;
        let section_count = reader.u16(coff + 2)? as usize;
        let optional_size = reader.u16(coff + 16)? as usize;
        let optional = coff + 20;

        let (rva_count_offset, directories) = match reader.u16(optional)? {
            PE32_MAGIC => (optional + 92, optional + 96),
            PE32_PLUS_MAGIC => (optional + 108, optional + 112),
            magic => return Err(reader.invalid(format!("unknown optional header magic {magic:#x}"))),
        };
        let rva_count = reader.u32(rva_count_offset)? as usize;
        if rva_count <= IMAGE_DIRECTORY_ENTRY_RESOURCE {
            return Ok(None);
        }
        let resource_dir = directories + IMAGE_DIRECTORY_ENTRY_RESOURCE * 8;
        let resource_rva = reader.u32(resource_dir)?;
        let resource_size = reader.u32(resource_dir + 4)?;
        if resource_rva == 0 || resource_size == 0 {
            return Ok(None);
        }

        let section_table = optional + optional_size;
        let sections = (0..section_count)
            .map(|i| {
                let at = section_table + i * SECTION_HEADER_SIZE;
                Ok(Section {
                    virtual_size: reader.u32(at + 8)?,
                    virtual_address: reader.u32(at + 12)?,
                    raw_size: reader.u32(at + 16)?,
                    raw_pointer: reader.u32(at + 20)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut image = PeImage {
            reader,
            sections,
            resource_base: 0,
        };
        image.resource_base = image.rva_to_offset(resource_rva)?;
        Ok(Some(image))
    }

    fn rva_to_offset(&self, rva: u32) -> Result<usize> {
        self.sections
            .iter()
            .find(|s| {
                let span = s.virtual_size.max(s.raw_size);
                rva >= s.virtual_address && rva - s.virtual_address < span
            })
            .map(|s| (rva - s.virtual_address) as usize + s.raw_pointer as usize)
            .ok_or_else(|| self.reader.invalid(format!("RVA {rva:#x} outside all sections")))
    }

    /// Entries of the resource directory at `offset` (relative to the
    /// resource base): `(id, is_directory, target offset)`. Named entries
    /// get id `u32::MAX`.
    fn directory(&self, offset: usize) -> Result<Vec<(u32, bool, usize)>> {
        let at = self.resource_base + offset;
        let named = self.reader.u16(at + 12)? as usize;
        let ids = self.reader.u16(at + 14)? as usize;
        let count = named + ids;
        if count > MAX_DIRECTORY_ENTRIES {
            return Err(self.reader.invalid(format!("{count} resource entries")));
        }

        (0..count)
            .map(|i| {
                let entry = at + 16 + i * 8;
                let name = self.reader.u32(entry)?;
                let target = self.reader.u32(entry + 4)?;
                let id = if name & 0x8000_0000 != 0 {
                    u32::MAX
                } else {
                    name & 0xffff
                };
                let is_dir = target & 0x8000_0000 != 0;
                Ok((id, is_dir, (target & 0x7fff_ffff) as usize))
            })
            .collect()
    }

    fn leaf_data(&self, offset: usize) -> Result<&'a [u8]> {
        let at = self.resource_base + offset;
        let rva = self.reader.u32(at)?;
        let size = self.reader.u32(at + 4)? as usize;
        if size > crate::config::IconConfig::MAX_ICON_BYTES {
            return Err(self.reader.invalid(format!("resource of {size} bytes")));
        }
        let start = self.rva_to_offset(rva)?;
        self.reader.slice(start, size)
    }

    /// `(name id, data)` for every resource of `type_id`, first language only.
    fn leaves_of_type(&self, type_id: u32) -> Result<Vec<(u32, &'a [u8])>> {
        let Some((_, _, names_dir)) = self
            .directory(0)?
            .into_iter()
            .find(|(id, is_dir, _)| *id == type_id && *is_dir)
        else {
            return Ok(Vec::new());
        };

        let mut leaves = Vec::new();
        for (name_id, is_dir, target) in self.directory(names_dir)? {
            if !is_dir {
                continue;
            }
            let first_language = self
                .directory(target)?
                .into_iter()
                .find(|(_, is_dir, _)| !is_dir);
            if let Some((_, _, leaf)) = first_language {
                leaves.push((name_id, self.leaf_data(leaf)?));
            }
        }
        Ok(leaves)
    }
}

/// Parse a `GRPICONDIR` blob.
fn parse_group(blob: &[u8], parent: &Reader<'_>) -> Result<Vec<GroupEntry>> {
    let reader = Reader {
        data: blob,
        path: parent.path,
    };
    let count = reader.u16(4)? as usize;
    (0..count)
        .map(|i| {
            let at = 6 + i * GROUP_ENTRY_SIZE;
            let width = reader.slice(at, 1)?[0];
            Ok(GroupEntry {
                size: if width == 0 { 256 } else { u32::from(width) },
                bit_count: reader.u16(at + 6)?,
                bytes_in_res: reader.u32(at + 8)?,
                icon_id: u32::from(reader.u16(at + 12)?),
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod testing {
    //! Builds minimal PE32 images with a resource section in memory.

    const SECTION_RVA: u32 = 0x1000;
    const SECTION_FILE_OFFSET: usize = 0x200;

    fn put_u16(out: &mut [u8], at: usize, v: u16) {
        out[at..at + 2].copy_from_slice(&v.to_le_bytes());
    }

    fn put_u32(out: &mut [u8], at: usize, v: u32) {
        out[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }

    fn dir_header(out: &mut [u8], at: usize, ids: usize) {
        put_u16(out, at + 14, ids as u16);
    }

    fn entry(out: &mut [u8], at: usize, id: u32, target: u32) {
        put_u32(out, at, id);
        put_u32(out, at + 4, target);
    }

    /// Resource section for `types`: `(type id, [(name id, data)])`.
    fn resource_section(types: &[(u32, Vec<(u32, Vec<u8>)>)]) -> Vec<u8> {
        let mut dir_size = 16 + 8 * types.len();
        for (_, items) in types {
            dir_size += 16 + 8 * items.len() + items.len() * 24;
        }
        let leaf_count: usize = types.iter().map(|(_, items)| items.len()).sum();
        let raw_start = dir_size + 16 * leaf_count;

        let mut out = vec![0u8; raw_start];
        let mut raw = Vec::new();
        let mut cursor = 16 + 8 * types.len();
        let mut leaf_index = 0;

        dir_header(&mut out, 0, types.len());
        for (ti, (type_id, items)) in types.iter().enumerate() {
            let type_dir = cursor;
            cursor += 16 + 8 * items.len();
            entry(&mut out, 16 + 8 * ti, *type_id, 0x8000_0000 | type_dir as u32);
            dir_header(&mut out, type_dir, items.len());

            for (ii, (id, data)) in items.iter().enumerate() {
                let lang_dir = cursor;
                cursor += 24;
                entry(&mut out, type_dir + 16 + 8 * ii, *id, 0x8000_0000 | lang_dir as u32);
                dir_header(&mut out, lang_dir, 1);

                let leaf = dir_size + 16 * leaf_index;
                leaf_index += 1;
                entry(&mut out, lang_dir + 16, 0x409, leaf as u32);
                put_u32(&mut out, leaf, SECTION_RVA + (raw_start + raw.len()) as u32);
                put_u32(&mut out, leaf + 4, data.len() as u32);

                raw.extend_from_slice(data);
                while raw.len() % 4 != 0 {
                    raw.push(0);
                }
            }
        }
        out.extend_from_slice(&raw);
        out
    }

    /// A PE32 image whose only section is `.rsrc` holding `types`.
    pub(crate) fn build_pe(types: &[(u32, Vec<(u32, Vec<u8>)>)]) -> Vec<u8> {
        let rsrc = resource_section(types);
        let mut out = vec![0u8; SECTION_FILE_OFFSET];

        out[0..2].copy_from_slice(b"MZ");
        put_u32(&mut out, 0x3c, 0x40);
        out[0x40..0x44].copy_from_slice(b"PE\0\0");

        let coff = 0x44;
        put_u16(&mut out, coff, 0x14c);
        put_u16(&mut out, coff + 2, 1);
        put_u16(&mut out, coff + 16, 224);

        let optional = coff + 20;
        put_u16(&mut out, optional, super::PE32_MAGIC);
        put_u32(&mut out, optional + 92, 16);
        if !types.is_empty() {
            put_u32(&mut out, optional + 96 + 16, SECTION_RVA);
            put_u32(&mut out, optional + 96 + 20, rsrc.len() as u32);
        }

        let section = optional + 224;
        out[section..section + 5].copy_from_slice(b".rsrc");
        put_u32(&mut out, section + 8, rsrc.len() as u32);
        put_u32(&mut out, section + 12, SECTION_RVA);
        put_u32(&mut out, section + 16, rsrc.len() as u32);
        put_u32(&mut out, section + 20, SECTION_FILE_OFFSET as u32);

        out.extend_from_slice(&rsrc);
        out
    }

    /// `GRPICONDIR` for `(width byte, bit count, icon id, byte size)` entries.
    pub(crate) fn group(entries: &[(u8, u16, u16, u32)]) -> Vec<u8> {
        let mut out = vec![0u8; 6 + entries.len() * 14];
        put_u16(&mut out, 2, 1);
        put_u16(&mut out, 4, entries.len() as u16);
        for (i, (width, bits, id, size)) in entries.iter().enumerate() {
            let at = 6 + i * 14;
            out[at] = *width;
            out[at + 1] = *width;
            put_u16(&mut out, at + 4, 1);
            put_u16(&mut out, at + 6, *bits);
            put_u32(&mut out, at + 8, *size);
            put_u16(&mut out, at + 12, *id);
        }
        out
    }
}
