//! Extraction of `RT_RCDATA` resources from a PE32+ binary.
//!
//! The proprietary compute shaders ship inside a Windows DLL. This
//! module walks just enough of the PE format to find them: DOS header,
//! PE header, the PE32+ optional header's resource data directory, the
//! section table, and finally the three-level resource directory tree
//! (type → id → language). Every read is bounds-checked and any
//! inconsistency aborts the walk.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::Error;

/// DOS header magic `MZ`.
const DOS_MAGIC: u16 = 0x5A4D;
/// PE signature `PE\0\0`.
const PE_SIGNATURE: u32 = 0x0000_4550;
/// Optional-header magic for PE32+.
const PE32_PLUS_MAGIC: u16 = 0x20B;
/// Resource type id of `RT_RCDATA`.
const RT_RCDATA: u32 = 10;
/// High bit of a directory entry offset marks a subdirectory.
const SUBDIR_BIT: u32 = 0x8000_0000;

/// File offset of `e_lfanew` in the DOS header.
const DOS_PE_OFFSET: usize = 60;
/// Size of the PE header (signature + COFF header).
const PE_HEADER_SIZE: usize = 24;
/// Offset of the section count within the PE header.
const PE_SECTION_COUNT: usize = 6;
/// Offset of the optional-header size within the PE header.
const PE_OPT_HDR_SIZE: usize = 20;
/// Offset of the resource data-directory entry within the PE32+
/// optional header (index 2 of the directory table at offset 112).
const OPT_RESOURCE_DIR: usize = 128;
/// Size of one section header.
const SECTION_HEADER_SIZE: usize = 40;
/// Size of a resource directory header.
const RESOURCE_DIR_SIZE: usize = 16;
/// Size of a resource directory entry.
const RESOURCE_ENTRY_SIZE: usize = 8;

/// Read all `RT_RCDATA` resources from a PE32+ file, keyed by their
/// numeric id.
pub fn extract_resources(path: &Path) -> Result<HashMap<u32, Vec<u8>>, Error> {
    let data = fs::read(path)
        .map_err(|e| Error::config(format!("failed to read {}: {}", path.display(), e)))?;
    parse_resources(&data)
}

/// Parse `RT_RCDATA` resources out of an in-memory PE32+ image.
pub fn parse_resources(data: &[u8]) -> Result<HashMap<u32, Vec<u8>>, Error> {
    // DOS header
    if read_u16(data, 0)? != DOS_MAGIC {
        return Err(Error::config("dos header magic number is incorrect"));
    }
    let pe_offset = read_u32(data, DOS_PE_OFFSET)? as usize;

    // PE header
    if read_u32(data, pe_offset)? != PE_SIGNATURE {
        return Err(Error::config("pe header signature is incorrect"));
    }
    let section_count = read_u16(data, checked_add(pe_offset, PE_SECTION_COUNT)?)? as usize;
    let opt_hdr_size = read_u16(data, checked_add(pe_offset, PE_OPT_HDR_SIZE)?)? as usize;

    // Optional header, PE32+ only
    let opt_offset = checked_add(pe_offset, PE_HEADER_SIZE)?;
    if read_u16(data, opt_offset)? != PE32_PLUS_MAGIC {
        return Err(Error::config("pe format is not PE32+"));
    }
    let rsrc_rva = read_u32(data, checked_add(opt_offset, OPT_RESOURCE_DIR)?)?;
    let rsrc_size = read_u32(data, checked_add(opt_offset, OPT_RESOURCE_DIR + 4)?)?;

    // Locate the section containing the resource table and map its RVA
    // to a file offset.
    let sections_offset = checked_add(opt_offset, opt_hdr_size)?;
    let mut rsrc_offset = None;
    for i in 0..section_count {
        let section = checked_add(sections_offset, i * SECTION_HEADER_SIZE)?;
        let vsize = read_u32(data, checked_add(section, 8)?)?;
        let vaddr = read_u32(data, checked_add(section, 12)?)?;
        let foffset = read_u32(data, checked_add(section, 20)?)?;

        if rsrc_rva < vaddr || rsrc_rva > vaddr.wrapping_add(vsize) {
            continue;
        }

        rsrc_offset = Some((rsrc_rva - vaddr) as usize + foffset as usize);
        break;
    }
    let rsrc_offset = rsrc_offset
        .ok_or_else(|| Error::config("unable to locate resource section"))?;

    // Root resource directory: one entry per resource type. A shader
    // library carries at least icons, version info and the data blobs.
    let root_entries = read_directory_entries(data, rsrc_offset, 3)?;

    let mut rcdata_offset = None;
    for (id, offset) in root_entries {
        if id != RT_RCDATA {
            continue;
        }
        if offset & SUBDIR_BIT == 0 {
            return Err(Error::config("expected resource directory, found data entry"));
        }
        rcdata_offset = Some((offset & !SUBDIR_BIT) as usize);
    }
    let rcdata_offset =
        rcdata_offset.ok_or_else(|| Error::config("unable to locate RT_RCDATA directory"))?;

    // RT_RCDATA directory: one entry per resource id.
    let rcdata_entries =
        read_directory_entries(data, checked_add(rsrc_offset, rcdata_offset)?, 1)?;

    let mut resources = HashMap::with_capacity(rcdata_entries.len());
    for (id, offset) in rcdata_entries {
        if offset & SUBDIR_BIT == 0 {
            return Err(Error::config("expected resource directory, found data entry"));
        }

        // Each id holds a language directory; take its first leaf.
        let lang_offset = checked_add(rsrc_offset, (offset & !SUBDIR_BIT) as usize)?;
        let lang_entries = read_directory_entries(data, lang_offset, 1)?;
        let (_, leaf_offset) = lang_entries[0];
        if leaf_offset & SUBDIR_BIT != 0 {
            return Err(Error::config("expected resource data entry, but found directory"));
        }

        // Resource data entry: RVA + size, both relative to the image.
        let entry_offset = checked_add(rsrc_offset, leaf_offset as usize)?;
        let data_rva = read_u32(data, entry_offset)?;
        let data_size = read_u32(data, checked_add(entry_offset, 4)?)? as usize;

        if data_rva < rsrc_rva || data_rva > rsrc_rva.wrapping_add(rsrc_size) {
            return Err(Error::config("resource data entry points outside resource section"));
        }

        let data_offset = checked_add(rsrc_offset, (data_rva - rsrc_rva) as usize)?;
        let data_end = checked_add(data_offset, data_size)?;
        if data_end > data.len() {
            return Err(Error::config("resource data entry points outside file"));
        }

        resources.insert(id, data[data_offset..data_end].to_vec());
    }

    Ok(resources)
}

/// Read a resource directory header and its `(id, offset)` entries,
/// requiring at least `min_ids` id entries.
fn read_directory_entries(
    data: &[u8],
    offset: usize,
    min_ids: usize,
) -> Result<Vec<(u32, u32)>, Error> {
    let name_count = read_u16(data, checked_add(offset, 12)?)? as usize;
    let id_count = read_u16(data, checked_add(offset, 14)?)? as usize;
    if id_count < min_ids {
        return Err(Error::config("resource directory does not have enough entries"));
    }

    let first = checked_add(offset, RESOURCE_DIR_SIZE)?;
    let mut entries = Vec::with_capacity(name_count + id_count);
    for i in 0..(name_count + id_count) {
        let entry = checked_add(first, i * RESOURCE_ENTRY_SIZE)?;
        entries.push((read_u32(data, entry)?, read_u32(data, checked_add(entry, 4)?)?));
    }
    Ok(entries)
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, Error> {
    let end = checked_add(offset, 2)?;
    if end > data.len() {
        return Err(Error::config("buffer overflow while parsing resource file"));
    }
    Ok(u16::from_le_bytes([data[offset], data[offset + 1]]))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, Error> {
    let end = checked_add(offset, 4)?;
    if end > data.len() {
        return Err(Error::config("buffer overflow while parsing resource file"));
    }
    Ok(u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ]))
}

fn checked_add(a: usize, b: usize) -> Result<usize, Error> {
    a.checked_add(b)
        .ok_or_else(|| Error::config("offset overflow while parsing resource file"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const RSRC_RVA: u32 = 0x1000;
    const RSRC_FOFF: usize = 0x200;

    fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
        buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
        buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Build a minimal PE32+ image with one RT_RCDATA directory holding
    /// the given resources.
    fn build_pe(entries: &[(u32, &[u8])]) -> Vec<u8> {
        // Resource section: root dir (3 type entries, RT_RCDATA last),
        // id dir, one language dir + data entry per resource, raw data.
        let n = entries.len();
        let rcdata_dir = 16 + 3 * 8;
        let per_resource_meta = 16 + 8 + 16;
        let data_start = rcdata_dir + 16 + n * 8 + n * per_resource_meta;

        let total_data: usize = entries.iter().map(|(_, d)| d.len()).sum();
        let mut rsrc = vec![0u8; data_start + total_data];

        // Root directory: no names, three ids (two dummies + RT_RCDATA).
        put_u16(&mut rsrc, 14, 3);
        put_u32(&mut rsrc, 16, 3); // RT_ICON, leaf offset unused
        put_u32(&mut rsrc, 20, 0);
        put_u32(&mut rsrc, 24, 6); // RT_STRING
        put_u32(&mut rsrc, 28, 0);
        put_u32(&mut rsrc, 32, RT_RCDATA);
        put_u32(&mut rsrc, 36, SUBDIR_BIT | rcdata_dir as u32);

        // RT_RCDATA directory.
        put_u16(&mut rsrc, rcdata_dir + 14, n as u16);

        let mut meta = rcdata_dir + 16 + n * 8;
        let mut data_off = data_start;
        for (i, (id, payload)) in entries.iter().enumerate() {
            let lang_dir = meta;
            let data_entry = meta + 16 + 8;

            put_u32(&mut rsrc, rcdata_dir + 16 + i * 8, *id);
            put_u32(&mut rsrc, rcdata_dir + 20 + i * 8, SUBDIR_BIT | lang_dir as u32);

            // Language directory with a single leaf.
            put_u16(&mut rsrc, lang_dir + 14, 1);
            put_u32(&mut rsrc, lang_dir + 16, 0x409);
            put_u32(&mut rsrc, lang_dir + 20, data_entry as u32);

            // Resource data entry.
            put_u32(&mut rsrc, data_entry, RSRC_RVA + data_off as u32);
            put_u32(&mut rsrc, data_entry + 4, payload.len() as u32);

            rsrc[data_off..data_off + payload.len()].copy_from_slice(payload);
            data_off += payload.len();
            meta += per_resource_meta;
        }

        // File: DOS header, PE header, optional header, one section.
        let mut file = vec![0u8; RSRC_FOFF + rsrc.len()];
        put_u16(&mut file, 0, DOS_MAGIC);
        put_u32(&mut file, DOS_PE_OFFSET, 64);

        put_u32(&mut file, 64, PE_SIGNATURE);
        put_u16(&mut file, 64 + PE_SECTION_COUNT, 1);
        put_u16(&mut file, 64 + PE_OPT_HDR_SIZE, 240);

        let opt = 64 + PE_HEADER_SIZE;
        put_u16(&mut file, opt, PE32_PLUS_MAGIC);
        put_u32(&mut file, opt + OPT_RESOURCE_DIR, RSRC_RVA);
        put_u32(&mut file, opt + OPT_RESOURCE_DIR + 4, rsrc.len() as u32);

        let section = opt + 240;
        put_u32(&mut file, section + 8, rsrc.len() as u32); // virtual size
        put_u32(&mut file, section + 12, RSRC_RVA);
        put_u32(&mut file, section + 16, rsrc.len() as u32); // raw size
        put_u32(&mut file, section + 20, RSRC_FOFF as u32);

        file[RSRC_FOFF..].copy_from_slice(&rsrc);
        file
    }

    // ============================================================
    // Round trip
    // ============================================================

    #[test]
    fn test_roundtrip_single_resource() {
        let pe = build_pe(&[(305, b"spirv-bytes".as_slice())]);
        let resources = parse_resources(&pe).unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[&305], b"spirv-bytes");
    }

    #[test]
    fn test_roundtrip_multiple_resources() {
        let pe = build_pe(&[
            (304, b"mipmaps".as_slice()),
            (305, b"generate".as_slice()),
            (316, b"alpha-zero".as_slice()),
        ]);
        let resources = parse_resources(&pe).unwrap();
        assert_eq!(resources.len(), 3);
        assert_eq!(resources[&304], b"mipmaps");
        assert_eq!(resources[&305], b"generate");
        assert_eq!(resources[&316], b"alpha-zero");
    }

    #[test]
    fn test_empty_payload_roundtrips() {
        let pe = build_pe(&[(400, b"".as_slice()), (401, b"x".as_slice())]);
        let resources = parse_resources(&pe).unwrap();
        assert_eq!(resources[&400], b"");
        assert_eq!(resources[&401], b"x");
    }

    // ============================================================
    // Header validation
    // ============================================================

    #[test]
    fn test_rejects_bad_dos_magic() {
        let mut pe = build_pe(&[(305, b"data".as_slice())]);
        pe[0] = b'X';
        let err = parse_resources(&pe).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(err.message(), "dos header magic number is incorrect");
    }

    #[test]
    fn test_rejects_bad_pe_signature() {
        let mut pe = build_pe(&[(305, b"data".as_slice())]);
        put_u32(&mut pe, 64, 0xDEAD_BEEF);
        let err = parse_resources(&pe).unwrap_err();
        assert_eq!(err.message(), "pe header signature is incorrect");
    }

    #[test]
    fn test_rejects_pe32_binaries() {
        let mut pe = build_pe(&[(305, b"data".as_slice())]);
        put_u16(&mut pe, 64 + PE_HEADER_SIZE, 0x10B); // PE32, not PE32+
        let err = parse_resources(&pe).unwrap_err();
        assert_eq!(err.message(), "pe format is not PE32+");
    }

    #[test]
    fn test_rejects_truncated_file() {
        let pe = build_pe(&[(305, b"data".as_slice())]);
        let err = parse_resources(&pe[..32]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_rejects_truncated_resource_section() {
        let pe = build_pe(&[(305, b"data".as_slice())]);
        // Cut the file in the middle of the resource directory tree.
        let err = parse_resources(&pe[..RSRC_FOFF + 20]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    // ============================================================
    // Directory tree validation
    // ============================================================

    #[test]
    fn test_rejects_sparse_root_directory() {
        let mut pe = build_pe(&[(305, b"data".as_slice())]);
        put_u16(&mut pe, RSRC_FOFF + 14, 2); // fewer than three type entries
        let err = parse_resources(&pe).unwrap_err();
        assert_eq!(err.message(), "resource directory does not have enough entries");
    }

    #[test]
    fn test_rejects_missing_rcdata_directory() {
        let mut pe = build_pe(&[(305, b"data".as_slice())]);
        put_u32(&mut pe, RSRC_FOFF + 32, 11); // retype the RT_RCDATA entry
        let err = parse_resources(&pe).unwrap_err();
        assert_eq!(err.message(), "unable to locate RT_RCDATA directory");
    }

    #[test]
    fn test_rejects_rcdata_leaf_at_type_level() {
        let mut pe = build_pe(&[(305, b"data".as_slice())]);
        let off = u32::from_le_bytes(pe[RSRC_FOFF + 36..RSRC_FOFF + 40].try_into().unwrap());
        put_u32(&mut pe, RSRC_FOFF + 36, off & !SUBDIR_BIT);
        let err = parse_resources(&pe).unwrap_err();
        assert_eq!(err.message(), "expected resource directory, found data entry");
    }

    #[test]
    fn test_rejects_data_rva_outside_resource_section() {
        let mut pe = build_pe(&[(305, b"data".as_slice())]);
        // The sole data entry sits right before the payload bytes.
        let data_entry = RSRC_FOFF + 16 + 3 * 8 + 16 + 8 + 16 + 8;
        let rsrc_len = pe.len() - RSRC_FOFF;
        put_u32(&mut pe, data_entry, RSRC_RVA + rsrc_len as u32 + 1);
        let err = parse_resources(&pe).unwrap_err();
        assert_eq!(err.message(), "resource data entry points outside resource section");
    }

    #[test]
    fn test_rejects_data_running_past_end_of_file() {
        let mut pe = build_pe(&[(305, b"data".as_slice())]);
        let data_entry = RSRC_FOFF + 16 + 3 * 8 + 16 + 8 + 16 + 8;
        put_u32(&mut pe, data_entry + 4, 0x1000); // size far beyond the file
        let err = parse_resources(&pe).unwrap_err();
        assert_eq!(err.message(), "resource data entry points outside file");
    }
}
