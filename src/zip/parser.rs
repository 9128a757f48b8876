//! Central directory parsing.
//!
//! This module turns a [`ReadAt`] source into an [`ArchiveIndex`].
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Read the trailing window that must contain the End of Central
//!    Directory (EOCD) record and search it backwards for the signature
//! 2. If any EOCD field holds a sentinel, follow the ZIP64 locator to the
//!    ZIP64 EOCD for the 64-bit values
//! 3. Read the whole Central Directory in one request and decode every
//!    File Header from memory
//!
//! Outside of ZIP64 archives this costs exactly two reads of the source,
//! which is what makes remote listing cheap.

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, trace};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::io::{ReadAt, read_full_at};

use super::structures::*;

/// Where the central directory lives, as declared by the end records.
#[derive(Debug)]
struct DirectoryLocation {
    entries: u64,
    size: u64,
    /// Declared offset, relative to the start of the archive proper.
    offset: u64,
    /// Absolute position of the record that follows the directory
    /// (the EOCD, or the ZIP64 EOCD when present).
    end: u64,
}

/// The decoded table of contents of an archive.
///
/// Built once by [`ArchiveIndex::open`] and read-only afterwards, so it can be
/// shared between tasks extracting different entries.
pub struct ArchiveIndex {
    source: Arc<dyn ReadAt>,
    entries: Vec<Entry>,
    cd_offset: u64,
    cd_size: u64,
    total_size: u64,
    verify_crc: bool,
}

impl std::fmt::Debug for ArchiveIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveIndex")
            .field("entries", &self.entries.len())
            .field("cd_offset", &self.cd_offset)
            .field("cd_size", &self.cd_size)
            .field("total_size", &self.total_size)
            .field("verify_crc", &self.verify_crc)
            .finish()
    }
}

impl ArchiveIndex {
    /// Locate and decode the central directory of the archive in `source`.
    ///
    /// Any failure aborts the whole construction; no partial index is
    /// returned.
    pub async fn open(source: Arc<dyn ReadAt>) -> Result<Self> {
        let total_size = source.size();

        let window_len = total_size.min(EndOfCentralDirectory::MAX_SIZE as u64) as usize;
        let window_start = total_size - window_len as u64;
        let mut window = vec![0u8; window_len];
        read_full_at(&*source, window_start, &mut window).await?;

        let (eocd, eocd_pos) = find_eocd(&window)?;
        let eocd_offset = window_start + eocd_pos as u64;
        debug!("end of central directory at offset {}", eocd_offset);

        if eocd.is_multi_disk() {
            return Err(Error::unsupported("multi-disk archives"));
        }

        let locator = if eocd.is_zip64() {
            find_zip64_locator(&*source, &window, eocd_pos, eocd_offset).await?
        } else {
            None
        };
        let location = match locator {
            Some((locator, locator_offset)) => {
                read_zip64_location(&*source, &locator, locator_offset).await?
            }
            None => DirectoryLocation {
                entries: eocd.total_entries as u64,
                size: eocd.cd_size as u64,
                offset: eocd.cd_offset as u64,
                end: eocd_offset,
            },
        };

        // Bytes in front of the archive shift every recorded offset.
        let base_offset = location
            .end
            .checked_sub(location.size)
            .and_then(|start| start.checked_sub(location.offset))
            .ok_or_else(|| {
                Error::corrupt(format!(
                    "central directory ({} bytes at offset {}) does not fit before offset {}",
                    location.size, location.offset, location.end
                ))
            })?;
        if base_offset > 0 {
            debug!("{} bytes of data precede the archive", base_offset);
        }
        let cd_offset = location.offset + base_offset;

        let min_size = location.entries.checked_mul(CDFH_MIN_SIZE as u64);
        if min_size.is_none_or(|min| min > location.size) {
            return Err(Error::corrupt(format!(
                "{} entries cannot fit in a {} byte central directory",
                location.entries, location.size
            )));
        }

        let cd_len = usize::try_from(location.size)
            .map_err(|_| Error::unsupported("central directory larger than address space"))?;
        let mut cd_data = vec![0u8; cd_len];
        read_full_at(&*source, cd_offset, &mut cd_data).await?;
        debug!(
            "read central directory: {} entries, {} bytes at offset {}",
            location.entries, location.size, cd_offset
        );

        let mut entries = Vec::with_capacity(location.entries as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());
        for index in 0..location.entries {
            let entry = parse_cdfh(&mut cursor, base_offset, cd_offset)
                .map_err(|e| with_record_context(e, index))?;
            trace!("entry {}: {:?}", index, entry);
            entries.push(entry);
        }
        if (cursor.position() as usize) < cd_data.len() {
            debug!(
                "{} trailing bytes after the last central directory record",
                cd_data.len() - cursor.position() as usize
            );
        }

        Ok(Self {
            source,
            entries,
            cd_offset,
            cd_size: location.size,
            total_size,
            verify_crc: true,
        })
    }

    /// Enable or disable CRC32 verification on entry streams opened from
    /// this index. Verification is on by default.
    pub fn with_crc_check(mut self, verify: bool) -> Self {
        self.verify_crc = verify;
        self
    }

    pub fn verifies_crc(&self) -> bool {
        self.verify_crc
    }

    /// All entries in central directory order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Absolute offset of the central directory in the source.
    pub fn central_directory_offset(&self) -> u64 {
        self.cd_offset
    }

    pub fn central_directory_size(&self) -> u64 {
        self.cd_size
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn source(&self) -> &Arc<dyn ReadAt> {
        &self.source
    }
}

/// Search the trailing window backwards for an EOCD whose comment length
/// accounts exactly for the bytes after it.
///
/// Returns the record and its position inside `window`.
fn find_eocd(window: &[u8]) -> Result<(EndOfCentralDirectory, usize)> {
    let Some(last) = window.len().checked_sub(EndOfCentralDirectory::SIZE) else {
        return Err(Error::corrupt("too small to be a zip archive"));
    };

    for i in (0..=last).rev() {
        if &window[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
            continue;
        }
        let comment_len = u16::from_le_bytes([window[i + 20], window[i + 21]]) as usize;
        if comment_len == window.len() - i - EndOfCentralDirectory::SIZE {
            let eocd = EndOfCentralDirectory::from_bytes(&window[i..])?;
            return Ok((eocd, i));
        }
        trace!("ignoring end of central directory signature at window offset {}", i);
    }

    Err(Error::corrupt("end of central directory record not found"))
}

/// The ZIP64 locator immediately preceding the EOCD, and its offset.
///
/// A saturated EOCD field is not proof of ZIP64: an archive holding exactly
/// 65535 entries carries the value as is. Without a locator signature the
/// 32-bit fields are used.
async fn find_zip64_locator(
    source: &dyn ReadAt,
    window: &[u8],
    eocd_pos: usize,
    eocd_offset: u64,
) -> Result<Option<(Zip64EOCDLocator, u64)>> {
    let Some(offset) = eocd_offset.checked_sub(Zip64EOCDLocator::SIZE as u64) else {
        debug!("no room for a zip64 locator, using the 32-bit end of central directory");
        return Ok(None);
    };

    // Usually already inside the window
    let mut buf = [0u8; Zip64EOCDLocator::SIZE];
    match eocd_pos.checked_sub(Zip64EOCDLocator::SIZE) {
        Some(start) => buf.copy_from_slice(&window[start..eocd_pos]),
        None => read_full_at(source, offset, &mut buf).await?,
    }

    if &buf[..4] != Zip64EOCDLocator::SIGNATURE {
        debug!("no zip64 locator at offset {}, using the 32-bit end of central directory", offset);
        return Ok(None);
    }
    Ok(Some((Zip64EOCDLocator::from_bytes(&buf)?, offset)))
}

/// Follow the ZIP64 locator to the ZIP64 EOCD record.
///
/// The locator's offset does not account for prepended data, so when no
/// record is found there the record immediately preceding the locator is
/// used instead.
async fn read_zip64_location(
    source: &dyn ReadAt,
    locator: &Zip64EOCDLocator,
    locator_offset: u64,
) -> Result<DirectoryLocation> {
    if locator.disk_with_eocd64 != 0 || locator.total_disks > 1 {
        return Err(Error::unsupported("multi-disk archives"));
    }

    let mut record = [0u8; Zip64EOCD::MIN_SIZE];
    let mut record_offset = locator.eocd64_offset;
    let declared_fits = record_offset
        .checked_add(Zip64EOCD::MIN_SIZE as u64)
        .is_some_and(|end| end <= locator_offset);

    let mut found = false;
    if declared_fits {
        read_full_at(source, record_offset, &mut record).await?;
        found = Zip64EOCD::has_signature(&record);
    }
    if !found {
        record_offset = locator_offset
            .checked_sub(Zip64EOCD::MIN_SIZE as u64)
            .ok_or_else(|| Error::corrupt("zip64 end of central directory record is missing"))?;
        read_full_at(source, record_offset, &mut record).await?;
    }

    let eocd64 = Zip64EOCD::from_bytes(&record)?;
    debug!("zip64 end of central directory at offset {}", record_offset);

    if eocd64.disk_number != 0 || eocd64.disk_with_cd != 0 {
        return Err(Error::unsupported("multi-disk archives"));
    }

    Ok(DirectoryLocation {
        entries: eocd64.total_entries,
        size: eocd64.cd_size,
        offset: eocd64.cd_offset,
        end: record_offset,
    })
}

fn truncated(_: std::io::Error) -> Error {
    Error::corrupt("truncated central directory record")
}

fn with_record_context(err: Error, index: u64) -> Error {
    match err {
        Error::ArchiveCorrupt(msg) => {
            Error::ArchiveCorrupt(format!("central directory record {index}: {msg}"))
        }
        other => other,
    }
}

/// Parse a Central Directory File Header from a cursor.
///
/// `base_offset` is added to the recorded local header offset; the result
/// must point before the central directory.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>, base_offset: u64, cd_offset: u64) -> Result<Entry> {
    // Read and verify the signature (PK\x01\x02)
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig).map_err(truncated)?;
    if sig != CDFH_SIGNATURE {
        return Err(Error::corrupt("bad central directory header signature"));
    }

    let mut fixed = [0u8; CDFH_MIN_SIZE - 4];
    cursor.read_exact(&mut fixed).map_err(truncated)?;
    let mut fields = Cursor::new(&fixed[..]);

    let _version_made_by = fields.read_u16::<LittleEndian>()?;
    let _version_needed = fields.read_u16::<LittleEndian>()?;
    let flags = fields.read_u16::<LittleEndian>()?;
    let compression_method = fields.read_u16::<LittleEndian>()?;
    let last_mod_time = fields.read_u16::<LittleEndian>()?;
    let last_mod_date = fields.read_u16::<LittleEndian>()?;
    let crc32 = fields.read_u32::<LittleEndian>()?;
    let mut compressed_size = fields.read_u32::<LittleEndian>()? as u64;
    let mut uncompressed_size = fields.read_u32::<LittleEndian>()? as u64;
    let file_name_length = fields.read_u16::<LittleEndian>()? as usize;
    let extra_field_length = fields.read_u16::<LittleEndian>()? as usize;
    let file_comment_length = fields.read_u16::<LittleEndian>()? as u64;
    let _disk_number_start = fields.read_u16::<LittleEndian>()?;
    let _internal_attrs = fields.read_u16::<LittleEndian>()?;
    let _external_attrs = fields.read_u32::<LittleEndian>()?;
    let mut lfh_offset = fields.read_u32::<LittleEndian>()? as u64;

    let mut file_name_bytes = vec![0u8; file_name_length];
    cursor.read_exact(&mut file_name_bytes).map_err(truncated)?;
    // Non-UTF8 names are kept, lossily, rather than rejected
    let name = String::from_utf8_lossy(&file_name_bytes).into_owned();
    if name.is_empty() {
        return Err(Error::corrupt("entry with an empty name"));
    }

    let mut extra = vec![0u8; extra_field_length];
    cursor.read_exact(&mut extra).map_err(truncated)?;
    apply_zip64_extra(
        &extra,
        &mut uncompressed_size,
        &mut compressed_size,
        &mut lfh_offset,
    )?;

    // Skip over the file comment (we don't use it)
    let comment_end = cursor.position() + file_comment_length;
    if comment_end > cursor.get_ref().len() as u64 {
        return Err(Error::corrupt("truncated central directory record"));
    }
    cursor.set_position(comment_end);

    let local_header_offset = lfh_offset
        .checked_add(base_offset)
        .filter(|offset| *offset < cd_offset)
        .ok_or_else(|| {
            Error::corrupt(format!(
                "{name}: local header offset {lfh_offset} lies outside the entry data region"
            ))
        })?;

    let mut compression_method = CompressionMethod::from_u16(compression_method);
    let is_directory = name.ends_with('/');
    if is_directory {
        if uncompressed_size != 0 {
            return Err(Error::corrupt(format!(
                "{name}: directory entry holds {uncompressed_size} bytes"
            )));
        }
        // Some writers deflate the empty body of a directory
        if compression_method != CompressionMethod::Stored {
            trace!("{}: treating {:?} directory as stored", name, compression_method);
            compression_method = CompressionMethod::Stored;
        }
    }

    Ok(Entry {
        name,
        compressed_size,
        uncompressed_size,
        compression_method,
        crc32,
        local_header_offset,
        is_directory,
        flags,
        last_mod_time,
        last_mod_date,
    })
}

/// Walk an extra field block and apply the ZIP64 extended information, if
/// any, to the fields that hold a 32-bit sentinel.
///
/// The ZIP64 block lists only the values whose header field is saturated, in
/// the fixed order uncompressed size, compressed size, local header offset.
/// Unknown blocks are skipped.
fn apply_zip64_extra(
    extra: &[u8],
    uncompressed_size: &mut u64,
    compressed_size: &mut u64,
    lfh_offset: &mut u64,
) -> Result<()> {
    const SENTINEL: u64 = U32_SENTINEL as u64;

    let mut rest = extra;
    while rest.len() >= 4 {
        let header_id = u16::from_le_bytes([rest[0], rest[1]]);
        let field_size = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        let Some(body) = rest.get(4..4 + field_size) else {
            return Err(Error::corrupt("extra field overruns its block"));
        };

        if header_id == ZIP64_EXTRA_ID {
            let mut fields = Cursor::new(body);
            let short = |_: std::io::Error| Error::corrupt("zip64 extra field is too short");
            if *uncompressed_size == SENTINEL {
                *uncompressed_size = fields.read_u64::<LittleEndian>().map_err(short)?;
            }
            if *compressed_size == SENTINEL {
                *compressed_size = fields.read_u64::<LittleEndian>().map_err(short)?;
            }
            if *lfh_offset == SENTINEL {
                *lfh_offset = fields.read_u64::<LittleEndian>().map_err(short)?;
            }
        } else {
            trace!("skipping extra field {:#06x} ({} bytes)", header_id, field_size);
        }

        rest = &rest[4 + field_size..];
    }
    Ok(())
}
