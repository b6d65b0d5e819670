//! Package Trailer
//!
//! A packaged setup executable is laid out as:
//! `[host executable][archive][archive offset: u64 LE][magic: "UNIINST"]`
//!
//! The trailer sits at the absolute end of the file so the host can find
//! its own archive by reading a fixed number of bytes from the tail.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Marker closing every packaged executable
pub const MAGIC: &[u8; 7] = b"UNIINST";

/// Offset field plus magic
pub const TRAILER_LEN: u64 = 8 + MAGIC.len() as u64;

/// Name of the archive kept next to the setup executable
pub const SIBLING_ARCHIVE: &str = "installer.dat";

/// Name of the manifest inside every package
pub const CONFIG_FILE: &str = "config.ini";

/// Folder inside every package holding the collected files
pub const PAYLOAD_DIR: &str = "Files";

/// Location of an embedded archive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    /// Byte offset where the archive starts
    pub archive_offset: u64,

    /// Archive length in bytes
    pub archive_len: u64,
}

/// Encode the trailer bytes for an archive starting at `offset`
pub fn encode_trailer(offset: u64) -> [u8; TRAILER_LEN as usize] {
    let mut trailer = [0u8; TRAILER_LEN as usize];
    trailer[..8].copy_from_slice(&offset.to_le_bytes());
    trailer[8..].copy_from_slice(MAGIC);
    trailer
}

/// Append `archive` and its trailer to the end of `exe`.
///
/// Returns the offset the archive was written at.
pub fn append_archive(exe: &Path, archive: &[u8]) -> std::io::Result<u64> {
    let mut file = std::fs::OpenOptions::new().append(true).open(exe)?;
    let offset = file.metadata()?.len();

    file.write_all(archive)?;
    file.write_all(&encode_trailer(offset))?;
    file.flush()?;

    Ok(offset)
}

/// Read the trailer from the tail of `exe`.
///
/// Returns `Ok(None)` when the file is too short, the magic does not match,
/// or the recorded offset points past the trailer.
pub fn read_trailer(exe: &Path) -> std::io::Result<Option<Trailer>> {
    let mut file = File::open(exe)?;
    let file_len = file.metadata()?.len();

    if file_len < TRAILER_LEN {
        return Ok(None);
    }

    let trailer_start = file_len - TRAILER_LEN;
    file.seek(SeekFrom::Start(trailer_start))?;
    let mut trailer = [0u8; TRAILER_LEN as usize];
    file.read_exact(&mut trailer)?;

    let (offset_bytes, magic) = trailer.split_at(8);
    if magic != MAGIC {
        return Ok(None);
    }

    let mut offset = [0u8; 8];
    offset.copy_from_slice(offset_bytes);
    let archive_offset = u64::from_le_bytes(offset);

    if archive_offset > trailer_start {
        tracing::warn!(
            "Trailer offset {} is past the archive end {} in {:?}",
            archive_offset,
            trailer_start,
            exe
        );
        return Ok(None);
    }

    Ok(Some(Trailer {
        archive_offset,
        archive_len: trailer_start - archive_offset,
    }))
}
