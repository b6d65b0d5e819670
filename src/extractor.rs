//! Package Extractor
//!
//! Restores the package contents of a setup executable before the manifest
//! is parsed: the archive embedded behind the trailer, or failing that the
//! sibling `installer.dat`.

use crate::error::ExtractError;
use crate::payload::{self, Trailer, SIBLING_ARCHIVE};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Where the extracted package came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// Archive embedded in the executable
    Embedded,
    /// `installer.dat` next to the executable
    SiblingArchive,
    /// Neither was usable; files are expected to be on disk already
    Nothing,
}

/// Extract the package of `exe` into `dest`.
///
/// Failures are logged and fall through to the next source; this never
/// aborts a setup run.
pub fn extract_package(exe: &Path, dest: &Path) -> ExtractOutcome {
    match extract_embedded(exe, dest) {
        Ok(()) => return ExtractOutcome::Embedded,
        Err(ExtractError::NoTrailer(_)) => {
            tracing::info!("No embedded package found in {:?}", exe);
        }
        Err(e) => tracing::warn!("Embedded package extraction failed: {}", e),
    }

    let sibling = exe
        .parent()
        .map(|dir| dir.join(SIBLING_ARCHIVE))
        .filter(|path| path.is_file());

    if let Some(sibling) = sibling {
        match extract_archive_file(&sibling, dest) {
            Ok(()) => return ExtractOutcome::SiblingArchive,
            Err(e) => tracing::warn!("Sibling archive extraction failed: {}", e),
        }
    }

    ExtractOutcome::Nothing
}

/// Extract the archive embedded in `exe` into `dest`
pub fn extract_embedded(exe: &Path, dest: &Path) -> Result<(), ExtractError> {
    let trailer = payload::read_trailer(exe)?
        .ok_or_else(|| ExtractError::NoTrailer(exe.to_path_buf()))?;

    // Stream the archive out to a temporary file, deleted on drop.
    let mut temp = tempfile::Builder::new()
        .prefix("uniinst-archive")
        .tempfile()?;
    copy_archive_bytes(exe, &trailer, temp.as_file_mut())?;
    temp.as_file_mut().flush()?;

    extract_archive_file(temp.path(), dest)
}

/// Write the raw archive bytes embedded in `exe` to `out`
pub fn copy_embedded_archive(exe: &Path, out: &Path) -> Result<u64, ExtractError> {
    let trailer = payload::read_trailer(exe)?
        .ok_or_else(|| ExtractError::NoTrailer(exe.to_path_buf()))?;
    let mut file = File::create(out)?;
    copy_archive_bytes(exe, &trailer, &mut file)
}

fn copy_archive_bytes(exe: &Path, trailer: &Trailer, out: &mut File) -> Result<u64, ExtractError> {
    let mut file = File::open(exe)?;
    file.seek(SeekFrom::Start(trailer.archive_offset))?;
    let copied = std::io::copy(&mut file.take(trailer.archive_len), out)?;
    if copied != trailer.archive_len {
        return Err(ExtractError::Archive {
            path: exe.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("expected {} archive bytes, read {}", trailer.archive_len, copied),
            ),
        });
    }
    Ok(copied)
}

/// Unpack a zstd-compressed tar archive into `dest`
pub fn extract_archive_file(archive: &Path, dest: &Path) -> Result<(), ExtractError> {
    let file = File::open(archive)?;
    let reader = BufReader::new(file);
    let malformed = |source: std::io::Error| ExtractError::Archive {
        path: archive.to_path_buf(),
        source,
    };

    let decoder = ruzstd::StreamingDecoder::new(reader)
        .map_err(|e| malformed(std::io::Error::other(e.to_string())))?;
    let mut tar = tar::Archive::new(decoder);
    tar.set_overwrite(true);

    std::fs::create_dir_all(dest)?;

    let mut count = 0;
    for entry in tar.entries().map_err(malformed)? {
        let mut entry = entry.map_err(malformed)?;
        // unpack_in refuses entries that would land outside `dest`.
        if entry.unpack_in(dest).map_err(malformed)? {
            count += 1;
        } else {
            tracing::warn!("Skipped unsafe archive entry {:?}", entry.path().ok());
        }
    }

    tracing::info!("Extracted {} entries from {:?} to {:?}", count, archive, dest);
    Ok(())
}
