//! Fingerprinting and block reads, the file-level halves of the `hash` and `get` verbs

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Result, SyncError};
use crate::hash::{BLOCK_SIZE, ContentHash, block_hashes, read_full_block};
use crate::scan::FileEntry;

/// Fingerprint a file: size, modification time and one hash per block.
///
/// # Errors
/// Returns an error if the file cannot be opened or read to the end
pub fn fingerprint(path: &Path) -> Result<FileEntry> {
    let path = std::path::absolute(path).map_err(|e| SyncError::io(path, e))?;
    let mut file = File::open(&path).map_err(|e| SyncError::io(&path, e))?;
    let modified = file
        .metadata()
        .and_then(|m| m.modified())
        .map_err(|e| SyncError::io(&path, e))?;

    let (hashes, size) = block_hashes(&mut file).map_err(|e| SyncError::io(&path, e))?;

    let name = path.to_string_lossy().into_owned();
    let mut entry = FileEntry::new(name, modified, size);
    entry.block_hashes = Some(hashes);
    Ok(entry)
}

/// Read block `index` of a file. Reads past the end return an empty block.
///
/// # Errors
/// Returns an error if the file cannot be opened, seeked or read
pub fn read_block(path: &Path, index: u64) -> Result<Vec<u8>> {
    let offset = index
        .checked_mul(BLOCK_SIZE as u64)
        .ok_or_else(|| SyncError::protocol(format!("block index {index} out of range")))?;

    let mut file = File::open(path).map_err(|e| SyncError::io(path, e))?;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| SyncError::io(path, e))?;

    let mut buffer = vec![0u8; BLOCK_SIZE];
    let n = read_full_block(&mut file, &mut buffer).map_err(|e| SyncError::io(path, e))?;
    buffer.truncate(n);
    Ok(buffer)
}

/// Length of the prefix of `reader` that matches `expected`, block by block.
///
/// Stops at the first block whose hash differs or at end of stream. Returns
/// the number of verified blocks and their total byte length.
///
/// # Errors
/// Returns any read error
pub fn verified_prefix<R: Read>(
    reader: &mut R,
    expected: &[ContentHash],
) -> std::io::Result<(usize, u64)> {
    let mut buffer = vec![0u8; BLOCK_SIZE];
    let mut bytes = 0u64;

    for (index, hash) in expected.iter().enumerate() {
        let n = read_full_block(reader, &mut buffer)?;
        // An empty read can still verify the single empty block of a zero-length file.
        if ContentHash::from_bytes(&buffer[..n]) != *hash || (n == 0 && index > 0) {
            return Ok((index, bytes));
        }
        bytes += n as u64;
        if n < BLOCK_SIZE {
            return Ok((index + 1, bytes));
        }
    }

    Ok((expected.len(), bytes))
}
