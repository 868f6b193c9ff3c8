//! Content digests.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use md5::Md5;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::errors::{io_error, OrchError};
use crate::serde::to_canonical_json_bytes;

const READ_CHUNK: usize = 64 * 1024;

/// Lower-case hex MD5 of an in-memory buffer.
pub fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Lower-case hex MD5 of a file, streamed in fixed-size chunks.
pub fn md5_file(path: &Path) -> Result<String, OrchError> {
    let file = File::open(path).map_err(|err| io_error("hash.open", path.display(), err))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let read = reader
            .read(&mut buf)
            .map_err(|err| io_error("hash.read", path.display(), err))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// SHA-256 over the canonical JSON rendering of `value`.
pub fn stable_hash_string<T: Serialize>(value: &T) -> Result<String, OrchError> {
    let bytes = to_canonical_json_bytes(value)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}
