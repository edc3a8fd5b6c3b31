//! Output artifact
//!
//! A length-prefixed stream of re-serialized modules: a little-endian `u32`
//! count, then for each module a little-endian `u32` byte length followed by
//! the module bytes.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// Artifact read/write errors
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A count or length does not fit in the 32-bit prefix
    #[error("{0} does not fit in a 32-bit length prefix")]
    TooLarge(usize),

    /// Stream ended inside a chunk
    #[error("Artifact truncated in chunk {chunk}: expected {expected} bytes")]
    Truncated {
        /// Chunk position
        chunk: usize,
        /// Declared length
        expected: usize,
    },

    /// Destination cannot be finalized
    #[error("Failed to persist artifact to {path}: {source}")]
    Persist {
        /// Destination
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

fn prefix(len: usize) -> Result<[u8; 4], ArtifactError> {
    u32::try_from(len)
        .map(u32::to_le_bytes)
        .map_err(|_| ArtifactError::TooLarge(len))
}

/// Write chunks in artifact layout
pub fn write_artifact<W, C>(writer: &mut W, chunks: &[C]) -> Result<(), ArtifactError>
where
    W: Write,
    C: AsRef<[u8]>,
{
    writer.write_all(&prefix(chunks.len())?)?;
    for chunk in chunks {
        let bytes = chunk.as_ref();
        writer.write_all(&prefix(bytes.len())?)?;
        writer.write_all(bytes)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read every chunk of an artifact
pub fn read_artifact<R: Read>(reader: &mut R) -> Result<Vec<Vec<u8>>, ArtifactError> {
    let mut word = [0u8; 4];
    reader.read_exact(&mut word)?;
    let count = u32::from_le_bytes(word) as usize;

    let mut chunks = Vec::with_capacity(count.min(1024));
    for chunk in 0..count {
        reader
            .read_exact(&mut word)
            .map_err(|_| ArtifactError::Truncated { chunk, expected: 4 })?;
        let expected = u32::from_le_bytes(word) as usize;
        let mut bytes = Vec::with_capacity(expected.min(1 << 20));
        reader.by_ref().take(expected as u64).read_to_end(&mut bytes)?;
        if bytes.len() != expected {
            return Err(ArtifactError::Truncated { chunk, expected });
        }
        chunks.push(bytes);
    }
    Ok(chunks)
}

/// Write an artifact to `path` atomically
///
/// The stream goes to a temporary file next to `path` that is renamed into
/// place only once fully written.
pub fn persist_artifact<C: AsRef<[u8]>>(path: &Path, chunks: &[C]) -> Result<(), ArtifactError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut file = NamedTempFile::new_in(dir)?;
    write_artifact(&mut io::BufWriter::new(file.as_file_mut()), chunks)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| ArtifactError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}
