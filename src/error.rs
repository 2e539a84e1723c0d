//
// Crate-wide error type.
//
// `NotFound` is deliberately absent here: MapStream::find reports absence
// through the MapIndex::NotFound sentinel, not as an error. A missing key
// is an expected outcome, not a failure.
//

use std::io;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum VfsError {
    #[error("cannot access file {path:?}: {source}")]
    CannotAccessFile { path: PathBuf, #[source] source: io::Error },

    #[error("header of {path:?} is not a valid MapStream header")]
    InvalidHeader { path: PathBuf },

    #[error("key size mismatch: store uses {expected}, caller passed {actual}")]
    KeySizeMismatch { expected: u64, actual: u64 },

    #[error("value size mismatch: store uses {expected}, caller passed {actual}")]
    ValueSizeMismatch { expected: u64, actual: u64 },

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, VfsError>;
