pub mod afio;
pub mod error;
pub mod hash;
pub mod mapstream;

pub use afio::AbstractFileIo;
pub use error::{Result, VfsError};
pub use hash::hash;
pub use mapstream::{MapIndex, MapStream, NOT_FOUND};
