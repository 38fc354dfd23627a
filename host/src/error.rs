//! Host-side fallible operations.
//!
//! Everything the guest can do wrong becomes a trap inside
//! `rv32ima-core`; `HostError` only covers setup mistakes the *host*
//! makes before the guest ever runs.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("could not read image file {path}")]
    UnreadableImage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image {path} ({size} bytes) does not fit in {ram_size} bytes of RAM at offset 0x{offset:x}")]
    ImageTooLarge {
        path: PathBuf,
        size: usize,
        ram_size: u32,
        offset: u32,
    },
    #[error("{path} is not a valid ELF file")]
    MalformedElf {
        path: PathBuf,
        #[source]
        source: elf::ParseError,
    },
    #[error("ELF file {path} has no loadable (PT_LOAD) segments")]
    NoLoadableSegments { path: PathBuf },
}
