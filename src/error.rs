//! Error kinds emitted by the array core (spec §7). Every operation is
//! fallible; nothing here is retried internally.

use disk_driver::Addr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlkError {
    #[error("bad value at {addr:#x}: {detail}")]
    BadValue { addr: Addr, detail: String },

    #[error("memory allocation failed for in-core block: {0}")]
    CantAlloc(String),

    #[error("cache protect failed for block at {addr:#x}: {source}")]
    CantProtect { addr: Addr, #[source] source: anyhow::Error },

    #[error("cache unprotect failed for block at {addr:#x}: {source}")]
    CantUnprotect { addr: Addr, #[source] source: anyhow::Error },

    #[error("file-space allocator failed while creating a block: {0}")]
    CantCreate(#[source] anyhow::Error),

    #[error("header init failed: {0}")]
    CantInit(String),

    #[error("reference count would overflow on increment")]
    CantInc,

    #[error("reference count would underflow on decrement")]
    CantDec,

    #[error("unable to create flush dependency {child:#x} -> {parent:#x}")]
    CantDepend { parent: Addr, child: Addr },

    #[error("unable to destroy flush dependency {child:#x} -> {parent:#x}")]
    CantUndepend { parent: Addr, child: Addr },

    #[error("class fill callback failed")]
    CantSet,

    #[error("recursive delete encountered an unrecoverable state: {0}")]
    CantDelete(String),

    #[error("open attempted on an array pending deletion")]
    CantOpenObj,
}

pub type Result<T> = std::result::Result<T, BlkError>;
