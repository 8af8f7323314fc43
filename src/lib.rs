//! `blkstore`: on-disk Extensible Array and Fixed Array block
//! structures — the two dense, checksummed, pluggable-element indexed
//! storage layouts that back chunked and compact dataset storage in an
//! HDF5-style file format.
//!
//! An [`ExtensibleArray`] grows without bound through an index block,
//! a doubling table of super blocks, and data blocks (themselves
//! optionally paged). A [`FixedArray`] is the same data-block/page
//! machinery with its growth tier removed, for arrays whose length is
//! known at creation time. Both share one [`Cache`] (the metadata
//! cache/flush-dependency graph) and one [`BlockFile`] (the backing
//! store abstraction, from `disk_driver`) per open store.
//!
//! Every element type is a monomorphized [`ElementClass`]; this crate
//! ships [`TestU32Class`] to exercise the codecs and addressing logic
//! without a real datatype layer.

pub mod cache;
pub mod class;
pub mod codec;
pub mod dblk_page;
pub mod dblock;
pub mod ea;
pub mod error;
pub mod fa;
pub mod layout;

pub use cache::{Cache, CacheFlags, EntryStatus, HeaderAux};
pub use class::{ElementClass, TestU32Class};
pub use codec::FileLayout;
pub use dblk_page::DataBlockPage;
pub use dblock::{DataBlock, DataBlockParent};
pub use ea::header::{EaHeaderImage, EaStats};
pub use ea::ExtensibleArray;
pub use error::{BlkError, Result};
pub use fa::header::{FaHeaderImage, FaStats, FixedArrayParams};
pub use fa::FixedArray;
pub use layout::{ExtensibleArrayParams, SuperBlockInfo, SuperBlockTable};

pub use disk_driver::{self, Addr, BlockFile, MemType, UNDEFINED_ADDR};
