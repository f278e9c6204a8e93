//! Block store (§4.2): fixed-size pages, headers, allocation,
//! checksum-verified I/O, and canonical rendering.

mod cache;
mod device;
mod header;
mod render;
mod store;

pub use cache::{BlockCache, DEFAULT_CACHE_BLOCKS};
pub use device::{BlockDevice, FileBlockDevice};
pub use header::BlockHeader;
pub use render::{format_micros, render_block, RenderOptions};
pub use store::{Block, BlockStore};
