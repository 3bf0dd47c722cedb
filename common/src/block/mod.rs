mod header;
mod raw_block;

pub use header::BlockHeader;
pub use raw_block::RawBlock;
