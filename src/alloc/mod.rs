pub mod blocks;
pub mod slice;

pub use blocks::BlockManager;
pub use slice::SliceAllocator;
