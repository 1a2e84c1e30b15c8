pub mod bitmap;
pub mod buffer;
pub mod codec;
pub mod index;
pub mod metadata;
pub mod slotted;

pub use buffer::BufferCache;
pub use codec::Page;
