mod ranges;
mod strategy;
mod stream;
mod streaming;

pub use ranges::{listener, ByteRange, ListenerRef, RangeAllocator, RangeListener};
pub use strategy::{StreamingStrategy, UnknownStrategy};
pub use stream::{ByteStream, SharedStream, MIN_CAPACITY};
pub use streaming::{StreamingBuffer, UploadOutcome, UploadStats};
