pub mod cleanup;
pub mod frame;
pub mod wrap;

pub use cleanup::{Cleanup, FireOnce, NoopCleanup};
pub use frame::{frame_len, Frame};
pub use wrap::{FrameReader, FrameWriter, ShapedReader, ShapedWriter};
