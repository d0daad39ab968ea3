//! Frames and the producer-side frame source
//!
//! The relay never looks inside a frame. A frame is an opaque payload with a
//! content-type label, cut out of the producer stream by [`FrameSource`].

pub mod frame;
pub mod source;

pub use frame::Frame;
pub use source::FrameSource;
