//! Producer-side client
//!
//! Used to feed a relay from software instead of a camera, e.g. for tests
//! or replaying captured JPEGs.

pub mod producer;

pub use producer::ProducerClient;
