//! Producer and viewer wire protocol
//!
//! ```text
//! producer ──► [32-byte preamble] ──► \r\n--BOUNDARY\r\n
//!                                     Content-Type: image/jpeg\r\n
//!                                     Content-Length: N\r\n
//!                                     \r\n
//!                                     <N bytes> ──► \r\n--BOUNDARY\r\n ...
//! ```
//!
//! Viewers receive the same boundary inside a `multipart/x-mixed-replace`
//! HTTP response.

pub mod constants;
pub mod handshake;
pub mod multipart;

pub use handshake::Authenticator;
pub use multipart::{MultipartDecoder, PartEncoder};
