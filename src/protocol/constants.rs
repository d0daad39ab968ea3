//! Wire constants shared by the producer and viewer sides

/// Multipart boundary token agreed with the camera firmware
pub const BOUNDARY: &str = "123456789000000000000987654321";

/// Length of the authentication preamble in bytes
pub const PREAMBLE_SIZE: usize = 32;

/// Preamble token compiled into the camera firmware
pub const DEFAULT_AUTH_TOKEN: [u8; PREAMBLE_SIZE] = [
    0xa6, 0xf6, 0xa0, 0x7b, 0xe9, 0xb6, 0xd0, 0xe5, 0x73, 0x4e, 0x06, 0x59, 0xcf, 0xc7, 0xa3, 0xe9,
    0xda, 0xca, 0xb5, 0x82, 0xf9, 0x11, 0xfe, 0xc7, 0x7f, 0xc0, 0xc4, 0x16, 0x57, 0x7d, 0xea, 0x06,
];

/// Content type assumed for parts that do not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// Largest accepted part header block
pub const MAX_HEADER_SIZE: usize = 8 * 1024;

/// Largest amount of junk skipped while looking for the first boundary
pub const MAX_PREAMBLE_SKIP: usize = 64 * 1024;

/// Default largest accepted part body
pub const DEFAULT_MAX_FRAME_SIZE: usize = 8 * 1024 * 1024;

/// `Content-Type` value of the viewer response
pub const VIEWER_CONTENT_TYPE: &str =
    "multipart/x-mixed-replace;boundary=123456789000000000000987654321";
