//! Producer authentication preamble
//!
//! Before any multipart data the camera writes a fixed-length token:
//!
//! ```text
//! Producer                                 Relay
//!   |                                        |
//!   |------- token (32 bytes) ------------->|  read within deadline
//!   |                                        |  compare with configured token
//!   |------- multipart stream ------------->|  only if the token matched
//! ```
//!
//! There is no reply. A mismatch, a short read, or a missed deadline closes
//! the connection without touching the currently streaming session.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{AuthError, Result};

/// Checks the preamble of a freshly accepted producer connection
#[derive(Debug, Clone)]
pub struct Authenticator {
    /// Expected preamble, `None` when authentication is disabled
    token: Option<Vec<u8>>,
    /// Deadline for the whole preamble
    timeout: Duration,
}

impl Authenticator {
    /// Create an authenticator expecting `token` within `timeout`
    pub fn new(token: impl Into<Vec<u8>>, timeout: Duration) -> Self {
        Self {
            token: Some(token.into()),
            timeout,
        }
    }

    /// Create an authenticator that accepts every connection
    pub fn disabled() -> Self {
        Self {
            token: None,
            timeout: Duration::ZERO,
        }
    }

    /// Whether a preamble is expected at all
    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Number of preamble bytes consumed from the connection
    pub fn preamble_len(&self) -> usize {
        self.token.as_ref().map_or(0, Vec::len)
    }

    /// Compare a complete preamble against the token
    pub fn verify(&self, preamble: &[u8]) -> std::result::Result<(), AuthError> {
        let Some(token) = &self.token else {
            return Ok(());
        };

        if preamble.len() != token.len() {
            return Err(AuthError::Mismatch);
        }

        // Fold every byte so the comparison time does not leak the prefix length
        let diff = token
            .iter()
            .zip(preamble)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b));

        if diff == 0 {
            Ok(())
        } else {
            Err(AuthError::Mismatch)
        }
    }

    /// Read and verify the preamble from `reader`
    ///
    /// Exactly `preamble_len()` bytes are consumed; anything after them is
    /// left in the reader for the multipart decoder.
    pub async fn authenticate<R>(&self, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        if !self.is_enabled() {
            return Ok(());
        }

        let mut preamble = vec![0u8; self.preamble_len()];

        match tokio::time::timeout(self.timeout, read_preamble(reader, &mut preamble)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(AuthError::Timeout.into()),
        }

        self.verify(&preamble)?;
        Ok(())
    }
}

/// Fill `buf` completely, reporting how much arrived if the peer hangs up early
async fn read_preamble<R>(reader: &mut R, buf: &mut [u8]) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(AuthError::ShortRead { received: filled }.into());
        }
        filled += n;
    }
    Ok(())
}
