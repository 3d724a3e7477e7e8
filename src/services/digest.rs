//! SHA-1 content digests for parts and whole files.
//!
//! The storage API verifies content with SHA-1: base64 in the `Digest`
//! header, hex in part manifests and file descriptors.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use ring::digest::{Context, SHA1_FOR_LEGACY_USE_ONLY};
use std::{io, path::Path};
use tokio::{fs::File, io::AsyncReadExt};

/// A finished SHA-1 digest.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ContentDigest([u8; 20]);

impl ContentDigest {
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = DigestWriter::new();
        hasher.update(bytes);
        hasher.finish()
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Value for the `Digest` request header.
    pub fn header_value(&self) -> String {
        format!("sha={}", self.to_base64())
    }
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentDigest({})", self.to_hex())
    }
}

/// Incremental digest over a sequence of byte windows.
pub struct DigestWriter {
    ctx: Context,
}

impl Default for DigestWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl DigestWriter {
    pub fn new() -> Self {
        Self {
            ctx: Context::new(&SHA1_FOR_LEGACY_USE_ONLY),
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.ctx.update(bytes);
    }

    pub fn finish(self) -> ContentDigest {
        let digest = self.ctx.finish();
        let mut out = [0u8; 20];
        out.copy_from_slice(digest.as_ref());
        ContentDigest(out)
    }
}

/// Digest a file on disk without loading it into memory.
pub async fn digest_file(path: &Path) -> io::Result<ContentDigest> {
    let mut file = File::open(path).await?;
    let mut hasher = DigestWriter::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}
