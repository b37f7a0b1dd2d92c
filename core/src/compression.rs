//! Gzip helpers for request and response bodies.

use std::io::{self, Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

pub const GZIP: &str = "gzip";

pub fn gzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 16), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn gunzip(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 2);
    GzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

/// Whether a `content-encoding` header value names gzip.
pub fn is_gzip(content_encoding: &str) -> bool {
    content_encoding
        .split(',')
        .any(|token| token.trim().eq_ignore_ascii_case(GZIP))
}
