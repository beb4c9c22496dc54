//! HTTP range parsing and chunk geometry.
//!
//! The upstream only serves fixed-size aligned chunks, so an arbitrary
//! byte range turns into: an aligned start offset, a prefix to drop from
//! the first chunk, a keep-count for the final chunk, and the number of
//! chunks in between.

use crate::error::GatewayError;

/// Upstream fetch unit.
pub const CHUNK_SIZE: u64 = 1024 * 1024;

/// Inclusive byte range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parse a `Range: bytes=A-B` header against a file size.
///
/// `None` (no header) selects the whole file. A syntactically broken
/// header is a 400; a well-formed range outside `[0, size-1]` is a 416.
/// Suffix ranges (`bytes=-N`) are not served.
pub fn parse_range(
    header: Option<&str>,
    file_size: u64,
) -> Result<(ByteRange, bool), GatewayError> {
    let Some(header) = header else {
        return Ok((
            ByteRange {
                start: 0,
                end: file_size.saturating_sub(1),
            },
            false,
        ));
    };

    let spec = header
        .strip_prefix("bytes=")
        .ok_or_else(|| GatewayError::InvalidRange("unsupported range unit".into()))?;
    let (from, until) = spec
        .split_once('-')
        .ok_or_else(|| GatewayError::InvalidRange("missing separator".into()))?;

    let start: u64 = from
        .trim()
        .parse()
        .map_err(|_| GatewayError::InvalidRange("invalid start".into()))?;
    let end: u64 = if until.trim().is_empty() {
        file_size.saturating_sub(1)
    } else {
        until
            .trim()
            .parse()
            .map_err(|_| GatewayError::InvalidRange("invalid end".into()))?
    };

    if file_size == 0 || end > file_size - 1 || end < start {
        return Err(GatewayError::RangeUnsatisfiable { size: file_size });
    }

    Ok((ByteRange { start, end }, true))
}

/// Chunk-aligned fetch plan for one byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamGeometry {
    /// Aligned byte position of the first chunk fetch.
    pub offset: u64,
    /// Prefix bytes dropped from the first chunk.
    pub first_cut: usize,
    /// Keep-count within the final chunk.
    pub last_cut: usize,
    /// Number of chunk fetches.
    pub parts: u64,
    /// Exact response length.
    pub length: u64,
    pub chunk_size: u64,
}

impl StreamGeometry {
    pub fn for_range(range: ByteRange) -> Self {
        Self::with_chunk_size(range, CHUNK_SIZE)
    }

    pub fn with_chunk_size(range: ByteRange, chunk_size: u64) -> Self {
        let offset = range.start - (range.start % chunk_size);
        // Inclusive chunk-index span; total for every valid range,
        // including ends that sit exactly on a chunk boundary.
        let parts = range.end / chunk_size - range.start / chunk_size + 1;
        Self {
            offset,
            first_cut: (range.start - offset) as usize,
            last_cut: (range.end % chunk_size + 1) as usize,
            parts,
            length: range.len(),
            chunk_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn no_header_covers_whole_file() {
        let (range, partial) = parse_range(None, 3 * MIB).unwrap();
        assert_eq!(range, ByteRange { start: 0, end: 3 * MIB - 1 });
        assert!(!partial);
    }

    #[test]
    fn open_ended_range_runs_to_eof() {
        let (range, partial) = parse_range(Some("bytes=500-"), 1000).unwrap();
        assert_eq!(range, ByteRange { start: 500, end: 999 });
        assert!(partial);
    }

    #[test]
    fn out_of_bounds_is_unsatisfiable() {
        assert!(matches!(
            parse_range(Some("bytes=2000-3000"), 1000),
            Err(GatewayError::RangeUnsatisfiable { size: 1000 })
        ));
        assert!(matches!(
            parse_range(Some("bytes=900-100"), 1000),
            Err(GatewayError::RangeUnsatisfiable { .. })
        ));
    }

    #[test]
    fn garbage_header_is_invalid_not_unsatisfiable() {
        assert!(matches!(
            parse_range(Some("lines=1-2"), 1000),
            Err(GatewayError::InvalidRange(_))
        ));
        assert!(matches!(
            parse_range(Some("bytes=abc-def"), 1000),
            Err(GatewayError::InvalidRange(_))
        ));
    }

    #[test]
    fn aligned_single_chunk() {
        let g = StreamGeometry::for_range(ByteRange {
            start: MIB,
            end: 2 * MIB - 1,
        });
        assert_eq!(g.offset, MIB);
        assert_eq!(g.first_cut, 0);
        assert_eq!(g.last_cut, MIB as usize);
        assert_eq!(g.parts, 1);
        assert_eq!(g.length, MIB);
    }

    #[test]
    fn unaligned_straddle() {
        // 500000..=1500000 touches chunks 0 and 1.
        let g = StreamGeometry::for_range(ByteRange {
            start: 500_000,
            end: 1_500_000,
        });
        assert_eq!(g.offset, 0);
        assert_eq!(g.first_cut, 500_000);
        assert_eq!(g.last_cut, 1_500_000 % MIB as usize + 1);
        assert_eq!(g.parts, 2);
        assert_eq!(g.length, 1_000_001);
    }

    #[test]
    fn boundary_end_still_counts_final_chunk() {
        // Ends exactly at the first byte of chunk 1.
        let g = StreamGeometry::for_range(ByteRange { start: 0, end: MIB });
        assert_eq!(g.parts, 2);
        assert_eq!(g.last_cut, 1);
    }

    /// Re-derive emitted byte count from the per-part trimming rules.
    fn emitted_total(g: &StreamGeometry, file_size: u64) -> (u64, u64, u64) {
        let mut total = 0u64;
        let mut first_abs = None;
        let mut last_abs = 0u64;
        let mut offset = g.offset;
        for part in 1..=g.parts {
            let chunk_len = file_size.saturating_sub(offset).min(g.chunk_size);
            if chunk_len == 0 {
                break;
            }
            let (from, to) = if g.parts == 1 {
                (g.first_cut as u64, (g.last_cut as u64).min(chunk_len))
            } else if part == 1 {
                (g.first_cut as u64, chunk_len)
            } else if part == g.parts {
                (0, (g.last_cut as u64).min(chunk_len))
            } else {
                (0, chunk_len)
            };
            total += to - from;
            if first_abs.is_none() {
                first_abs = Some(offset + from);
            }
            last_abs = offset + to - 1;
            offset += g.chunk_size;
        }
        (total, first_abs.unwrap_or(0), last_abs)
    }

    proptest! {
        #[test]
        fn geometry_covers_exact_range(
            size in 1u64..=8 * MIB,
            a in 0u64..=8 * MIB,
            b in 0u64..=8 * MIB,
        ) {
            let a = a.min(size - 1);
            let b = b.min(size - 1);
            let (start, end) = if a <= b { (a, b) } else { (b, a) };
            let g = StreamGeometry::for_range(ByteRange { start, end });
            let (total, first, last) = emitted_total(&g, size);
            prop_assert_eq!(total, end - start + 1);
            prop_assert_eq!(first, start);
            prop_assert_eq!(last, end);
        }
    }
}
