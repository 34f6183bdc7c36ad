//! Byte-range arithmetic.
//!
//! Pure mappings between the four range spaces of the engine: object →
//! meta-chunk → segment → fragment, plus `Range` header parsing and
//! resolution against a known length.
//!
//! Everywhere below, `None` in a start position means "suffix range"
//! (last `end` bytes) and `None` in an end position means "to the end".

use std::collections::BTreeMap;

use crate::common::errors::StoreError;

/// Half-open byte position, `None` = unbounded on that side.
pub type RangeBound = Option<u64>;

/// Maps a requested object range onto the meta-chunks it touches.
///
/// Walks `meta_sizes` accumulating an offset; the first overlapped
/// meta-chunk gets a local start, the last one a local end, chunks in
/// between get `(None, None)` (read them whole).
///
/// ```
/// use oxistore::storage::range::obj_range_to_meta_chunk_ranges;
///
/// let ranges = obj_range_to_meta_chunk_ranges(Some(20), Some(70), &[50, 50]);
/// assert_eq!(ranges[&0], (Some(20), None));
/// assert_eq!(ranges[&1], (None, Some(20)));
/// ```
pub fn obj_range_to_meta_chunk_ranges(
    obj_start: RangeBound,
    obj_end: RangeBound,
    meta_sizes: &[u64],
) -> BTreeMap<usize, (RangeBound, RangeBound)> {
    let mut ranges = BTreeMap::new();
    let mut offset = 0u64;
    let mut found_start = false;

    for (pos, &meta_size) in meta_sizes.iter().enumerate() {
        let meta_start = if found_start {
            None
        } else if let Some(start) = obj_start {
            if start >= offset + meta_size {
                offset += meta_size;
                continue;
            }
            found_start = true;
            Some(start - offset)
        } else {
            None
        };

        let mut found_end = false;
        let meta_end = match obj_end {
            Some(end) if end < offset + meta_size => {
                found_end = true;
                Some(end - offset)
            }
            _ => None,
        };

        ranges.insert(pos, (meta_start, meta_end));
        if found_end {
            break;
        }
        offset += meta_size;
    }

    ranges
}

/// Expands a meta-chunk range to segment alignment: start rounds down to
/// a segment boundary, end rounds up to the last byte of its segment.
///
/// For a suffix range (`meta_start == None`) the returned end is a byte
/// *count*, rounded up far enough to cover any alignment slack.
pub fn meta_chunk_range_to_segment_range(
    meta_start: RangeBound,
    meta_end: RangeBound,
    segment_size: u64,
) -> (RangeBound, RangeBound) {
    let segment_start = meta_start.map(|start| start / segment_size * segment_size);

    let segment_end = meta_end.map(|end| {
        if meta_start.is_some() {
            (end / segment_size + 1) * segment_size - 1
        } else {
            (end.div_ceil(segment_size) + 1) * segment_size
        }
    });

    (segment_start, segment_end)
}

/// Scales a segment range into the fragment space: every segment of
/// `segment_size` bytes is stored as one fragment of `fragment_size`
/// bytes on each target.
pub fn segment_range_to_fragment_range(
    segment_start: RangeBound,
    segment_end: RangeBound,
    segment_size: u64,
    fragment_size: u64,
) -> (RangeBound, RangeBound) {
    let fragment_start = segment_start.map(|start| start / segment_size * fragment_size);

    let fragment_end = segment_end.map(|end| {
        if segment_start.is_some() {
            (end + 1) / segment_size * fragment_size - 1
        } else {
            (end + 1) / segment_size * fragment_size
        }
    });

    (fragment_start, fragment_end)
}

/// Parses an HTTP `Range` header value (`bytes=a-b,c-d,…`).
///
/// Open starts and ends map to `None`; a fully empty range, a reversed
/// range, or a non-numeric bound is rejected.
pub fn parse_http_range(value: &str) -> Result<Vec<(RangeBound, RangeBound)>, StoreError> {
    let spec = value
        .strip_prefix("bytes=")
        .ok_or_else(|| StoreError::InvalidRange(value.to_string()))?;

    let mut ranges = Vec::new();
    for part in spec.split(',') {
        let (raw_start, raw_end) = part
            .split_once('-')
            .ok_or_else(|| StoreError::InvalidRange(value.to_string()))?;

        let start = match raw_start {
            "" => None,
            s => Some(
                s.parse::<u64>()
                    .map_err(|_| StoreError::InvalidRange(value.to_string()))?,
            ),
        };
        let end = match raw_end {
            "" => {
                if start.is_none() {
                    return Err(StoreError::InvalidRange(value.to_string()));
                }
                None
            }
            s => {
                let end = s
                    .parse::<u64>()
                    .map_err(|_| StoreError::InvalidRange(value.to_string()))?;
                if let Some(start) = start {
                    if end < start {
                        return Err(StoreError::InvalidRange(value.to_string()));
                    }
                }
                Some(end)
            }
        };
        ranges.push((start, end));
    }
    Ok(ranges)
}

/// Formats ranges back into a `Range` header value.
pub fn format_http_range(ranges: &[(RangeBound, RangeBound)]) -> String {
    let mut out = String::from("bytes=");
    for (i, (start, end)) in ranges.iter().enumerate() {
        if let Some(start) = start {
            out.push_str(&start.to_string());
        }
        out.push('-');
        if let Some(end) = end {
            out.push_str(&end.to_string());
        }
        if i < ranges.len() - 1 {
            out.push(',');
        }
    }
    out
}

/// Resolves parsed ranges against a known total length.
///
/// A suffix `(None, n)` becomes `(length - n, length)` (the whole content
/// when `n > length`); an open end becomes `(start, length)`; a bounded
/// end is clamped to `length`. Note the resolved end of an open or
/// suffix range is `length` itself — consumers clamp to the last byte.
/// Unsatisfiable ranges are dropped; the result may be empty.
pub fn resolve_ranges(ranges: &[(RangeBound, RangeBound)], length: u64) -> Vec<(u64, u64)> {
    if length == 0 {
        return Vec::new();
    }
    let mut resolved = Vec::new();
    for &(start, end) in ranges {
        match (start, end) {
            (None, Some(0)) | (None, None) => continue,
            (None, Some(n)) => {
                if n > length {
                    resolved.push((0, length));
                } else {
                    resolved.push((length - n, length));
                }
            }
            (Some(s), None) => {
                if s < length {
                    resolved.push((s, length));
                }
            }
            (Some(s), Some(e)) => {
                if s < length {
                    resolved.push((s, e.min(length)));
                }
            }
        }
    }
    resolved
}
