//! Erasure codec boundary.
//!
//! The pipelines only ever talk to [`EcCodec`]; the production
//! implementation sits on Reed-Solomon, tests plug in a trivial XOR
//! codec. Every fragment carries a small fixed header (index + original
//! segment length) so an undersized tail segment decodes back to its
//! exact length.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use reed_solomon_simd::{ReedSolomonDecoder, ReedSolomonEncoder};

use crate::common::errors::StoreError;

/// Bytes prepended to every fragment: version, fragment index, two
/// reserved bytes, segment length as u32 big-endian.
pub const FRAGMENT_HEADER_LEN: usize = 8;

const FRAGMENT_VERSION: u8 = 1;

/// One segment in, k+m fragments out — and back.
pub trait EcCodec: Send + Sync + fmt::Debug {
    fn data_fragments(&self) -> usize;

    fn parity_fragments(&self) -> usize;

    /// Encodes one segment into `k + m` fragments. An empty segment
    /// yields `k + m` empty fragments.
    fn encode(&self, segment: &[u8]) -> Result<Vec<Bytes>, StoreError>;

    /// Decodes a segment from a `k + m` slot vector with up to `m`
    /// missing fragments.
    fn decode(&self, fragments: &[Option<Bytes>]) -> Result<Bytes, StoreError>;

    /// Size of one full fragment for the given segment size.
    fn fragment_size(&self, segment_size: u64) -> u64;

    /// Parity fragments that must respond for a write to be safe.
    fn min_parity_needed(&self) -> usize;
}

fn codec_err(e: impl fmt::Display) -> StoreError {
    StoreError::Codec(e.to_string())
}

/// Shard length for a segment split across `k` data fragments, rounded
/// up to the even length the Reed-Solomon backend requires.
fn shard_len_for(segment_len: usize, k: usize) -> usize {
    let per = segment_len.div_ceil(k);
    per + (per & 1)
}

pub(crate) fn make_fragment(index: usize, segment_len: usize, shard: &[u8]) -> Bytes {
    let mut frag = BytesMut::with_capacity(FRAGMENT_HEADER_LEN + shard.len());
    frag.put_u8(FRAGMENT_VERSION);
    frag.put_u8(index as u8);
    frag.put_u16(0);
    frag.put_u32(segment_len as u32);
    frag.put_slice(shard);
    frag.freeze()
}

struct FragmentView<'a> {
    index: usize,
    segment_len: usize,
    shard: &'a [u8],
}

fn parse_fragment(frag: &Bytes) -> Result<FragmentView<'_>, StoreError> {
    if frag.len() < FRAGMENT_HEADER_LEN {
        return Err(codec_err("fragment shorter than its header"));
    }
    if frag[0] != FRAGMENT_VERSION {
        return Err(codec_err(format!("unknown fragment version {}", frag[0])));
    }
    let segment_len = u32::from_be_bytes([frag[4], frag[5], frag[6], frag[7]]) as usize;
    Ok(FragmentView {
        index: frag[1] as usize,
        segment_len,
        shard: &frag[FRAGMENT_HEADER_LEN..],
    })
}

/// Systematic Reed-Solomon codec: fragments `0..k` carry the segment
/// itself, fragments `k..k+m` carry parity.
#[derive(Debug)]
pub struct ReedSolomonCodec {
    k: usize,
    m: usize,
}

impl ReedSolomonCodec {
    pub fn new(k: usize, m: usize) -> Self {
        Self { k, m }
    }
}

impl EcCodec for ReedSolomonCodec {
    fn data_fragments(&self) -> usize {
        self.k
    }

    fn parity_fragments(&self) -> usize {
        self.m
    }

    fn encode(&self, segment: &[u8]) -> Result<Vec<Bytes>, StoreError> {
        let total = self.k + self.m;
        if segment.is_empty() {
            return Ok(vec![Bytes::new(); total]);
        }

        let shard_len = shard_len_for(segment.len(), self.k);
        let mut padded = vec![0u8; shard_len * self.k];
        padded[..segment.len()].copy_from_slice(segment);

        let mut fragments = Vec::with_capacity(total);
        for i in 0..self.k {
            let shard = &padded[i * shard_len..(i + 1) * shard_len];
            fragments.push(make_fragment(i, segment.len(), shard));
        }

        if self.m > 0 {
            let mut encoder =
                ReedSolomonEncoder::new(self.k, self.m, shard_len).map_err(codec_err)?;
            for i in 0..self.k {
                encoder
                    .add_original_shard(&padded[i * shard_len..(i + 1) * shard_len])
                    .map_err(codec_err)?;
            }
            let result = encoder.encode().map_err(codec_err)?;
            for (j, shard) in result.recovery_iter().enumerate() {
                fragments.push(make_fragment(self.k + j, segment.len(), shard));
            }
        }

        Ok(fragments)
    }

    fn decode(&self, fragments: &[Option<Bytes>]) -> Result<Bytes, StoreError> {
        let total = self.k + self.m;
        if fragments.len() != total {
            return Err(codec_err(format!(
                "expected {} fragment slots, got {}",
                total,
                fragments.len()
            )));
        }

        let present: Vec<(usize, &Bytes)> = fragments
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().map(|f| (i, f)))
            .collect();
        if present.len() < self.k {
            return Err(codec_err(format!(
                "{} fragments cannot rebuild a {}-of-{} segment",
                present.len(),
                self.k,
                total
            )));
        }
        if present.iter().all(|(_, f)| f.is_empty()) {
            return Ok(Bytes::new());
        }

        let mut segment_len = None;
        let mut shard_len = None;
        let mut views = Vec::with_capacity(present.len());
        for (slot, frag) in &present {
            let view = parse_fragment(frag)?;
            if view.index != *slot {
                return Err(codec_err(format!(
                    "fragment {} found in slot {}",
                    view.index, slot
                )));
            }
            if *segment_len.get_or_insert(view.segment_len) != view.segment_len
                || *shard_len.get_or_insert(view.shard.len()) != view.shard.len()
            {
                return Err(codec_err("inconsistent fragment set"));
            }
            views.push(view);
        }
        let (Some(segment_len), Some(shard_len)) = (segment_len, shard_len) else {
            return Err(codec_err("no decodable fragments"));
        };

        let mut data: Vec<Option<&[u8]>> = vec![None; self.k];
        for view in &views {
            if view.index < self.k {
                data[view.index] = Some(view.shard);
            }
        }

        let mut segment = BytesMut::with_capacity(self.k * shard_len);
        if data.iter().all(Option::is_some) {
            for shard in data.into_iter().flatten() {
                segment.put_slice(shard);
            }
        } else {
            let mut decoder =
                ReedSolomonDecoder::new(self.k, self.m, shard_len).map_err(codec_err)?;
            for view in &views {
                if view.index < self.k {
                    decoder
                        .add_original_shard(view.index, view.shard)
                        .map_err(codec_err)?;
                } else {
                    decoder
                        .add_recovery_shard(view.index - self.k, view.shard)
                        .map_err(codec_err)?;
                }
            }
            let result = decoder.decode().map_err(codec_err)?;
            let restored: std::collections::HashMap<usize, &[u8]> =
                result.restored_original_iter().collect();
            for (i, shard) in data.iter().enumerate() {
                match shard.or_else(|| restored.get(&i).copied()) {
                    Some(shard) => segment.put_slice(shard),
                    None => return Err(codec_err(format!("data fragment {} not restored", i))),
                }
            }
        }

        segment.truncate(segment_len);
        Ok(segment.freeze())
    }

    fn fragment_size(&self, segment_size: u64) -> u64 {
        FRAGMENT_HEADER_LEN as u64 + shard_len_for(segment_size as usize, self.k) as u64
    }

    fn min_parity_needed(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn sample(len: usize) -> Vec<u8> {
        let mut data = vec![0u8; len];
        rand::thread_rng().fill_bytes(&mut data);
        data
    }

    #[test]
    fn round_trip_no_loss() {
        let codec = ReedSolomonCodec::new(6, 3);
        let segment = sample(4096);
        let fragments = codec.encode(&segment).unwrap();
        assert_eq!(fragments.len(), 9);

        let slots: Vec<Option<Bytes>> = fragments.into_iter().map(Some).collect();
        assert_eq!(&codec.decode(&slots).unwrap()[..], &segment[..]);
    }

    #[test]
    fn round_trip_with_m_losses() {
        let codec = ReedSolomonCodec::new(6, 3);
        let segment = sample(5000);
        let fragments = codec.encode(&segment).unwrap();

        for lost in [[0usize, 3, 7], [1, 2, 8], [6, 7, 8]] {
            let mut slots: Vec<Option<Bytes>> =
                fragments.iter().cloned().map(Some).collect();
            for i in lost {
                slots[i] = None;
            }
            assert_eq!(&codec.decode(&slots).unwrap()[..], &segment[..], "lost {:?}", lost);
        }
    }

    #[test]
    fn too_many_losses() {
        let codec = ReedSolomonCodec::new(6, 3);
        let fragments = codec.encode(&sample(1024)).unwrap();
        let mut slots: Vec<Option<Bytes>> = fragments.into_iter().map(Some).collect();
        for i in [0, 1, 2, 3] {
            slots[i] = None;
        }
        assert!(codec.decode(&slots).is_err());
    }

    #[test]
    fn undersized_tail_keeps_exact_length() {
        let codec = ReedSolomonCodec::new(4, 2);
        for len in [1usize, 3, 17, 1000] {
            let segment = sample(len);
            let fragments = codec.encode(&segment).unwrap();
            let mut slots: Vec<Option<Bytes>> = fragments.into_iter().map(Some).collect();
            slots[0] = None;
            assert_eq!(&codec.decode(&slots).unwrap()[..], &segment[..], "len {}", len);
        }
    }

    #[test]
    fn empty_segment_yields_empty_fragments() {
        let codec = ReedSolomonCodec::new(6, 3);
        let fragments = codec.encode(&[]).unwrap();
        assert_eq!(fragments.len(), 9);
        assert!(fragments.iter().all(Bytes::is_empty));

        let slots: Vec<Option<Bytes>> = fragments.into_iter().map(Some).collect();
        assert!(codec.decode(&slots).unwrap().is_empty());
    }

    #[test]
    fn fragment_size_is_even_share_plus_header() {
        let codec = ReedSolomonCodec::new(6, 3);
        // ceil(1 MiB / 6) = 174763, rounded up to even.
        assert_eq!(codec.fragment_size(1_048_576), 8 + 174764);
    }
}
