//! Storage-method descriptor: the parsed form of a `chunk_method`
//! string, choosing between n-way replication and (k, m) erasure coding.
//!
//! Grammar: `family(/key=value(,key=value)*)?` with `family` one of
//! `plain` (optional `nb_copy`) or `ec` (required `k`, `m`, `algo`).

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::common::errors::StoreError;
use crate::storage::codec::{EcCodec, ReedSolomonCodec};

/// Unit of erasure encoding inside a meta-chunk.
pub const EC_SEGMENT_SIZE: u64 = 1_048_576;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcAlgorithm {
    IsaLRsVand,
    JerasureRsVand,
    JerasureRsCauchy,
    LiberasurecodeRsVand,
    Shss,
}

impl EcAlgorithm {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "isa_l_rs_vand" => Some(Self::IsaLRsVand),
            "jerasure_rs_vand" => Some(Self::JerasureRsVand),
            "jerasure_rs_cauchy" => Some(Self::JerasureRsCauchy),
            "liberasurecode_rs_vand" => Some(Self::LiberasurecodeRsVand),
            "shss" => Some(Self::Shss),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IsaLRsVand => "isa_l_rs_vand",
            Self::JerasureRsVand => "jerasure_rs_vand",
            Self::JerasureRsCauchy => "jerasure_rs_cauchy",
            Self::LiberasurecodeRsVand => "liberasurecode_rs_vand",
            Self::Shss => "shss",
        }
    }
}

#[derive(Debug, Clone)]
pub enum StorageMethod {
    Replicated(ReplicatedMethod),
    ErasureCoded(EcMethod),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplicatedMethod {
    /// Replica count. `None` derives it from the meta-chunk target list.
    pub nb_copy: Option<usize>,
}

impl ReplicatedMethod {
    /// Majority quorum ⌈(n + 1) / 2⌉ over the effective replica count.
    pub fn quorum(&self, nb_targets: usize) -> usize {
        let n = self.nb_copy.unwrap_or(nb_targets);
        n / 2 + 1
    }
}

#[derive(Debug, Clone)]
pub struct EcMethod {
    pub k: usize,
    pub m: usize,
    pub algorithm: EcAlgorithm,
    pub segment_size: u64,
    codec: Arc<dyn EcCodec>,
}

impl EcMethod {
    pub fn new(k: usize, m: usize, algorithm: EcAlgorithm) -> Self {
        Self::with_codec(k, m, algorithm, Arc::new(ReedSolomonCodec::new(k, m)))
    }

    /// Same descriptor, caller-supplied codec.
    pub fn with_codec(
        k: usize,
        m: usize,
        algorithm: EcAlgorithm,
        codec: Arc<dyn EcCodec>,
    ) -> Self {
        Self {
            k,
            m,
            algorithm,
            segment_size: EC_SEGMENT_SIZE,
            codec,
        }
    }

    pub fn codec(&self) -> &Arc<dyn EcCodec> {
        &self.codec
    }

    pub fn fragment_size(&self) -> u64 {
        self.codec.fragment_size(self.segment_size)
    }

    pub fn quorum(&self) -> usize {
        self.k + self.codec.min_parity_needed()
    }
}

impl StorageMethod {
    pub fn parse(chunk_method: &str) -> Result<Self, StoreError> {
        let invalid = || StoreError::InvalidStorageMethod(chunk_method.to_string());

        let (family, raw_params) = match chunk_method.split_once('/') {
            Some((family, params)) => (family, Some(params)),
            None => (chunk_method, None),
        };

        let mut params = HashMap::new();
        if let Some(raw) = raw_params {
            for pair in raw.split(',').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').ok_or_else(invalid)?;
                params.insert(key, value);
            }
        }

        match family {
            "plain" => {
                let nb_copy = params
                    .get("nb_copy")
                    .map(|v| v.parse::<usize>().map_err(|_| invalid()))
                    .transpose()?;
                Ok(Self::Replicated(ReplicatedMethod { nb_copy }))
            }
            "ec" => {
                let k = params
                    .get("k")
                    .ok_or_else(invalid)?
                    .parse::<usize>()
                    .map_err(|_| invalid())?;
                let m = params
                    .get("m")
                    .ok_or_else(invalid)?
                    .parse::<usize>()
                    .map_err(|_| invalid())?;
                let algorithm =
                    EcAlgorithm::parse(params.get("algo").ok_or_else(invalid)?).ok_or_else(invalid)?;
                if k == 0 {
                    return Err(invalid());
                }
                Ok(Self::ErasureCoded(EcMethod::new(k, m, algorithm)))
            }
            _ => Err(invalid()),
        }
    }

    pub fn is_ec(&self) -> bool {
        matches!(self, Self::ErasureCoded(_))
    }

    /// Successful writers needed for a meta-chunk write to commit.
    pub fn quorum(&self, nb_targets: usize) -> usize {
        match self {
            Self::Replicated(r) => r.quorum(nb_targets),
            Self::ErasureCoded(ec) => ec.quorum(),
        }
    }
}

/// Process-wide parse cache. Initialized on first use, immutable wiring
/// afterwards: entries are only ever added.
pub struct StorageMethodRegistry {
    cache: RwLock<HashMap<String, StorageMethod>>,
}

impl StorageMethodRegistry {
    pub fn global() -> &'static Self {
        static REGISTRY: OnceLock<StorageMethodRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| StorageMethodRegistry {
            cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn load(&self, chunk_method: &str) -> Result<StorageMethod, StoreError> {
        if let Some(method) = self.cache.read().get(chunk_method) {
            return Ok(method.clone());
        }
        let method = StorageMethod::parse(chunk_method)?;
        self.cache
            .write()
            .insert(chunk_method.to_string(), method.clone());
        Ok(method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_defaults_to_target_count() {
        let method = StorageMethod::parse("plain").unwrap();
        assert!(!method.is_ec());
        assert_eq!(method.quorum(3), 2);
        assert_eq!(method.quorum(5), 3);
    }

    #[test]
    fn plain_nb_copy_overrides() {
        let StorageMethod::Replicated(r) = StorageMethod::parse("plain/nb_copy=3").unwrap() else {
            panic!("expected replication");
        };
        assert_eq!(r.nb_copy, Some(3));
        assert_eq!(r.quorum(7), 2);
    }

    #[test]
    fn ec_parses_parameters() {
        let StorageMethod::ErasureCoded(ec) =
            StorageMethod::parse("ec/k=6,m=3,algo=liberasurecode_rs_vand").unwrap()
        else {
            panic!("expected ec");
        };
        assert_eq!(ec.k, 6);
        assert_eq!(ec.m, 3);
        assert_eq!(ec.algorithm, EcAlgorithm::LiberasurecodeRsVand);
        assert_eq!(ec.segment_size, EC_SEGMENT_SIZE);
        assert_eq!(ec.quorum(), 7);
    }

    #[test]
    fn rejects_bad_methods() {
        assert!(StorageMethod::parse("rain/k=6").is_err());
        assert!(StorageMethod::parse("ec/k=6,m=3").is_err());
        assert!(StorageMethod::parse("ec/k=6,m=3,algo=rot13").is_err());
        assert!(StorageMethod::parse("ec/k=abc,m=3,algo=shss").is_err());
        assert!(StorageMethod::parse("plain/nb_copy=x").is_err());
    }

    #[test]
    fn registry_caches() {
        let registry = StorageMethodRegistry::global();
        let a = registry.load("ec/k=4,m=2,algo=isa_l_rs_vand").unwrap();
        let b = registry.load("ec/k=4,m=2,algo=isa_l_rs_vand").unwrap();
        assert!(a.is_ec() && b.is_ec());
        assert!(registry.load("bogus").is_err());
    }
}
