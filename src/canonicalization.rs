//! Canonical serialization and hashing of JSON documents.
//!
//! Two algorithms are supported:
//!
//! - [`Canonicalization::Jcs`]: the JSON Canonicalization Scheme ([RFC 8785]).
//! - [`Canonicalization::Rdfc`]: the JSON tree is mapped onto an RDF dataset, which is then
//!   canonicalized with [RDFC-1.0] and serialized as canonical N-Quads.
//!
//! The algorithm is always an explicit value passed to each call site.
//!
//! [RFC 8785]: https://www.rfc-editor.org/rfc/rfc8785
//! [RDFC-1.0]: https://www.w3.org/TR/rdf-canon/

use crate::identifier::Sha256Hash;
use multibase::Base;
use onlyerror::Error;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest as _, Sha256};
use std::fmt;
use tracing::trace;

mod graph;

#[derive(Error, Debug)]
pub enum Error {
    /// Value cannot be serialized as JSON
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// RDF dataset canonicalization failed
    #[error("RDF canonicalization error: {0}")]
    Rdfc(String),
}

/// Canonicalization algorithm.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Canonicalization {
    /// JSON Canonicalization Scheme
    #[default]
    Jcs,

    /// RDF Dataset Canonicalization
    Rdfc,
}

/// Text encoding for a hash.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HashEncoding {
    Hex,

    /// Multibase base58-btc (`z` prefix)
    #[default]
    Base58,
}

impl fmt::Display for Canonicalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jcs => f.write_str("jcs"),
            Self::Rdfc => f.write_str("rdfc"),
        }
    }
}

impl Canonicalization {
    /// Produce the canonical string form of any serializable value.
    pub fn canonicalize<T>(&self, value: &T) -> Result<String, Error>
    where
        T: Serialize + ?Sized,
    {
        let canonical = match self {
            Self::Jcs => serde_jcs::to_string(value)?,
            Self::Rdfc => {
                let value = serde_json::to_value(value)?;
                let dataset = graph::to_dataset(&value);

                rdf_canon::canonicalize(&dataset).map_err(|err| Error::Rdfc(err.to_string()))?
            }
        };
        trace!(algorithm = %self, len = canonical.len(), "canonicalized");

        Ok(canonical)
    }

    /// SHA-256 of a canonical string.
    pub fn hash(canonical: &str) -> Sha256Hash {
        Sha256Hash(Sha256::digest(canonical.as_bytes()).into())
    }

    pub fn encode(hash: &Sha256Hash, encoding: HashEncoding) -> String {
        match encoding {
            HashEncoding::Hex => hex::encode(hash.0),
            HashEncoding::Base58 => multibase::encode(Base::Base58Btc, hash.0),
        }
    }

    /// Canonicalize then hash.
    pub fn canonical_hash<T>(&self, value: &T) -> Result<Sha256Hash, Error>
    where
        T: Serialize + ?Sized,
    {
        Ok(Self::hash(&self.canonicalize(value)?))
    }

    /// Canonicalize, hash and encode.
    pub fn process<T>(&self, value: &T, encoding: HashEncoding) -> Result<String, Error>
    where
        T: Serialize + ?Sized,
    {
        Ok(Self::encode(&self.canonical_hash(value)?, encoding))
    }
}

/// Types backed by a JSON value that can be hashed in canonical form.
pub(crate) trait CanonicalHash: AsRef<Value> {
    fn canonical_hash(&self, canonicalization: Canonicalization) -> Result<Sha256Hash, Error> {
        canonicalization.canonical_hash(self.as_ref())
    }
}
