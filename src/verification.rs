use crate::key::{PublicKey, PublicKeyExt as _};
use onlyerror::Error;
use serde_json::{Value, json};
use std::{fmt, str::FromStr};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Unsupported verification method type
    #[error("Unsupported verification method type `{0}`")]
    UnsupportedVerificationMethod(String),

    /// Verification method ids must not be empty
    EmptyVerificationMethodId,
}

/// Verification method types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VerificationMethodType {
    /// Multikey verification method
    #[default]
    Multikey,
}

impl FromStr for VerificationMethodType {
    type Err = Error;

    fn from_str(ty: &str) -> Result<Self, Self::Err> {
        match ty {
            "Multikey" => Ok(Self::Multikey),
            _ => Err(Error::UnsupportedVerificationMethod(ty.to_string())),
        }
    }
}

impl fmt::Display for VerificationMethodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Multikey => f.write_str("Multikey"),
        }
    }
}

/// Verification method ID
///
/// These look like DIDs with a `#fragment`. Used to identify [`VerificationMethod`]s.
/// Relative references (`#fragment`) are resolved against the document id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VerificationMethodId(pub(crate) String);

impl FromStr for VerificationMethodId {
    type Err = Error;

    fn from_str(method_id: &str) -> Result<Self, Self::Err> {
        if method_id.is_empty() {
            return Err(Error::EmptyVerificationMethodId);
        }

        Ok(Self(method_id.to_string()))
    }
}

impl fmt::Display for VerificationMethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl VerificationMethodId {
    /// The absolute form of this id within the document `base`.
    pub fn absolute(&self, base: &str) -> String {
        if self.0.starts_with('#') {
            format!("{base}{}", self.0)
        } else {
            self.0.clone()
        }
    }

    /// Compare two ids within the document `base`.
    pub fn matches(&self, other: &str, base: &str) -> bool {
        let other = if other.starts_with('#') {
            format!("{base}{other}")
        } else {
            other.to_string()
        };

        self.absolute(base) == other
    }
}

/// Represents a verification method for cryptographic proofs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationMethod<T> {
    /// Identifier for the verification method
    pub id: VerificationMethodId,

    /// Type of verification method
    pub type_: VerificationMethodType,

    /// The controller of this verification method
    pub controller: T,

    /// Public key
    pub public_key: PublicKey,
}

impl<T: fmt::Display> VerificationMethod<T> {
    /// Create a new verification method
    pub fn new(id: VerificationMethodId, controller: T, public_key: PublicKey) -> Self {
        Self {
            id,
            type_: VerificationMethodType::Multikey,
            controller,
            public_key,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id.0,
            "type": self.type_.to_string(),
            "controller": self.controller.to_string(),
            "publicKeyMultibase": self.public_key.to_multikey(),
        })
    }
}
