pub mod beacon;
pub mod blockchain;
pub mod canonicalization;
pub mod cryptosuite;
pub mod data_integrity;
pub mod document;
pub mod error;
pub mod identifier;
pub mod key;
pub mod resolution;
pub mod service;
pub mod update;
pub mod verification;
pub mod zcap;

mod json_tools;

#[cfg(test)]
mod tests;

// Re-exports of key components
pub use document::Document;
pub use key::{KeyPair, PublicKey, SecretKey};
pub use resolution::ResolutionOptions;
