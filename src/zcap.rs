//! Root Capability derivation and management for DID:BTC1
//!
//! Every DID:BTC1 identifier has an implicit root capability, `urn:zcap:root:<did>`, whose
//! controller and invocation target are the DID itself. Updates invoke this capability with
//! the `Write` action.

use crate::error::Btc1Error;
use crate::identifier::Did;
use serde::{Deserialize, Serialize};

pub mod proof;

use proof::ProofOptions;

/// JSON-LD context for ZCAP-LD objects.
pub(crate) const ZCAP_CONTEXT: &str = "https://w3id.org/zcap/v1";

const ROOT_CAPABILITY_PREFIX: &str = "urn:zcap:root:";

/// The only action that may be invoked on a root capability.
pub(crate) const WRITE_ACTION: &str = "Write";

/// A ZCAP-LD root capability object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RootCapability {
    #[serde(rename = "@context")]
    pub(crate) context: String,

    /// Capability identifier in format: urn:zcap:root:{url_encoded_did}
    pub(crate) id: String,

    pub(crate) controller: Did,

    /// Same as the controller for root capabilities
    pub(crate) invocation_target: Did,
}

/// Derive a root capability from a DID:BTC1 identifier
pub(crate) fn derive_root_capability(did: &Did) -> RootCapability {
    let encoded_identifier = urlencoding::encode(did.encode());

    RootCapability {
        context: ZCAP_CONTEXT.to_string(),
        id: format!("{ROOT_CAPABILITY_PREFIX}{encoded_identifier}"),
        controller: did.clone(),
        invocation_target: did.clone(),
    }
}

/// Dereference a root capability identifier to get the capability object
pub(crate) fn dereference_root_capability(capability_id: &str) -> Result<RootCapability, Btc1Error> {
    let Some(did_identifier) = capability_id.strip_prefix(ROOT_CAPABILITY_PREFIX) else {
        return Err(Btc1Error::Zcap(format!(
            "Invalid root capability `{capability_id}`"
        )));
    };

    let did = urlencoding::decode(did_identifier)
        .map_err(|e| Btc1Error::Zcap(format!("Failed to decode DID from capability ID: {e}")))?;
    let did: Did = did
        .parse()
        .map_err(|err| Btc1Error::Zcap(format!("Invalid DID in root capability: {err}")))?;

    Ok(derive_root_capability(&did))
}

/// Check that a proof invokes the root capability of `did` with the `Write` action.
pub(crate) fn check_invocation(options: &ProofOptions, did: &Did) -> Result<(), Btc1Error> {
    let capability_id = options
        .capability
        .as_deref()
        .ok_or_else(|| Btc1Error::Zcap("Proof does not invoke a capability".into()))?;
    let root_capability = dereference_root_capability(capability_id)?;

    if &root_capability.controller != did {
        return Err(Btc1Error::Zcap(format!(
            "Capability `{capability_id}` is not the root capability of `{did}`"
        )));
    }

    match options.capability_action.as_deref() {
        Some(WRITE_ACTION) => {}
        action => {
            return Err(Btc1Error::Zcap(format!(
                "Capability action must be `{WRITE_ACTION}`, found {action:?}"
            )));
        }
    }

    if let Some(target) = &options.invocation_target {
        if target != root_capability.invocation_target.encode() {
            return Err(Btc1Error::Zcap(format!(
                "Invocation target `{target}` does not match `{did}`"
            )));
        }
    }

    Ok(())
}
