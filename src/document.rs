use crate::beacon::{AddressKind, Beacon, BeaconSignal, Funding, Type};
use crate::blockchain::Traversal;
use crate::canonicalization::{CanonicalHash, Canonicalization};
use crate::cryptosuite::{Cryptosuite, Multikey};
use crate::data_integrity::ProofExpectations;
use crate::error::{Btc1Error, ProblemDetails};
use crate::identifier::{Did, DidComponents, DidVersion, IdType, Network, Sha256Hash};
use crate::json_tools;
use crate::key::{PublicKey, PublicKeyExt as _, SecretKey};
use crate::resolution::ResolutionOptions;
use crate::service::Service;
use crate::update::{UnsignedUpdate, Update};
use crate::verification::{VerificationMethod, VerificationMethodId, VerificationMethodType};
use crate::zcap::{self, proof::ProofPurpose};
use bitcoin::Amount;
use chrono::{DateTime, Utc};
use json_patch::Patch;
use onlyerror::Error;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::num::NonZeroU64;
use std::{fmt::Display, fs, path::Path, str::FromStr};
use tracing::{debug, instrument};

pub(crate) const DID_CORE_V1_1_CONTEXT: &str = "https://www.w3.org/ns/did/v1.1";
pub(crate) const DID_BTC1_CONTEXT: &str = "https://btc1.dev/context/v1";

/// Stands in for the DID inside intermediate documents of external identifiers.
pub const DID_PLACEHOLDER: &str =
    "did:btc1:xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx";

const INITIAL_KEY_FRAGMENT: &str = "#initialKey";

#[derive(Error, Debug)]
pub enum Error {
    /// Error during document I/O operations
    #[error("Document I/O error")]
    DocumentIO(#[from] std::io::Error),

    /// Error parsing JSON document
    #[error("JSON parse error")]
    JsonParse(#[from] serde_json::Error),

    /// JSON value parse error
    JsonValue(#[from] json_tools::Error),

    /// Document root must be a JSON object
    NotAnObject,

    /// A verification relationship references an unknown verification method
    #[error("Verification relationship references unknown method `{0}`")]
    UnknownVerificationMethod(String),

    /// Ids of verification methods and services must be unique
    #[error("Duplicate id `{0}`")]
    DuplicateId(String),

    /// DID Encoding error
    DidEncoding(#[from] crate::identifier::Error),

    /// Verification method error
    Verification(#[from] crate::verification::Error),

    /// Beacon service error
    Beacon(#[from] crate::beacon::Error),

    /// DID:BTC1 error
    Btc1Error(#[from] Btc1Error),
}

impl ProblemDetails for Error {
    fn details(&self) -> Option<Value> {
        match self {
            Self::Btc1Error(err) => err.details(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DocumentFields<T> {
    /// DID identifier
    id: T,

    /// Document context
    context: Vec<String>,

    /// Document controller
    controller: Vec<T>,

    verification_method: Vec<VerificationMethod<T>>,

    authentication: Vec<VerificationMethodId>,
    assertion_method: Vec<VerificationMethodId>,
    capability_invocation: Vec<VerificationMethodId>,
    capability_delegation: Vec<VerificationMethodId>,

    service: Vec<Service>,

    deactivated: bool,
}

impl<T> TryFrom<&Value> for DocumentFields<T>
where
    T: FromStr + Display,
    <T as FromStr>::Err: Into<json_tools::Error>,
{
    type Error = Error;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        if !value.is_object() {
            return Err(Error::NotAnObject);
        }

        let id: T = json_tools::string_from_object(value, "id")?
            .parse()
            .map_err(Into::<json_tools::Error>::into)?;
        let context = json_tools::strings_from_object(value, "@context")?;
        let controller = match &value["controller"] {
            Value::Null => Vec::new(),
            _ => json_tools::strings_from_object(value, "controller")?
                .iter()
                .map(|controller| controller.parse())
                .collect::<Result<Vec<T>, _>>()
                .map_err(Into::<json_tools::Error>::into)?,
        };

        let verification_method =
            json_tools::vec_from_object(value, "verificationMethod", |method| {
                let type_: VerificationMethodType =
                    json_tools::string_from_object(method, "type")?.parse()?;

                Ok(VerificationMethod {
                    id: json_tools::string_from_object(method, "id")?.parse()?,
                    type_,
                    controller: json_tools::string_from_object(method, "controller")?
                        .parse()
                        .map_err(Into::<json_tools::Error>::into)?,
                    public_key: PublicKey::from_multikey(json_tools::string_from_object(
                        method,
                        "publicKeyMultibase",
                    )?)?,
                })
            })?;

        let service = json_tools::vec_from_object(value, "service", |service| {
            Ok(Service::new(
                json_tools::string_from_object(service, "id")?,
                json_tools::strings_from_object(service, "type")?,
                json_tools::strings_from_object(service, "serviceEndpoint")?,
            )?)
        })?;

        let fields = DocumentFields {
            context,
            controller,
            verification_method,
            authentication: json_tools::vec_from_value(value, "authentication")?,
            assertion_method: json_tools::vec_from_value(value, "assertionMethod")?,
            capability_invocation: json_tools::vec_from_value(value, "capabilityInvocation")?,
            capability_delegation: json_tools::vec_from_value(value, "capabilityDelegation")?,
            service,
            deactivated: json_tools::optional_bool_from_object(value, "deactivated")?
                .unwrap_or(false),
            id,
        };
        fields.validate()?;

        Ok(fields)
    }
}

impl<T: Display> DocumentFields<T> {
    fn validate(&self) -> Result<(), Error> {
        let base = self.id.to_string();

        let mut ids = HashSet::new();
        let method_ids = self.verification_method.iter().map(|method| method.id.absolute(&base));
        let service_ids = self.service.iter().map(|service| absolute_id(service.id(), &base));
        for id in method_ids.chain(service_ids) {
            if !ids.insert(id.clone()) {
                return Err(Error::DuplicateId(id));
            }
        }

        let relationships = self
            .authentication
            .iter()
            .chain(&self.assertion_method)
            .chain(&self.capability_invocation)
            .chain(&self.capability_delegation);
        for reference in relationships {
            if self.method(&reference.0, &base).is_none() {
                return Err(Error::UnknownVerificationMethod(reference.0.clone()));
            }
        }

        Ok(())
    }

    fn method(&self, id: &str, base: &str) -> Option<&VerificationMethod<T>> {
        self.verification_method
            .iter()
            .find(|method| method.id.matches(id, base))
    }
}

/// Resolve a `#fragment` reference against the document id.
fn absolute_id(id: &str, base: &str) -> String {
    if id.starts_with('#') {
        format!("{base}{id}")
    } else {
        id.to_string()
    }
}

/// A validated DID document.
///
/// The JSON is kept as published; the typed fields are a view over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// All structural Document fields
    fields: DocumentFields<Did>,

    /// Beacons listed in the document services
    beacons: Vec<Beacon>,

    /// The document data as a JSON Value
    data: Value,
}

impl Document {
    /// Load a document from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = fs::read_to_string(path)?;
        Self::from_json_string(&content)
    }

    /// Create a document from a JSON string
    pub fn from_json_string(json: &str) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_json_value(value)
    }

    /// Create a document from a JSON Value
    pub fn from_json_value(value: Value) -> Result<Self, Error> {
        let fields = DocumentFields::<Did>::try_from(&value)?;
        let network = fields.id.bitcoin_network();

        let mut beacons = Vec::new();
        for service in &fields.service {
            beacons.extend(Beacon::from_service(service, network)?);
        }

        Ok(Self {
            fields,
            beacons,
            data: value,
        })
    }

    /// Save the document to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let json = self.to_json_string()?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Convert the document to a JSON string
    pub fn to_json_string(&self) -> Result<String, Error> {
        Ok(serde_json::to_string_pretty(&self.data)?)
    }

    pub fn did(&self) -> &Did {
        &self.fields.id
    }

    pub fn context(&self) -> &[String] {
        &self.fields.context
    }

    pub fn controller(&self) -> &[Did] {
        &self.fields.controller
    }

    pub fn verification_methods(&self) -> &[VerificationMethod<Did>] {
        &self.fields.verification_method
    }

    /// Find a verification method by absolute or relative id.
    pub fn verification_method(&self, id: &str) -> Option<&VerificationMethod<Did>> {
        self.fields.method(id, self.did().encode())
    }

    pub fn authentication(&self) -> &[VerificationMethodId] {
        &self.fields.authentication
    }

    pub fn assertion_method(&self) -> &[VerificationMethodId] {
        &self.fields.assertion_method
    }

    pub fn capability_invocation(&self) -> &[VerificationMethodId] {
        &self.fields.capability_invocation
    }

    pub fn capability_delegation(&self) -> &[VerificationMethodId] {
        &self.fields.capability_delegation
    }

    /// Whether `id` may sign capability invocations, i.e. updates.
    pub fn authorizes_invocation(&self, id: &str) -> bool {
        let base = self.did().encode();

        self.fields
            .capability_invocation
            .iter()
            .any(|reference| reference.matches(id, base))
    }

    pub fn services(&self) -> &[Service] {
        &self.fields.service
    }

    pub fn beacons(&self) -> &[Beacon] {
        &self.beacons
    }

    /// Find a beacon by absolute or relative service id.
    pub fn beacon(&self, id: &str) -> Option<&Beacon> {
        let base = self.did().encode();
        let id = absolute_id(id, base);

        self.beacons
            .iter()
            .find(|beacon| absolute_id(beacon.id(), base) == id)
    }

    pub fn is_deactivated(&self) -> bool {
        self.fields.deactivated
    }

    /// Create a DID and its initial document from a public key.
    pub fn create_deterministic(
        public_key: PublicKey,
        version: Option<DidVersion>,
        network: Option<Network>,
    ) -> Result<(Did, Self), Error> {
        let components = DidComponents::new(
            version.unwrap_or_default(),
            network.unwrap_or_default(),
            IdType::from(public_key),
        )?;
        let did = Did::new(components)?;
        let initial = InitialDocument::deterministic(&did)?;

        Ok((did, initial.into_document()))
    }

    /// Start resolving `did`.
    ///
    /// The returned [`Traversal`] is driven by the caller, who performs the Bitcoin queries.
    pub fn read(did: &Did, resolution_options: ResolutionOptions) -> Result<Traversal, Btc1Error> {
        Traversal::new(did.clone(), resolution_options)
    }

    /// Sign an update of this document.
    ///
    /// `self` is the document at `source_version_id`. The update is announced through the
    /// beacons of this document, see [`DidUpdate::announce`].
    #[instrument(skip_all, fields(did = %self.did(), source_version_id = source_version_id.get()))]
    pub fn update(
        &self,
        source_version_id: NonZeroU64,
        patch: Patch,
        verification_method_id: &str,
        secret_key: SecretKey,
        canonicalization: Canonicalization,
    ) -> Result<DidUpdate, Btc1Error> {
        if self.is_deactivated() {
            return Err(Btc1Error::InvalidDidUpdate(
                "Deactivated documents cannot be updated".into(),
            ));
        }

        let method = self
            .verification_method(verification_method_id)
            .ok_or_else(|| {
                Btc1Error::InvalidDidUpdate(format!(
                    "Unknown verification method `{verification_method_id}`"
                ))
            })?;
        if !self.authorizes_invocation(verification_method_id) {
            return Err(Btc1Error::InvalidDidUpdate(format!(
                "`{verification_method_id}` is not a capabilityInvocation method"
            )));
        }

        let multikey = Multikey::new(
            method.id.absolute(self.did().encode()),
            method.controller.encode(),
            method.public_key,
        )
        .with_secret_key(secret_key)?;

        let (unsigned, target_document) =
            UnsignedUpdate::construct(self, source_version_id, patch, canonicalization)?;
        let update = unsigned.invoke(self.did(), multikey, canonicalization)?;
        debug!(target_version_id = update.target_version_id().get(), "signed update");

        Ok(DidUpdate {
            update,
            target_document,
            beacons: self.beacons.clone(),
            canonicalization,
        })
    }

    /// Sign an update that marks this document deactivated.
    pub fn deactivate(
        &self,
        source_version_id: NonZeroU64,
        verification_method_id: &str,
        secret_key: SecretKey,
        canonicalization: Canonicalization,
    ) -> Result<DidUpdate, Btc1Error> {
        let patch = serde_json::from_value(json!([
            {"op": "add", "path": "/deactivated", "value": true},
        ]))
        .map_err(|err| Btc1Error::InvalidDidUpdate(err.to_string()))?;

        self.update(
            source_version_id,
            patch,
            verification_method_id,
            secret_key,
            canonicalization,
        )
    }

    /// Verify and apply a published update to this document. `block_time` is the time of the
    /// block that announced the update; proof expiry is checked against it.
    pub(crate) fn apply_update(
        &self,
        update: &Update,
        block_time: DateTime<Utc>,
        canonicalization: Canonicalization,
    ) -> Result<Self, Btc1Error> {
        if self.is_deactivated() {
            return Err(Btc1Error::InvalidDidUpdate(format!(
                "`{}` is deactivated",
                self.did()
            )));
        }

        let proof = update
            .proof()
            .ok_or_else(|| Btc1Error::InvalidUpdateProof("Update has no proof".into()))?;
        let method_id = &proof.options.verification_method;
        let method = self.verification_method(method_id).ok_or_else(|| {
            Btc1Error::InvalidUpdateProof(format!("Unknown verification method `{method_id}`"))
        })?;
        if !self.authorizes_invocation(method_id) {
            return Err(Btc1Error::InvalidUpdateProof(format!(
                "`{method_id}` is not a capabilityInvocation method"
            )));
        }
        zcap::check_invocation(&proof.options, self.did())
            .map_err(|err| Btc1Error::InvalidUpdateProof(err.to_string()))?;

        let multikey = Multikey::new(
            method_id.clone(),
            method.controller.encode(),
            method.public_key,
        );
        let expectations = ProofExpectations::default()
            .with_purpose(ProofPurpose::CapabilityInvocation)
            .at(block_time);
        let result = Cryptosuite::new(proof.options.cryptosuite, multikey)
            .data_integrity_verify_proof(update.as_ref(), &expectations)
            .map_err(|err| Btc1Error::InvalidUpdateProof(err.to_string()))?;
        if !result.verified {
            return Err(Btc1Error::InvalidUpdateProof(format!(
                "Signature by `{method_id}` does not verify"
            )));
        }

        let mut json = self.data.clone();
        json_patch::patch(&mut json, &update.patch().0)
            .map_err(|err| Btc1Error::InvalidDidUpdate(err.to_string()))?;
        let target = Self::from_json_value(json)
            .map_err(|err| Btc1Error::InvalidDidDocument(err.to_string()))?;
        if target.did() != self.did() {
            return Err(Btc1Error::InvalidDidUpdate(
                "An update cannot change the document id".into(),
            ));
        }

        let target_hash = target
            .canonical_hash(canonicalization)
            .map_err(|err| Btc1Error::InvalidDidUpdate(err.to_string()))?;
        if target_hash != update.target_hash() {
            return Err(Btc1Error::InvalidDidUpdate(format!(
                "Patched document hash `{target_hash}` does not match targetHash `{}`",
                update.target_hash()
            )));
        }

        Ok(target)
    }
}

impl AsRef<Value> for Document {
    fn as_ref(&self) -> &Value {
        &self.data
    }
}

impl CanonicalHash for Document {}

/// A signed update, ready to be announced.
#[derive(Debug, Clone, PartialEq)]
pub struct DidUpdate {
    pub update: Update,
    pub target_document: Document,

    /// Beacons of the source document
    pub beacons: Vec<Beacon>,

    canonicalization: Canonicalization,
}

impl DidUpdate {
    /// Build the signal transaction for one of the source document's beacons.
    ///
    /// The returned signal metadata must be kept as sidecar data; resolvers cannot find the
    /// update without it.
    pub fn announce(
        &self,
        beacon_id: &str,
        funding: &Funding,
        fee: Amount,
        secret_key: &SecretKey,
    ) -> Result<BeaconSignal, Btc1Error> {
        let base = self.target_document.did().encode();
        let beacon_id = absolute_id(beacon_id, base);
        let beacon = self
            .beacons
            .iter()
            .find(|beacon| absolute_id(beacon.id(), base) == beacon_id)
            .ok_or_else(|| Btc1Error::InvalidDidUpdate(format!("Unknown beacon `{beacon_id}`")))?;

        beacon
            .broadcast_signal(&self.update, funding, fee, secret_key, self.canonicalization)
            .map_err(|err| Btc1Error::InvalidDidUpdate(err.to_string()))
    }
}

/// The document a DID starts from, version 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InitialDocument {
    did: Did,
    document: Document,
}

impl InitialDocument {
    /// Derive the initial document of a key identifier.
    pub fn deterministic(did: &Did) -> Result<Self, Error> {
        let public_key = did.public_key().ok_or_else(|| {
            Btc1Error::InvalidDid(format!("`{did}` is not a key identifier"))
        })?;
        let method_id = format!("{did}{INITIAL_KEY_FRAGMENT}");
        let method = VerificationMethod::new(method_id.parse()?, did.clone(), public_key);
        let method_ids = json!([method_id]);

        let network = did.bitcoin_network();
        let services = AddressKind::ALL
            .into_iter()
            .map(|kind| {
                let address = kind.address(&public_key, network);
                let id = format!("{did}#{}", kind.service_fragment());

                Beacon::new(id, Type::Singleton, address)
                    .to_service()
                    .map(|service| service.to_json())
            })
            .collect::<Result<Vec<_>, _>>()
            .map_err(json_tools::Error::from)?;

        let document = Document::from_json_value(json!({
            "id": did.encode(),
            "@context": [DID_CORE_V1_1_CONTEXT, DID_BTC1_CONTEXT],
            "controller": [did.encode()],
            "verificationMethod": [method.to_json()],
            "authentication": method_ids,
            "assertionMethod": method_ids,
            "capabilityInvocation": method_ids,
            "capabilityDelegation": method_ids,
            "service": services,
        }))?;

        Ok(Self {
            did: did.clone(),
            document,
        })
    }

    /// Create a DID from an intermediate document prepared with [`DID_PLACEHOLDER`].
    ///
    /// The caller may publish the intermediate document's canonical bytes to content
    /// addressable storage.
    pub fn from_external_intermediate(
        intermediate: IntermediateDocument,
        version: Option<DidVersion>,
        network: Option<Network>,
        canonicalization: Canonicalization,
    ) -> Result<(Did, Self), Error> {
        let genesis_hash = intermediate.compute_hash(canonicalization)?;
        let components = DidComponents::new(
            version.unwrap_or_default(),
            network.unwrap_or_default(),
            IdType::from(genesis_hash),
        )?;
        let did = Did::new(components)?;
        let initial_document = intermediate.into_initial(&did)?;

        Ok((did, initial_document))
    }

    /// Validate an initial document supplied as sidecar data.
    pub(crate) fn from_sidecar(
        did: &Did,
        value: &Value,
        canonicalization: Canonicalization,
    ) -> Result<Self, Btc1Error> {
        let document = Document::from_json_value(value.clone())
            .map_err(|err| Btc1Error::InvalidDidDocument(err.to_string()))?;
        if document.did() != did {
            return Err(Btc1Error::InvalidDidDocument(format!(
                "Initial document id `{}` is not `{did}`",
                document.did()
            )));
        }

        let mut intermediate = value.clone();
        json_tools::find_and_replace(&mut intermediate, did.encode(), DID_PLACEHOLDER);
        let hash = canonicalization
            .canonical_hash(&intermediate)
            .map_err(|err| Btc1Error::InvalidDidDocument(err.to_string()))?;
        check_genesis_hash(did, hash)?;

        Ok(Self {
            did: did.clone(),
            document,
        })
    }

    /// Build the initial document from intermediate document bytes fetched from content
    /// addressable storage.
    pub(crate) fn from_content(
        did: &Did,
        content: &[u8],
        canonicalization: Canonicalization,
    ) -> Result<Self, Btc1Error> {
        let intermediate = serde_json::from_slice(content)
            .map_err(Error::from)
            .and_then(IntermediateDocument::from_json_value)
            .map_err(|err| Btc1Error::InvalidDidDocument(err.to_string()))?;
        let hash = intermediate
            .compute_hash(canonicalization)
            .map_err(|err| Btc1Error::InvalidDidDocument(err.to_string()))?;
        check_genesis_hash(did, hash)?;

        intermediate
            .into_initial(did)
            .map_err(|err| Btc1Error::InvalidDidDocument(err.to_string()))
    }

    pub fn did(&self) -> &Did {
        &self.did
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn into_document(self) -> Document {
        self.document
    }
}

fn check_genesis_hash(did: &Did, hash: Sha256Hash) -> Result<(), Btc1Error> {
    match did.components().id_type() {
        IdType::External(genesis) if genesis == hash.0 => Ok(()),
        IdType::External(genesis) => Err(Btc1Error::InvalidDid(format!(
            "Initial document hash `{hash}` does not match `{}`",
            hex::encode(genesis)
        ))),
        IdType::Key(_) => Err(Btc1Error::InvalidDid(format!(
            "`{did}` is not an external identifier"
        ))),
    }
}

/// A DID document whose DID is still [`DID_PLACEHOLDER`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntermediateDocument {
    json_data: Value,
}

impl IntermediateDocument {
    /// Load an intermediate document from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let content = fs::read_to_string(path)?;
        Self::from_json_string(&content)
    }

    /// Create an intermediate document from a JSON string
    pub fn from_json_string(json: &str) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(json)?;
        Self::from_json_value(value)
    }

    /// Create an intermediate document from a JSON Value
    pub fn from_json_value(value: Value) -> Result<Self, Error> {
        let fields = DocumentFields::<String>::try_from(&value)?;
        if fields.id != DID_PLACEHOLDER {
            return Err(Btc1Error::InvalidDidDocument(format!(
                "Intermediate document id must be `{DID_PLACEHOLDER}`"
            ))
            .into());
        }

        Ok(Self { json_data: value })
    }

    pub fn compute_hash(&self, canonicalization: Canonicalization) -> Result<Sha256Hash, Error> {
        canonicalization
            .canonical_hash(&self.json_data)
            .map_err(|err| Btc1Error::InvalidDidDocument(err.to_string()).into())
    }

    fn into_initial(self, did: &Did) -> Result<InitialDocument, Error> {
        let mut json_data = self.json_data;
        json_tools::find_and_replace(&mut json_data, DID_PLACEHOLDER, did.encode());

        Ok(InitialDocument {
            did: did.clone(),
            document: Document::from_json_value(json_data)?,
        })
    }
}

impl AsRef<Value> for IntermediateDocument {
    fn as_ref(&self) -> &Value {
        &self.json_data
    }
}
