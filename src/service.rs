use onlyerror::Error;
use serde_json::{Value, json};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// Missing or empty 'id' attribute
    MissingIdAttribute,

    /// Missing or empty 'type' attribute
    MissingTypeAttribute,

    /// Missing or empty 'serviceEndpoint' attribute
    MissingServiceEndpointAttribute,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Service {
    id: String,
    ty: Vec<String>,
    endpoint: Vec<String>,
}

impl Service {
    pub fn new<T, E>(id: impl Into<String>, ty: T, endpoint: E) -> Result<Self, Error>
    where
        T: IntoIterator,
        T::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::MissingIdAttribute);
        }

        let ty: Vec<_> = ty.into_iter().map(|s| s.as_ref().to_string()).collect();
        if ty.is_empty() {
            return Err(Error::MissingTypeAttribute);
        }

        let endpoint: Vec<_> = endpoint
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        if endpoint.is_empty() {
            return Err(Error::MissingServiceEndpointAttribute);
        }

        Ok(Self { id, ty, endpoint })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn types(&self) -> &[String] {
        &self.ty
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoint
    }

    /// Single values are written as plain strings.
    pub fn to_json(&self) -> Value {
        fn one_or_many(values: &[String]) -> Value {
            match values {
                [one] => json!(one),
                many => json!(many),
            }
        }

        json!({
            "id": self.id,
            "type": one_or_many(&self.ty),
            "serviceEndpoint": one_or_many(&self.endpoint),
        })
    }
}
