//! Lead payloads submitted to the generation pipeline.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identifier for one lead. Caller-supplied and unique per run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeadId(pub String);

impl std::fmt::Display for LeadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LeadId {
    fn from(id: &str) -> Self {
        LeadId(id.to_string())
    }
}

impl From<String> for LeadId {
    fn from(id: String) -> Self {
        LeadId(id)
    }
}

impl std::ops::Deref for LeadId {
    type Target = str;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// One unit of work: a person/record to generate an email for.
///
/// Beyond the identifier and display name, fields travel opaquely to the
/// remote generator; the pipeline never interprets them. Immutable once
/// submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub lead_id: LeadId,
    pub name: String,
    /// Arbitrary fields required by the remote call (title, company,
    /// product context text, ...), flattened into the request body.
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Lead {
    pub fn new(lead_id: impl Into<LeadId>, name: impl Into<String>) -> Self {
        Self {
            lead_id: lead_id.into(),
            name: name.into(),
            fields: serde_json::Map::new(),
        }
    }

    /// Attach an extra field for the remote generator.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// JSON body for the remote generation call.
    pub fn to_request_body(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_flattens_fields() {
        let lead = Lead::new("lead-1", "Ada Lovelace")
            .with_field("company", "Analytical Engines Ltd")
            .with_field("product_context", "industrial computation");

        let body = lead.to_request_body().unwrap();
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["lead_id"], "lead-1");
        assert_eq!(value["name"], "Ada Lovelace");
        assert_eq!(value["company"], "Analytical Engines Ltd");
        assert_eq!(value["product_context"], "industrial computation");
    }
}
