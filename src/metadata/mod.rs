/// Federation trust metadata model
///
/// Descriptors bind an entity identifier to its roles, keys, endpoints and
/// validity bounds. Origins deliver them as JSON documents which decode into
/// [`MetadataDocument`].

pub mod validity;

pub use validity::{EarliestExpiration, ValidityExtractor};

use crate::error::{ResolverError, ResolverResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Declared validity bounds of a metadata element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Validity {
    /// Absolute instant after which the element must not be used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
    /// Maximum time, in seconds, a consumer may cache the element
    #[serde(default, rename = "cacheDuration", skip_serializing_if = "Option::is_none")]
    pub cache_duration_secs: Option<u64>,
}

impl Validity {
    /// Validity with neither bound declared
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Earliest instant implied by this element's bounds, relative to `now`
    pub fn earliest_expiration(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let from_cache_duration = self
            .cache_duration_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds)
            .and_then(|d| now.checked_add_signed(d));

        match (self.valid_until, from_cache_duration) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Intended use of a published key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyUsage {
    Signing,
    Encryption,
    #[default]
    Unspecified,
}

/// Public key published by an entity role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDescriptor {
    #[serde(default)]
    pub usage: KeyUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    /// Encoded public key material (PEM/base64/multibase, origin specific)
    pub public_key: String,
}

/// Protocol endpoint exposed by an entity role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub binding: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_location: Option<String>,
}

/// One role (identity provider, service provider, ...) an entity plays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDescriptor {
    pub role: String,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(flatten)]
    pub validity: Validity,
    #[serde(default)]
    pub keys: Vec<KeyDescriptor>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

impl RoleDescriptor {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            protocols: Vec::new(),
            validity: Validity::default(),
            keys: Vec::new(),
            endpoints: Vec::new(),
        }
    }
}

/// Trust metadata for a single entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDescriptor {
    pub entity_id: String,
    #[serde(flatten)]
    pub validity: Validity,
    #[serde(default)]
    pub roles: Vec<RoleDescriptor>,
}

impl EntityDescriptor {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            validity: Validity::default(),
            roles: Vec::new(),
        }
    }

    /// Set the absolute validity bound
    pub fn with_valid_until(mut self, valid_until: DateTime<Utc>) -> Self {
        self.validity.valid_until = Some(valid_until);
        self
    }

    /// Set the declared cache duration
    pub fn with_cache_duration(mut self, secs: u64) -> Self {
        self.validity.cache_duration_secs = Some(secs);
        self
    }

    pub fn with_role(mut self, role: RoleDescriptor) -> Self {
        self.roles.push(role);
        self
    }

    /// Whether the entity's own declared validity still holds at `now`
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.validity.valid_until.map_or(true, |until| now < until)
    }

    /// Keys usable for signature verification across all roles
    pub fn signing_keys(&self) -> impl Iterator<Item = &KeyDescriptor> {
        self.roles
            .iter()
            .flat_map(|r| r.keys.iter())
            .filter(|k| matches!(k.usage, KeyUsage::Signing | KeyUsage::Unspecified))
    }

    /// Endpoints published by roles of the given kind
    pub fn endpoints_for<'a>(&'a self, role: &'a str) -> impl Iterator<Item = &'a Endpoint> + 'a {
        self.roles
            .iter()
            .filter(move |r| r.role == role)
            .flat_map(|r| r.endpoints.iter())
    }
}

/// Group of entity descriptors published as one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitiesDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub validity: Validity,
    #[serde(default)]
    pub entities: Vec<EntityDescriptor>,
}

/// Root of a fetched metadata document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MetadataDocument {
    Entity(EntityDescriptor),
    Group(EntitiesDescriptor),
}

impl MetadataDocument {
    /// Root element name, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            MetadataDocument::Entity(_) => "EntityDescriptor",
            MetadataDocument::Group(_) => "EntitiesDescriptor",
        }
    }
}

impl From<EntityDescriptor> for MetadataDocument {
    fn from(descriptor: EntityDescriptor) -> Self {
        MetadataDocument::Entity(descriptor)
    }
}

/// Resolution criteria
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Criteria {
    pub entity_id: Option<String>,
}

impl Criteria {
    /// Criteria selecting a single entity
    pub fn entity_id(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: Some(entity_id.into()),
        }
    }

    /// Criteria with nothing supplied
    pub fn empty() -> Self {
        Self::default()
    }

    /// Trimmed entity ID, or `InvalidCriteria` when absent or blank
    pub fn require_entity_id(&self) -> ResolverResult<String> {
        self.entity_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ResolverError::InvalidCriteria("Entity ID was not supplied in criteria".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_entity_document_deserialization() {
        let json = r#"{
            "type": "entity",
            "entityId": "https://idp.example.org/idp",
            "validUntil": "2030-01-01T00:00:00Z",
            "cacheDuration": 3600,
            "roles": [{
                "role": "idp",
                "protocols": ["urn:oasis:names:tc:SAML:2.0:protocol"],
                "keys": [{"usage": "signing", "publicKey": "MIIC..."}],
                "endpoints": [{
                    "binding": "urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect",
                    "location": "https://idp.example.org/sso"
                }]
            }]
        }"#;

        let doc: MetadataDocument = serde_json::from_str(json).unwrap();
        let MetadataDocument::Entity(entity) = doc else {
            panic!("expected an entity document");
        };

        assert_eq!(entity.entity_id, "https://idp.example.org/idp");
        assert_eq!(entity.validity.cache_duration_secs, Some(3600));
        assert_eq!(
            entity.validity.valid_until,
            Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(entity.signing_keys().count(), 1);
        assert_eq!(entity.endpoints_for("idp").count(), 1);
        assert_eq!(entity.endpoints_for("sp").count(), 0);
    }

    #[test]
    fn test_group_document_deserialization() {
        let json = r#"{
            "type": "group",
            "name": "urn:example:federation",
            "entities": [{"entityId": "a"}, {"entityId": "b"}]
        }"#;

        let doc: MetadataDocument = serde_json::from_str(json).unwrap();
        assert_eq!(doc.kind(), "EntitiesDescriptor");
        match doc {
            MetadataDocument::Group(group) => assert_eq!(group.entities.len(), 2),
            MetadataDocument::Entity(_) => panic!("expected a group document"),
        }
    }

    #[test]
    fn test_validity_earliest_expiration() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(Validity::unbounded().earliest_expiration(now), None);

        let both = Validity {
            valid_until: Some(now + Duration::hours(2)),
            cache_duration_secs: Some(1800),
        };
        assert_eq!(both.earliest_expiration(now), Some(now + Duration::minutes(30)));

        let until_only = Validity {
            valid_until: Some(now + Duration::hours(2)),
            cache_duration_secs: None,
        };
        assert_eq!(until_only.earliest_expiration(now), Some(now + Duration::hours(2)));
    }

    #[test]
    fn test_criteria_trims_entity_id() {
        let criteria = Criteria::entity_id("  https://sp.example.org  ");
        assert_eq!(criteria.require_entity_id().unwrap(), "https://sp.example.org");
    }

    #[test]
    fn test_criteria_rejects_blank() {
        assert!(matches!(
            Criteria::empty().require_entity_id(),
            Err(ResolverError::InvalidCriteria(_))
        ));
        assert!(matches!(
            Criteria::entity_id("   ").require_entity_id(),
            Err(ResolverError::InvalidCriteria(_))
        ));
    }

    #[test]
    fn test_entity_validity_check() {
        let now = Utc::now();
        let entity = EntityDescriptor::new("x").with_valid_until(now + Duration::minutes(1));
        assert!(entity.is_valid_at(now));
        assert!(!entity.is_valid_at(now + Duration::minutes(2)));
        assert!(EntityDescriptor::new("y").is_valid_at(now));
    }
}
