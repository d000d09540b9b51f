//! Typed entity model.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::short_hash;

/// Type-specific attributes of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "properties")]
pub enum EntityKind {
    Person {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        organization: Option<String>,
    },
    Organization {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        org_type: Option<String>,
    },
    Country {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    Topic {},
}

impl EntityKind {
    pub fn person() -> Self {
        EntityKind::Person {
            role: None,
            organization: None,
        }
    }

    pub fn topic() -> Self {
        EntityKind::Topic {}
    }

    /// Graph label of the kind.
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Person { .. } => "Person",
            EntityKind::Organization { .. } => "Organization",
            EntityKind::Country { .. } => "Country",
            EntityKind::Topic {} => "Topic",
        }
    }

    /// Build a kind from a provider's loose `type` string and property bag.
    /// Unknown types become `Topic`.
    pub fn from_loose(kind: &str, properties: &Value) -> Self {
        let prop = |key: &str| {
            properties
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        match kind.trim().to_lowercase().as_str() {
            "person" | "people" | "participant" => EntityKind::Person {
                role: prop("role"),
                organization: prop("organization").or_else(|| prop("org")),
            },
            "organization" | "organisation" | "org" | "company" => EntityKind::Organization {
                org_type: prop("type")
                    .or_else(|| prop("org_type"))
                    .or_else(|| prop("orgType")),
            },
            "country" | "nation" => EntityKind::Country {
                status: prop("status"),
            },
            _ => EntityKind::topic(),
        }
    }

    /// Fill attributes this kind lacks from another sighting of the same kind.
    pub fn merge_missing(&mut self, other: &EntityKind) {
        match (self, other) {
            (
                EntityKind::Person { role, organization },
                EntityKind::Person {
                    role: other_role,
                    organization: other_org,
                },
            ) => {
                if role.is_none() {
                    role.clone_from(other_role);
                }
                if organization.is_none() {
                    organization.clone_from(other_org);
                }
            }
            (
                EntityKind::Organization { org_type },
                EntityKind::Organization {
                    org_type: other_type,
                },
            ) => {
                if org_type.is_none() {
                    org_type.clone_from(other_type);
                }
            }
            (EntityKind::Country { status }, EntityKind::Country { status: other_status }) => {
                if status.is_none() {
                    status.clone_from(other_status);
                }
            }
            _ => {}
        }
    }

    /// Attributes as a JSON object (`{}` for topics).
    pub fn properties(&self) -> Value {
        serde_json::to_value(self)
            .ok()
            .and_then(|v| v.get("properties").cloned())
            .unwrap_or_else(|| Value::Object(Default::default()))
    }
}

/// A canonical entity as stored in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub kind: EntityKind,
}

/// An entity as reported by a provider, before deduplication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityCandidate {
    pub name: String,
    pub kind: EntityKind,
}

impl EntityCandidate {
    pub fn new(name: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn canonical(&self) -> String {
        canonical_name(&self.name)
    }

    pub fn id(&self) -> String {
        entity_id(&self.name)
    }
}

/// Lower-cased, trimmed name with inner whitespace collapsed.
pub fn canonical_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Deterministic entity id for a surface name.
pub fn entity_id(name: &str) -> String {
    format!("ent_{}", short_hash(&canonical_name(name)))
}
