//! Wire shapes for the `persons` and relationship-resolution
//! endpoints, per SPEC_FULL.md §4.10. These are this crate's own
//! decision (the original implementation was filtered out of the
//! retrieval pack), documented once here rather than re-derived ad
//! hoc in C5/C6.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct PersonsResponse {
    #[serde(default)]
    pub persons: Vec<PersonRecord>,
    #[serde(default)]
    pub relationships: Vec<RelationshipRecord>,
}

#[derive(Debug, Deserialize)]
pub struct PersonRecord {
    pub id: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub display: Option<PersonDisplay>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PersonDisplay {
    #[serde(default, rename = "givenName")]
    pub given_name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub lifespan: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RelationshipRecord {
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub rel_type: Option<String>,
    #[serde(default)]
    pub person1: Option<String>,
    #[serde(default)]
    pub person2: Option<String>,
    #[serde(default, rename = "person1Role")]
    pub person1_role: Option<String>,
    #[serde(default, rename = "person2Role")]
    pub person2_role: Option<String>,
    /// If the payload already carries a typed fact (spec.md §4.5.2),
    /// use it instead of defaulting to `UnspecifiedParentType`.
    #[serde(default)]
    pub fact_type: Option<String>,
}

impl RelationshipRecord {
    /// Whether this record describes a parent -> child relationship
    /// the person processor should turn into edges.
    pub fn is_parent_child(&self) -> bool {
        self.rel_type.as_deref() == Some("ParentChild")
    }
}

#[derive(Debug, Deserialize)]
pub struct ResolutionResponse {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub resolved_type: Option<String>,
}
