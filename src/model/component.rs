use crate::model::{generate_internal_id, BranchPath, ConceptId, Timepoint};
use crate::store::search::Clause;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Version envelope shared by every document written through the commit
/// protocol. Versions are append-only: a same-branch replacement stamps the
/// old document's `end`, a cross-branch replacement records the old version
/// key in the superseding timeslice's `versions_replaced`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocVersion {
    #[serde(rename = "_id")]
    pub internal_id: String,
    pub path: BranchPath,
    pub start: Timepoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Timepoint>,
}

impl DocVersion {
    pub fn new(path: BranchPath, start: Timepoint) -> Self {
        Self {
            internal_id: generate_internal_id(),
            path,
            start,
            end: None,
        }
    }
}

/// A document type that lives under branch version control.
pub trait VersionedComponent: Serialize + DeserializeOwned + Clone + Send + Sync {
    const COLLECTION: &'static str;

    fn version(&self) -> &DocVersion;

    fn version_mut(&mut self) -> &mut DocVersion;

    /// Clauses identifying the logical component (not the version) so that a
    /// write can locate the versions it supersedes.
    fn identity_clauses(&self) -> Vec<Clause>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptDoc {
    #[serde(flatten)]
    pub version: DocVersion,
    pub concept_id: ConceptId,
    pub active: bool,
}

impl ConceptDoc {
    pub fn new(concept_id: ConceptId, active: bool, path: BranchPath, start: Timepoint) -> Self {
        Self {
            version: DocVersion::new(path, start),
            concept_id,
            active,
        }
    }
}

impl VersionedComponent for ConceptDoc {
    const COLLECTION: &'static str = "concepts";

    fn version(&self) -> &DocVersion {
        &self.version
    }

    fn version_mut(&mut self) -> &mut DocVersion {
        &mut self.version
    }

    fn identity_clauses(&self) -> Vec<Clause> {
        vec![Clause::term("concept_id", json!(self.concept_id))]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionDoc {
    #[serde(flatten)]
    pub version: DocVersion,
    pub description_id: ConceptId,
    pub concept_id: ConceptId,
    pub term: String,
    pub active: bool,
}

impl DescriptionDoc {
    pub fn new(
        description_id: ConceptId,
        concept_id: ConceptId,
        term: &str,
        path: BranchPath,
        start: Timepoint,
    ) -> Self {
        Self {
            version: DocVersion::new(path, start),
            description_id,
            concept_id,
            term: term.to_string(),
            active: true,
        }
    }
}

impl VersionedComponent for DescriptionDoc {
    const COLLECTION: &'static str = "descriptions";

    fn version(&self) -> &DocVersion {
        &self.version
    }

    fn version_mut(&mut self) -> &mut DocVersion {
        &mut self.version
    }

    fn identity_clauses(&self) -> Vec<Clause> {
        vec![Clause::term("description_id", json!(self.description_id))]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDoc {
    #[serde(flatten)]
    pub version: DocVersion,
    pub relationship_id: ConceptId,
    pub source_id: ConceptId,
    pub type_id: ConceptId,
    pub destination_id: ConceptId,
    pub group: i32,
    pub active: bool,
}

impl RelationshipDoc {
    pub fn new(
        relationship_id: ConceptId,
        source_id: ConceptId,
        type_id: ConceptId,
        destination_id: ConceptId,
        group: i32,
        path: BranchPath,
        start: Timepoint,
    ) -> Self {
        Self {
            version: DocVersion::new(path, start),
            relationship_id,
            source_id,
            type_id,
            destination_id,
            group,
            active: true,
        }
    }
}

impl VersionedComponent for RelationshipDoc {
    const COLLECTION: &'static str = "relationships";

    fn version(&self) -> &DocVersion {
        &self.version
    }

    fn version_mut(&mut self) -> &mut DocVersion {
        &mut self.version
    }

    fn identity_clauses(&self) -> Vec<Clause> {
        vec![Clause::term("relationship_id", json!(self.relationship_id))]
    }
}
