use crate::model::{BranchPath, ConceptId, DocVersion, Form, Timepoint, VersionedComponent};
use crate::store::search::Clause;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// Pseudo attribute type holding the union of all attribute values, so that
/// wildcard-type predicates compile to a single index field.
pub const ATTR_TYPE_WILDCARD: &str = "all";

/// An attribute value: a concept id or a concrete literal.
///
/// Indexed and persisted in a canonical string form: concept ids as bare
/// digits, numbers with a `#` prefix, strings quoted.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Concept(ConceptId),
    Number(f64),
    Text(String),
}

impl AttributeValue {
    pub fn canonical(&self) -> String {
        match self {
            AttributeValue::Concept(id) => id.to_string(),
            AttributeValue::Number(n) => format!("#{}", n),
            AttributeValue::Text(s) => format!("\"{}\"", s),
        }
    }

    pub fn parse(raw: &str) -> AttributeValue {
        if let Some(number) = raw.strip_prefix('#') {
            if let Ok(n) = number.parse::<f64>() {
                return AttributeValue::Number(n);
            }
        }
        if raw.len() >= 2 && raw.starts_with('"') && raw.ends_with('"') {
            return AttributeValue::Text(raw[1..raw.len() - 1].to_string());
        }
        if let Ok(id) = raw.parse::<ConceptId>() {
            return AttributeValue::Concept(id);
        }
        AttributeValue::Text(raw.to_string())
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl Serialize for AttributeValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical())
    }
}

impl<'de> Deserialize<'de> for AttributeValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor;

        impl de::Visitor<'_> for Visitor {
            type Value = AttributeValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an attribute value in canonical string form")
            }

            fn visit_str<E: de::Error>(self, raw: &str) -> Result<AttributeValue, E> {
                Ok(AttributeValue::parse(raw))
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

/// Attribute occurrences of one concept, keyed by relationship group then
/// attribute type.
pub type GroupedAttributes = BTreeMap<i32, HashMap<String, Vec<AttributeValue>>>;

/// Per-concept semantic-index document, one per logic form: materialized
/// parents, ancestor closure and attribute map. Consumed read-only by the
/// query engine; rebuilt externally after edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConcept {
    #[serde(flatten)]
    pub version: DocVersion,
    pub concept_id: ConceptId,
    pub stated: bool,
    pub parents: BTreeSet<ConceptId>,
    pub ancestors: BTreeSet<ConceptId>,
    pub grouped_attributes: GroupedAttributes,
    /// Flattened attribute values per type id, plus the `all` pseudo-type,
    /// in canonical string form. This is the push-down target.
    pub attr: HashMap<String, BTreeSet<String>>,
}

impl QueryConcept {
    pub fn new(
        concept_id: ConceptId,
        form: Form,
        parents: BTreeSet<ConceptId>,
        ancestors: BTreeSet<ConceptId>,
        grouped_attributes: GroupedAttributes,
        path: BranchPath,
        start: Timepoint,
    ) -> Self {
        let attr = Self::flatten_attributes(&grouped_attributes);
        Self {
            version: DocVersion::new(path, start),
            concept_id,
            stated: form.is_stated(),
            parents,
            ancestors,
            grouped_attributes,
            attr,
        }
    }

    fn flatten_attributes(grouped: &GroupedAttributes) -> HashMap<String, BTreeSet<String>> {
        let mut attr: HashMap<String, BTreeSet<String>> = HashMap::new();
        for attributes in grouped.values() {
            for (type_id, values) in attributes {
                for value in values {
                    let canonical = value.canonical();
                    attr.entry(type_id.clone())
                        .or_default()
                        .insert(canonical.clone());
                    attr.entry(ATTR_TYPE_WILDCARD.to_string())
                        .or_default()
                        .insert(canonical);
                }
            }
        }
        attr
    }
}

impl VersionedComponent for QueryConcept {
    const COLLECTION: &'static str = "query_concepts";

    fn version(&self) -> &DocVersion {
        &self.version
    }

    fn version_mut(&mut self) -> &mut DocVersion {
        &mut self.version
    }

    fn identity_clauses(&self) -> Vec<Clause> {
        vec![
            Clause::term("concept_id", json!(self.concept_id)),
            Clause::term("stated", json!(self.stated)),
        ]
    }
}

/// Per-concept, per-evaluation view over one grouped-attribute map, used only
/// during residual matching after push-down retrieval. Never persisted.
pub struct MatchContext<'a> {
    grouped_attributes: &'a GroupedAttributes,
}

impl<'a> MatchContext<'a> {
    pub fn new(grouped_attributes: &'a GroupedAttributes) -> Self {
        Self { grouped_attributes }
    }

    pub fn groups(&self) -> impl Iterator<Item = (&i32, &HashMap<String, Vec<AttributeValue>>)> {
        self.grouped_attributes.iter()
    }

    pub fn group_count(&self) -> usize {
        self.grouped_attributes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_forms_round_trip() {
        for value in [
            AttributeValue::Concept(387_517_004),
            AttributeValue::Number(5.5),
            AttributeValue::Text("mg".to_string()),
        ] {
            assert_eq!(AttributeValue::parse(&value.canonical()), value);
        }
    }

    #[test]
    fn flatten_includes_wildcard_pseudo_type() {
        let mut grouped: GroupedAttributes = BTreeMap::new();
        grouped.entry(1).or_default().insert(
            "127489000".to_string(),
            vec![AttributeValue::Concept(372_687_004)],
        );
        grouped
            .entry(2)
            .or_default()
            .insert("1142135004".to_string(), vec![AttributeValue::Number(250.0)]);

        let attr = QueryConcept::flatten_attributes(&grouped);
        assert!(attr["127489000"].contains("372687004"));
        assert!(attr["1142135004"].contains("#250"));
        assert!(attr[ATTR_TYPE_WILDCARD].contains("372687004"));
        assert!(attr[ATTR_TYPE_WILDCARD].contains("#250"));
    }
}
