//! TB-003: Schema atoms (entity classes, composite types and tables).
//!
//! Atoms serialize without their name; the namespace documents key them by
//! name instead.

use super::feature::{validate_prefixes, Feature};
use super::identifier::Identifier;
use crate::error::{Error, Result};
use convert_case::{Case, Casing};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const INDEX_SUFFIX: &str = "Index";
pub const FEATURES_SUFFIX: &str = "Features";

/// Conceptual subject of record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityClass {
    #[serde(skip)]
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<Feature>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<Feature>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<Identifier>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EntityClass {
    pub fn validate(&self) -> Result<()> {
        validate_prefixes(&self.name, self.identifiers.iter().chain(&self.properties))
    }

    pub fn map_ids(&self, f: impl Fn(&Identifier) -> Identifier) -> Self {
        Self {
            identifiers: self.identifiers.iter().map(|x| x.map_target(&f)).collect(),
            properties: self.properties.iter().map(|x| x.map_target(&f)).collect(),
            parents: self.parents.iter().map(&f).collect(),
            ..self.clone()
        }
    }
}

/// Reusable nested feature group without identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeType {
    #[serde(skip)]
    pub name: String,

    #[serde(default)]
    pub features: Vec<Feature>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CompositeType {
    pub fn validate(&self) -> Result<()> {
        validate_prefixes(&self.name, &self.features)
    }

    pub fn map_ids(&self, f: impl Fn(&Identifier) -> Identifier) -> Self {
        Self {
            features: self.features.iter().map(|x| x.map_target(&f)).collect(),
            ..self.clone()
        }
    }
}

/// Storage-facing atom. Without an index it is an append-only fact table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    #[serde(skip)]
    pub name: String,

    #[serde(default)]
    pub features: Vec<Feature>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<Vec<Feature>>,

    /// Entity class the rows record facts about.
    pub subject_of_records: Identifier,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitioning_cols: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_partition_size: Option<u64>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub entity_key_table_map: IndexMap<String, Identifier>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Table {
    pub fn new(name: impl Into<String>, subject_of_records: Identifier) -> Self {
        Self {
            name: name.into(),
            features: Vec::new(),
            index: None,
            subject_of_records,
            partitioning_cols: None,
            max_partition_size: None,
            entity_key_table_map: IndexMap::new(),
            description: None,
        }
    }

    pub fn is_keyed(&self) -> bool {
        self.index.is_some()
    }

    /// Index features followed by value features.
    pub fn all_features(&self) -> impl Iterator<Item = &Feature> {
        self.index.iter().flatten().chain(&self.features)
    }

    pub fn index_class_name(&self) -> String {
        index_class_name(&self.name)
    }

    pub fn features_class_name(&self) -> String {
        features_class_name(&self.name)
    }

    pub fn validate(&self) -> Result<()> {
        validate_prefixes(&self.name, self.all_features())?;
        if let Some(ref cols) = self.partitioning_cols {
            let known: HashSet<&str> = self.all_features().map(Feature::prefix).collect();
            for col in cols {
                if !known.contains(col.as_str()) {
                    return Err(Error::setup(format!(
                        "table '{}' partitions on unknown column '{}'",
                        self.name, col
                    )));
                }
            }
        }
        if self.max_partition_size == Some(0) {
            return Err(Error::setup(format!(
                "table '{}' has max_partition_size 0",
                self.name
            )));
        }
        Ok(())
    }

    pub fn map_ids(&self, f: impl Fn(&Identifier) -> Identifier) -> Self {
        Self {
            features: self.features.iter().map(|x| x.map_target(&f)).collect(),
            index: self
                .index
                .as_ref()
                .map(|ix| ix.iter().map(|x| x.map_target(&f)).collect()),
            subject_of_records: f(&self.subject_of_records),
            entity_key_table_map: self
                .entity_key_table_map
                .iter()
                .map(|(k, v)| (k.clone(), f(v)))
                .collect(),
            ..self.clone()
        }
    }
}

/// `dog_walk` -> `DogWalkIndex`
pub fn index_class_name(table_name: &str) -> String {
    format!("{}{}", table_name.to_case(Case::Pascal), INDEX_SUFFIX)
}

/// `dog_walk` -> `DogWalkFeatures`
pub fn features_class_name(table_name: &str) -> String {
    format!("{}{}", table_name.to_case(Case::Pascal), FEATURES_SUFFIX)
}

/// Depth-first, left-to-right ancestor chain with duplicates removed.
pub fn ancestor_chain<F>(direct: &[Identifier], parents_of: F) -> Vec<Identifier>
where
    F: Fn(&Identifier) -> Vec<Identifier>,
{
    fn walk<F: Fn(&Identifier) -> Vec<Identifier>>(
        id: &Identifier,
        parents_of: &F,
        seen: &mut HashSet<Identifier>,
        out: &mut Vec<Identifier>,
    ) {
        if !seen.insert(id.clone()) {
            return;
        }
        out.push(id.clone());
        for parent in parents_of(id) {
            walk(&parent, parents_of, seen, out);
        }
    }

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for id in direct {
        walk(id, &parents_of, &mut seen, &mut out);
    }
    out
}

/// Drop every ancestor already implied by another entry of `chain`.
///
/// For `Z(B, X)` with `B(A)` the chain `[B, A, X]` simplifies to `[B, X]`.
pub fn simplify_parents<F>(chain: &[Identifier], parents_of: F) -> Vec<Identifier>
where
    F: Fn(&Identifier) -> Vec<Identifier>,
{
    let mut implied: HashSet<Identifier> = HashSet::new();
    for id in chain {
        let direct = parents_of(id);
        implied.extend(ancestor_chain(&direct, &parents_of));
    }
    let mut kept: Vec<Identifier> = Vec::new();
    for id in chain {
        if !implied.contains(id) && !kept.contains(id) {
            kept.push(id.clone());
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::feature::PrimitiveKind;
    use std::collections::HashMap;

    fn id(name: &str) -> Identifier {
        Identifier::in_namespace("core", name)
    }

    fn hierarchy() -> HashMap<Identifier, Vec<Identifier>> {
        HashMap::from([
            (id("Z"), vec![id("B"), id("X")]),
            (id("B"), vec![id("A")]),
            (id("A"), vec![]),
            (id("X"), vec![]),
        ])
    }

    #[test]
    fn test_tb003_mro_simplification() {
        let h = hierarchy();
        let parents_of = |i: &Identifier| h.get(i).cloned().unwrap_or_default();
        let chain = ancestor_chain(&[id("B"), id("X")], parents_of);
        assert_eq!(chain, vec![id("B"), id("A"), id("X")]);
        assert_eq!(simplify_parents(&chain, parents_of), vec![id("B"), id("X")]);
    }

    #[test]
    fn test_tb003_redundant_direct_parent_dropped() {
        let h = hierarchy();
        let parents_of = |i: &Identifier| h.get(i).cloned().unwrap_or_default();
        // declared as W(A, B): A is implied by B regardless of order
        assert_eq!(
            simplify_parents(&[id("A"), id("B")], parents_of),
            vec![id("B")]
        );
    }

    #[test]
    fn test_tb003_class_names() {
        assert_eq!(index_class_name("dog_walk"), "DogWalkIndex");
        assert_eq!(features_class_name("dog"), "DogFeatures");
    }

    #[test]
    fn test_tb003_table_partition_validation() {
        let mut table = Table::new("dog", id("Dog"));
        table.features = vec![Feature::primitive("breed", PrimitiveKind::String)];
        table.index = Some(vec![Feature::primitive("dog_id", PrimitiveKind::String)]);
        table.partitioning_cols = Some(vec!["breed".into()]);
        assert!(table.validate().is_ok());
        assert!(table.is_keyed());

        table.partitioning_cols = Some(vec!["color".into()]);
        let err = table.validate().unwrap_err();
        assert!(err.to_string().contains("unknown column 'color'"));
    }

    #[test]
    fn test_tb003_table_prefixes_span_index_and_features() {
        let mut table = Table::new("dog", id("Dog"));
        table.index = Some(vec![Feature::primitive("dog_id", PrimitiveKind::String)]);
        table.features = vec![Feature::primitive("dog_id", PrimitiveKind::Int)];
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_tb003_entity_yaml_omits_name() {
        let entity = EntityClass {
            name: "Dog".into(),
            identifiers: vec![Feature::primitive("dog_id", PrimitiveKind::String)],
            properties: vec![],
            parents: vec![id("Animal")],
            description: None,
        };
        let yaml = serde_yaml_ng::to_string(&entity).unwrap();
        assert!(!yaml.contains("Dog\n"));
        assert!(yaml.contains("core/Animal"));
        assert!(!yaml.contains("properties"));
    }
}
