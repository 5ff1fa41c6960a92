//! TB-002: Feature type model: the columns an atom declares.
//!
//! Features serialize inline in the schema documents. A primitive carries a
//! column `name` and `dtype`; composite and foreign-key features carry a
//! `prefix` that becomes the flattened column-name prefix, plus the target
//! identifier under `composite`, `entity` or `table`.

use super::identifier::Identifier;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Scalar column kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveKind {
    Float,
    Int,
    String,
    Bytes,
    Bool,
    Datetime,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 6] = [
        Self::Float,
        Self::Int,
        Self::String,
        Self::Bytes,
        Self::Bool,
        Self::Datetime,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.to_string() == name)
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float => write!(f, "float"),
            Self::Int => write!(f, "int"),
            Self::String => write!(f, "string"),
            Self::Bytes => write!(f, "bytes"),
            Self::Bool => write!(f, "bool"),
            Self::Datetime => write!(f, "datetime"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimitiveFeature {
    pub name: String,
    pub kind: PrimitiveKind,
    pub nullable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeFeature {
    pub prefix: String,
    pub target: Identifier,
    pub nullable: bool,
}

/// What a foreign key points at. Entity targets are lowered to table
/// targets before storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForeignTarget {
    Entity(Identifier),
    Table(Identifier),
}

impl ForeignTarget {
    pub fn id(&self) -> &Identifier {
        match self {
            Self::Entity(id) | Self::Table(id) => id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub prefix: String,
    pub target: ForeignTarget,
    pub nullable: bool,
}

/// A single column or column group of a schema atom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FeatureDoc", into = "FeatureDoc")]
pub enum Feature {
    Primitive(PrimitiveFeature),
    Composite(CompositeFeature),
    Foreign(ForeignKey),
}

impl Feature {
    pub fn primitive(name: impl Into<String>, kind: PrimitiveKind) -> Self {
        Self::Primitive(PrimitiveFeature {
            name: name.into(),
            kind,
            nullable: false,
        })
    }

    pub fn composite(prefix: impl Into<String>, target: Identifier) -> Self {
        Self::Composite(CompositeFeature {
            prefix: prefix.into(),
            target,
            nullable: false,
        })
    }

    pub fn entity_key(prefix: impl Into<String>, entity: Identifier) -> Self {
        Self::Foreign(ForeignKey {
            prefix: prefix.into(),
            target: ForeignTarget::Entity(entity),
            nullable: false,
        })
    }

    pub fn table_key(prefix: impl Into<String>, table: Identifier) -> Self {
        Self::Foreign(ForeignKey {
            prefix: prefix.into(),
            target: ForeignTarget::Table(table),
            nullable: false,
        })
    }

    /// Builder-style nullable flag.
    pub fn nullable(mut self) -> Self {
        self.set_nullable(true);
        self
    }

    pub fn set_nullable(&mut self, nullable: bool) {
        match self {
            Self::Primitive(p) => p.nullable = nullable,
            Self::Composite(c) => c.nullable = nullable,
            Self::Foreign(k) => k.nullable = nullable,
        }
    }

    pub fn is_nullable(&self) -> bool {
        match self {
            Self::Primitive(p) => p.nullable,
            Self::Composite(c) => c.nullable,
            Self::Foreign(k) => k.nullable,
        }
    }

    /// Column name for primitives, column prefix otherwise.
    pub fn prefix(&self) -> &str {
        match self {
            Self::Primitive(p) => &p.name,
            Self::Composite(c) => &c.prefix,
            Self::Foreign(k) => &k.prefix,
        }
    }

    /// The atom this feature refers to, if any.
    pub fn target(&self) -> Option<&Identifier> {
        match self {
            Self::Primitive(_) => None,
            Self::Composite(c) => Some(&c.target),
            Self::Foreign(k) => Some(k.target.id()),
        }
    }

    /// Rewrite the referenced identifier, keeping the feature shape.
    pub fn map_target(&self, f: impl Fn(&Identifier) -> Identifier) -> Self {
        match self {
            Self::Primitive(_) => self.clone(),
            Self::Composite(c) => Self::Composite(CompositeFeature {
                target: f(&c.target),
                ..c.clone()
            }),
            Self::Foreign(k) => Self::Foreign(ForeignKey {
                target: match &k.target {
                    ForeignTarget::Entity(id) => ForeignTarget::Entity(f(id)),
                    ForeignTarget::Table(id) => ForeignTarget::Table(f(id)),
                },
                ..k.clone()
            }),
        }
    }
}

/// Reject duplicate prefixes across all feature lists of one atom.
pub fn validate_prefixes<'a>(
    atom: &str,
    features: impl IntoIterator<Item = &'a Feature>,
) -> Result<()> {
    let mut seen = HashSet::new();
    for feature in features {
        if !seen.insert(feature.prefix()) {
            return Err(Error::setup(format!(
                "duplicate feature prefix '{}' in '{}'",
                feature.prefix(),
                atom
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FeatureDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dtype: Option<PrimitiveKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    composite: Option<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entity: Option<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    table: Option<Identifier>,
    #[serde(default, skip_serializing_if = "is_false")]
    nullable: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl TryFrom<FeatureDoc> for Feature {
    type Error = String;

    fn try_from(doc: FeatureDoc) -> std::result::Result<Self, Self::Error> {
        let nullable = doc.nullable;
        match doc {
            FeatureDoc {
                name: Some(name),
                dtype: Some(kind),
                prefix: None,
                composite: None,
                entity: None,
                table: None,
                ..
            } => Ok(Self::Primitive(PrimitiveFeature {
                name,
                kind,
                nullable,
            })),
            FeatureDoc {
                name: None,
                dtype: None,
                prefix: Some(prefix),
                composite,
                entity,
                table,
                ..
            } => match (composite, entity, table) {
                (Some(target), None, None) => Ok(Self::Composite(CompositeFeature {
                    prefix,
                    target,
                    nullable,
                })),
                (None, Some(id), None) => Ok(Self::Foreign(ForeignKey {
                    prefix,
                    target: ForeignTarget::Entity(id),
                    nullable,
                })),
                (None, None, Some(id)) => Ok(Self::Foreign(ForeignKey {
                    prefix,
                    target: ForeignTarget::Table(id),
                    nullable,
                })),
                _ => Err(format!(
                    "feature '{}' needs exactly one of composite, entity, table",
                    prefix
                )),
            },
            _ => Err("feature needs either name+dtype or prefix+target".to_string()),
        }
    }
}

impl From<Feature> for FeatureDoc {
    fn from(feature: Feature) -> Self {
        match feature {
            Feature::Primitive(p) => Self {
                name: Some(p.name),
                dtype: Some(p.kind),
                nullable: p.nullable,
                ..Self::default()
            },
            Feature::Composite(c) => Self {
                prefix: Some(c.prefix),
                composite: Some(c.target),
                nullable: c.nullable,
                ..Self::default()
            },
            Feature::Foreign(k) => {
                let (entity, table) = match k.target {
                    ForeignTarget::Entity(id) => (Some(id), None),
                    ForeignTarget::Table(id) => (None, Some(id)),
                };
                Self {
                    prefix: Some(k.prefix),
                    entity,
                    table,
                    nullable: k.nullable,
                    ..Self::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tb002_kind_names() {
        for kind in PrimitiveKind::ALL {
            assert_eq!(PrimitiveKind::from_name(&kind.to_string()), Some(kind));
        }
        assert_eq!(PrimitiveKind::from_name("decimal"), None);
    }

    #[test]
    fn test_tb002_parse_inline_features() {
        let yaml = r#"
- name: weight
  dtype: float
  nullable: true
- prefix: home
  composite: core/Address
- prefix: owner
  table: people/core/person
"#;
        let features: Vec<Feature> = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(features.len(), 3);
        assert!(features[0].is_nullable());
        assert_eq!(features[1].prefix(), "home");
        match &features[2] {
            Feature::Foreign(k) => {
                assert_eq!(
                    k.target,
                    ForeignTarget::Table(Identifier::in_artifact("people", "core", "person"))
                );
                assert!(!k.nullable);
            }
            other => panic!("expected foreign key, got {:?}", other),
        }
    }

    #[test]
    fn test_tb002_ambiguous_feature_rejected() {
        let yaml = "prefix: owner\nentity: Person\ntable: person\n";
        let err = serde_yaml_ng::from_str::<Feature>(yaml).unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn test_tb002_nullable_omitted_when_false() {
        let f = Feature::primitive("name", PrimitiveKind::String);
        let yaml = serde_yaml_ng::to_string(&f).unwrap();
        assert!(!yaml.contains("nullable"));
        let f = f.nullable();
        let yaml = serde_yaml_ng::to_string(&f).unwrap();
        assert!(yaml.contains("nullable: true"));
    }

    #[test]
    fn test_tb002_duplicate_prefix() {
        let features = vec![
            Feature::primitive("id", PrimitiveKind::Int),
            Feature::composite("id", Identifier::local("Address")),
        ];
        let err = validate_prefixes("Dog", &features).unwrap_err();
        assert!(err.to_string().contains("duplicate feature prefix 'id' in 'Dog'"));
    }

    #[test]
    fn test_tb002_map_target() {
        let f = Feature::entity_key("owner", Identifier::local("Person")).nullable();
        let mapped = f.map_target(|id| id.absolute_from(&crate::schema::IdBase::namespace("core")));
        assert_eq!(mapped.target(), Some(&Identifier::in_namespace("core", "Person")));
        assert!(mapped.is_nullable());
    }
}
