//! TB-007: Datascript model for declarative schema modules.
//!
//! A module declares classes (composite, entity, index, features) and
//! tables in one namespace. References are identifiers read relative to
//! the module namespace: a bare name points into the module namespace,
//! anything else must be announced by a `use` line.

use crate::schema::feature::PrimitiveKind;
use crate::schema::identifier::Identifier;
use indexmap::IndexMap;
use std::fmt;
use std::path::PathBuf;

/// Attribute value, decided when the class is defined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Primitive(PrimitiveKind),
    Entity(Identifier),
    Index(Identifier),
    Composite(Identifier),
    Nullable(Box<AttrValue>),
}

impl AttrValue {
    pub fn nullable(inner: AttrValue) -> Self {
        match inner {
            already @ Self::Nullable(_) => already,
            other => Self::Nullable(Box::new(other)),
        }
    }

    /// The value with any nullable wrapper removed, and whether one was present.
    pub fn unwrap_nullable(&self) -> (&AttrValue, bool) {
        match self {
            Self::Nullable(inner) => (inner.unwrap_nullable().0, true),
            other => (other, false),
        }
    }

    pub fn reference(&self) -> Option<&Identifier> {
        match self.unwrap_nullable().0 {
            Self::Entity(id) | Self::Index(id) | Self::Composite(id) => Some(id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub name: String,
    pub value: AttrValue,
    /// Part of an entity's identity.
    pub is_identifier: bool,
}

/// Class body member. Helpers carry arbitrary text and produce no feature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Member {
    Attr(Attr),
    Helper { name: String, expr: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassKind {
    Composite,
    Entity,
    Index,
    Features,
}

impl ClassKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Composite => "composite",
            Self::Entity => "entity",
            Self::Index => "index",
            Self::Features => "features",
        }
    }
}

impl fmt::Display for ClassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    pub kind: ClassKind,
    pub name: String,
    /// Direct parents; entities only.
    pub parents: Vec<Identifier>,
    pub members: Vec<Member>,
    pub description: Option<String>,
}

impl ClassDef {
    pub fn new(kind: ClassKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            parents: Vec::new(),
            members: Vec::new(),
            description: None,
        }
    }

    pub fn composite(name: impl Into<String>) -> Self {
        Self::new(ClassKind::Composite, name)
    }

    pub fn entity(name: impl Into<String>) -> Self {
        Self::new(ClassKind::Entity, name)
    }

    pub fn index(name: impl Into<String>) -> Self {
        Self::new(ClassKind::Index, name)
    }

    pub fn features(name: impl Into<String>) -> Self {
        Self::new(ClassKind::Features, name)
    }

    pub fn parent(mut self, id: Identifier) -> Self {
        self.parents.push(id);
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.members.push(Member::Attr(Attr {
            name: name.into(),
            value,
            is_identifier: false,
        }));
        self
    }

    pub fn id_attr(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.members.push(Member::Attr(Attr {
            name: name.into(),
            value,
            is_identifier: true,
        }));
        self
    }

    pub fn helper(mut self, name: impl Into<String>, expr: impl Into<String>) -> Self {
        self.members.push(Member::Helper {
            name: name.into(),
            expr: expr.into(),
        });
        self
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn attrs(&self) -> impl Iterator<Item = &Attr> {
        self.members.iter().filter_map(|m| match m {
            Member::Attr(a) => Some(a),
            Member::Helper { .. } => None,
        })
    }
}

/// Table declaration binding a subject entity to feature and index classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDecl {
    pub name: String,
    pub entity: Identifier,
    pub features: Option<Identifier>,
    pub index: Option<Identifier>,
    pub partitioning_cols: Option<Vec<String>>,
    pub max_partition_size: Option<u64>,
    /// Feature prefix -> table that stores the referenced entity.
    pub entity_key_table_map: IndexMap<String, Identifier>,
    pub description: Option<String>,
}

impl TableDecl {
    pub fn new(name: impl Into<String>, entity: Identifier) -> Self {
        Self {
            name: name.into(),
            entity,
            features: None,
            index: None,
            partitioning_cols: None,
            max_partition_size: None,
            entity_key_table_map: IndexMap::new(),
            description: None,
        }
    }

    pub fn with_features(mut self, class: Identifier) -> Self {
        self.features = Some(class);
        self
    }

    pub fn with_index(mut self, class: Identifier) -> Self {
        self.index = Some(class);
        self
    }

    pub fn partitioned_by(mut self, cols: &[&str]) -> Self {
        self.partitioning_cols = Some(cols.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn max_rows(mut self, rows: u64) -> Self {
        self.max_partition_size = Some(rows);
        self
    }

    pub fn key_table(mut self, prefix: impl Into<String>, table: Identifier) -> Self {
        self.entity_key_table_map.insert(prefix.into(), table);
        self
    }

    pub fn describe(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Declaration {
    Class(ClassDef),
    Table(TableDecl),
}

impl Declaration {
    pub fn name(&self) -> &str {
        match self {
            Self::Class(c) => &c.name,
            Self::Table(t) => &t.name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UseKind {
    Entity,
    Composite,
    Index,
}

impl UseKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Composite => "composite",
            Self::Index => "index",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "entity" => Some(Self::Entity),
            "composite" => Some(Self::Composite),
            "index" => Some(Self::Index),
            _ => None,
        }
    }
}

/// An object from another namespace or artifact made visible to a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UseDecl {
    pub kind: UseKind,
    pub id: Identifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptModule {
    pub namespace: String,
    /// Source file the module was read from.
    pub source: Option<PathBuf>,
    pub uses: Vec<UseDecl>,
    pub declarations: Vec<Declaration>,
}

impl ScriptModule {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            source: None,
            uses: Vec::new(),
            declarations: Vec::new(),
        }
    }

    /// Add a `use` line unless an identical one exists.
    pub fn uses(mut self, kind: UseKind, id: Identifier) -> Self {
        self.add_use(kind, id);
        self
    }

    pub fn add_use(&mut self, kind: UseKind, id: Identifier) {
        let decl = UseDecl { kind, id };
        if !self.uses.contains(&decl) {
            self.uses.push(decl);
        }
    }

    pub fn class(mut self, class: ClassDef) -> Self {
        self.declarations.push(Declaration::Class(class));
        self
    }

    pub fn table(mut self, table: TableDecl) -> Self {
        self.declarations.push(Declaration::Table(table));
        self
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Class(c) => Some(c),
            Declaration::Table(_) => None,
        })
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableDecl> {
        self.declarations.iter().filter_map(|d| match d {
            Declaration::Table(t) => Some(t),
            Declaration::Class(_) => None,
        })
    }

    pub fn find_class(&self, name: &str) -> Option<&ClassDef> {
        self.classes().find(|c| c.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tb007_nullable_does_not_stack() {
        let v = AttrValue::nullable(AttrValue::nullable(AttrValue::Primitive(PrimitiveKind::Int)));
        assert_eq!(
            v,
            AttrValue::Nullable(Box::new(AttrValue::Primitive(PrimitiveKind::Int)))
        );
        let (inner, nullable) = v.unwrap_nullable();
        assert!(nullable);
        assert_eq!(inner, &AttrValue::Primitive(PrimitiveKind::Int));
    }

    #[test]
    fn test_tb007_builder_collects_attrs_only() {
        let dog = ClassDef::entity("Dog")
            .id_attr("dog_id", AttrValue::Primitive(PrimitiveKind::String))
            .helper("label", "dog_id.upper()")
            .attr("owner", AttrValue::Entity(Identifier::in_namespace("people", "Person")));
        let attrs: Vec<&str> = dog.attrs().map(|a| a.name.as_str()).collect();
        assert_eq!(attrs, vec!["dog_id", "owner"]);
        assert!(dog.attrs().next().unwrap().is_identifier);
    }

    #[test]
    fn test_tb007_uses_deduplicated() {
        let id = Identifier::in_namespace("people", "Person");
        let module = ScriptModule::new("dogs")
            .uses(UseKind::Entity, id.clone())
            .uses(UseKind::Entity, id);
        assert_eq!(module.uses.len(), 1);
    }
}
