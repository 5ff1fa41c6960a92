//! TB-006: Cross-artifact lookups. Finds atoms by identifier, resolves the
//! table for an entity, lowers tables to storage form and flattens columns.
//!
//! Identifiers without an artifact (or naming the local artifact) resolve
//! in the local artifact; all others resolve in the imported artifacts.

use super::atoms::{CompositeType, EntityClass, Table};
use super::feature::{Feature, ForeignKey, ForeignTarget, PrimitiveKind};
use super::identifier::Identifier;
use super::metadata::{ArtifactMetadata, NamespaceMetadata};
use crate::error::{Error, Result};
use indexmap::IndexMap;

/// Separator between prefixes of flattened column names.
pub const COLUMN_SEPARATOR: &str = "__";

/// One storage column after flattening composites and keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub kind: PrimitiveKind,
    pub nullable: bool,
}

/// Read-only view over the local artifact and everything it imports.
#[derive(Debug, Clone, Copy)]
pub struct SchemaLookup<'a> {
    local: &'a ArtifactMetadata,
    imported: &'a IndexMap<String, ArtifactMetadata>,
}

impl<'a> SchemaLookup<'a> {
    pub fn new(
        local: &'a ArtifactMetadata,
        imported: &'a IndexMap<String, ArtifactMetadata>,
    ) -> Self {
        Self { local, imported }
    }

    pub fn local(&self) -> &'a ArtifactMetadata {
        self.local
    }

    /// Strip the artifact from identifiers that point into the local artifact.
    pub fn canonical(&self, id: &Identifier) -> Identifier {
        match (id.artifact(), id.namespace()) {
            (Some(a), Some(ns)) if a == self.local.name => {
                Identifier::in_namespace(ns, id.obj_id())
            }
            _ => id.clone(),
        }
    }

    pub fn artifact_of(&self, id: &Identifier) -> Option<&'a ArtifactMetadata> {
        match id.artifact() {
            None => Some(self.local),
            Some(a) if a == self.local.name => Some(self.local),
            Some(a) => self.imported.get(a),
        }
    }

    fn namespace_of(&self, id: &Identifier) -> Option<&'a NamespaceMetadata> {
        let ns = id.namespace()?;
        self.artifact_of(id)?.namespace(ns)
    }

    pub fn table(&self, id: &Identifier) -> Option<&'a Table> {
        self.namespace_of(id)?.table(id.obj_id())
    }

    pub fn entity_class(&self, id: &Identifier) -> Option<&'a EntityClass> {
        self.namespace_of(id)?.entity_class(id.obj_id())
    }

    pub fn composite_type(&self, id: &Identifier) -> Option<&'a CompositeType> {
        self.namespace_of(id)?.composite_type(id.obj_id())
    }

    fn require_table(&self, id: &Identifier) -> Result<&'a Table> {
        self.table(id)
            .ok_or_else(|| Error::resolution(format!("unknown table '{}'", id)))
    }

    /// Tables of `artifact` whose subject is `entity`, optionally limited to one namespace.
    fn tables_recording(
        &self,
        artifact: &'a ArtifactMetadata,
        namespace: Option<&str>,
        entity: &Identifier,
    ) -> Option<Identifier> {
        let entity = self.canonical(entity);
        let is_local = std::ptr::eq(artifact, self.local);
        for (ns_name, ns) in &artifact.namespaces {
            if namespace.is_some_and(|n| n != ns_name) {
                continue;
            }
            for table in &ns.tables {
                if self.canonical(&table.subject_of_records) == entity {
                    return Some(if is_local {
                        Identifier::in_namespace(ns_name.clone(), table.name.clone())
                    } else {
                        Identifier::in_artifact(artifact.name.clone(), ns_name.clone(), table.name.clone())
                    });
                }
            }
        }
        None
    }

    /// Find the table storing `entity` for the feature at `feature_path` of
    /// `calling_table`. Tries the calling table's override map, its
    /// namespace, its artifact and finally every known artifact.
    pub fn get_table_for_entity(
        &self,
        entity: &Identifier,
        calling_table: &Identifier,
        feature_path: &str,
    ) -> Result<Identifier> {
        let caller = self.require_table(calling_table)?;
        if let Some(pinned) = caller.entity_key_table_map.get(feature_path) {
            return Ok(self.canonical(&pinned.absolute_from(&calling_table.base())));
        }

        let caller_artifact = self.artifact_of(calling_table).ok_or_else(|| {
            Error::resolution(format!("unknown artifact of table '{}'", calling_table))
        })?;
        if let Some(found) = self.tables_recording(caller_artifact, calling_table.namespace(), entity)
        {
            return Ok(found);
        }
        if let Some(found) = self.tables_recording(caller_artifact, None, entity) {
            return Ok(found);
        }
        let all = std::iter::once(self.local).chain(self.imported.values());
        for artifact in all {
            if let Some(found) = self.tables_recording(artifact, None, entity) {
                return Ok(found);
            }
        }

        let artifact_name = calling_table.artifact().unwrap_or(&self.local.name);
        let mut searched = vec![self.local.name.clone()];
        searched.extend(self.imported.keys().cloned());
        Err(Error::resolution(format!(
            "no table records entity '{}' for feature '{}' of table '{}'; searched: \
             entity_key_table_map of '{}', namespace '{}/{}', artifact '{}', all artifacts [{}]",
            entity,
            feature_path,
            calling_table,
            calling_table,
            artifact_name,
            calling_table.namespace().unwrap_or_default(),
            artifact_name,
            searched.join(", ")
        )))
    }

    /// The table with every entity-targeted key lowered to a table target.
    pub fn lower_table(&self, table_id: &Identifier) -> Result<Table> {
        let table = self.require_table(table_id)?;
        let lower = |f: &Feature| -> Result<Feature> {
            match f {
                Feature::Foreign(ForeignKey {
                    prefix,
                    target: ForeignTarget::Entity(entity),
                    nullable,
                }) => {
                    let target = self.get_table_for_entity(entity, table_id, prefix)?;
                    Ok(Feature::Foreign(ForeignKey {
                        prefix: prefix.clone(),
                        target: ForeignTarget::Table(target),
                        nullable: *nullable,
                    }))
                }
                other => Ok(other.clone()),
            }
        };
        let mut lowered = table.clone();
        lowered.features = table.features.iter().map(lower).collect::<Result<_>>()?;
        if let Some(ref index) = table.index {
            lowered.index = Some(index.iter().map(lower).collect::<Result<_>>()?);
        }
        Ok(lowered)
    }

    /// Storage columns of a table, index columns first.
    ///
    /// A key contributes the index columns of its target table, so a table
    /// may key to itself; only an index that reaches back to a table whose
    /// index is being expanded is a cycle.
    pub fn flatten_columns(&self, table_id: &Identifier) -> Result<Vec<Column>> {
        let lowered = self.lower_table(table_id)?;
        let mut walk = Walk {
            root: self.canonical(table_id),
            tables: Vec::new(),
            composites: Vec::new(),
            out: Vec::new(),
        };
        for feature in lowered.all_features() {
            self.flatten_feature(feature, table_id, "", false, &mut walk)?;
        }
        Ok(walk.out)
    }

    fn flatten_feature(
        &self,
        feature: &Feature,
        context: &Identifier,
        prefix: &str,
        nullable: bool,
        walk: &mut Walk,
    ) -> Result<()> {
        let name = format!("{}{}", prefix, feature.prefix());
        let nullable = nullable || feature.is_nullable();
        match feature {
            Feature::Primitive(p) => walk.out.push(Column {
                name,
                kind: p.kind,
                nullable,
            }),
            Feature::Composite(c) => {
                let target = c.target.absolute_from(&context.base());
                if walk.composites.contains(&target) {
                    return Err(Error::resolution(format!(
                        "composite '{}' of '{}' contains itself through [{}]",
                        target,
                        name,
                        join_ids(&walk.composites)
                    )));
                }
                let composite = self.composite_type(&target).ok_or_else(|| {
                    Error::resolution(format!(
                        "unknown composite type '{}' used by '{}' in '{}'",
                        target, name, context
                    ))
                })?;
                let sub = format!("{}{}", name, COLUMN_SEPARATOR);
                walk.composites.push(target.clone());
                for f in &composite.features {
                    self.flatten_feature(f, &target, &sub, nullable, walk)?;
                }
                walk.composites.pop();
            }
            Feature::Foreign(k) => {
                let target = match &k.target {
                    ForeignTarget::Table(id) => self.canonical(&id.absolute_from(&context.base())),
                    ForeignTarget::Entity(entity) => {
                        let entity = entity.absolute_from(&context.base());
                        self.get_table_for_entity(&entity, &walk.root, &name)?
                    }
                };
                if walk.tables.contains(&target) {
                    return Err(Error::resolution(format!(
                        "key '{}' forms a cycle through table indexes [{}]",
                        name,
                        join_ids(&walk.tables)
                    )));
                }
                let table = self.require_table(&target)?;
                let index = table.index.as_ref().ok_or_else(|| {
                    Error::resolution(format!(
                        "key '{}' targets table '{}' which has no index",
                        name, target
                    ))
                })?;
                let sub = format!("{}{}", name, COLUMN_SEPARATOR);
                walk.tables.push(target.clone());
                for f in index {
                    self.flatten_feature(f, &target, &sub, nullable, walk)?;
                }
                walk.tables.pop();
            }
        }
        Ok(())
    }
}

/// State of one `flatten_columns` walk.
struct Walk {
    root: Identifier,
    /// Tables whose index columns are being expanded.
    tables: Vec<Identifier>,
    composites: Vec<Identifier>,
    out: Vec<Column>,
}

fn join_ids(ids: &[Identifier]) -> String {
    ids.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(" -> ")
}
