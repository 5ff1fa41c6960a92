//! TB-010: Forward conversion of datascript modules into namespace metadata.
//!
//! All modules of the local artifact are converted together so references
//! between their namespaces resolve. Index references lower to a foreign
//! key on the table owning the index class; for imported index classes the
//! owner is found in the imported metadata by the `<Table>Index` naming
//! convention.

use crate::datascript::model::{AttrValue, ClassDef, ClassKind, ScriptModule, TableDecl, UseKind};
use crate::error::{Error, Result};
use crate::schema::atoms::{ancestor_chain, simplify_parents, CompositeType, EntityClass, Table};
use crate::schema::feature::Feature;
use crate::schema::identifier::{IdBase, Identifier};
use crate::schema::metadata::{ArtifactMetadata, NamespaceMetadata};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use tracing::{debug, info};

struct Forward<'a> {
    local: &'a str,
    imported: &'a IndexMap<String, ArtifactMetadata>,
    /// Class definitions keyed by `(namespace, name)` with their module base.
    classes: FxHashMap<Identifier, (&'a ClassDef, IdBase)>,
    index_owner: FxHashMap<Identifier, Identifier>,
    entities: FxHashMap<Identifier, EntityClass>,
}

impl<'a> Forward<'a> {
    fn new(
        modules: &'a [ScriptModule],
        local: &'a str,
        imported: &'a IndexMap<String, ArtifactMetadata>,
    ) -> Result<Self> {
        let mut fwd = Self {
            local,
            imported,
            classes: FxHashMap::default(),
            index_owner: FxHashMap::default(),
            entities: FxHashMap::default(),
        };
        let mut tables: FxHashMap<Identifier, &TableDecl> = FxHashMap::default();
        for module in modules {
            let base = IdBase::namespace(module.namespace.clone());
            for class in module.classes() {
                let id = base.to_id(class.name.clone());
                if fwd.classes.insert(id.clone(), (class, base.clone())).is_some() {
                    return Err(Error::setup(format!("duplicate declaration '{}'", id)));
                }
            }
            for table in module.tables() {
                let id = base.to_id(table.name.clone());
                if tables.insert(id.clone(), table).is_some() {
                    return Err(Error::setup(format!("duplicate table '{}'", id)));
                }
                if let Some(ref index) = table.index {
                    let index = fwd.abs(index, &base);
                    if let Some(other) = fwd.index_owner.insert(index.clone(), id.clone()) {
                        return Err(Error::setup(format!(
                            "index class '{}' is used by both '{}' and '{}'",
                            index, other, id
                        )));
                    }
                }
            }
        }
        Ok(fwd)
    }

    /// Absolute form; local-artifact ids never carry the artifact name.
    fn abs(&self, id: &Identifier, base: &IdBase) -> Identifier {
        let id = id.absolute_from(base);
        match (id.artifact(), id.namespace()) {
            (Some(a), Some(ns)) if a == self.local => Identifier::in_namespace(ns, id.obj_id()),
            _ => id,
        }
    }

    fn imported_ns(&self, id: &Identifier) -> Option<&'a NamespaceMetadata> {
        self.imported.get(id.artifact()?)?.namespace(id.namespace()?)
    }

    fn local_class(&self, id: &Identifier, kind: ClassKind) -> Option<&'a ClassDef> {
        match self.classes.get(id) {
            Some((class, _)) if class.kind == kind => Some(*class),
            _ => None,
        }
    }

    fn check_exists(&self, kind: UseKind, id: &Identifier, context: &str) -> Result<()> {
        let found = match (id.artifact(), kind) {
            (None, UseKind::Entity) => self.local_class(id, ClassKind::Entity).is_some(),
            (None, UseKind::Composite) => self.local_class(id, ClassKind::Composite).is_some(),
            (Some(_), UseKind::Entity) => self
                .imported_ns(id)
                .is_some_and(|ns| ns.entity_class(id.obj_id()).is_some()),
            (Some(_), UseKind::Composite) => self
                .imported_ns(id)
                .is_some_and(|ns| ns.composite_type(id.obj_id()).is_some()),
            (_, UseKind::Index) => return self.index_table(id, context).map(|_| ()),
        };
        if found {
            Ok(())
        } else {
            Err(Error::setup(format!(
                "unknown {} '{}' referenced by '{}'",
                kind.keyword(),
                id,
                context
            )))
        }
    }

    /// Owning table of an index class.
    fn index_table(&self, index: &Identifier, context: &str) -> Result<Identifier> {
        let mut searched: Vec<String> = match index.artifact() {
            None => {
                if let Some(owner) = self.index_owner.get(index) {
                    return Ok(owner.clone());
                }
                self.index_owner.values().map(|t| t.to_string()).collect()
            }
            Some(artifact) => {
                let ns = self.imported_ns(index).ok_or_else(|| {
                    Error::resolution(format!(
                        "index class '{}' referenced by '{}': artifact '{}' namespace '{}' is not imported",
                        index,
                        context,
                        artifact,
                        index.namespace().unwrap_or_default()
                    ))
                })?;
                if let Some(t) = ns
                    .tables
                    .iter()
                    .find(|t| t.is_keyed() && t.index_class_name() == index.obj_id())
                {
                    return Ok(Identifier::in_artifact(artifact, ns.name.clone(), t.name.clone()));
                }
                ns.tables
                    .iter()
                    .map(|t| format!("{}/{}/{}", artifact, ns.name, t.name))
                    .collect()
            }
        };
        searched.sort();
        Err(Error::resolution(format!(
            "index class '{}' referenced by '{}' has no owning table; tables searched: [{}]",
            index,
            context,
            searched.join(", ")
        )))
    }

    fn feature(&self, name: &str, value: &AttrValue, base: &IdBase, context: &str) -> Result<Feature> {
        Ok(match value {
            AttrValue::Nullable(inner) => self.feature(name, inner, base, context)?.nullable(),
            AttrValue::Primitive(kind) => Feature::primitive(name, *kind),
            AttrValue::Entity(id) => {
                let id = self.abs(id, base);
                self.check_exists(UseKind::Entity, &id, context)?;
                Feature::entity_key(name, id)
            }
            AttrValue::Composite(id) => {
                let id = self.abs(id, base);
                self.check_exists(UseKind::Composite, &id, context)?;
                Feature::composite(name, id)
            }
            AttrValue::Index(id) => {
                let id = self.abs(id, base);
                Feature::table_key(name, self.index_table(&id, context)?)
            }
        })
    }

    fn class_features(&self, class: &ClassDef, base: &IdBase) -> Result<Vec<Feature>> {
        let context = base.to_id(class.name.clone()).to_string();
        class
            .attrs()
            .map(|a| self.feature(&a.name, &a.value, base, &context))
            .collect()
    }

    fn parents_of(&self, id: &Identifier) -> Vec<Identifier> {
        if let Some((class, base)) = self.classes.get(id) {
            return class.parents.iter().map(|p| self.abs(p, base)).collect();
        }
        self.imported_ns(id)
            .and_then(|ns| ns.entity_class(id.obj_id()))
            .map(|e| e.parents.clone())
            .unwrap_or_default()
    }

    /// Convert an entity once; later lookups hit the cache.
    fn entity(&mut self, class: &ClassDef, base: &IdBase) -> Result<EntityClass> {
        let id = base.to_id(class.name.clone());
        if let Some(cached) = self.entities.get(&id) {
            return Ok(cached.clone());
        }
        let context = id.to_string();
        let mut identifiers = Vec::new();
        let mut properties = Vec::new();
        for attr in class.attrs() {
            let feature = self.feature(&attr.name, &attr.value, base, &context)?;
            if attr.is_identifier {
                identifiers.push(feature);
            } else {
                properties.push(feature);
            }
        }
        let direct: Vec<Identifier> = class.parents.iter().map(|p| self.abs(p, base)).collect();
        for parent in &direct {
            self.check_exists(UseKind::Entity, parent, &context)?;
        }
        let parents_of = |i: &Identifier| self.parents_of(i);
        let chain = ancestor_chain(&direct, parents_of);
        let parents = simplify_parents(&chain, parents_of);

        let entity = EntityClass {
            name: class.name.clone(),
            identifiers,
            properties,
            parents,
            description: class.description.clone(),
        };
        self.entities.insert(id, entity.clone());
        Ok(entity)
    }

    fn table(&self, decl: &TableDecl, base: &IdBase) -> Result<Table> {
        let id = base.to_id(decl.name.clone());
        let context = id.to_string();
        let entity = self.abs(&decl.entity, base);
        self.check_exists(UseKind::Entity, &entity, &context)?;

        let mut table = Table::new(decl.name.clone(), entity);
        if let Some(ref features) = decl.features {
            let fid = self.abs(features, base);
            let class = self.local_class(&fid, ClassKind::Features).ok_or_else(|| {
                Error::setup(format!("table '{}' names unknown features class '{}'", id, fid))
            })?;
            table.features = self.class_features(class, &fid.base())?;
        }
        if let Some(ref index) = decl.index {
            let iid = self.abs(index, base);
            let class = self.local_class(&iid, ClassKind::Index).ok_or_else(|| {
                Error::setup(format!("table '{}' names unknown index class '{}'", id, iid))
            })?;
            table.index = Some(self.class_features(class, &iid.base())?);
        }
        table.partitioning_cols = decl.partitioning_cols.clone();
        table.max_partition_size = decl.max_partition_size;
        table.entity_key_table_map = decl
            .entity_key_table_map
            .iter()
            .map(|(k, v)| (k.clone(), self.abs(v, base)))
            .collect();
        table.description = decl.description.clone();
        Ok(table)
    }
}

/// Composite types must not contain themselves, directly or through other
/// composites; their columns could never be flattened.
fn check_composite_cycles(namespaces: &IndexMap<String, NamespaceMetadata>) -> Result<()> {
    fn visit(
        namespaces: &IndexMap<String, NamespaceMetadata>,
        id: &Identifier,
        path: &mut Vec<Identifier>,
        done: &mut Vec<Identifier>,
    ) -> Result<()> {
        if done.contains(id) {
            return Ok(());
        }
        if let Some(start) = path.iter().position(|p| p == id) {
            let mut cycle: Vec<String> = path[start..].iter().map(|p| p.to_string()).collect();
            cycle.push(id.to_string());
            return Err(Error::setup(format!(
                "composite '{}' contains itself: {}",
                id,
                cycle.join(" -> ")
            )));
        }
        // Imported composites were checked when their artifact was converted.
        let Some(composite) = id
            .namespace()
            .filter(|_| id.artifact().is_none())
            .and_then(|ns| namespaces.get(ns))
            .and_then(|ns| ns.composite_type(id.obj_id()))
        else {
            return Ok(());
        };
        path.push(id.clone());
        for feature in &composite.features {
            if let Feature::Composite(c) = feature {
                visit(namespaces, &c.target.absolute_from(&id.base()), path, done)?;
            }
        }
        path.pop();
        done.push(id.clone());
        Ok(())
    }

    let mut done = Vec::new();
    for ns in namespaces.values() {
        for composite in &ns.composite_types {
            let id = Identifier::in_namespace(ns.name.clone(), composite.name.clone());
            visit(namespaces, &id, &mut Vec::new(), &mut done)?;
        }
    }
    Ok(())
}

/// Convert every datascript module of artifact `local` into one
/// [`NamespaceMetadata`] per namespace, in first-seen module order.
pub fn to_bedrock(
    modules: &[ScriptModule],
    local: &str,
    imported: &IndexMap<String, ArtifactMetadata>,
) -> Result<IndexMap<String, NamespaceMetadata>> {
    let mut fwd = Forward::new(modules, local, imported)?;
    let mut out: IndexMap<String, NamespaceMetadata> = IndexMap::new();

    for module in modules {
        let base = IdBase::namespace(module.namespace.clone());
        let origin = module
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| module.namespace.clone());
        for u in &module.uses {
            let id = fwd.abs(&u.id, &base);
            fwd.check_exists(u.kind, &id, &origin)?;
        }

        let mut composites = Vec::new();
        let mut entities = Vec::new();
        let mut tables = Vec::new();
        for class in module.classes() {
            if class.kind != ClassKind::Entity && !class.parents.is_empty() {
                return Err(Error::setup(format!(
                    "{} '{}' cannot declare parents; only entities inherit",
                    class.kind.keyword(),
                    base.to_id(class.name.clone())
                )));
            }
            match class.kind {
                ClassKind::Composite => {
                    if class.attrs().any(|a| a.is_identifier) {
                        return Err(Error::setup(format!(
                            "composite '{}' cannot declare identifiers",
                            base.to_id(class.name.clone())
                        )));
                    }
                    composites.push(CompositeType {
                        name: class.name.clone(),
                        features: fwd.class_features(class, &base)?,
                        description: class.description.clone(),
                    });
                }
                ClassKind::Entity => entities.push(fwd.entity(class, &base)?),
                ClassKind::Index | ClassKind::Features => {}
            }
        }
        for decl in module.tables() {
            tables.push(fwd.table(decl, &base)?);
        }
        debug!(
            module = %origin,
            composites = composites.len(),
            entities = entities.len(),
            tables = tables.len(),
            "converted datascript module"
        );

        let ns = out
            .entry(module.namespace.clone())
            .or_insert_with(|| NamespaceMetadata::new(module.namespace.clone()));
        ns.composite_types.extend(composites);
        ns.entity_classes.extend(entities);
        ns.tables.extend(tables);
    }

    for ns in out.values() {
        ns.validate()?;
    }
    check_composite_cycles(&out)?;
    info!(artifact = local, namespaces = out.len(), "forward schema conversion complete");
    Ok(out)
}
