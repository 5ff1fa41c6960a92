//! TB-011: Reverse conversion of namespace metadata into a datascript module.
//!
//! Each composite, entity, table features class, table index class and table
//! declaration becomes a node listing the local nodes it needs. Nodes are
//! emitted once all their dependencies are; a pass that emits nothing means
//! the remaining nodes depend on each other or on something missing.

use crate::datascript::model::{
    Attr, AttrValue, ClassDef, Declaration, Member, ScriptModule, TableDecl, UseKind,
};
use crate::datascript::render::render_module;
use crate::error::{Error, Result};
use crate::schema::atoms::{index_class_name, Table};
use crate::schema::feature::{Feature, ForeignTarget};
use crate::schema::identifier::{IdBase, Identifier};
use crate::schema::metadata::NamespaceMetadata;
use std::collections::HashSet;
use tracing::debug;

struct Node {
    name: String,
    deps: Vec<String>,
    decl: Declaration,
}

/// Collects dependencies and `use` lines while converting one node.
struct Refs<'a> {
    base: &'a IdBase,
    ns: &'a NamespaceMetadata,
    owner: String,
    deps: Vec<String>,
    uses: Vec<(UseKind, Identifier)>,
}

impl<'a> Refs<'a> {
    fn new(base: &'a IdBase, ns: &'a NamespaceMetadata, owner: &str) -> Self {
        Self {
            base,
            ns,
            owner: owner.to_string(),
            deps: Vec::new(),
            uses: Vec::new(),
        }
    }

    fn local(&mut self, name: &str) -> Identifier {
        if name != self.owner && !self.deps.iter().any(|d| d == name) {
            self.deps.push(name.to_string());
        }
        Identifier::local(name)
    }

    fn reference(&mut self, id: &Identifier, kind: UseKind) -> Identifier {
        if id.artifact() == self.base.artifact_name() && id.namespace() == self.base.namespace_name()
        {
            self.local(id.obj_id())
        } else {
            self.uses.push((kind, id.clone()));
            id.clone()
        }
    }

    fn index_of(&mut self, table: &Identifier, prefix: &str) -> Result<Identifier> {
        let index = table.base().to_id(index_class_name(table.obj_id()));
        let reference = self.reference(&index, UseKind::Index);
        if reference.is_local() {
            let keyed = self.ns.table(table.obj_id()).is_some_and(Table::is_keyed);
            if !keyed {
                return Err(Error::resolution(format!(
                    "key '{}' of '{}' targets table '{}' which has no index",
                    prefix, self.owner, table
                )));
            }
        }
        Ok(reference)
    }

    fn value(&mut self, feature: &Feature) -> Result<AttrValue> {
        let value = match feature {
            Feature::Primitive(p) => AttrValue::Primitive(p.kind),
            Feature::Composite(c) => {
                AttrValue::Composite(self.reference(&c.target, UseKind::Composite))
            }
            Feature::Foreign(k) => match &k.target {
                ForeignTarget::Entity(id) => AttrValue::Entity(self.reference(id, UseKind::Entity)),
                ForeignTarget::Table(id) => AttrValue::Index(self.index_of(id, &k.prefix)?),
            },
        };
        Ok(if feature.is_nullable() {
            AttrValue::nullable(value)
        } else {
            value
        })
    }

    fn attrs(&mut self, features: &[Feature], is_identifier: bool) -> Result<Vec<Member>> {
        let mut members = Vec::with_capacity(features.len());
        for f in features {
            members.push(Member::Attr(Attr {
                name: f.prefix().to_string(),
                value: self.value(f)?,
                is_identifier,
            }));
        }
        Ok(members)
    }
}

#[derive(Default)]
struct Graph {
    nodes: Vec<Node>,
    uses: Vec<(UseKind, Identifier)>,
}

impl Graph {
    fn push(&mut self, refs: Refs, decl: Declaration) {
        self.uses.extend(refs.uses);
        self.nodes.push(Node {
            name: refs.owner,
            deps: refs.deps,
            decl,
        });
    }
}

fn build_graph(ns: &NamespaceMetadata, base: &IdBase) -> Result<Graph> {
    let mut graph = Graph::default();

    for c in &ns.composite_types {
        let mut refs = Refs::new(base, ns, &c.name);
        let mut class = ClassDef::composite(c.name.clone());
        class.members = refs.attrs(&c.features, false)?;
        class.description = c.description.clone();
        graph.push(refs, Declaration::Class(class));
    }

    for e in &ns.entity_classes {
        let mut refs = Refs::new(base, ns, &e.name);
        let mut class = ClassDef::entity(e.name.clone());
        for p in &e.parents {
            class.parents.push(refs.reference(p, UseKind::Entity));
        }
        class.members = refs.attrs(&e.identifiers, true)?;
        class.members.extend(refs.attrs(&e.properties, false)?);
        class.description = e.description.clone();
        graph.push(refs, Declaration::Class(class));
    }

    for t in &ns.tables {
        let features_name = t.features_class_name();
        let index_name = t.index_class_name();
        if !t.features.is_empty() {
            let mut refs = Refs::new(base, ns, &features_name);
            let mut class = ClassDef::features(features_name.clone());
            class.members = refs.attrs(&t.features, false)?;
            graph.push(refs, Declaration::Class(class));
        }
        if let Some(ref index) = t.index {
            let mut refs = Refs::new(base, ns, &index_name);
            let mut class = ClassDef::index(index_name.clone());
            class.members = refs.attrs(index, false)?;
            graph.push(refs, Declaration::Class(class));
        }

        let mut refs = Refs::new(base, ns, &t.name);
        let mut decl = TableDecl::new(
            t.name.clone(),
            refs.reference(&t.subject_of_records, UseKind::Entity),
        );
        if !t.features.is_empty() {
            decl.features = Some(refs.local(&features_name));
        }
        if t.index.is_some() {
            decl.index = Some(refs.local(&index_name));
        }
        decl.partitioning_cols = t.partitioning_cols.clone();
        decl.max_partition_size = t.max_partition_size;
        decl.entity_key_table_map = t
            .entity_key_table_map
            .iter()
            .map(|(k, v)| {
                let target = if v.base() == *base {
                    Identifier::local(v.obj_id())
                } else {
                    v.clone()
                };
                (k.clone(), target)
            })
            .collect();
        decl.description = t.description.clone();
        graph.push(refs, Declaration::Table(decl));
    }
    Ok(graph)
}

/// Convert one namespace into a datascript module. `base` is the
/// namespace's own context; references into it become bare names.
pub fn from_bedrock(ns: &NamespaceMetadata, base: &IdBase) -> Result<ScriptModule> {
    let mut module = ScriptModule::new(ns.name.clone());
    let Graph { nodes, uses } = build_graph(ns, base)?;
    for (kind, id) in uses {
        module.add_use(kind, id);
    }

    let mut names = HashSet::new();
    for n in &nodes {
        if !names.insert(n.name.as_str()) {
            return Err(Error::setup(format!(
                "namespace '{}' defines '{}' twice after codegen naming",
                ns.name, n.name
            )));
        }
    }

    let mut emitted: HashSet<String> = HashSet::new();
    let mut remaining = nodes;
    let mut passes = 0;
    while !remaining.is_empty() {
        passes += 1;
        let before = remaining.len();
        let mut stuck = Vec::new();
        for n in remaining {
            if n.deps.iter().all(|d| emitted.contains(d)) {
                emitted.insert(n.name.clone());
                module.declarations.push(n.decl);
            } else {
                stuck.push(n);
            }
        }
        if stuck.len() == before {
            let detail: Vec<String> = stuck
                .iter()
                .map(|n| {
                    let waiting: Vec<&str> = n
                        .deps
                        .iter()
                        .filter(|d| !emitted.contains(*d))
                        .map(String::as_str)
                        .collect();
                    format!("{} (waits on {})", n.name, waiting.join(", "))
                })
                .collect();
            return Err(Error::resolution(format!(
                "cannot order declarations of namespace '{}': {}",
                ns.name,
                detail.join("; ")
            )));
        }
        remaining = stuck;
    }
    debug!(namespace = %ns.name, passes, declarations = module.declarations.len(), "generated datascript");
    Ok(module)
}

/// Generate datascript source text for a namespace.
pub fn codegen(ns: &NamespaceMetadata, base: &IdBase) -> Result<String> {
    Ok(render_module(&from_bedrock(ns, base)?))
}
