//! TB-008: Datascript text parser.
//!
//! Line based. A first pass collects the namespace, `use` lines and the
//! names of every declaration so bodies may reference classes declared
//! further down; the second pass builds the module.

use super::model::{
    AttrValue, ClassDef, ClassKind, Declaration, Member, ScriptModule, TableDecl, UseDecl, UseKind,
};
use crate::error::{Error, Result};
use crate::schema::feature::PrimitiveKind;
use crate::schema::identifier::{Identifier, ID_SEPARATOR};
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

static NAMESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^namespace\s+([A-Za-z_][\w\-]*)$").expect("valid regex"));

static USE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^use\s+(\w+)\s+(\S+)$").expect("valid regex"));

static OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(composite|entity|index|features|table)\s+([A-Za-z_]\w*)\s*(?:\(([^)]*)\))?\s*\{$")
        .expect("valid regex")
});

static DOC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^doc:\s*"(.*)"$"#).expect("valid regex"));

static HELPER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*=\s*(.*)$").expect("valid regex"));

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(id\s+)?([A-Za-z_]\w*)\s*:\s*(nullable\s+)?(\S+)$").expect("valid regex")
});

static KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^key\s+([A-Za-z_]\w*)\s*:\s*(\S+)$").expect("valid regex"));

static TABLE_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(entity|features|index|partition|max_rows)\s*:\s*(.+)$").expect("valid regex")
});

fn line_error(origin: &str, line: usize, msg: impl std::fmt::Display) -> Error {
    Error::setup(format!("{}:{}: {}", origin, line, msg))
}

/// Names visible to a module body.
struct Scope<'a> {
    origin: &'a str,
    declared: HashMap<String, ClassKind>,
    uses: &'a [UseDecl],
}

impl Scope<'_> {
    fn used(&self, token: &str, line: usize) -> Result<Option<&UseDecl>> {
        if token.contains(ID_SEPARATOR) {
            let id = Identifier::from_serialized_id(token)
                .map_err(|e| line_error(self.origin, line, e))?;
            return Ok(self.uses.iter().find(|u| u.id == id));
        }
        let matches: Vec<&UseDecl> = self.uses.iter().filter(|u| u.id.obj_id() == token).collect();
        match matches.as_slice() {
            [] => Ok(None),
            [one] => Ok(Some(*one)),
            many => Err(line_error(
                self.origin,
                line,
                format!(
                    "'{}' is ambiguous between {}",
                    token,
                    many.iter().map(|u| u.id.to_string()).collect::<Vec<_>>().join(", ")
                ),
            )),
        }
    }

    /// Resolve an attribute type token.
    fn value(&self, token: &str, line: usize) -> Result<AttrValue> {
        if let Some(kind) = PrimitiveKind::from_name(token) {
            return Ok(AttrValue::Primitive(kind));
        }
        if let Some(kind) = self.declared.get(token) {
            let id = Identifier::local(token);
            return match kind {
                ClassKind::Entity => Ok(AttrValue::Entity(id)),
                ClassKind::Composite => Ok(AttrValue::Composite(id)),
                ClassKind::Index => Ok(AttrValue::Index(id)),
                ClassKind::Features => Err(line_error(
                    self.origin,
                    line,
                    format!("features class '{}' cannot be an attribute type", token),
                )),
            };
        }
        match self.used(token, line)? {
            Some(u) => Ok(match u.kind {
                UseKind::Entity => AttrValue::Entity(u.id.clone()),
                UseKind::Composite => AttrValue::Composite(u.id.clone()),
                UseKind::Index => AttrValue::Index(u.id.clone()),
            }),
            None => Err(line_error(self.origin, line, format!("unknown type '{}'", token))),
        }
    }

    fn entity(&self, token: &str, line: usize) -> Result<Identifier> {
        match self.value(token, line)? {
            AttrValue::Entity(id) => Ok(id),
            _ => Err(line_error(
                self.origin,
                line,
                format!("'{}' is not an entity class", token),
            )),
        }
    }

    fn local_class(&self, token: &str, kind: ClassKind, line: usize) -> Result<Identifier> {
        if self.declared.get(token) == Some(&kind) {
            Ok(Identifier::local(token))
        } else {
            Err(line_error(
                self.origin,
                line,
                format!("no {} class '{}' declared in this module", kind, token),
            ))
        }
    }
}

enum Open {
    Class(ClassDef, usize),
    Table(TableDraft),
}

struct TableDraft {
    line: usize,
    entity: Option<Identifier>,
    decl: TableDecl,
}

fn significant_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'))
}

/// Parse datascript text. `origin` names the source in error messages.
pub fn parse_module(text: &str, origin: &str) -> Result<ScriptModule> {
    let mut namespace: Option<String> = None;
    let mut uses: Vec<UseDecl> = Vec::new();
    let mut declared: HashMap<String, ClassKind> = HashMap::new();
    let mut tables: Vec<String> = Vec::new();

    for (n, line) in significant_lines(text) {
        if let Some(c) = NAMESPACE_RE.captures(line) {
            if namespace.is_some() {
                return Err(line_error(origin, n, "namespace declared twice"));
            }
            namespace = Some(c[1].to_string());
        } else if let Some(c) = USE_RE.captures(line) {
            let kind = UseKind::from_keyword(&c[1])
                .ok_or_else(|| line_error(origin, n, format!("cannot use a '{}'", &c[1])))?;
            let id = Identifier::from_serialized_id(&c[2]).map_err(|e| line_error(origin, n, e))?;
            let decl = UseDecl { kind, id };
            if !uses.contains(&decl) {
                uses.push(decl);
            }
        } else if let Some(c) = OPEN_RE.captures(line) {
            let name = c[2].to_string();
            if declared.contains_key(&name) || tables.contains(&name) {
                return Err(line_error(origin, n, format!("duplicate declaration '{}'", name)));
            }
            match &c[1] {
                "composite" => declared.insert(name, ClassKind::Composite),
                "entity" => declared.insert(name, ClassKind::Entity),
                "index" => declared.insert(name, ClassKind::Index),
                "features" => declared.insert(name, ClassKind::Features),
                _ => {
                    tables.push(name);
                    None
                }
            };
        }
    }
    let namespace =
        namespace.ok_or_else(|| Error::setup(format!("{}: missing namespace line", origin)))?;

    let scope = Scope {
        origin,
        declared,
        uses: &uses,
    };
    let mut declarations = Vec::new();
    let mut open: Option<Open> = None;

    for (n, line) in significant_lines(text) {
        match open.take() {
            None => {
                if NAMESPACE_RE.is_match(line) || USE_RE.is_match(line) {
                    continue;
                }
                let c = OPEN_RE
                    .captures(line)
                    .ok_or_else(|| line_error(origin, n, format!("unexpected '{}'", line)))?;
                let name = c[2].to_string();
                open = Some(match &c[1] {
                    "table" => {
                        if c.get(3).is_some() {
                            return Err(line_error(origin, n, "tables take no parents"));
                        }
                        Open::Table(TableDraft {
                            line: n,
                            entity: None,
                            decl: TableDecl::new(name, Identifier::local("")),
                        })
                    }
                    keyword => {
                        let kind = scope.declared[&name];
                        let mut class = ClassDef::new(kind, name);
                        if let Some(parents) = c.get(3) {
                            if kind != ClassKind::Entity {
                                return Err(line_error(
                                    origin,
                                    n,
                                    format!("{} classes take no parents", keyword),
                                ));
                            }
                            for p in parents.as_str().split(',').map(str::trim) {
                                if !p.is_empty() {
                                    class.parents.push(scope.entity(p, n)?);
                                }
                            }
                        }
                        Open::Class(class, n)
                    }
                });
            }
            Some(Open::Class(mut class, start)) => {
                if line == "}" {
                    declarations.push(Declaration::Class(class));
                    continue;
                }
                if let Some(c) = DOC_RE.captures(line) {
                    class.description = Some(c[1].to_string());
                } else if let Some(c) = ATTR_RE.captures(line) {
                    let is_identifier = c.get(1).is_some();
                    if is_identifier && class.kind != ClassKind::Entity {
                        return Err(line_error(origin, n, "only entities have id attributes"));
                    }
                    let mut value = scope.value(&c[4], n)?;
                    if c.get(3).is_some() {
                        value = AttrValue::nullable(value);
                    }
                    class.members.push(Member::Attr(super::model::Attr {
                        name: c[2].to_string(),
                        value,
                        is_identifier,
                    }));
                } else if let Some(c) = HELPER_RE.captures(line) {
                    class.members.push(Member::Helper {
                        name: c[1].to_string(),
                        expr: c[2].trim().to_string(),
                    });
                } else {
                    return Err(line_error(
                        origin,
                        n,
                        format!("cannot parse '{}' in class opened at line {}", line, start),
                    ));
                }
                open = Some(Open::Class(class, start));
            }
            Some(Open::Table(mut draft)) => {
                if line == "}" {
                    let entity = draft.entity.take().ok_or_else(|| {
                        line_error(
                            origin,
                            draft.line,
                            format!("table '{}' has no entity", draft.decl.name),
                        )
                    })?;
                    draft.decl.entity = entity;
                    declarations.push(Declaration::Table(draft.decl));
                    continue;
                }
                if let Some(c) = DOC_RE.captures(line) {
                    draft.decl.description = Some(c[1].to_string());
                } else if let Some(c) = KEY_RE.captures(line) {
                    let table =
                        Identifier::from_serialized_id(&c[2]).map_err(|e| line_error(origin, n, e))?;
                    draft.decl.entity_key_table_map.insert(c[1].to_string(), table);
                } else if let Some(c) = TABLE_FIELD_RE.captures(line) {
                    let value = c[2].trim();
                    match &c[1] {
                        "entity" => draft.entity = Some(scope.entity(value, n)?),
                        "features" => {
                            draft.decl.features =
                                Some(scope.local_class(value, ClassKind::Features, n)?)
                        }
                        "index" => {
                            draft.decl.index = Some(scope.local_class(value, ClassKind::Index, n)?)
                        }
                        "partition" => {
                            draft.decl.partitioning_cols = Some(
                                value
                                    .split(',')
                                    .map(str::trim)
                                    .filter(|s| !s.is_empty())
                                    .map(String::from)
                                    .collect(),
                            )
                        }
                        _ => {
                            let rows = value.parse::<u64>().map_err(|_| {
                                line_error(origin, n, format!("max_rows '{}' is not a count", value))
                            })?;
                            draft.decl.max_partition_size = Some(rows);
                        }
                    }
                } else {
                    return Err(line_error(
                        origin,
                        n,
                        format!("cannot parse '{}' in table '{}'", line, draft.decl.name),
                    ));
                }
                open = Some(Open::Table(draft));
            }
        }
    }

    match open {
        Some(Open::Class(class, start)) => Err(line_error(
            origin,
            start,
            format!("class '{}' is never closed", class.name),
        )),
        Some(Open::Table(draft)) => Err(line_error(
            origin,
            draft.line,
            format!("table '{}' is never closed", draft.decl.name),
        )),
        None => Ok(ScriptModule {
            namespace,
            source: None,
            uses,
            declarations,
        }),
    }
}

/// Read and parse a `.ds` file.
pub fn parse_file(path: &Path) -> Result<ScriptModule> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let mut module = parse_module(&text, &path.display().to_string())?;
    module.source = Some(path.to_path_buf());
    Ok(module)
}
