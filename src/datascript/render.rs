//! TB-009: Datascript text renderer. Output parses back to an equal module.

use super::model::{AttrValue, ClassDef, Declaration, Member, ScriptModule, TableDecl};
use crate::schema::identifier::Identifier;
use std::fmt::Write;

const INDENT: &str = "  ";

fn reference(id: &Identifier) -> String {
    if id.is_local() {
        id.obj_id().to_string()
    } else {
        id.serialized_id()
    }
}

fn type_token(value: &AttrValue) -> String {
    match value {
        AttrValue::Primitive(kind) => kind.to_string(),
        AttrValue::Entity(id) | AttrValue::Index(id) | AttrValue::Composite(id) => reference(id),
        AttrValue::Nullable(inner) => format!("nullable {}", type_token(inner)),
    }
}

fn doc_line(out: &mut String, description: &Option<String>) {
    if let Some(text) = description {
        let _ = writeln!(out, "{}doc: \"{}\"", INDENT, text.replace('\n', " "));
    }
}

fn render_class(out: &mut String, class: &ClassDef) {
    let _ = write!(out, "{} {}", class.kind, class.name);
    if !class.parents.is_empty() {
        let parents: Vec<String> = class.parents.iter().map(reference).collect();
        let _ = write!(out, "({})", parents.join(", "));
    }
    out.push_str(" {\n");
    doc_line(out, &class.description);
    for member in &class.members {
        match member {
            Member::Attr(a) => {
                let id = if a.is_identifier { "id " } else { "" };
                let _ = writeln!(out, "{}{}{}: {}", INDENT, id, a.name, type_token(&a.value));
            }
            Member::Helper { name, expr } => {
                let _ = writeln!(out, "{}{} = {}", INDENT, name, expr);
            }
        }
    }
    out.push_str("}\n");
}

fn render_table(out: &mut String, table: &TableDecl) {
    let _ = writeln!(out, "table {} {{", table.name);
    doc_line(out, &table.description);
    let _ = writeln!(out, "{}entity: {}", INDENT, reference(&table.entity));
    if let Some(ref index) = table.index {
        let _ = writeln!(out, "{}index: {}", INDENT, reference(index));
    }
    if let Some(ref features) = table.features {
        let _ = writeln!(out, "{}features: {}", INDENT, reference(features));
    }
    if let Some(ref cols) = table.partitioning_cols {
        let _ = writeln!(out, "{}partition: {}", INDENT, cols.join(", "));
    }
    if let Some(rows) = table.max_partition_size {
        let _ = writeln!(out, "{}max_rows: {}", INDENT, rows);
    }
    for (prefix, target) in &table.entity_key_table_map {
        let _ = writeln!(out, "{}key {}: {}", INDENT, prefix, target.serialized_id());
    }
    out.push_str("}\n");
}

/// Render a module as datascript text.
pub fn render_module(module: &ScriptModule) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "namespace {}", module.namespace);
    if !module.uses.is_empty() {
        out.push('\n');
        for u in &module.uses {
            let _ = writeln!(out, "use {} {}", u.kind.keyword(), u.id.serialized_id());
        }
    }
    for decl in &module.declarations {
        out.push('\n');
        match decl {
            Declaration::Class(c) => render_class(&mut out, c),
            Declaration::Table(t) => render_table(&mut out, t),
        }
    }
    out
}
