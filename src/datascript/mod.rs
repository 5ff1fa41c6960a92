//! Datascript: the in-process declarative schema definition.

pub mod model;
pub mod parser;
pub mod render;

pub use model::{
    Attr, AttrValue, ClassDef, ClassKind, Declaration, Member, ScriptModule, TableDecl, UseDecl,
    UseKind,
};
pub use parser::{parse_file, parse_module};
pub use render::render_module;
