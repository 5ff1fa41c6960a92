//! Schema model: identifiers, features, atoms, metadata containers.

pub mod atoms;
pub mod feature;
pub mod identifier;
pub mod lookup;
pub mod metadata;
pub mod version;

pub use atoms::{CompositeType, EntityClass, Table};
pub use feature::{Feature, ForeignKey, ForeignTarget, PrimitiveKind};
pub use identifier::{IdBase, Identifier};
pub use lookup::{Column, SchemaLookup};
pub use metadata::{ArtifactMetadata, NamespaceMetadata};
pub use version::{DataVersion, VersionTag};
