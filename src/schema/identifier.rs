//! TB-001: Identifier model for `(artifact, namespace, object)` addresses.
//!
//! A missing artifact or namespace means "local to the current resolution
//! context". An identifier that names an artifact always names a namespace
//! too; the constructors make the other combination unrepresentable.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Separator between the parts of a serialized identifier.
pub const ID_SEPARATOR: char = '/';

/// Resolution context: the artifact and namespace an identifier is read in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IdBase {
    artifact: Option<String>,
    namespace: Option<String>,
}

impl IdBase {
    /// Fully local context.
    pub fn local() -> Self {
        Self::default()
    }

    /// A namespace of the current artifact.
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            artifact: None,
            namespace: Some(namespace.into()),
        }
    }

    /// A namespace of a named artifact.
    pub fn artifact(artifact: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            artifact: Some(artifact.into()),
            namespace: Some(namespace.into()),
        }
    }

    pub fn artifact_name(&self) -> Option<&str> {
        self.artifact.as_deref()
    }

    pub fn namespace_name(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Address an object inside this context.
    pub fn to_id(&self, name: impl Into<String>) -> Identifier {
        Identifier {
            artifact: self.artifact.clone(),
            namespace: self.namespace.clone(),
            obj_id: name.into(),
        }
    }
}

/// Address of a schema atom.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier {
    artifact: Option<String>,
    namespace: Option<String>,
    obj_id: String,
}

impl Identifier {
    /// Build from optional parts, rejecting an artifact without a namespace.
    pub fn new(
        artifact: Option<String>,
        namespace: Option<String>,
        obj_id: impl Into<String>,
    ) -> Result<Self> {
        let obj_id = obj_id.into();
        if artifact.is_some() && namespace.is_none() {
            return Err(Error::setup(format!(
                "identifier '{}' names artifact '{}' without a namespace",
                obj_id,
                artifact.unwrap_or_default()
            )));
        }
        Ok(Self {
            artifact,
            namespace,
            obj_id,
        })
    }

    pub fn local(obj_id: impl Into<String>) -> Self {
        IdBase::local().to_id(obj_id)
    }

    pub fn in_namespace(namespace: impl Into<String>, obj_id: impl Into<String>) -> Self {
        IdBase::namespace(namespace).to_id(obj_id)
    }

    pub fn in_artifact(
        artifact: impl Into<String>,
        namespace: impl Into<String>,
        obj_id: impl Into<String>,
    ) -> Self {
        IdBase::artifact(artifact, namespace).to_id(obj_id)
    }

    pub fn artifact(&self) -> Option<&str> {
        self.artifact.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn obj_id(&self) -> &str {
        &self.obj_id
    }

    pub fn is_local(&self) -> bool {
        self.namespace.is_none()
    }

    /// The context this identifier lives in.
    pub fn base(&self) -> IdBase {
        IdBase {
            artifact: self.artifact.clone(),
            namespace: self.namespace.clone(),
        }
    }

    /// Fill in missing artifact/namespace from `base`.
    pub fn absolute_from(&self, base: &IdBase) -> Self {
        match (&self.artifact, &self.namespace) {
            (_, None) => base.to_id(self.obj_id.clone()),
            (None, Some(ns)) => Self {
                artifact: base.artifact.clone(),
                namespace: Some(ns.clone()),
                obj_id: self.obj_id.clone(),
            },
            (Some(_), Some(_)) => self.clone(),
        }
    }

    /// Drop the parts that equal `base`, for compact serialization.
    pub fn relative_to(&self, base: &IdBase) -> Self {
        let artifact = match &self.artifact {
            Some(a) if base.artifact.as_deref() == Some(a.as_str()) => None,
            other => other.clone(),
        };
        let namespace = match &self.namespace {
            Some(ns) if artifact.is_none() && base.namespace.as_deref() == Some(ns.as_str()) => {
                None
            }
            other => other.clone(),
        };
        Self {
            artifact,
            namespace,
            obj_id: self.obj_id.clone(),
        }
    }

    /// Non-null parts joined by [`ID_SEPARATOR`].
    pub fn serialized_id(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(3);
        if let Some(ref a) = self.artifact {
            parts.push(a);
        }
        if let Some(ref ns) = self.namespace {
            parts.push(ns);
        }
        parts.push(&self.obj_id);
        parts.join(&ID_SEPARATOR.to_string())
    }

    /// Inverse of [`Identifier::serialized_id`]. Parts fill object,
    /// namespace and artifact from the right.
    pub fn from_serialized_id(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(ID_SEPARATOR).collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(Error::setup(format!("malformed identifier '{}'", s)));
        }
        match parts.as_slice() {
            [obj] => Ok(Self::local(*obj)),
            [ns, obj] => Ok(Self::in_namespace(*ns, *obj)),
            [art, ns, obj] => Ok(Self::in_artifact(*art, *ns, *obj)),
            _ => Err(Error::setup(format!(
                "identifier '{}' has {} parts, at most 3 allowed",
                s,
                parts.len()
            ))),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.serialized_id())
    }
}

impl FromStr for Identifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_serialized_id(s)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.serialized_id())
    }
}

impl<'de> Deserialize<'de> for Identifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_serialized_id(&s).map_err(serde::de::Error::custom)
    }
}
