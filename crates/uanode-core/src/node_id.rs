//! Node identifiers.
//!
//! A node id is a namespace index plus an identifier. The text form follows
//! the usual OPC UA notation:
//!
//! - `i=1010` numeric
//! - `s=Temperature` string
//! - `b=1020ffab` opaque bytes, hex encoded
//!
//! optionally prefixed with `ns=<index>;`. Without the prefix the namespace
//! index is 0.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Namespace index used for nodes created by the server application.
pub const APP_NAMESPACE: u16 = 1;

/// The identifier part of a [`NodeId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identifier {
    Numeric(u32),
    String(String),
    Opaque(Vec<u8>),
}

/// A unique node identifier within the address space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: Identifier,
}

/// Errors produced while parsing a node id from text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NodeIdParseError {
    #[error("node id is empty")]
    Empty,

    #[error("invalid namespace index in '{0}'")]
    InvalidNamespace(String),

    #[error("unknown identifier kind in '{0}', expected i=, s= or b=")]
    UnknownKind(String),

    #[error("invalid numeric identifier in '{0}'")]
    InvalidNumeric(String),

    #[error("invalid opaque identifier in '{0}'")]
    InvalidOpaque(String),
}

impl NodeId {
    /// The root of the address space (`i=84`).
    pub const ROOT_FOLDER: u32 = 84;
    /// The folder that holds application objects (`i=85`).
    pub const OBJECTS_FOLDER: u32 = 85;

    pub fn numeric(namespace: u16, value: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(value),
        }
    }

    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(value.into()),
        }
    }

    pub fn opaque(namespace: u16, value: impl Into<Vec<u8>>) -> Self {
        Self {
            namespace,
            identifier: Identifier::Opaque(value.into()),
        }
    }

    pub fn root_folder() -> Self {
        Self::numeric(0, Self::ROOT_FOLDER)
    }

    pub fn objects_folder() -> Self {
        Self::numeric(0, Self::OBJECTS_FOLDER)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};", self.namespace)?;
        }
        match &self.identifier {
            Identifier::Numeric(v) => write!(f, "i={}", v),
            Identifier::String(v) => write!(f, "s={}", v),
            Identifier::Opaque(v) => write!(f, "b={}", hex::encode(v)),
        }
    }
}

impl FromStr for NodeId {
    type Err = NodeIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // String identifiers are taken verbatim, so only leading space is dropped.
        let s = s.trim_start();
        if s.trim_end().is_empty() {
            return Err(NodeIdParseError::Empty);
        }

        let (namespace, rest) = match s.strip_prefix("ns=") {
            Some(tail) => {
                let (ns, rest) = tail
                    .split_once(';')
                    .ok_or_else(|| NodeIdParseError::InvalidNamespace(s.to_string()))?;
                let ns = ns
                    .parse::<u16>()
                    .map_err(|_| NodeIdParseError::InvalidNamespace(s.to_string()))?;
                (ns, rest)
            }
            None => (0, s),
        };

        let identifier = if let Some(v) = rest.strip_prefix("i=") {
            let n = v
                .trim_end()
                .parse::<u32>()
                .map_err(|_| NodeIdParseError::InvalidNumeric(s.to_string()))?;
            Identifier::Numeric(n)
        } else if let Some(v) = rest.strip_prefix("s=") {
            Identifier::String(v.to_string())
        } else if let Some(v) = rest.strip_prefix("b=") {
            let bytes = hex::decode(v.trim_end()).map_err(|_| NodeIdParseError::InvalidOpaque(s.to_string()))?;
            Identifier::Opaque(bytes)
        } else {
            return Err(NodeIdParseError::UnknownKind(s.to_string()));
        };

        Ok(Self {
            namespace,
            identifier,
        })
    }
}

// Node ids travel as their text form on the wire.
impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
