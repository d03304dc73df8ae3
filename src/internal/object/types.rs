//! The object type enumeration shared by the object model and the object
//! store's framing/codec layer.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// One of the four immutable object variants that make up the
/// content-addressed DAG. Values are assigned small integers purely for
/// internal bookkeeping (e.g. sort-stable serialization); they carry no
/// on-disk significance beyond this crate.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    Commit,
    Tree,
    Blob,
    Tag,
}

impl ObjectType {
    /// Lowercase type name as it appears in the framed header
    /// `"<type> <size>\0<payload>"`.
    pub const fn as_str(&self) -> &'static str {
        match self {
            ObjectType::Blob => "blob",
            ObjectType::Tree => "tree",
            ObjectType::Commit => "commit",
            ObjectType::Tag => "tag",
        }
    }

    /// Parse a framed header's type token back into an `ObjectType`.
    pub fn from_str_token(s: &str) -> Result<ObjectType, GitError> {
        match s {
            "blob" => Ok(ObjectType::Blob),
            "tree" => Ok(ObjectType::Tree),
            "commit" => Ok(ObjectType::Commit),
            "tag" => Ok(ObjectType::Tag),
            other => Err(GitError::InvalidArgument(format!(
                "`{other}` is not a valid object type"
            ))),
        }
    }
}

impl Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
