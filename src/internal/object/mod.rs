//! The object model: the four immutable object variants that make up the
//! content-addressed DAG, plus the [`ObjectTrait`] every variant
//! implements so the object store can decode bytes into a strongly typed
//! value without matching on [`ObjectType`] at every call site.

pub mod blob;
pub mod commit;
pub mod signature;
pub mod tag;
pub mod tree;
pub mod types;

use std::fmt::Display;

pub use types::ObjectType;

use crate::{errors::GitError, hash::ObjectHash};

/// Common interface for Blob, Tree, Commit, and Tag.
pub trait ObjectTrait: Send + Sync + Display {
    /// Decodes an object's payload (the bytes after the `"<type> <size>\0"`
    /// frame) given the hash it is already known to have.
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError>
    where
        Self: Sized;

    fn get_type(&self) -> ObjectType;

    fn get_size(&self) -> usize;

    fn to_data(&self) -> Result<Vec<u8>, GitError>;

    /// Computes the object hash from serialized data. Override only if a
    /// variant needs custom hashing; none currently do.
    fn object_hash(&self) -> Result<ObjectHash, GitError> {
        let data = self.to_data()?;
        Ok(ObjectHash::from_type_and_data(self.get_type(), &data))
    }
}
