//! The Tag object is an annotated tag: a named, signed pointer at another
//! object (almost always a commit), distinct from a lightweight tag ref
//! which is just a ref pointing directly at the object.

use std::fmt::Display;
use std::str::FromStr;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;
use crate::hash::ObjectHash;
use crate::internal::object::signature::Signature;
use crate::internal::object::types::ObjectType;
use crate::internal::object::ObjectTrait;

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Tag {
    pub id: ObjectHash,
    pub object_id: ObjectHash,
    pub object_type: ObjectType,
    pub tag_name: String,
    pub tagger: Signature,
    pub message: String,
}

impl Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        writeln!(f, "object {}", self.object_id)?;
        writeln!(f, "type {}", self.object_type)?;
        writeln!(f, "tag {}", self.tag_name)?;
        writeln!(f, "tagger {}", self.tagger)?;
        write!(f, "{}", self.message)
    }
}

impl Tag {
    pub fn new(
        object_id: ObjectHash,
        object_type: ObjectType,
        tag_name: &str,
        tagger: Signature,
        message: &str,
    ) -> Tag {
        let mut tag = Tag {
            id: ObjectHash::default(),
            object_id,
            object_type,
            tag_name: tag_name.to_string(),
            tagger,
            message: message.to_string(),
        };
        let data = tag.to_data().unwrap();
        tag.id = ObjectHash::from_type_and_data(ObjectType::Tag, &data);
        tag
    }
}

impl ObjectTrait for Tag {
    fn from_bytes(data: &[u8], hash: ObjectHash) -> Result<Self, GitError>
    where
        Self: Sized,
    {
        let mut rest = data;

        let object_end = rest
            .find_byte(0x0a)
            .ok_or_else(|| GitError::Corrupt("tag missing `object` line".into()))?;
        let object_id = ObjectHash::from_str(
            std::str::from_utf8(&rest[7..object_end]) // "object " is 7 bytes
                .map_err(|e| GitError::Corrupt(format!("tag object id is not utf-8: {e}")))?,
        )
        .map_err(GitError::Corrupt)?;
        rest = &rest[object_end + 1..];

        let type_end = rest
            .find_byte(0x0a)
            .ok_or_else(|| GitError::Corrupt("tag missing `type` line".into()))?;
        let object_type = ObjectType::from_str_token(
            std::str::from_utf8(&rest[5..type_end]) // "type " is 5 bytes
                .map_err(|e| GitError::Corrupt(format!("tag type is not utf-8: {e}")))?,
        )?;
        rest = &rest[type_end + 1..];

        let tag_end = rest
            .find_byte(0x0a)
            .ok_or_else(|| GitError::Corrupt("tag missing `tag` line".into()))?;
        let tag_name = String::from_utf8(rest[4..tag_end].to_vec()) // "tag " is 4 bytes
            .map_err(|e| GitError::Corrupt(format!("tag name is not utf-8: {e}")))?;
        rest = &rest[tag_end + 1..];

        let tagger_end = rest
            .find_byte(0x0a)
            .ok_or_else(|| GitError::Corrupt("tag missing `tagger` line".into()))?;
        let tagger = Signature::from_data(rest[..tagger_end].to_vec())?;
        rest = &rest[tagger_end + 1..];

        let message = String::from_utf8(rest.to_vec())
            .map_err(|e| GitError::Corrupt(format!("tag message is not utf-8: {e}")))?;

        Ok(Tag {
            id: hash,
            object_id,
            object_type,
            tag_name,
            tagger,
            message,
        })
    }

    fn get_type(&self) -> ObjectType {
        ObjectType::Tag
    }

    fn get_size(&self) -> usize {
        0
    }

    fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let mut data = Vec::new();
        data.extend(b"object ");
        data.extend(self.object_id.to_string().as_bytes());
        data.extend(&[0x0a]);
        data.extend(b"type ");
        data.extend(self.object_type.as_str().as_bytes());
        data.extend(&[0x0a]);
        data.extend(b"tag ");
        data.extend(self.tag_name.as_bytes());
        data.extend(&[0x0a]);
        data.extend(self.tagger.to_data()?);
        data.extend(&[0x0a]);
        data.extend(self.message.as_bytes());
        Ok(data)
    }
}
