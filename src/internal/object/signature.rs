//! Author/committer signatures: `"<role> <name> <<email>> <timestamp> <tz>"`.

use std::fmt::Display;

use bstr::ByteSlice;
use serde::{Deserialize, Serialize};

use crate::errors::GitError;

/// Which role a [`Signature`] was parsed from or is being written as.
/// The role decides the leading token `to_data` emits; it is not itself
/// part of object identity.
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum SignatureKind {
    Author,
    Committer,
    Tagger,
}

impl SignatureKind {
    fn as_str(&self) -> &'static str {
        match self {
            SignatureKind::Author => "author",
            SignatureKind::Committer => "committer",
            SignatureKind::Tagger => "tagger",
        }
    }
}

#[derive(PartialEq, Eq, Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub kind: SignatureKind,
    pub name: String,
    pub email: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Raw timezone offset token, e.g. `+0800`.
    pub timezone: String,
}

impl Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} <{}> {} {}",
            self.name, self.email, self.timestamp, self.timezone
        )
    }
}

impl Signature {
    pub fn new(kind: SignatureKind, name: &str, email: &str, timestamp: i64) -> Signature {
        Signature {
            kind,
            name: name.to_string(),
            email: email.to_string(),
            timestamp,
            timezone: "+0000".to_string(),
        }
    }

    /// Parses a line of the form `"author Name <email> 1700000000 +0800"`
    /// (the leading role token determines [`SignatureKind`]).
    pub fn from_data(data: Vec<u8>) -> Result<Signature, GitError> {
        let text = String::from_utf8(data)
            .map_err(|e| GitError::Corrupt(format!("signature is not valid utf-8: {e}")))?;

        let mut parts = text.splitn(2, ' ');
        let role = parts.next().unwrap_or_default();
        let kind = match role {
            "author" => SignatureKind::Author,
            "committer" => SignatureKind::Committer,
            "tagger" => SignatureKind::Tagger,
            other => {
                return Err(GitError::Corrupt(format!(
                    "expected `author`, `committer`, or `tagger`, found `{other}`"
                )));
            }
        };
        let rest = parts
            .next()
            .ok_or_else(|| GitError::Corrupt("truncated signature line".to_string()))?;

        let email_start = rest
            .find('<')
            .ok_or_else(|| GitError::Corrupt("signature missing `<email>`".to_string()))?;
        let email_end = rest
            .find('>')
            .ok_or_else(|| GitError::Corrupt("signature missing closing `>`".to_string()))?;
        let name = rest[..email_start].trim().to_string();
        let email = rest[email_start + 1..email_end].to_string();

        let tail = rest[email_end + 1..].trim();
        let mut tail_parts = tail.splitn(2, ' ');
        let timestamp: i64 = tail_parts
            .next()
            .unwrap_or("0")
            .trim()
            .parse()
            .map_err(|_| GitError::Corrupt("signature timestamp is not an integer".to_string()))?;
        let timezone = tail_parts.next().unwrap_or("+0000").trim().to_string();

        Ok(Signature {
            kind,
            name,
            email,
            timestamp,
            timezone,
        })
    }

    pub fn to_data(&self) -> Result<Vec<u8>, GitError> {
        let line = format!(
            "{} {} <{}> {} {}",
            self.kind.as_str(),
            self.name,
            self.email,
            self.timestamp,
            self.timezone
        );
        Ok(line.into_bytes())
    }
}

/// Splits a raw byte slice on the first newline, convenience for callers
/// that hold a signature line still embedded in a larger buffer.
pub fn split_first_line(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let pos = data.find_byte(0x0a)?;
    Some((&data[..pos], &data[pos + 1..]))
}
