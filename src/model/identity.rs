//! Identity strings for classes, fields, and methods.
//!
//! ```text
//! class   com/x/Foo
//! field   com/x/Foo::bar:I
//! method  com/x/Foo::baz()V
//! ```
//!
//! Owner and member names escape `\`, `:` and `(` with a backslash, so an
//! identity splits back into its parts even when a (legal) JVM name
//! contains one of the separators. Descriptors are never escaped; nothing
//! follows them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wrap an identity string read back from storage.
    pub fn from_stored(value: String) -> Self {
        Identity(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// True for field and method identities.
    pub fn is_member(&self) -> bool {
        find_unescaped(&self.0, "::").is_some()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn escape(name: &str, out: &mut String) {
    for c in name.chars() {
        if matches!(c, '\\' | ':' | '(') {
            out.push('\\');
        }
        out.push(c);
    }
}

fn unescape(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Byte offset of the first occurrence of `needle` not preceded by an
/// escaping backslash.
fn find_unescaped(haystack: &str, needle: &str) -> Option<usize> {
    let bytes = haystack.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i..].starts_with(needle.as_bytes()) {
            return Some(i);
        }
        i += 1;
    }
    None
}

/// Identity of a class given its internal (`/`-separated) or binary
/// (`.`-separated) name.
pub fn class_identity(internal_name: &str) -> Identity {
    let canonical = internal_name.replace('.', "/");
    let mut out = String::with_capacity(canonical.len());
    escape(&canonical, &mut out);
    Identity(out)
}

pub fn field_identity(owner: &Identity, name: &str, descriptor: &str) -> Identity {
    let mut out = String::with_capacity(owner.0.len() + name.len() + descriptor.len() + 3);
    out.push_str(&owner.0);
    out.push_str("::");
    escape(name, &mut out);
    out.push(':');
    out.push_str(descriptor);
    Identity(out)
}

pub fn method_identity(owner: &Identity, name: &str, descriptor: &str) -> Identity {
    let mut out = String::with_capacity(owner.0.len() + name.len() + descriptor.len() + 2);
    out.push_str(&owner.0);
    out.push_str("::");
    escape(name, &mut out);
    out.push_str(descriptor);
    Identity(out)
}

fn split_owner(identity: &str) -> Result<(Identity, &str)> {
    let at = find_unescaped(identity, "::")
        .ok_or_else(|| Error::MalformedIdentity(identity.to_string()))?;
    if at == 0 {
        return Err(Error::MalformedIdentity(identity.to_string()));
    }
    Ok((Identity(identity[..at].to_string()), &identity[at + 2..]))
}

/// Inverse of [`field_identity`]: `(owner, name, descriptor)`.
pub fn split_field_identity(identity: &str) -> Result<(Identity, String, String)> {
    let malformed = || Error::MalformedIdentity(identity.to_string());
    let (owner, member) = split_owner(identity)?;
    let at = find_unescaped(member, ":").ok_or_else(malformed)?;
    let descriptor = &member[at + 1..];
    if at == 0 || descriptor.is_empty() {
        return Err(malformed());
    }
    Ok((owner, unescape(&member[..at]), descriptor.to_string()))
}

/// Inverse of [`method_identity`]: `(owner, name, descriptor)`.
pub fn split_method_identity(identity: &str) -> Result<(Identity, String, String)> {
    let malformed = || Error::MalformedIdentity(identity.to_string());
    let (owner, member) = split_owner(identity)?;
    let at = find_unescaped(member, "(").ok_or_else(malformed)?;
    let descriptor = &member[at..];
    if at == 0 || !descriptor.contains(')') {
        return Err(malformed());
    }
    Ok((owner, unescape(&member[..at]), descriptor.to_string()))
}

/// Internal name of the class a class identity denotes.
pub fn class_name(identity: &Identity) -> String {
    unescape(&identity.0)
}
