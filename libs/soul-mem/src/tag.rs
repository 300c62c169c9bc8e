// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::hash::{Hash, Hasher};

const FNV1A_OFFSET: u32 = 0x811C_9DC5;
const FNV1A_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a over the label bytes, usable in `const` contexts.
pub const fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash = FNV1A_OFFSET;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u32;
        hash = hash.wrapping_mul(FNV1A_PRIME);
        i += 1;
    }
    hash
}

/// Identifies an allocation category by the FNV-1a hash of its label.
///
/// Tags are cheap value objects. Equality and hashing consider the hash only;
/// the human-readable label travels alongside it in debug builds when the tag
/// was created from a string literal.
#[derive(Clone, Copy)]
pub struct MemoryTag {
    hash: u32,
    #[cfg(debug_assertions)]
    label: Option<&'static str>,
}

impl MemoryTag {
    /// Tag for a string literal, hashed at compile time.
    #[must_use]
    pub const fn literal(label: &'static str) -> Self {
        Self {
            hash: fnv1a(label.as_bytes()),
            #[cfg(debug_assertions)]
            label: Some(label),
        }
    }

    /// Tag for a label only known at runtime. Carries no debug label because
    /// the tag must not borrow from the caller.
    #[must_use]
    pub fn runtime(label: &str) -> Self {
        Self {
            hash: fnv1a(label.as_bytes()),
            #[cfg(debug_assertions)]
            label: None,
        }
    }

    /// Tag from a precomputed hash.
    #[must_use]
    pub const fn from_hash(hash: u32) -> Self {
        Self {
            hash,
            #[cfg(debug_assertions)]
            label: None,
        }
    }

    #[must_use]
    pub const fn hash_value(&self) -> u32 {
        self.hash
    }

    /// The originating label, if this tag was built from a literal in a debug
    /// build.
    #[must_use]
    pub fn label(&self) -> Option<&'static str> {
        #[cfg(debug_assertions)]
        {
            self.label
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    }
}

impl PartialEq for MemoryTag {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for MemoryTag {}

impl Hash for MemoryTag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Debug for MemoryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("MemoryTag");
        dbg.field("hash", &self.hash);
        if let Some(label) = self.label() {
            dbg.field("label", &label);
        }
        dbg.finish()
    }
}

impl fmt::Display for MemoryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => f.write_str(label),
            None => write!(f, "{}", self.hash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_reference_values() {
        // Reference vectors for 32-bit FNV-1a.
        assert_eq!(fnv1a(b""), 0x811C_9DC5);
        assert_eq!(fnv1a(b"a"), 0xE40C_292C);
        assert_eq!(fnv1a(b"foobar"), 0xBF9C_F968);
    }

    #[test]
    fn literal_and_runtime_tags_agree() {
        const LITERAL: MemoryTag = MemoryTag::literal("Renderer");
        assert_eq!(LITERAL, MemoryTag::runtime("Renderer"));
        assert_eq!(LITERAL, MemoryTag::from_hash(fnv1a(b"Renderer")));
        assert_ne!(LITERAL, MemoryTag::literal("Audio"));
    }

    #[test]
    fn equality_ignores_label() {
        let by_hash = MemoryTag::from_hash(MemoryTag::literal("Physics").hash_value());
        assert_eq!(by_hash, MemoryTag::literal("Physics"));
    }
}
