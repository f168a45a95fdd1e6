//! Source units: the addressable input records being analyzed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable composite key for a source unit: (book, chapter, verse).
///
/// Immutable once created. Units are never deleted, so this key can be
/// used as a durable fingerprint input across consolidation runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitKey {
    /// Document name (e.g., "Genesis")
    pub book: String,

    /// Subdivision within the document
    pub chapter: u32,

    /// Ordinal within the subdivision
    pub verse: u32,
}

impl UnitKey {
    /// Create a new unit key.
    pub fn new(book: impl Into<String>, chapter: u32, verse: u32) -> Self {
        Self {
            book: book.into(),
            chapter,
            verse,
        }
    }

    /// Group key for maintenance passes (per-chapter grouping).
    pub fn group(&self) -> GroupKey {
        GroupKey {
            book: self.book.clone(),
            chapter: self.chapter,
        }
    }

    /// Content-independent fingerprint of the key.
    ///
    /// Used by consolidation to detect re-runs: identifiers are
    /// reassigned every merge, so identity must come from the key.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.book.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.chapter.to_le_bytes());
        hasher.update(self.verse.to_le_bytes());
        hex_digest(hasher)
    }
}

impl std::fmt::Display for UnitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}:{}", self.book, self.chapter, self.verse)
    }
}

/// Logical grouping of units for recovery and health checks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub book: String,
    pub chapter: u32,
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.book, self.chapter)
    }
}

/// One addressable unit of input text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceUnit {
    /// Store-assigned identifier. Zero until inserted.
    pub id: i64,

    /// Stable composite key
    pub key: UnitKey,

    /// The text being analyzed
    pub text: String,

    /// When the unit was first ingested
    pub created_at: DateTime<Utc>,
}

impl SourceUnit {
    /// Create a unit that has not yet been persisted.
    pub fn new(key: UnitKey, text: impl Into<String>) -> Self {
        Self {
            id: 0,
            key,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

pub(crate) fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
