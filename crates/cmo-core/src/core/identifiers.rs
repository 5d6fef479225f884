// crates/cmo-core/src/core/identifiers.rs
// ============================================================================
// Module: CMO/ELG Identifiers
// Description: Canonical opaque identifiers for graphs, runs, steps, and messages.
// Purpose: Provide strongly typed, serializable identifiers with stable wire forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the canonical identifiers used throughout the CMO/ELG
//! engine. Identifiers are opaque and serialize as strings or numbers on the
//! wire; none of them apply normalization beyond what their constructor
//! documents.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Macro: string-backed identifier
// ============================================================================

/// Declares an opaque, string-backed identifier type with the standard set of
/// conversions used throughout the engine.
macro_rules! string_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        ///
        /// # Invariants
        /// - Opaque UTF-8 string; no normalization or validation is applied by this type.
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[doc = concat!("Creates a new ", stringify!($name), ".")]
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

string_id!(TraceId, "Run trace identifier, unique across all runs.");
string_id!(GraphId, "Graph definition identifier.");
string_id!(GraphVersion, "Graph definition version, paired with `GraphId`.");
string_id!(NodeId, "Node identifier, unique within its graph.");
string_id!(EdgeKey, "Edge key, unique among edges sharing a `from` node.");
string_id!(CorrelationId, "Correlation identifier linking request/response envelopes.");
string_id!(AgentId, "Opaque agent identifier used in envelope `from`/`to` fields.");
string_id!(MessageType, "Envelope message type, used to select the payload schema.");
string_id!(Topic, "Transport topic name.");
string_id!(ConsumerGroup, "Transport consumer group name.");
string_id!(PolicyBundleId, "Identifier of a loaded policy bundle.");

// ============================================================================
// SECTION: Step Index
// ============================================================================

/// Zero-based, monotonic step index within a run.
///
/// # Invariants
/// - Contiguous from 0 within a single run's `StepRecord` sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepIndex(u64);

impl StepIndex {
    /// The first step index of any run.
    pub const ZERO: Self = Self(0);

    /// Creates a step index from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw index value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the next contiguous step index.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for StepIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::TraceId;
    use super::StepIndex;

    #[test]
    fn string_id_roundtrips_through_display() {
        let id = TraceId::new("trace-1");
        assert_eq!(id.as_str(), "trace-1");
        assert_eq!(id.to_string(), "trace-1");
    }

    #[test]
    fn step_index_next_is_contiguous() {
        let first = StepIndex::ZERO;
        let second = first.next();
        assert_eq!(first.get(), 0);
        assert_eq!(second.get(), 1);
    }
}
