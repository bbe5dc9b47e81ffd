//! Type-safe identifiers for relay entities.
//!
//! Newtype wrappers prevent mixing incompatible IDs at compile time. The
//! relay juggles two independent id spaces plus an opaque session token:
//!
//! | Type | Assigned by | Purpose |
//! |------|-------------|---------|
//! | [`CommandId`] | Consumer | Echoed verbatim in responses, never reused for relay correlation |
//! | [`RequestId`] | Relay | Correlates relay-to-extension requests with replies |
//! | [`SessionId`] | Extension | Addresses the attached debugger session |
//!
//! [`RequestId`]s come from a [`RequestIdAllocator`] owned by each extension
//! connection: ids start at 1, increment per call, and are never reused for
//! the lifetime of that connection object. A fresh connection gets a fresh
//! allocator, so id spaces restart independently per connection instance.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// CommandId
// ============================================================================

/// Identifier assigned by the consumer to one of its commands.
///
/// Opaque to the relay: it is copied into the matching response unchanged
/// and plays no part in relay-side correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(i64);

impl CommandId {
    /// Creates a command id from its raw wire value.
    #[inline]
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw wire value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// RequestId
// ============================================================================

/// Relay-assigned identifier for a request to the extension.
///
/// Allocated by [`RequestIdAllocator`]; never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Creates a request id from its raw wire value.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw wire value.
    #[inline]
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// RequestIdAllocator
// ============================================================================

/// Monotonic allocator for [`RequestId`]s.
///
/// Starts at 1 and increments per call; ids are never reused within one
/// allocator instance. Thread-safe.
#[derive(Debug)]
pub struct RequestIdAllocator {
    /// Next id to hand out.
    next: AtomicU64,
}

impl RequestIdAllocator {
    /// Creates a new allocator whose first id is 1.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocates the next request id.
    #[inline]
    pub fn next(&self) -> RequestId {
        RequestId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RequestIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SessionId
// ============================================================================

/// Opaque session identifier assigned by the extension on attach.
///
/// Addresses one debugger session (tab/frame); the relay stores and echoes
/// it without interpreting its contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session id from its raw wire value.
    #[inline]
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw wire value.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Tests
// ============================================================================
