// Copyright (c) The resilient-test-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The opaque test identity that flows through every component of the
//! scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque string that uniquely names a test within one worker binary.
///
/// `TestId` is stable across runs and is never parsed by the core: it is
/// handed back and forth between the queue, the supervisors, and the sink
/// purely as a key.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(String);

impl TestId {
    /// Creates a new test identity from anything that converts to a `String`.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identity as a plain string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes this `TestId`, returning the underlying `String`.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for TestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TestId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl AsRef<str> for TestId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_serde_as_a_bare_string() {
        let id = TestId::new("suite::test_one");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"suite::test_one\"");
        let back: TestId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn display_matches_as_str() {
        let id = TestId::new("a::b");
        assert_eq!(id.to_string(), id.as_str());
    }
}
