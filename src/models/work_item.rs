//! Work item identity
//!
//! Derives the ownership key of a test or suite from its title path.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Separator used when a full title path is collapsed into one key
pub const PATH_SEPARATOR: &str = ">>>";

/// Prefix of a serial group tag, e.g. `[serial]` or `[serial:db]`
const SERIAL_TAG_PREFIX: &str = "[serial";

/// Errors raised while deriving a work item key
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkItemError {
    #[error("Work item path is empty")]
    EmptyPath,

    #[error("Work item path has an empty title at position {0}")]
    EmptyTitle(usize),
}

/// Identifier of one distributed run of the whole suite
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(String);

impl ExecutionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a worker process competing for work items
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random owner id (16 random bytes, hex encoded)
    pub fn random() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(bytes.iter().map(|b| format!("{b:02x}")).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unit size used for ownership claims
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Every test is claimed independently
    #[default]
    Test,
    /// Every top-level suite is claimed as a block
    Suite,
}

impl Granularity {
    /// Parse a granularity name. Anything other than `test` selects suite granularity.
    pub fn from_str(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("test") {
            Granularity::Test
        } else {
            Granularity::Suite
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Granularity::Test => "test",
            Granularity::Suite => "suite",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Canonical ownership key of a test or suite within one execution
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemKey(String);

impl WorkItemKey {
    /// Derive the key for a title path (root suite first, test title last).
    ///
    /// The outermost title carrying a serial tag wins over granularity: every
    /// unit below a `[serial:x]` title, or itself tagged `[serial:x]`, shares
    /// the key `[serial:x]`.
    pub fn derive<S: AsRef<str>>(
        path: &[S],
        granularity: Granularity,
    ) -> Result<Self, WorkItemError> {
        if path.is_empty() {
            return Err(WorkItemError::EmptyPath);
        }

        for (i, title) in path.iter().enumerate() {
            if title.as_ref().trim().is_empty() {
                return Err(WorkItemError::EmptyTitle(i));
            }
        }

        if let Some(tag) = path.iter().find_map(|t| serial_tag(t.as_ref())) {
            return Ok(Self(tag.to_string()));
        }

        let key = match granularity {
            Granularity::Test => path
                .iter()
                .map(|t| t.as_ref())
                .collect::<Vec<_>>()
                .join(PATH_SEPARATOR),
            Granularity::Suite => path[0].as_ref().to_string(),
        };

        Ok(Self(key))
    }

    /// Wrap a key received over the wire. Empty keys are rejected.
    pub fn parse(raw: impl Into<String>) -> Result<Self, WorkItemError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(WorkItemError::EmptyPath);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this key was produced by a serial group tag
    pub fn is_serial_group(&self) -> bool {
        serial_tag(&self.0) == Some(self.0.as_str())
    }
}

impl fmt::Display for WorkItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract a `[serial]` / `[serial:group]` tag embedded anywhere in a title
pub fn serial_tag(title: &str) -> Option<&str> {
    let mut offset = 0;
    while let Some(pos) = title[offset..].find(SERIAL_TAG_PREFIX) {
        let start = offset + pos;
        let rest = &title[start + SERIAL_TAG_PREFIX.len()..];

        if rest.starts_with(']') {
            return Some(&title[start..start + SERIAL_TAG_PREFIX.len() + 1]);
        }
        if let Some(group) = rest.strip_prefix(':') {
            if let Some(end) = group.find(']') {
                if end > 0 && !group[..end].contains('[') {
                    let tag_len = SERIAL_TAG_PREFIX.len() + 1 + end + 1;
                    return Some(&title[start..start + tag_len]);
                }
            }
        }

        offset = start + SERIAL_TAG_PREFIX.len();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granularity_collapse() {
        let t1 = ["Suite A", "test 1"];
        let t2 = ["Suite A", "test 2"];

        let s1 = WorkItemKey::derive(&t1, Granularity::Suite).unwrap();
        let s2 = WorkItemKey::derive(&t2, Granularity::Suite).unwrap();
        assert_eq!(s1, s2);
        assert_eq!(s1.as_str(), "Suite A");

        let k1 = WorkItemKey::derive(&t1, Granularity::Test).unwrap();
        let k2 = WorkItemKey::derive(&t2, Granularity::Test).unwrap();
        assert_ne!(k1, k2);
        assert_eq!(k1.as_str(), "Suite A>>>test 1");
    }

    #[test]
    fn test_serial_group_override() {
        let a = ["Suite A", "[serial:g] a"];
        let b = ["Other", "nested", "[serial:g] b"];

        for granularity in [Granularity::Test, Granularity::Suite] {
            let ka = WorkItemKey::derive(&a, granularity).unwrap();
            let kb = WorkItemKey::derive(&b, granularity).unwrap();
            assert_eq!(ka.as_str(), "[serial:g]");
            assert_eq!(ka, kb);
            assert!(ka.is_serial_group());
        }
    }

    #[test]
    fn test_outermost_serial_tag_wins() {
        let path = ["[serial] suite-6", "[serial:odd-worker] test-6.1"];
        let key = WorkItemKey::derive(&path, Granularity::Test).unwrap();
        assert_eq!(key.as_str(), "[serial]");
    }

    #[test]
    fn test_serial_tag_parsing() {
        assert_eq!(serial_tag("[serial] test-5.0"), Some("[serial]"));
        assert_eq!(serial_tag("x [serial:even-worker] y"), Some("[serial:even-worker]"));
        assert_eq!(serial_tag("[serializer] test"), None);
        assert_eq!(serial_tag("[serial:] test"), None);
        assert_eq!(serial_tag("[serial:open"), None);
        assert_eq!(serial_tag("[serialize] then [serial:db]"), Some("[serial:db]"));
    }

    #[test]
    fn test_invalid_paths() {
        let empty: [&str; 0] = [];
        assert_eq!(
            WorkItemKey::derive(&empty, Granularity::Test),
            Err(WorkItemError::EmptyPath)
        );
        assert_eq!(
            WorkItemKey::derive(&["Suite", "  "], Granularity::Test),
            Err(WorkItemError::EmptyTitle(1))
        );
        assert!(WorkItemKey::parse("").is_err());
    }

    #[test]
    fn test_granularity_from_str() {
        assert_eq!(Granularity::from_str("test"), Granularity::Test);
        assert_eq!(Granularity::from_str("TEST"), Granularity::Test);
        assert_eq!(Granularity::from_str("suite"), Granularity::Suite);
        assert_eq!(Granularity::from_str("anything"), Granularity::Suite);
    }

    #[test]
    fn test_random_owner_id() {
        let a = OwnerId::random();
        let b = OwnerId::random();
        assert_eq!(a.as_str().len(), 32);
        assert_ne!(a, b);
    }
}
