//! Identity types for cached entities and associations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Primary-key value of a persisted row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Identifier {
    Int(i64),
    Uuid(Uuid),
    Text(String),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Int(v) => write!(f, "{}", v),
            Identifier::Uuid(v) => write!(f, "{}", v),
            Identifier::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for Identifier {
    fn from(value: i64) -> Self {
        Identifier::Int(value)
    }
}

impl From<Uuid> for Identifier {
    fn from(value: Uuid) -> Self {
        Identifier::Uuid(value)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Identifier::Text(value.to_string())
    }
}

impl From<String> for Identifier {
    fn from(value: String) -> Self {
        Identifier::Text(value)
    }
}

/// Universal lookup key for both cache levels: (entity type, identifier).
///
/// Created on demand and never mutated. Equality and hashing are by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    type_name: String,
    id: Identifier,
}

impl EntityKey {
    pub fn new(type_name: impl Into<String>, id: impl Into<Identifier>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    /// Key of the named association owned by this entity.
    pub fn association(&self, name: impl Into<String>) -> AssociationKey {
        AssociationKey::new(self.clone(), name)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.type_name, self.id)
    }
}

/// Key of a collection cache entry: the owning entity plus the association name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssociationKey {
    owner: EntityKey,
    name: String,
}

impl AssociationKey {
    pub fn new(owner: EntityKey, name: impl Into<String>) -> Self {
        Self {
            owner,
            name: name.into(),
        }
    }

    pub fn owner(&self) -> &EntityKey {
        &self.owner
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role name shared by every instance of this association, e.g. `Guide.students`.
    pub fn role(&self) -> String {
        format!("{}.{}", self.owner.type_name(), self.name)
    }
}

impl fmt::Display for AssociationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}#{}", self.owner.type_name(), self.name, self.owner.id())
    }
}

/// Optimistic-concurrency version of a persisted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version(pub u64);

impl Version {
    /// Version of a freshly inserted row.
    pub fn initial() -> Self {
        Version(1)
    }

    pub fn next(self) -> Self {
        Version(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_entity_key_equality_by_value() {
        let a = EntityKey::new("Guide", 1);
        let b = EntityKey::new("Guide".to_string(), Identifier::Int(1));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&EntityKey::new("Student", 1)));
    }

    #[test]
    fn test_key_display() {
        let guide = EntityKey::new("Guide", 1);
        assert_eq!(guide.to_string(), "Guide#1");

        let students = guide.association("students");
        assert_eq!(students.to_string(), "Guide.students#1");
        assert_eq!(students.role(), "Guide.students");
        assert_eq!(students.owner(), &guide);
    }

    #[test]
    fn test_identifier_conversions() {
        let id = Uuid::now_v7();
        assert_eq!(Identifier::from(id), Identifier::Uuid(id));
        assert_eq!(Identifier::from("abc"), Identifier::Text("abc".into()));
        assert_eq!(Identifier::from(7).to_string(), "7");
    }

    #[test]
    fn test_version_ordering() {
        let v = Version::initial();
        assert_eq!(v, Version(1));
        assert!(v.next() > v);
        assert_eq!(v.next(), Version(2));
        assert_eq!(v.next().next(), Version(3));
    }
}
