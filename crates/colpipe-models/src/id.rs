use std::fmt;
use std::str::FromStr;

/// Id is a surrogate identifier shared by every persisted entity:
/// Collections, Selections, Runners, ProcessingEngine invocations,
/// Catalogs and Blobs. It's a thin, serde- and sqlx-aware wrapper
/// around a `Uuid` so call sites never juggle bare `Uuid` values that
/// happen to belong to unrelated tables.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct Id(uuid::Uuid);

impl Id {
    pub fn new(inner: uuid::Uuid) -> Self {
        Self(inner)
    }

    /// Generates a new, random Id. Every entity constructor in this
    /// crate calls this rather than accepting caller-supplied ids, so
    /// that ids remain an internal implementation detail of storage.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> uuid::Uuid {
        self.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Id {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(uuid::Uuid::parse_str(s)?))
    }
}

impl serde::Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        uuid::Uuid::deserialize(deserializer).map(Self)
    }
}
