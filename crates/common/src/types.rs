use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a string-backed identifier owned by another service.
///
/// These ids are opaque to us: the book and patron services mint them and we
/// only carry them around.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates the identifier from any string-like value.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

/// Declares a UUID-backed identifier minted by this platform.
macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Parses an identifier from its hyphenated string form.
            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

string_id!(
    /// Identifier of a book title in the book service.
    BookId
);

string_id!(
    /// Identifier of a patron in the patron service.
    PatronId
);

string_id!(
    /// Identifier of a physical copy of a book.
    ///
    /// The book service answers availability checks with the sentinel `"0"`
    /// when it has no copy to offer.
    BookCopyId
);

impl BookCopyId {
    /// The "no copy" sentinel used on the wire.
    pub const SENTINEL: &'static str = "0";

    /// Returns the sentinel copy id.
    pub fn sentinel() -> Self {
        Self(Self::SENTINEL.to_string())
    }

    /// Returns true if this id is the "no copy" sentinel (or empty).
    pub fn is_sentinel(&self) -> bool {
        self.0.is_empty() || self.0 == Self::SENTINEL
    }
}

uuid_id!(
    /// Identifier of a borrow record.
    RecordId
);

uuid_id!(
    /// Identifier of a reservation.
    ReservationId
);

uuid_id!(
    /// Identifier of a patron violation record.
    ViolationId
);

uuid_id!(
    /// Identifier of an assessed fine.
    FineId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_new_creates_unique_ids() {
        let id1 = RecordId::new();
        let id2 = RecordId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn record_id_parse_roundtrips_display() {
        let id = RecordId::new();
        let parsed = RecordId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(RecordId::parse("not-a-uuid").is_err());
    }

    #[test]
    fn string_ids_serialize_transparently() {
        let id = BookId::new("B1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"B1\"");
        let back: BookId = serde_json::from_str("\"B1\"").unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn copy_id_sentinel_detection() {
        assert!(BookCopyId::sentinel().is_sentinel());
        assert!(BookCopyId::new("").is_sentinel());
        assert!(!BookCopyId::new("17").is_sentinel());
    }
}
