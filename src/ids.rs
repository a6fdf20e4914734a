//! UUID-validated newtype ids. Wire and storage keep ids as lowercase text;
//! these types guarantee the text parses as a UUID.

use crate::error::EngineError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash)]
        pub struct $name(String);

        impl $name {
            /// Mint a fresh random id.
            pub fn random() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn parse(s: impl AsRef<str>) -> Result<Self, EngineError> {
                Self::from_str(s.as_ref())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = EngineError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let parsed = Uuid::parse_str(s)
                    .map_err(|e| EngineError::Malformed(format!("invalid uuid '{s}': {e}")))?;
                // Normalize to the lowercase-hyphenated form used on the wire.
                Ok(Self(parsed.to_string()))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, ser: S) -> Result<S::Ok, S::Error> {
                ser.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
                let s = String::deserialize(de)?;
                Self::from_str(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

uuid_id!(
    /// Partition key for the event log; one user may own several wallets.
    WalletId
);
uuid_id!(ContactId);
uuid_id!(TransactionId);
uuid_id!(
    /// Client-minted, globally unique event id. Authoritative on the server.
    EventId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_and_normalizes_uuids() {
        let id = WalletId::parse("F27978AF-E56A-4B45-AEDE-FB450557699A").unwrap();
        assert_eq!(id.as_str(), "f27978af-e56a-4b45-aede-fb450557699a");
    }

    #[test]
    fn parse_rejects_non_uuid_text() {
        assert!(ContactId::parse("not-a-uuid").is_err());
        assert!(EventId::parse("").is_err());
    }

    #[test]
    fn random_ids_are_distinct() {
        assert_ne!(EventId::random(), EventId::random());
    }
}
