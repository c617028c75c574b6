//! Canonical cross-service types.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Monetary amount in the platform's smallest denomination (euro-cents).
pub type Price = u64;

/// Result alias pre-filled with [`CommonError`].
pub type Result<T, E = CommonError> = std::result::Result<T, E>;

/// Error type shared by the helpers contained in this crate.
///
/// Deliberately small; services define their own error enums and `#[from]`
/// this one where needed.
#[derive(Debug, Error)]
pub enum CommonError {
    /// Malformed id strings.
    #[error("malformed id: {0}")]
    Malformed(String),

    /// UUID parsing failure.
    #[error(transparent)]
    Uuid(#[from] uuid::Error),
}

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Mint a fresh random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing uuid (e.g. one read from storage).
            pub const fn from_uuid(inner: Uuid) -> Self {
                Self(inner)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = CommonError;

            fn from_str(s: &str) -> Result<Self> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(
    /// Identifier of a live or timed auction.
    AuctionId
);
uuid_id!(
    /// Identifier of a payable order produced by a sold auction.
    OrderId
);
uuid_id!(
    /// Identifier of a marketplace user (seller or bidder).
    UserId
);
uuid_id!(
    /// Identifier of a catalog product.
    ProductId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_display_and_parse() {
        let id = AuctionId::new();
        let parsed: AuctionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn ids_serialize_as_plain_uuid_strings() {
        let id = UserId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
    }

    #[test]
    fn malformed_id_is_rejected() {
        assert!("not-a-uuid".parse::<OrderId>().is_err());
    }
}
