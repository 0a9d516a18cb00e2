//! Identifier types for Huddle components.
//!
//! Every identifier wraps a [`Uuid`] and serializes transparently, so they
//! appear as plain UUID strings in JSON documents and URLs.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Create a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an audio session
    SessionId
);

uuid_id!(
    /// Unique identifier for a group (owned by the group service)
    GroupId
);

uuid_id!(
    /// Unique identifier for a user (owned by the identity service)
    UserId
);

uuid_id!(
    /// Unique identifier for a playlist track
    TrackId
);
