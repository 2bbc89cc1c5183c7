//! Identifier types.
//!
//! Every id here serializes as a bare JSON string. Session and run ids are
//! minted from UUID v4; provider names and asset references come from
//! configuration or adapter output.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! text_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        // Lets maps keyed by the newtype be indexed with a plain `&str`.
        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

/// Adds random generation on top of [`text_newtype!`]; `Default` mints a fresh id.
macro_rules! generated_id {
    ($(#[$meta:meta])* $name:ident) => {
        text_newtype!($(#[$meta])* $name);

        impl $name {
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::generate()
            }
        }
    };
}

generated_id!(
    /// One uploaded source image and everything generated from it.
    SessionId
);
generated_id!(
    /// A single generation or batch run; stale writers are fenced on it.
    RunId
);
text_newtype!(
    /// Registry key of an image-generation provider ("gemini", "comfyui", ...).
    ProviderName
);
text_newtype!(
    /// Reference to a stored image (a path under the uploads/generated roots or a blob key).
    AssetRef
);
