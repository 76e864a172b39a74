//! Identifiers and small shared value types used across components.
//! All identifiers are opaque; all timestamps are UTC.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
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
                write!(f, "{}", self.0)
            }
        }
    };
}

opaque_id!(UserId);
opaque_id!(RoleId);
opaque_id!(PermissionId);
opaque_id!(PolicyId);
opaque_id!(SessionId);
opaque_id!(SafeId);
opaque_id!(AccountId);
opaque_id!(CheckoutId);
opaque_id!(PrivilegedSessionId);
opaque_id!(ApprovalId);
opaque_id!(JitGrantId);
opaque_id!(AuditId);
opaque_id!(TransitKeyId);

/// Normalize a KV path: strip leading/trailing slashes, collapse duplicate
/// slashes.
pub fn normalize_path(path: &str) -> String {
    path.split('/').filter(|segment| !segment.is_empty()).collect::<Vec<_>>().join("/")
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_slashes() {
        assert_eq!(normalize_path("/prod//db/"), "prod/db");
        assert_eq!(normalize_path("a/b/c"), "a/b/c");
        assert_eq!(normalize_path("///"), "");
    }
}
