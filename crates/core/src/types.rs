use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! newtype_string {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
        #[cfg_attr(feature = "openapi", schema(value_type = String))]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance from a string value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Return the inner string as a str slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
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
                Self(s.to_owned())
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(RefundId, "A unique refund request identifier.");
newtype_string!(TransactionId, "Identifies the original captured transaction.");
newtype_string!(MerchantId, "A merchant identifier (most specific hierarchy level).");
newtype_string!(OrganizationId, "An organization identifier in the merchant hierarchy.");
newtype_string!(BankId, "A bank identifier in the merchant hierarchy.");
newtype_string!(CustomerId, "A customer identifier attached to a refund.");
newtype_string!(BankAccountId, "Identifies a merchant bank account for out-of-band refunds.");
newtype_string!(ApprovalId, "Identifies an approval request.");

impl RefundId {
    /// Generate a fresh server-side refund identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("rfd_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl ApprovalId {
    /// Generate a fresh approval identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("apr_{}", uuid::Uuid::new_v4().simple()))
    }
}
