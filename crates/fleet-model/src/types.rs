//! Identifier types for the topology model.
//!
//! Every identifier is a thin newtype over `String` so host names, cluster
//! ids and config ids cannot be mixed up at call sites.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Declare a transparent string newtype with the usual conversions.
macro_rules! string_id {
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
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Fully qualified name of a host in the fleet.
    HostName
);
string_id!(
    /// Tenant owning an application.
    TenantId
);
string_id!(
    /// Instance name of an application within its tenant.
    ApplicationInstanceId
);
string_id!(
    /// Cluster id, unique within one application instance.
    ClusterId
);
string_id!(
    /// Kind of service a cluster provides (e.g. `searchnode`, `container`).
    ServiceType
);
string_id!(
    /// Config id of a single service instance.
    ConfigId
);

/// Unique identity of a deployed application instance.
///
/// Rendered and parsed as `tenant:instance`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationInstanceReference {
    pub tenant: TenantId,
    pub instance: ApplicationInstanceId,
}

impl ApplicationInstanceReference {
    pub fn new(tenant: impl Into<TenantId>, instance: impl Into<ApplicationInstanceId>) -> Self {
        Self {
            tenant: tenant.into(),
            instance: instance.into(),
        }
    }

    /// Parse a `tenant:instance` string.
    pub fn parse(s: &str) -> ModelResult<Self> {
        s.parse()
    }
}

impl fmt::Display for ApplicationInstanceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tenant, self.instance)
    }
}

impl FromStr for ApplicationInstanceReference {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tenant, instance) = s
            .split_once(':')
            .ok_or_else(|| ModelError::InvalidReference(s.to_string()))?;
        if tenant.is_empty() || instance.is_empty() {
            return Err(ModelError::InvalidReference(s.to_string()));
        }
        Ok(Self::new(tenant, instance))
    }
}
