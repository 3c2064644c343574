//! Core identifiers and shared enums for the grounded-theory pipeline.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod domain;
pub mod paradigm;

pub use domain::*;
pub use paradigm::*;

macro_rules! newtype_id {
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

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }
    };
}

newtype_id!(ProjectId);
newtype_id!(InterviewId);
newtype_id!(FragmentId);
newtype_id!(CodeId);
newtype_id!(CategoryId);
newtype_id!(TheoryId);
newtype_id!(ClaimId);
newtype_id!(TaskId);

/// Role a caller is acting under when scoping a store read; every adapter read composes
/// `project_id` with one of these, never with a bare project id alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenancyScope {
    Owner { project_id: ProjectId, owner_id: Uuid },
    Tenant { project_id: ProjectId, tenant_id: Uuid },
}

impl TenancyScope {
    pub fn project_id(&self) -> ProjectId {
        match self {
            TenancyScope::Owner { project_id, .. } => *project_id,
            TenancyScope::Tenant { project_id, .. } => *project_id,
        }
    }
}
