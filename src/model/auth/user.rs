use std::fmt::Display;

use serde_repr::{Deserialize_repr, Serialize_repr};

/// The rights levels a user can hold. Admins outrank voters for access
/// checks, but voting itself is reserved for the voter role.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum Rights {
    Voter = 0,
    Admin = 1,
}

impl Display for Rights {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "{}",
            match self {
                Self::Voter => "voter",
                Self::Admin => "admin",
            }
        )
    }
}

/// An access level that an [`super::AuthToken`] can be checked against.
pub trait Access {
    const RIGHTS: Rights;
}

/// Marker for endpoints any authenticated user may call.
pub struct Voter;

/// Marker for administrator-only endpoints.
pub struct Admin;

impl Access for Voter {
    const RIGHTS: Rights = Rights::Voter;
}

impl Access for Admin {
    const RIGHTS: Rights = Rights::Admin;
}
