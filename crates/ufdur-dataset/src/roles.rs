use std::fmt;

use ufdur_pivot::CacheDefinition;

/// Field whose presence marks the per-claim-state (main) cache.
pub const MAIN_DISCRIMINATOR_FIELD: &str = "ClaimState";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheRole {
    Main,
    Outliers,
}

impl CacheRole {
    /// Value written to the `Source` column of rows extracted for this role.
    pub fn source_tag(self) -> &'static str {
        match self {
            CacheRole::Main => "MAIN",
            CacheRole::Outliers => "OUTLIERS",
        }
    }
}

impl fmt::Display for CacheRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CacheRole::Main => "main",
            CacheRole::Outliers => "outliers",
        })
    }
}

/// How a [`RoleAssignment`] was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// One of the caches exposes [`MAIN_DISCRIMINATOR_FIELD`].
    Confirmed,
    /// Neither cache exposes it; the first candidate was assumed to be the main cache.
    Assumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleAssignment {
    pub main: u32,
    pub outliers: u32,
    pub detection: Detection,
}

impl RoleAssignment {
    pub fn is_ambiguous(&self) -> bool {
        self.detection == Detection::Assumed
    }

    /// `(role, cache_id)` pairs, main first.
    pub fn in_order(&self) -> [(CacheRole, u32); 2] {
        [(CacheRole::Main, self.main), (CacheRole::Outliers, self.outliers)]
    }
}

/// Decide which of two caches holds the main dataset.
///
/// Roles are not tagged anywhere in the package, so they are inferred from schema shape: the
/// first candidate carrying `ClaimState` is main and the other one holds the outliers. A
/// missing definition never carries it. When neither does, `first` is assumed to be main and
/// the result is marked [`Detection::Assumed`]; that fallback is a heuristic with no known
/// validation against real ambiguous inputs.
pub fn detect_roles(
    first: (u32, Option<&CacheDefinition>),
    second: (u32, Option<&CacheDefinition>),
) -> RoleAssignment {
    let carries_discriminator =
        |def: Option<&CacheDefinition>| def.is_some_and(|d| d.has_field(MAIN_DISCRIMINATOR_FIELD));

    if carries_discriminator(first.1) {
        return RoleAssignment {
            main: first.0,
            outliers: second.0,
            detection: Detection::Confirmed,
        };
    }
    if carries_discriminator(second.1) {
        return RoleAssignment {
            main: second.0,
            outliers: first.0,
            detection: Detection::Confirmed,
        };
    }

    log::warn!(
        "could not detect pivot cache roles (no cache has a {MAIN_DISCRIMINATOR_FIELD} field); assuming cache {} is main and cache {} holds outliers",
        first.0,
        second.0
    );
    RoleAssignment {
        main: first.0,
        outliers: second.0,
        detection: Detection::Assumed,
    }
}
