//! The five write/read split policies (`spec.md` §4.3).

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A policy that decides how a validated, wire-shaped document is split
/// between S3 user-metadata and object body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BehaviorKind {
    /// Store all scalar fields in metadata; reject if metadata exceeds budget.
    UserManaged,
    /// Same as `UserManaged`, but truncate `truncatable` strings to fit,
    /// with an explicit warning event.
    EnforceLimits,
    /// Silently truncate over-budget strings to a per-field max.
    TruncateData,
    /// Fill metadata up to budget; overflow the remaining fields into a JSON body.
    BodyOverflow,
    /// All fields JSON-encoded into body; metadata holds only system fields.
    BodyOnly,
}

impl BehaviorKind {
    /// The stable id recorded in the schema catalog (`spec.md` §6).
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            BehaviorKind::UserManaged => "user-managed",
            BehaviorKind::EnforceLimits => "enforce-limits",
            BehaviorKind::TruncateData => "truncate-data",
            BehaviorKind::BodyOverflow => "body-overflow",
            BehaviorKind::BodyOnly => "body-only",
        }
    }
}

impl FromStr for BehaviorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user-managed" => Ok(BehaviorKind::UserManaged),
            "enforce-limits" => Ok(BehaviorKind::EnforceLimits),
            "truncate-data" => Ok(BehaviorKind::TruncateData),
            "body-overflow" => Ok(BehaviorKind::BodyOverflow),
            "body-only" => Ok(BehaviorKind::BodyOnly),
            other => Err(format!("unknown behavior: {other}")),
        }
    }
}

impl std::fmt::Display for BehaviorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_round_trip_behavior_ids() {
        for kind in [
            BehaviorKind::UserManaged,
            BehaviorKind::EnforceLimits,
            BehaviorKind::TruncateData,
            BehaviorKind::BodyOverflow,
            BehaviorKind::BodyOnly,
        ] {
            assert_eq!(kind.id().parse::<BehaviorKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_should_reject_unknown_behavior() {
        assert!("unknown".parse::<BehaviorKind>().is_err());
    }
}
