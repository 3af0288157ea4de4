// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Role-based access control checks.
//!
//! Role data is already resident on the identity, so checks are pure set
//! arithmetic with no I/O and no caching.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// How a requirement's role set is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolePolicy {
    /// The identity must hold every listed role.
    #[default]
    RequireAll,
    /// The identity must hold at least one listed role.
    RequireAny,
}

/// A declared role requirement: which roles, under which policy.
///
/// Attach these to routes/handlers at the integration layer; the core
/// only evaluates them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRequirement {
    pub roles: BTreeSet<String>,
    pub policy: RolePolicy,
}

impl RoleRequirement {
    /// Requirement that every listed role is held.
    pub fn all<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            policy: RolePolicy::RequireAll,
        }
    }

    /// Requirement that at least one listed role is held.
    pub fn any<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            policy: RolePolicy::RequireAny,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

/// Outcome of a role check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleCheck {
    pub granted: bool,
    /// Roles the identity would need to satisfy the requirement. Under
    /// `RequireAny` a refusal reports the entire requirement, since any
    /// one of them would do.
    pub missing: BTreeSet<String>,
}

impl RoleCheck {
    fn granted() -> Self {
        Self {
            granted: true,
            missing: BTreeSet::new(),
        }
    }
}

/// Evaluate a role requirement against the roles an identity holds.
///
/// An empty requirement is always granted, including for identities with
/// no roles at all.
pub fn check_roles(held: &BTreeSet<String>, requirement: &RoleRequirement) -> RoleCheck {
    if requirement.is_empty() {
        return RoleCheck::granted();
    }

    match requirement.policy {
        RolePolicy::RequireAll => {
            let missing: BTreeSet<String> =
                requirement.roles.difference(held).cloned().collect();
            RoleCheck {
                granted: missing.is_empty(),
                missing,
            }
        }
        RolePolicy::RequireAny => {
            if requirement.roles.intersection(held).next().is_some() {
                RoleCheck::granted()
            } else {
                RoleCheck {
                    granted: false,
                    missing: requirement.roles.clone(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn held(roles: &[&str]) -> BTreeSet<String> {
        roles.iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn require_all_reports_exact_missing_roles() {
        let check = check_roles(&held(&["a", "b"]), &RoleRequirement::all(["a", "b", "c"]));
        assert!(!check.granted);
        assert_eq!(check.missing, held(&["c"]));
    }

    #[test]
    fn require_all_grants_on_superset() {
        let check = check_roles(&held(&["a", "b", "c"]), &RoleRequirement::all(["a", "b"]));
        assert!(check.granted);
        assert!(check.missing.is_empty());
    }

    #[test]
    fn require_any_grants_on_single_overlap() {
        let check = check_roles(&held(&["b"]), &RoleRequirement::any(["a", "b"]));
        assert!(check.granted);
        assert!(check.missing.is_empty());
    }

    #[test]
    fn require_any_refusal_reports_whole_requirement() {
        let check = check_roles(&held(&["a"]), &RoleRequirement::any(["b", "c"]));
        assert!(!check.granted);
        assert_eq!(check.missing, held(&["b", "c"]));
    }

    #[test]
    fn empty_requirement_always_granted() {
        assert!(check_roles(&held(&["a"]), &RoleRequirement::default()).granted);
        assert!(check_roles(&held(&[]), &RoleRequirement::default()).granted);
        assert!(check_roles(&held(&[]), &RoleRequirement::any(Vec::<String>::new())).granted);
    }

    #[test]
    fn order_is_irrelevant() {
        let forward = check_roles(&held(&["x", "y"]), &RoleRequirement::all(["y", "x"]));
        let backward = check_roles(&held(&["y", "x"]), &RoleRequirement::all(["x", "y"]));
        assert!(forward.granted);
        assert_eq!(forward, backward);
    }

    #[test]
    fn policy_default_is_require_all() {
        assert_eq!(RolePolicy::default(), RolePolicy::RequireAll);
    }
}
