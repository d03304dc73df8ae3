//! The ACL: a pure decision module consumed by the service tier (spec
//! §4.15). It holds no state of its own and performs no I/O — it takes a
//! resource, a required permission, and a context, and returns a decision.
//! The engine-local `collaborators.json` is read by the caller
//! and handed in as [`CollaboratorGrants`]; this module never touches disk.

use serde::{Deserialize, Serialize};

/// Total order over organization roles: each level implies
/// every level below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Viewer,
    Contributor,
    Maintainer,
    Admin,
    Owner,
}

/// Total order over permissions: `read < write < admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    Read,
    Write,
    Admin,
}

impl Role {
    /// The permission level this role grants.
    pub fn permission(&self) -> Permission {
        match self {
            Role::Viewer => Permission::Read,
            Role::Contributor => Permission::Write,
            Role::Maintainer | Role::Admin | Role::Owner => Permission::Admin,
        }
    }
}

/// Where a grant ultimately came from, returned alongside a decision so a
/// caller can explain *why* access was allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrantSource {
    Owner,
    Collaborator,
    OrgMember,
    Public,
}

/// Caller identity and capability context for a single access check.
#[derive(Debug, Clone, Default)]
pub struct AccessContext {
    pub user_id: Option<String>,
    pub oauth_scopes: Vec<String>,
    pub is_service_account: bool,
}

/// Per-resource grant data: who owns it, who has an explicit collaborator
/// grant, and the role an org membership would confer, if any. This is the
/// engine-local `collaborators.json` shape, already loaded by the caller.
#[derive(Debug, Clone, Default)]
pub struct CollaboratorGrants {
    pub is_public_read: bool,
    pub owner_user_id: Option<String>,
    /// Explicit collaborator grants: `user_id -> role`.
    pub collaborators: Vec<(String, Role)>,
    /// Org role the resource's org would confer on any member, if the
    /// caller is a member (membership itself is out of scope for this
    /// pure module; callers resolve it before invoking `decide`).
    pub org_role: Option<Role>,
    pub caller_is_org_member: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    pub reason: Option<String>,
    pub effective_permission: Option<Permission>,
    pub source: Option<GrantSource>,
}

impl Decision {
    fn allow(effective_permission: Permission, source: GrantSource) -> Decision {
        Decision {
            allowed: true,
            reason: None,
            effective_permission: Some(effective_permission),
            source: Some(source),
        }
    }

    fn deny(reason: impl Into<String>) -> Decision {
        Decision {
            allowed: false,
            reason: Some(reason.into()),
            effective_permission: None,
            source: None,
        }
    }
}

/// Scope floor an OAuth token must carry to exercise a given permission.
/// A token missing the floor for `required` cannot satisfy the request
/// regardless of what role the caller otherwise holds.
fn scope_floor(required: Permission) -> &'static str {
    match required {
        Permission::Read => "repo:read",
        Permission::Write => "repo:write",
        Permission::Admin => "repo:admin",
    }
}

fn has_scope(scopes: &[String], floor: &str) -> bool {
    scopes.iter().any(|s| s == floor || s == "repo:admin")
}

/// Decides whether `context` may exercise `required` permission over a
/// resource described by `grants`. Check order: public-read
/// shortcut, authentication, OAuth scope floor, owner, explicit
/// collaborator grant, org-derived grant.
pub fn decide(required: Permission, grants: &CollaboratorGrants, context: &AccessContext) -> Decision {
    if required == Permission::Read && grants.is_public_read {
        return Decision::allow(Permission::Read, GrantSource::Public);
    }

    let Some(user_id) = &context.user_id else {
        return Decision::deny("authentication required");
    };

    if !context.is_service_account
        && !context.oauth_scopes.is_empty()
        && !has_scope(&context.oauth_scopes, scope_floor(required))
    {
        return Decision::deny(format!(
            "oauth token lacks the `{}` scope",
            scope_floor(required)
        ));
    }

    if grants.owner_user_id.as_deref() == Some(user_id.as_str()) {
        return Decision::allow(Permission::Admin, GrantSource::Owner);
    }

    if let Some((_, role)) = grants.collaborators.iter().find(|(id, _)| id == user_id) {
        let perm = role.permission();
        if perm >= required {
            return Decision::allow(perm, GrantSource::Collaborator);
        }
        return Decision::deny(format!(
            "collaborator role `{role:?}` does not satisfy required permission `{required:?}`"
        ));
    }

    if grants.caller_is_org_member {
        if let Some(role) = grants.org_role {
            let perm = role.permission();
            if perm >= required {
                return Decision::allow(perm, GrantSource::OrgMember);
            }
        }
    }

    Decision::deny("no grant satisfies the required permission")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(user: &str) -> AccessContext {
        AccessContext {
            user_id: Some(user.to_string()),
            oauth_scopes: Vec::new(),
            is_service_account: false,
        }
    }

    #[test]
    fn public_read_shortcut_bypasses_authentication() {
        let grants = CollaboratorGrants {
            is_public_read: true,
            ..Default::default()
        };
        let decision = decide(Permission::Read, &grants, &AccessContext::default());
        assert!(decision.allowed);
        assert_eq!(decision.source, Some(GrantSource::Public));
    }

    #[test]
    fn unauthenticated_write_is_denied_even_if_public_read() {
        let grants = CollaboratorGrants {
            is_public_read: true,
            ..Default::default()
        };
        let decision = decide(Permission::Write, &grants, &AccessContext::default());
        assert!(!decision.allowed);
    }

    #[test]
    fn owner_gets_admin_regardless_of_required_level() {
        let grants = CollaboratorGrants {
            owner_user_id: Some("alice".into()),
            ..Default::default()
        };
        let decision = decide(Permission::Admin, &grants, &ctx("alice"));
        assert!(decision.allowed);
        assert_eq!(decision.effective_permission, Some(Permission::Admin));
        assert_eq!(decision.source, Some(GrantSource::Owner));
    }

    #[test]
    fn collaborator_role_below_required_is_denied() {
        let grants = CollaboratorGrants {
            collaborators: vec![("bob".into(), Role::Viewer)],
            ..Default::default()
        };
        let decision = decide(Permission::Write, &grants, &ctx("bob"));
        assert!(!decision.allowed);
    }

    #[test]
    fn collaborator_role_at_or_above_required_is_allowed() {
        let grants = CollaboratorGrants {
            collaborators: vec![("bob".into(), Role::Maintainer)],
            ..Default::default()
        };
        let decision = decide(Permission::Write, &grants, &ctx("bob"));
        assert!(decision.allowed);
        assert_eq!(decision.source, Some(GrantSource::Collaborator));
    }

    #[test]
    fn org_member_falls_back_to_org_role() {
        let grants = CollaboratorGrants {
            org_role: Some(Role::Contributor),
            caller_is_org_member: true,
            ..Default::default()
        };
        let decision = decide(Permission::Write, &grants, &ctx("carol"));
        assert!(decision.allowed);
        assert_eq!(decision.source, Some(GrantSource::OrgMember));
    }

    #[test]
    fn oauth_scope_floor_blocks_insufficient_token() {
        let grants = CollaboratorGrants {
            owner_user_id: Some("alice".into()),
            ..Default::default()
        };
        let context = AccessContext {
            user_id: Some("alice".into()),
            oauth_scopes: vec!["repo:read".into()],
            is_service_account: false,
        };
        let decision = decide(Permission::Write, &grants, &context);
        assert!(!decision.allowed);
    }

    #[test]
    fn role_ordering_is_total_and_monotone() {
        assert!(Role::Owner > Role::Admin);
        assert!(Role::Admin > Role::Maintainer);
        assert!(Role::Maintainer > Role::Contributor);
        assert!(Role::Contributor > Role::Viewer);
        assert!(Permission::Admin > Permission::Write);
        assert!(Permission::Write > Permission::Read);
    }
}
