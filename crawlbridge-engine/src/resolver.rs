//! Directory-service users, groups, and ACL normalization.
//!
//! Users and groups are fetched once per run through the
//! [`DirectoryService`] trait, keyed by their normalized identity
//! (`domain\name`, lower-cased). Group member lists arrive as raw
//! distinguished names and are flattened into user emails by the
//! recursive, memoized, cycle-safe [`resolve_groups`] pass before any
//! ACL conversion happens.

use crate::error::EngineResult;
use async_trait::async_trait;
use crawlbridge_client::AssetAcl;
use std::collections::{BTreeSet, HashMap, HashSet};

/// A user object from the directory service.
#[derive(Clone, Debug, Default)]
pub struct DirectoryUser {
    pub distinguished_name: String,
    pub sam_account_name: String,
    /// Normalized `domain\name`, lower-cased.
    pub identity: String,
    pub display_name: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// DNs of the groups this user is a direct member of.
    pub member_of: Vec<String>,
}

/// A group object from the directory service.
#[derive(Clone, Debug, Default)]
pub struct DirectoryGroup {
    pub distinguished_name: String,
    pub sam_account_name: String,
    pub display_name: String,
    /// Normalized `domain\name`, lower-cased.
    pub identity: String,
    /// Direct members as DNs until [`resolve_groups`] rewrites them into
    /// the flattened member-email list.
    pub members: Vec<String>,
}

/// Directory lookup capability: bind plus filtered, paged search is the
/// implementation's concern.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn fetch_users(&self) -> EngineResult<Vec<DirectoryUser>>;
    async fn fetch_groups(&self) -> EngineResult<Vec<DirectoryGroup>>;
}

/// Standard well-known groups appended to every fetched group set.
pub fn well_known_groups() -> Vec<DirectoryGroup> {
    vec![
        DirectoryGroup {
            distinguished_name: "Users".into(),
            sam_account_name: "Users".into(),
            display_name: "Users".into(),
            identity: "builtin\\users".into(),
            members: Vec::new(),
        },
        DirectoryGroup {
            distinguished_name: "Administrators".into(),
            sam_account_name: "Administrators".into(),
            display_name: "Administrators".into(),
            identity: "builtin\\administrators".into(),
            members: Vec::new(),
        },
    ]
}

/// Flattens every group's member DNs into user emails, in declaration
/// order.
///
/// Nested groups are resolved recursively; a member DN that matches
/// neither a user nor a group is dropped. Cycle safety: re-entering a
/// group already on the current resolution path contributes nothing to
/// that edge instead of recursing forever. Fully resolved sets are
/// memoized per group DN so shared nesting is computed once.
pub fn resolve_groups(
    groups: &mut [DirectoryGroup],
    users_by_identity: &HashMap<String, DirectoryUser>,
) {
    let snapshot: Vec<DirectoryGroup> = groups.to_vec();
    let groups_by_identity: HashMap<String, &DirectoryGroup> = snapshot
        .iter()
        .map(|g| (g.identity.trim().to_lowercase(), g))
        .collect();

    let mut memo: HashMap<String, BTreeSet<String>> = HashMap::new();
    for group in groups.iter_mut() {
        let mut path = HashSet::new();
        let members = resolve_one(
            group,
            users_by_identity,
            &groups_by_identity,
            &mut memo,
            &mut path,
        );
        group.members = members.into_iter().collect();
    }
}

fn resolve_one(
    group: &DirectoryGroup,
    users: &HashMap<String, DirectoryUser>,
    groups_by_identity: &HashMap<String, &DirectoryGroup>,
    memo: &mut HashMap<String, BTreeSet<String>>,
    path: &mut HashSet<String>,
) -> BTreeSet<String> {
    if let Some(done) = memo.get(&group.distinguished_name) {
        return done.clone();
    }
    if !path.insert(group.distinguished_name.clone()) {
        // Already on the current path: break the cycle for this edge.
        return BTreeSet::new();
    }

    let mut members = BTreeSet::new();
    for member_dn in &group.members {
        let key = member_dn.trim().to_lowercase();
        if let Some(user) = users.get(&key) {
            if !user.email.is_empty() {
                members.insert(user.email.clone());
            }
        } else if let Some(nested) = groups_by_identity.get(&key) {
            members.extend(resolve_one(nested, users, groups_by_identity, memo, path));
        }
    }

    path.remove(&group.distinguished_name);
    memo.insert(group.distinguished_name.clone(), members.clone());
    members
}

// ── ACL conversion ──────────────────────────────────────────────

/// Classification of an access-control entry's subject.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AceType {
    Domain,
    Local,
    WellKnown,
    Machine,
    UnresolvedSid,
}

/// Whether the entry grants or denies access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AceAccess {
    Allow,
    Deny,
}

/// One raw access-control entry as read from the file system.
#[derive(Clone, Debug)]
pub struct AccessControlEntry {
    /// Subject, e.g. `DOMAIN\user` or `DOMAIN\group`.
    pub identity: String,
    pub ace_type: AceType,
    pub access: AceAccess,
    pub is_inherited: bool,
}

/// Capitalized account-name fallback for users without a display name.
fn capitalize_account(sam: &str) -> String {
    if sam.len() > 1 {
        let mut chars = sam.chars();
        let first = chars.next().unwrap().to_uppercase().to_string();
        format!("{first}{}", chars.as_str().to_lowercase())
    } else {
        sam.to_uppercase()
    }
}

/// Maps raw access-control entries onto normalized asset ACLs.
///
/// Only `Allow` entries classified Domain or Local survive, plus
/// well-known subjects that match a known group. A user entry resolves
/// to an ACL keyed by the user's email (skipped when the directory has
/// no email for them); a group entry carries the group's flattened
/// member-email list.
pub fn convert_acls(
    entries: &[AccessControlEntry],
    users: &HashMap<String, DirectoryUser>,
    groups: &HashMap<String, DirectoryGroup>,
) -> Vec<AssetAcl> {
    let mut acls = Vec::new();
    for ace in entries {
        let key = ace.identity.trim().to_lowercase();
        let known_well_known = ace.ace_type == AceType::WellKnown && groups.contains_key(&key);
        if !known_well_known && ace.ace_type != AceType::Domain && ace.ace_type != AceType::Local {
            continue;
        }
        if ace.access != AceAccess::Allow {
            continue;
        }

        let access = AssetAcl::access_string(true, false, false);
        if let Some(user) = users.get(&key) {
            if user.email.is_empty() {
                continue;
            }
            let fallback = capitalize_account(&user.sam_account_name);
            let display_name = if user.display_name.is_empty() {
                fallback
            } else {
                user.display_name.clone()
            };
            acls.push(AssetAcl::user(user.email.clone(), display_name, access));
        } else if let Some(group) = groups.get(&key) {
            let name = if group.display_name.is_empty() {
                group.sam_account_name.clone()
            } else {
                group.display_name.clone()
            };
            acls.push(AssetAcl::group(name, access, group.members.clone()));
        }
    }
    acls
}
