use crawlbridge_engine::{
    convert_acls, well_known_groups, AceAccess, AceType, AccessControlEntry, DirectoryGroup,
    DirectoryUser,
};
use std::collections::HashMap;

fn ace(identity: &str, ace_type: AceType, access: AceAccess) -> AccessControlEntry {
    AccessControlEntry {
        identity: identity.into(),
        ace_type,
        access,
        is_inherited: false,
    }
}

fn user(identity: &str, sam: &str, display: &str, email: &str) -> DirectoryUser {
    DirectoryUser {
        identity: identity.to_lowercase(),
        sam_account_name: sam.into(),
        display_name: display.into(),
        email: email.into(),
        ..Default::default()
    }
}

fn group(identity: &str, sam: &str, display: &str, members: &[&str]) -> DirectoryGroup {
    DirectoryGroup {
        identity: identity.to_lowercase(),
        sam_account_name: sam.into(),
        display_name: display.into(),
        members: members.iter().map(|m| m.to_string()).collect(),
        ..Default::default()
    }
}

fn user_map() -> HashMap<String, DirectoryUser> {
    [
        user("SIMSAGE\\rock", "Rock", "Rock de Vocht", "rock@example.com"),
        user("SImSage\\nags", "nagendra", "", "nagendra@example.com"),
    ]
    .into_iter()
    .map(|u| (u.identity.clone(), u))
    .collect()
}

fn group_map() -> HashMap<String, DirectoryGroup> {
    [
        group("Users", "Users", "", &["rock@example.com"]),
        group("B", "B", "Berta", &["rock@example.com"]),
        group("C", "C", "", &["nagendra@example.com"]),
    ]
    .into_iter()
    .map(|g| (g.identity.clone(), g))
    .collect()
}

#[test]
fn domain_user_and_group_both_convert() {
    let aces = vec![
        ace("SIMSAGE\\rock", AceType::Domain, AceAccess::Allow),
        ace("Users", AceType::Domain, AceAccess::Allow),
    ];

    let acls = convert_acls(&aces, &user_map(), &group_map());
    assert_eq!(acls.len(), 2);

    assert_eq!(acls[0].name, "rock@example.com");
    assert_eq!(acls[0].display_name, "Rock de Vocht");
    assert!(acls[0].is_user);
    assert_eq!(acls[0].access, "R");

    assert_eq!(acls[1].name, "Users");
    assert!(!acls[1].is_user);
    assert_eq!(acls[1].membership_list, vec!["rock@example.com"]);
}

#[test]
fn domain_user_resolves_to_email_keyed_acl() {
    let aces = vec![ace("SIMSAGE\\rock", AceType::Domain, AceAccess::Allow)];
    let acls = convert_acls(&aces, &user_map(), &group_map());
    assert_eq!(acls.len(), 1);
    assert_eq!(acls[0].name, "rock@example.com");
    assert!(acls[0].is_user);
    assert_eq!(acls[0].display_name, "Rock de Vocht");
}

#[test]
fn user_without_display_name_falls_back_to_capitalized_account() {
    let aces = vec![ace("SImSage\\nags", AceType::Domain, AceAccess::Allow)];
    let acls = convert_acls(&aces, &user_map(), &group_map());
    assert_eq!(acls.len(), 1);
    assert_eq!(acls[0].display_name, "Nagendra");
}

#[test]
fn unrecognized_well_known_subject_is_excluded() {
    // A well-known type that matches none of our groups.
    let aces = vec![ace("SIMSAGE\\rock", AceType::WellKnown, AceAccess::Allow)];
    let acls = convert_acls(&aces, &user_map(), &group_map());
    assert!(acls.is_empty());
}

#[test]
fn recognized_well_known_group_is_included() {
    let mut groups = group_map();
    for g in well_known_groups() {
        groups.insert(g.identity.clone(), g);
    }
    let aces = vec![ace("BUILTIN\\Users", AceType::WellKnown, AceAccess::Allow)];
    let acls = convert_acls(&aces, &user_map(), &groups);
    assert_eq!(acls.len(), 1);
    assert_eq!(acls[0].name, "Users");
    assert!(!acls[0].is_user);
}

#[test]
fn deny_entries_are_excluded() {
    let aces = vec![ace("SIMSAGE\\rock", AceType::Domain, AceAccess::Deny)];
    let acls = convert_acls(&aces, &user_map(), &group_map());
    assert!(acls.is_empty());
}

#[test]
fn machine_and_unresolved_subjects_are_excluded() {
    let aces = vec![
        ace("SIMSAGE\\HOST$", AceType::Machine, AceAccess::Allow),
        ace("S-1-5-21-123-456", AceType::UnresolvedSid, AceAccess::Allow),
    ];
    let acls = convert_acls(&aces, &user_map(), &group_map());
    assert!(acls.is_empty());
}

#[test]
fn group_display_name_wins_over_account_name() {
    let aces = vec![ace("B", AceType::Local, AceAccess::Allow)];
    let acls = convert_acls(&aces, &user_map(), &group_map());
    assert_eq!(acls.len(), 1);
    assert_eq!(acls[0].name, "Berta");
}
