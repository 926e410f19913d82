//! Collaborator roster maintained from `user_presence` events.
//!
//! The roster is a pure reduction over presence events: [`reduce`] takes
//! the current entries and one event and returns the next entries. Entries
//! are never removed; `left` only clears `is_active`, so a rejoining user
//! keeps their slot and display order.
//!
//! ```text
//! joined U2 ──▶ [U2 ●]
//! joined U3 ──▶ [U2 ●, U3 ●]
//! left   U2 ──▶ [U2 ○, U3 ●]     active(): [U3]
//! joined U2 ──▶ [U2 ●, U3 ●]
//! ```

use serde::{Deserialize, Serialize};

use crate::protocol::{Permission, PresenceAction, UserPresence};

/// Another participant in the editing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub id: String,
    pub name: String,
    pub email: String,
    pub initials: String,
    pub permission: Permission,
    pub is_active: bool,
}

impl Collaborator {
    /// Build an entry from a presence event, filling placeholders for
    /// metadata the server did not send.
    pub fn from_presence(event: &UserPresence) -> Self {
        let name = event
            .name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| placeholder_name(&event.user_id));
        Self {
            id: event.user_id.clone(),
            initials: initials(&name),
            name,
            email: event.email.clone().unwrap_or_default(),
            permission: event.permission.unwrap_or_default(),
            is_active: event.action != PresenceAction::Left,
        }
    }

    /// Overwrite display metadata with whatever the event carries.
    fn merge_metadata(&mut self, event: &UserPresence) {
        if let Some(name) = event.name.as_ref().filter(|n| !n.trim().is_empty()) {
            self.name = name.clone();
            self.initials = initials(name);
        }
        if let Some(email) = &event.email {
            self.email = email.clone();
        }
        if let Some(permission) = event.permission {
            self.permission = permission;
        }
    }
}

/// Display name for a user we know nothing about.
pub fn placeholder_name(user_id: &str) -> String {
    let short: String = user_id.chars().take(8).collect();
    format!("User {short}")
}

/// First letter of up to two words, uppercased. `"?"` for blank names.
pub fn initials(name: &str) -> String {
    let letters: String = name
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .take(2)
        .flat_map(char::to_uppercase)
        .collect();
    if letters.is_empty() {
        "?".to_string()
    } else {
        letters
    }
}

/// Apply one presence event to a roster snapshot.
///
/// - `joined`: inserts an unseen id, or reactivates an existing entry and
///   refreshes its metadata. Never duplicates an id.
/// - `left`: marks the entry inactive. An unseen id is recorded as an
///   inactive entry so the roster still reflects the latest event.
/// - `active`: no roster change; it only refreshes the server-side timeout.
pub fn reduce(entries: &[Collaborator], event: &UserPresence) -> Vec<Collaborator> {
    let mut next = entries.to_vec();
    let existing = next.iter().position(|c| c.id == event.user_id);

    match (event.action, existing) {
        (PresenceAction::Joined, Some(i)) => {
            next[i].is_active = true;
            next[i].merge_metadata(event);
        }
        (PresenceAction::Joined, None) | (PresenceAction::Left, None) => {
            next.push(Collaborator::from_presence(event));
        }
        (PresenceAction::Left, Some(i)) => {
            next[i].is_active = false;
        }
        (PresenceAction::Active, _) => {}
    }

    next
}

/// Immutable roster snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    entries: Vec<Collaborator>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the roster that results from `event`. `self` is untouched.
    pub fn apply(&self, event: &UserPresence) -> Roster {
        Roster {
            entries: reduce(&self.entries, event),
        }
    }

    /// Collaborators currently present, in join order. This is the list the
    /// host UI renders.
    pub fn active(&self) -> Vec<Collaborator> {
        self.entries.iter().filter(|c| c.is_active).cloned().collect()
    }

    /// Every entry ever seen, including those who left.
    pub fn entries(&self) -> &[Collaborator] {
        &self.entries
    }

    pub fn get(&self, user_id: &str) -> Option<&Collaborator> {
        self.entries.iter().find(|c| c.id == user_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(id: &str) -> UserPresence {
        UserPresence::new(PresenceAction::Joined, id)
    }

    fn left(id: &str) -> UserPresence {
        UserPresence::new(PresenceAction::Left, id)
    }

    #[test]
    fn test_join_then_leave_scenario() {
        let roster = Roster::new().apply(&joined("U2"));
        let entry = roster.get("U2").unwrap();
        assert!(entry.is_active);
        assert_eq!(roster.active().len(), 1);

        let roster = roster.apply(&left("U2"));
        assert!(!roster.get("U2").unwrap().is_active);
        assert!(roster.active().is_empty());
        assert_eq!(roster.len(), 1); // retained for rejoin
    }

    #[test]
    fn test_single_entry_per_id_over_event_sequences() {
        let sequences: [&[PresenceAction]; 5] = [
            &[PresenceAction::Joined, PresenceAction::Joined],
            &[PresenceAction::Joined, PresenceAction::Left, PresenceAction::Joined],
            &[PresenceAction::Left],
            &[PresenceAction::Left, PresenceAction::Joined, PresenceAction::Left],
            &[
                PresenceAction::Joined,
                PresenceAction::Active,
                PresenceAction::Left,
                PresenceAction::Left,
                PresenceAction::Joined,
            ],
        ];

        for seq in sequences {
            let mut roster = Roster::new();
            let mut last_presence = None;
            for action in seq {
                roster = roster.apply(&UserPresence::new(*action, "U7"));
                if *action != PresenceAction::Active {
                    last_presence = Some(*action);
                }
            }
            let matching = roster.entries().iter().filter(|c| c.id == "U7").count();
            assert_eq!(matching, 1, "sequence {seq:?}");
            assert_eq!(
                roster.get("U7").unwrap().is_active,
                last_presence == Some(PresenceAction::Joined),
                "sequence {seq:?}"
            );
        }
    }

    #[test]
    fn test_apply_does_not_mutate_input() {
        let before = Roster::new().apply(&joined("U2"));
        let after = before.apply(&left("U2"));
        assert!(before.get("U2").unwrap().is_active);
        assert!(!after.get("U2").unwrap().is_active);
    }

    #[test]
    fn test_active_is_noop() {
        let roster = Roster::new().apply(&joined("U2"));
        let same = roster.apply(&UserPresence::new(PresenceAction::Active, "U2"));
        assert_eq!(roster, same);

        let untouched = Roster::new().apply(&UserPresence::new(PresenceAction::Active, "U9"));
        assert!(untouched.is_empty());
    }

    #[test]
    fn test_rejoin_keeps_order_and_refreshes_metadata() {
        let roster = Roster::new()
            .apply(&joined("U2"))
            .apply(&joined("U3"))
            .apply(&left("U2"));
        let mut rejoin = joined("U2").with_name("Grace Hopper");
        rejoin.permission = Some(Permission::Admin);
        let roster = roster.apply(&rejoin);

        let ids: Vec<_> = roster.active().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, ["U2", "U3"]);
        let u2 = roster.get("U2").unwrap();
        assert_eq!(u2.name, "Grace Hopper");
        assert_eq!(u2.initials, "GH");
        assert_eq!(u2.permission, Permission::Admin);
    }

    #[test]
    fn test_placeholder_metadata() {
        let c = Collaborator::from_presence(&joined("a1b2c3d4-e5f6"));
        assert_eq!(c.name, "User a1b2c3d4");
        assert_eq!(c.initials, "UA");
        assert_eq!(c.email, "");
        assert_eq!(c.permission, Permission::Edit);
    }

    #[test]
    fn test_blank_name_falls_back_to_placeholder() {
        let c = Collaborator::from_presence(&joined("U5").with_name("   "));
        assert_eq!(c.name, "User U5");
    }

    #[test]
    fn test_initials() {
        assert_eq!(initials("ada lovelace"), "AL");
        assert_eq!(initials("Linus"), "L");
        assert_eq!(initials("Jean Luc Picard"), "JL");
        assert_eq!(initials(""), "?");
    }

    #[test]
    fn test_collaborator_serializes_camel_case() {
        let c = Collaborator::from_presence(&joined("U2"));
        let value = serde_json::to_value(&c).unwrap();
        assert_eq!(value["isActive"], true);
        assert_eq!(value["permission"], "edit");
    }
}
