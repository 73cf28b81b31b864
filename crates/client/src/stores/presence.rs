//! Typing indicators and online status of counterparts.

use std::collections::HashMap;
use std::time::Duration;

use dealflow_shared::UserId;
use tokio::time::Instant;

/// A counterpart currently composing a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUser {
    pub id: UserId,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
struct TypingEntry {
    name: Option<String>,
    expires_at: Instant,
}

/// Set of typing counterparts, each with its own expiry deadline.
///
/// Entries are removed by an explicit stop event or when [`expire`] runs at
/// or after their deadline. The owner drives expiry using [`next_expiry`].
///
/// [`expire`]: TypingSet::expire
/// [`next_expiry`]: TypingSet::next_expiry
#[derive(Debug, Clone)]
pub struct TypingSet {
    quiet_period: Duration,
    entries: HashMap<UserId, TypingEntry>,
}

impl TypingSet {
    pub fn new(quiet_period: Duration) -> Self {
        Self {
            quiet_period,
            entries: HashMap::new(),
        }
    }

    /// Record a typing event at `now`, pushing the user's deadline out.
    ///
    /// Returns true if the user was not already in the set.
    pub fn refresh(&mut self, id: UserId, name: Option<String>, now: Instant) -> bool {
        let expires_at = now + self.quiet_period;
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.expires_at = expires_at;
                if name.is_some() {
                    entry.name = name;
                }
                false
            }
            None => {
                self.entries.insert(id, TypingEntry { name, expires_at });
                true
            }
        }
    }

    /// The user stopped typing.
    pub fn stop(&mut self, id: &UserId) -> bool {
        self.entries.remove(id).is_some()
    }

    /// Drop every entry whose deadline is at or before `now`.
    ///
    /// Returns true if anything was removed.
    pub fn expire(&mut self, now: Instant) -> bool {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.entries.len() != before
    }

    /// Earliest pending deadline, if any.
    pub fn next_expiry(&self) -> Option<Instant> {
        self.entries.values().map(|e| e.expires_at).min()
    }

    /// Typing users, sorted by id for stable display.
    pub fn users(&self) -> Vec<TypingUser> {
        let mut users: Vec<_> = self
            .entries
            .iter()
            .map(|(id, entry)| TypingUser {
                id: id.clone(),
                name: entry.name.clone(),
            })
            .collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        users
    }

    pub fn contains(&self, id: &UserId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Last reported online status per user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnlineUsers {
    status: HashMap<UserId, bool>,
}

impl OnlineUsers {
    /// Returns true if the stored status changed.
    pub fn update(&mut self, id: UserId, is_online: bool) -> bool {
        self.status.insert(id, is_online) != Some(is_online)
    }

    /// Unknown users are reported offline.
    pub fn is_online(&self, id: &UserId) -> bool {
        self.status.get(id).copied().unwrap_or(false)
    }

    pub fn snapshot(&self) -> HashMap<UserId, bool> {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUIET: Duration = Duration::from_secs(3);

    #[test]
    fn entry_expires_after_quiet_period() {
        let start = Instant::now();
        let mut typing = TypingSet::new(QUIET);
        assert!(typing.refresh("u1".into(), Some("Sam".into()), start));
        assert_eq!(typing.next_expiry(), Some(start + QUIET));

        assert!(!typing.expire(start + Duration::from_millis(2999)));
        assert!(typing.contains(&"u1".into()));
        assert!(typing.expire(start + QUIET));
        assert!(typing.is_empty());
    }

    #[test]
    fn refresh_extends_deadline_and_keeps_name() {
        let start = Instant::now();
        let mut typing = TypingSet::new(QUIET);
        typing.refresh("u1".into(), Some("Sam".into()), start);
        assert!(!typing.refresh("u1".into(), None, start + Duration::from_secs(2)));

        assert!(!typing.expire(start + Duration::from_secs(4)));
        assert_eq!(
            typing.users(),
            vec![TypingUser {
                id: "u1".into(),
                name: Some("Sam".into()),
            }]
        );
    }

    #[test]
    fn stop_removes_immediately() {
        let mut typing = TypingSet::new(QUIET);
        typing.refresh("u1".into(), None, Instant::now());
        assert!(typing.stop(&"u1".into()));
        assert!(!typing.stop(&"u1".into()));
        assert_eq!(typing.next_expiry(), None);
    }

    #[test]
    fn online_map_reports_changes() {
        let mut online = OnlineUsers::default();
        assert!(!online.is_online(&"u1".into()));
        assert!(online.update("u1".into(), true));
        assert!(!online.update("u1".into(), true));
        assert!(online.is_online(&"u1".into()));
        assert!(online.update("u1".into(), false));
    }
}
