//! Local view of one room's message list.
//!
//! Optimistic entries, synchronous confirmations and broadcast echoes of the
//! same logical message all collapse into one entry. Entries keep the
//! position at which they were first observed: a confirmation swaps content
//! in place and never reorders the list. Removed entries leave a hole so
//! indexes stay valid without rescans.

use std::collections::HashMap;

use crate::{
    model::{Message, MessageStatus},
    protocol::StatusUpdate,
};

/// What applying an incoming record did to the list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    Appended(usize),
    Replaced(usize),
    Ignored,
}

/// Content needed to resubmit a failed entry under its original local id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDraft {
    pub local_id: String,
    pub body: String,
    pub replied_to_id: Option<String>,
}

#[derive(Debug, Default)]
pub struct ClientReconciler {
    room_id: String,
    entries: Vec<Option<Message>>,
    by_canonical: HashMap<String, usize>,
    by_local: HashMap<String, usize>,
    local_to_canonical: HashMap<String, String>,
}

impl ClientReconciler {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            ..Self::default()
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Visible entries in display order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.messages().count()
    }

    pub fn is_empty(&self) -> bool {
        self.messages().next().is_none()
    }

    pub fn by_local_id(&self, local_id: &str) -> Option<&Message> {
        self.by_local.get(local_id).and_then(|&pos| self.entries[pos].as_ref())
    }

    pub fn by_canonical_id(&self, canonical_id: &str) -> Option<&Message> {
        self.by_canonical.get(canonical_id).and_then(|&pos| self.entries[pos].as_ref())
    }

    /// Canonical id recorded for a local id at submission time.
    pub fn canonical_for(&self, local_id: &str) -> Option<&str> {
        self.local_to_canonical.get(local_id).map(String::as_str)
    }

    /// Appends a locally created entry. Returns false if the message has no
    /// local id or the local id is already present.
    pub fn push_optimistic(&mut self, mut message: Message) -> bool {
        let Some(local_id) = message.local_id.clone() else {
            return false;
        };
        if self.by_local.contains_key(&local_id) {
            return false;
        }

        message.status = MessageStatus::Sending;
        let pos = self.entries.len();
        self.entries.push(Some(message));
        self.by_local.insert(local_id, pos);
        true
    }

    /// Applies the synchronous response to the submission of `local_id`.
    pub fn confirm(&mut self, local_id: &str, confirmed: Message) -> Merge {
        let Some(canonical_id) = confirmed.canonical_id.clone() else {
            return Merge::Ignored;
        };
        let Some(&pos) = self.by_local.get(local_id) else {
            return self.apply_incoming(confirmed);
        };
        self.local_to_canonical.insert(local_id.to_owned(), canonical_id.clone());

        // an echo that beat the confirmation was appended on its own; fold it in here
        let mut confirmed = confirmed;
        if let Some(&echo_pos) = self.by_canonical.get(&canonical_id) {
            if echo_pos != pos {
                if let Some(echo) = self.entries[echo_pos].take() {
                    confirmed.status = merged_status(echo.status, confirmed.status);
                }
            }
        }

        confirmed.local_id = Some(local_id.to_owned());
        self.replace(pos, confirmed);
        self.by_canonical.insert(canonical_id, pos);
        Merge::Replaced(pos)
    }

    /// Applies a canonical record from the real-time channel or history.
    pub fn apply_incoming(&mut self, message: Message) -> Merge {
        if message.room_id != self.room_id {
            return Merge::Ignored;
        }
        let Some(canonical_id) = message.canonical_id.clone() else {
            return Merge::Ignored;
        };

        if let Some(&pos) = self.by_canonical.get(&canonical_id) {
            self.replace(pos, message);
            return Merge::Replaced(pos);
        }

        let own_entry = message.local_id.as_deref().and_then(|local_id| {
            let pos = *self.by_local.get(local_id)?;
            let entry = self.entries[pos].as_ref()?;
            (entry.sender_id == message.sender_id && entry.canonical_id.is_none()).then_some((local_id.to_owned(), pos))
        });
        if let Some((local_id, pos)) = own_entry {
            self.local_to_canonical.insert(local_id, canonical_id.clone());
            self.replace(pos, message);
            self.by_canonical.insert(canonical_id, pos);
            return Merge::Replaced(pos);
        }

        let pos = self.entries.len();
        self.entries.push(Some(message));
        self.by_canonical.insert(canonical_id, pos);
        Merge::Appended(pos)
    }

    /// Seeds or refreshes the view from a history fetch.
    pub fn load_history(&mut self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.apply_incoming(message);
        }
    }

    /// Applies a status event. Returns how many entries moved forward.
    pub fn apply_status(&mut self, update: &StatusUpdate) -> usize {
        if update.room_id != self.room_id {
            return 0;
        }

        let mut changed = 0;
        for id in update.ids() {
            let Some(&pos) = self.by_canonical.get(id) else {
                continue;
            };
            if let Some(entry) = self.entries[pos].as_mut() {
                if let Some(next) = entry.status.advance(update.status) {
                    entry.status = next;
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Marks an unconfirmed entry as failed. Confirmed entries are left alone.
    pub fn mark_failed(&mut self, local_id: &str) -> bool {
        match self.unconfirmed_mut(local_id) {
            Some(entry) if entry.status == MessageStatus::Sending => {
                entry.status = MessageStatus::Failed;
                true
            }
            _ => false,
        }
    }

    /// Puts a failed entry back to `sending` at the same position.
    pub fn retry(&mut self, local_id: &str) -> Option<RetryDraft> {
        let entry = self.unconfirmed_mut(local_id)?;
        if entry.status != MessageStatus::Failed {
            return None;
        }
        entry.status = MessageStatus::Sending;
        Some(RetryDraft {
            local_id: local_id.to_owned(),
            body: entry.body.clone(),
            replied_to_id: entry.replied_to_id.clone(),
        })
    }

    /// Removes a failed entry at the user's request.
    pub fn discard(&mut self, local_id: &str) -> bool {
        match self.unconfirmed_mut(local_id) {
            Some(entry) if entry.status == MessageStatus::Failed => {}
            _ => return false,
        }
        if let Some(pos) = self.by_local.remove(local_id) {
            self.entries[pos] = None;
        }
        true
    }

    /// Canonical ids of messages from other users not yet seen.
    pub fn unseen_from_peers(&self, user_id: &str) -> Vec<String> {
        self.messages()
            .filter(|m| m.sender_id != user_id && m.status != MessageStatus::Seen)
            .filter_map(|m| m.canonical_id.clone())
            .collect()
    }

    fn unconfirmed_mut(&mut self, local_id: &str) -> Option<&mut Message> {
        let pos = *self.by_local.get(local_id)?;
        self.entries[pos].as_mut().filter(|entry| entry.canonical_id.is_none())
    }

    fn replace(&mut self, pos: usize, mut incoming: Message) {
        if let Some(current) = self.entries[pos].take() {
            incoming.status = merged_status(current.status, incoming.status);
            if incoming.local_id.is_none() {
                incoming.local_id = current.local_id;
            }
        }
        self.entries[pos] = Some(incoming);
    }
}

/// Status to display when a canonical record lands on an existing entry.
fn merged_status(current: MessageStatus, incoming: MessageStatus) -> MessageStatus {
    match current {
        // a late success overrides a local timeout
        MessageStatus::Sending | MessageStatus::Failed => incoming,
        _ if incoming.is_later_than(current) => incoming,
        _ => current,
    }
}

#[cfg(test)]
mod tests {
    use time::OffsetDateTime;

    use super::*;
    use crate::model::User;

    fn me() -> User {
        User { user_id: "u1".into(), username: "jay".into(), display_name: "Jay".into() }
    }

    fn optimistic(local_id: &str, body: &str) -> Message {
        Message::optimistic(local_id, "r1", &me(), body, None)
    }

    fn canonical(id: &str, local_id: Option<&str>, sender: &str, body: &str) -> Message {
        Message {
            canonical_id: Some(id.into()),
            local_id: local_id.map(str::to_owned),
            room_id: "r1".into(),
            sender_id: sender.into(),
            sender_display_name: String::new(),
            body: body.into(),
            replied_to_id: None,
            created_at: OffsetDateTime::now_utc(),
            status: MessageStatus::Sent,
        }
    }

    fn bodies(view: &ClientReconciler) -> Vec<&str> {
        view.messages().map(|m| m.body.as_str()).collect()
    }

    #[test]
    fn echo_after_confirmation_yields_one_entry() {
        let mut view = ClientReconciler::new("r1");
        view.push_optimistic(optimistic("t1", "hi"));

        assert_eq!(view.confirm("t1", canonical("m1", Some("t1"), "u1", "hi")), Merge::Replaced(0));
        assert_eq!(view.apply_incoming(canonical("m1", Some("t1"), "u1", "hi")), Merge::Replaced(0));

        assert_eq!(view.len(), 1);
        let entry = view.by_canonical_id("m1").unwrap();
        assert_eq!(entry.status, MessageStatus::Sent);
        assert_eq!(entry.local_id.as_deref(), Some("t1"));
        assert_eq!(view.canonical_for("t1"), Some("m1"));
    }

    #[test]
    fn echo_before_confirmation_yields_one_entry() {
        let mut view = ClientReconciler::new("r1");
        view.push_optimistic(optimistic("t1", "hi"));

        assert_eq!(view.apply_incoming(canonical("m1", Some("t1"), "u1", "hi")), Merge::Replaced(0));
        assert_eq!(view.confirm("t1", canonical("m1", Some("t1"), "u1", "hi")), Merge::Replaced(0));

        assert_eq!(view.len(), 1);
        assert_eq!(view.by_local_id("t1").unwrap().canonical_id.as_deref(), Some("m1"));
    }

    #[test]
    fn echo_without_local_id_is_folded_on_confirmation() {
        let mut view = ClientReconciler::new("r1");
        view.push_optimistic(optimistic("t1", "hi"));
        view.push_optimistic(optimistic("t2", "there"));

        assert_eq!(view.apply_incoming(canonical("m1", None, "u1", "hi")), Merge::Appended(2));
        view.apply_status(&StatusUpdate::single("r1", "m1", MessageStatus::Delivered));
        assert_eq!(view.confirm("t1", canonical("m1", Some("t1"), "u1", "hi")), Merge::Replaced(0));

        assert_eq!(bodies(&view), ["hi", "there"]);
        let entry = view.by_canonical_id("m1").unwrap();
        assert_eq!(entry.status, MessageStatus::Delivered);
        assert_eq!(entry.local_id.as_deref(), Some("t1"));
    }

    #[test]
    fn duplicate_echoes_never_duplicate_entries() {
        let mut view = ClientReconciler::new("r1");
        for _ in 0..3 {
            view.apply_incoming(canonical("m9", None, "u2", "peer"));
        }
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn identical_text_sent_twice_stays_two_entries() {
        let mut view = ClientReconciler::new("r1");
        view.push_optimistic(optimistic("t1", "hi"));
        view.push_optimistic(optimistic("t2", "hi"));

        view.apply_incoming(canonical("m2", Some("t2"), "u1", "hi"));
        view.confirm("t1", canonical("m1", Some("t1"), "u1", "hi"));

        assert_eq!(view.len(), 2);
        assert_eq!(view.by_local_id("t1").unwrap().canonical_id.as_deref(), Some("m1"));
        assert_eq!(view.by_local_id("t2").unwrap().canonical_id.as_deref(), Some("m2"));
    }

    #[test]
    fn out_of_order_confirmations_keep_positions() {
        let mut view = ClientReconciler::new("r1");
        for i in 0..5 {
            view.push_optimistic(optimistic(&format!("t{i}"), &format!("msg {i}")));
        }
        view.apply_incoming(canonical("p1", None, "u2", "peer"));

        for i in [3, 0, 4, 2, 1] {
            let local_id = format!("t{i}");
            let confirmed = canonical(&format!("m{i}"), Some(local_id.as_str()), "u1", &format!("msg {i}"));
            assert_eq!(view.confirm(&local_id, confirmed), Merge::Replaced(i));
        }

        assert_eq!(bodies(&view), ["msg 0", "msg 1", "msg 2", "msg 3", "msg 4", "peer"]);
        assert!(view.messages().all(|m| m.canonical_id.is_some()));
    }

    #[test]
    fn failed_entry_stays_and_gets_no_canonical_twin() {
        let mut view = ClientReconciler::new("r1");
        view.push_optimistic(optimistic("t1", "hi"));

        assert!(view.mark_failed("t1"));
        assert_eq!(view.len(), 1);
        let entry = view.by_local_id("t1").unwrap();
        assert_eq!(entry.status, MessageStatus::Failed);
        assert_eq!(entry.body, "hi");
        assert!(entry.canonical_id.is_none());
        assert!(view.messages().all(|m| m.canonical_id.is_none()));
    }

    #[test]
    fn late_success_replaces_a_timed_out_entry() {
        let mut view = ClientReconciler::new("r1");
        view.push_optimistic(optimistic("t1", "hi"));
        view.mark_failed("t1");

        view.apply_incoming(canonical("m1", Some("t1"), "u1", "hi"));

        assert_eq!(view.len(), 1);
        assert_eq!(view.by_local_id("t1").unwrap().status, MessageStatus::Sent);
    }

    #[test]
    fn retry_and_discard_only_touch_failed_entries() {
        let mut view = ClientReconciler::new("r1");
        view.push_optimistic(optimistic("t1", "hi"));
        view.push_optimistic(optimistic("t2", "bye"));

        assert_eq!(view.retry("t1"), None);
        assert!(!view.discard("t1"));

        view.mark_failed("t1");
        view.mark_failed("t2");
        let draft = view.retry("t1").unwrap();
        assert_eq!(draft.body, "hi");
        assert_eq!(view.by_local_id("t1").unwrap().status, MessageStatus::Sending);

        assert!(view.discard("t2"));
        assert_eq!(bodies(&view), ["hi"]);
        assert!(view.by_local_id("t2").is_none());
    }

    #[test]
    fn status_never_regresses() {
        let mut view = ClientReconciler::new("r1");
        view.apply_incoming(canonical("m1", None, "u1", "hi"));

        assert_eq!(view.apply_status(&StatusUpdate::single("r1", "m1", MessageStatus::Seen)), 1);
        assert_eq!(view.apply_status(&StatusUpdate::single("r1", "m1", MessageStatus::Delivered)), 0);
        // a stale record from a history refetch must not drag it back either
        view.apply_incoming(canonical("m1", None, "u1", "hi"));

        assert_eq!(view.by_canonical_id("m1").unwrap().status, MessageStatus::Seen);
    }

    #[test]
    fn batched_seen_updates_every_listed_entry() {
        let mut view = ClientReconciler::new("r1");
        view.apply_incoming(canonical("m1", None, "u1", "one"));
        view.apply_incoming(canonical("m2", None, "u1", "two"));
        view.apply_incoming(canonical("m3", None, "u1", "three"));

        let update = StatusUpdate::batch("r1", vec!["m1".into(), "m2".into()], MessageStatus::Seen);
        assert_eq!(view.apply_status(&update), 2);

        let statuses: Vec<MessageStatus> = view.messages().map(|m| m.status).collect();
        assert_eq!(statuses, [MessageStatus::Seen, MessageStatus::Seen, MessageStatus::Sent]);
    }

    #[test]
    fn other_rooms_are_ignored() {
        let mut view = ClientReconciler::new("r1");
        let mut stray = canonical("m1", None, "u2", "hi");
        stray.room_id = "r2".into();
        assert_eq!(view.apply_incoming(stray), Merge::Ignored);
        assert!(view.is_empty());
    }

    #[test]
    fn unseen_from_peers_skips_own_and_seen() {
        let mut view = ClientReconciler::new("r1");
        view.apply_incoming(canonical("m1", None, "u1", "mine"));
        view.apply_incoming(canonical("m2", None, "u2", "theirs"));
        view.apply_incoming(canonical("m3", None, "u2", "theirs too"));
        view.apply_status(&StatusUpdate::single("r1", "m3", MessageStatus::Seen));

        assert_eq!(view.unseen_from_peers("u1"), vec!["m2".to_owned()]);
    }
}
