//! Property-based tests for the message store merge rules.
//!
//! Whatever order confirmations, fetches and history loads arrive in, the
//! store must stay sorted, free of duplicate ids, and free of pending entries
//! whose confirmation has been processed.

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use dealflow_client::stores::MessageStore;
use dealflow_client::StoredMessage;
use dealflow_shared::{ClientKey, ConversationId, Message, MessageId, Participant};
use proptest::prelude::*;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

fn conv() -> ConversationId {
    "deal-room".into()
}

fn confirmed(id: usize, sender: &str, content: &str, secs: i64) -> Message {
    Message {
        id: MessageId::new(format!("m{id}")),
        conversation: conv(),
        sender: Participant::new(sender, sender),
        content: content.into(),
        created_at: at(secs),
        is_edited: false,
        is_deleted: false,
        parent_message: None,
        client_key: None,
    }
}

fn assert_well_formed(store: &MessageStore) -> Result<(), TestCaseError> {
    let msgs = store.messages();
    let confirmed_len = msgs.iter().take_while(|m| !m.is_pending()).count();
    prop_assert!(
        msgs[confirmed_len..].iter().all(StoredMessage::is_pending),
        "pending entries must trail confirmed ones"
    );
    prop_assert!(msgs[..confirmed_len]
        .windows(2)
        .all(|w| w[0].created_at <= w[1].created_at));

    let mut seen = HashSet::new();
    for id in msgs.iter().filter_map(StoredMessage::id) {
        prop_assert!(seen.insert(id.clone()), "duplicate id {id}");
    }
    Ok(())
}

/// A batch of local sends, their confirmation order, and whether the server
/// echoes idempotency keys.
fn sends_strategy() -> impl Strategy<Value = (Vec<&'static str>, Vec<usize>, bool, Vec<bool>)> {
    prop::collection::vec(prop::sample::select(vec!["ok", "hi", "on my way", "ok"]), 1..12)
        .prop_flat_map(|contents| {
            let n = contents.len();
            let order = Just((0..n).collect::<Vec<_>>()).prop_shuffle();
            let redelivered = prop::collection::vec(any::<bool>(), n);
            (Just(contents), order, any::<bool>(), redelivered)
        })
}

proptest! {
    #[test]
    fn every_send_confirms_to_exactly_one_entry(
        (contents, order, echo_keys, redelivered) in sends_strategy()
    ) {
        let me = Participant::new("me", "Me");
        let mut store = MessageStore::for_conversation(conv());

        let keys: Vec<ClientKey> = contents.iter().map(|_| ClientKey::generate()).collect();
        for (i, content) in contents.iter().enumerate() {
            store.append_optimistic(StoredMessage::pending(
                keys[i],
                conv(),
                me.clone(),
                *content,
                None,
                at(i as i64),
            ));
        }
        prop_assert_eq!(store.pending_count(), contents.len());

        for &i in &order {
            let mut msg = confirmed(i, "me", contents[i], 100 + i as i64);
            if echo_keys {
                msg.client_key = Some(keys[i]);
            }
            store.reconcile(msg.clone());
            // HTTP response and channel echo for the same send
            if redelivered[i] {
                store.reconcile(msg);
            }
            assert_well_formed(&store)?;
        }

        prop_assert_eq!(store.pending_count(), 0);
        prop_assert_eq!(store.len(), contents.len());
        for content in ["ok", "hi", "on my way"] {
            let sent = contents.iter().filter(|c| **c == content).count();
            let stored = store.messages().iter().filter(|m| m.content == content).count();
            prop_assert_eq!(sent, stored);
        }
    }

    #[test]
    fn mixed_sources_keep_timestamp_order(
        deliveries in prop::collection::vec((0i64..300, 0u8..3), 1..40),
        load_at in 0usize..40,
        drafts in prop::collection::vec(any::<bool>(), 0..4),
    ) {
        let me = Participant::new("me", "Me");
        let mut store = MessageStore::for_conversation(conv());
        for (k, _) in drafts.iter().enumerate() {
            store.append_optimistic(StoredMessage::pending(
                ClientKey::generate(),
                conv(),
                me.clone(),
                format!("draft {}", k % 2),
                None,
                at(1_000),
            ));
        }

        // Keyless confirmations of some local sends, already in the history
        // and echoed again over the channel afterwards.
        let sends: Vec<Message> = drafts
            .iter()
            .enumerate()
            .filter(|(_, in_history)| **in_history)
            .map(|(k, _)| confirmed(100 + k, "me", &format!("draft {}", k % 2), 1_001))
            .collect();

        let mut history: Vec<Message> = deliveries
            .iter()
            .enumerate()
            .filter(|(_, (_, source))| *source == 2)
            .map(|(i, (secs, _))| confirmed(i, "them", "from history", *secs))
            .collect();
        history.extend(sends.iter().cloned());

        let mut loaded = false;
        for (i, (secs, source)) in deliveries.iter().enumerate() {
            if i == load_at {
                store.load(&conv(), history.clone());
                loaded = true;
            }
            let msg = confirmed(i, "them", "live", *secs);
            match source {
                0 => {
                    store.reconcile(msg);
                }
                1 => {
                    store.merge_fetched(vec![msg]);
                }
                _ => {}
            }
            assert_well_formed(&store)?;
        }
        if !loaded {
            store.load(&conv(), history);
        }
        assert_well_formed(&store)?;

        for echo in sends.iter().cloned() {
            store.reconcile(echo);
            assert_well_formed(&store)?;
        }

        let settled = sends.len();
        prop_assert_eq!(store.pending_count(), drafts.len() - settled);
        prop_assert_eq!(store.len(), deliveries.len() + drafts.len());
    }
}
