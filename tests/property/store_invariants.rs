//! Property-based tests for the message store.
//!
//! Uses proptest to verify, over arbitrary message sequences:
//! 1. The snapshot is always sorted by creation time.
//! 2. Equal timestamps preserve insertion order (stability).
//! 3. Each message id appears at most once, whatever the input.
//! 4. Batch insertion behaves exactly like sequential insertion.
//! 5. `oldest` agrees with the snapshot head.

use std::collections::HashSet;

use proptest::prelude::*;

use huddle::store::MessageStore;
use huddle_proto::message::{
    ChatMessage, ConversationId, MessageBody, MessageId, MessageStatus, ParticipantId, Timestamp,
};
use uuid::Uuid;

/// Strategy for messages with arbitrary ids and a small timestamp range, so
/// ties and duplicate ids both actually occur.
fn arb_message() -> impl Strategy<Value = ChatMessage> {
    (0u128..50, 0u64..8, "[a-z]{1,16}").prop_map(|(id, millis, text)| ChatMessage {
        id: MessageId::from_uuid(Uuid::from_u128(id)),
        conversation_id: ConversationId::from_uuid(Uuid::from_u128(1)),
        sender_id: ParticipantId::new("alice"),
        receiver_id: ParticipantId::new("bob"),
        body: MessageBody::Text(text),
        created_at: Timestamp::from_millis(millis),
    })
}

/// Strategy for messages whose ids are all distinct.
fn arb_unique_messages(max: usize) -> impl Strategy<Value = Vec<ChatMessage>> {
    prop::collection::vec(arb_message(), 0..max).prop_map(|mut messages| {
        for (i, msg) in messages.iter_mut().enumerate() {
            msg.id = MessageId::from_uuid(Uuid::from_u128(0x1000 + i as u128));
        }
        messages
    })
}

fn fill(messages: &[ChatMessage]) -> MessageStore {
    let mut store = MessageStore::new();
    for msg in messages {
        store.insert(msg.clone(), MessageStatus::Sent);
    }
    store
}

proptest! {
    /// Whatever the insertion order, the snapshot is sorted by creation time.
    #[test]
    fn snapshot_is_sorted_by_creation_time(messages in prop::collection::vec(arb_message(), 0..50)) {
        let store = fill(&messages);
        let snapshot = store.snapshot();
        for pair in snapshot.windows(2) {
            prop_assert!(pair[0].message.created_at <= pair[1].message.created_at);
        }
    }

    /// Messages with equal timestamps stay in the order they were inserted.
    #[test]
    fn equal_timestamps_preserve_insertion_order(messages in arb_unique_messages(50)) {
        let store = fill(&messages);

        // Expected relative order within each timestamp: input order.
        let snapshot = store.snapshot();
        for millis in 0u64..8 {
            let expected: Vec<MessageId> = messages
                .iter()
                .filter(|m| m.created_at.as_millis() == millis)
                .map(|m| m.id)
                .collect();
            let actual: Vec<MessageId> = snapshot
                .iter()
                .filter(|m| m.message.created_at.as_millis() == millis)
                .map(|m| m.message.id)
                .collect();
            prop_assert_eq!(actual, expected);
        }
    }

    /// Each id is stored at most once, and re-inserting everything changes
    /// nothing.
    #[test]
    fn ids_are_unique_and_reinsertion_is_a_noop(messages in prop::collection::vec(arb_message(), 0..50)) {
        let mut store = fill(&messages);

        let unique_ids: HashSet<MessageId> = messages.iter().map(|m| m.id).collect();
        prop_assert_eq!(store.len(), unique_ids.len());

        let before = store.snapshot();
        let inserted = store.insert_many(
            messages.iter().cloned().map(|m| (m, MessageStatus::Read)),
        );
        prop_assert_eq!(inserted, 0);
        prop_assert_eq!(store.snapshot(), before);
    }

    /// Inserting a batch is indistinguishable from inserting one by one.
    #[test]
    fn batch_insert_matches_sequential_insert(
        messages in arb_unique_messages(50),
        split in 0usize..50,
    ) {
        let split = split.min(messages.len());
        let sequential = fill(&messages);

        let mut batched = MessageStore::new();
        for msg in &messages[..split] {
            batched.insert(msg.clone(), MessageStatus::Sent);
        }
        batched.insert_many(
            messages[split..]
                .iter()
                .cloned()
                .map(|m| (m, MessageStatus::Sent)),
        );

        prop_assert_eq!(batched.snapshot(), sequential.snapshot());
    }

    /// `oldest` is the snapshot head, which carries the minimum timestamp.
    #[test]
    fn oldest_is_snapshot_head(messages in prop::collection::vec(arb_message(), 0..50)) {
        let store = fill(&messages);
        let snapshot = store.snapshot();

        prop_assert_eq!(
            store.oldest().map(|m| m.id),
            snapshot.first().map(|m| m.message.id)
        );
        if let Some(head) = store.oldest() {
            let min = snapshot
                .iter()
                .map(|m| m.message.created_at)
                .min()
                .map_or(u64::MAX, |t| t.as_millis());
            prop_assert_eq!(head.created_at.as_millis(), min);
        }
    }
}
