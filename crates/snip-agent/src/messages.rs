//! In-memory conversation history.
//!
//! A [`MessageStore`] belongs to exactly one agent.  Every mutator takes the
//! write half of a single lock, so appends from concurrent HTTP requests are
//! serialized and size queries always observe a consistent sequence.

use tokio::sync::RwLock;

use crate::llm::types::Message;

/// Ordered, lock-protected sequence of messages.
#[derive(Debug, Default)]
pub struct MessageStore {
    inner: RwLock<Vec<Message>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with `messages`.
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            inner: RwLock::new(messages),
        }
    }

    /// Append one message at the end.
    pub async fn append(&self, message: Message) {
        self.inner.write().await.push(message);
    }

    /// Append several messages under one lock acquisition, preserving order.
    pub async fn extend(&self, messages: impl IntoIterator<Item = Message>) {
        self.inner.write().await.extend(messages);
    }

    /// Replace the whole history atomically.
    pub async fn replace_all(&self, messages: Vec<Message>) {
        *self.inner.write().await = messages;
    }

    /// Replace `prefix` with `replacement` if the history still starts with
    /// it, keeping every message appended after it.  Otherwise the whole
    /// history is replaced.  Returns whether the prefix matched.
    pub async fn replace_prefix(&self, prefix: &[Message], replacement: Vec<Message>) -> bool {
        let mut inner = self.inner.write().await;
        let matched = inner.starts_with(prefix);
        if matched {
            inner.splice(..prefix.len(), replacement);
        } else {
            *inner = replacement;
        }
        matched
    }

    /// Copy of the current history.
    pub async fn snapshot(&self) -> Vec<Message> {
        self.inner.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Characters across every text-bearing part of every message.
    pub async fn char_len(&self) -> usize {
        self.inner.read().await.iter().map(Message::char_len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_preserves_order() {
        let store = MessageStore::new();
        store.append(Message::user("one")).await;
        store.append(Message::assistant("two")).await;

        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].text(), "one");
        assert_eq!(snapshot[1].text(), "two");
        assert_eq!(store.char_len().await, 6);
    }

    #[tokio::test]
    async fn replace_all_with_snapshot_is_identity() {
        let store = MessageStore::with_messages(vec![
            Message::system("be brief"),
            Message::user("hi"),
            Message::assistant("hello"),
        ]);
        let before = store.snapshot().await;
        store.replace_all(store.snapshot().await).await;
        assert_eq!(store.snapshot().await, before);
    }

    #[tokio::test]
    async fn replace_all_swaps_everything() {
        let store = MessageStore::with_messages(vec![Message::user("a"), Message::user("b")]);
        store.replace_all(vec![Message::system("SUMMARY")]).await;
        assert_eq!(store.len().await, 1);
        assert_eq!(store.snapshot().await[0].text(), "SUMMARY");
    }

    #[tokio::test]
    async fn replace_prefix_keeps_later_appends() {
        let store = MessageStore::with_messages(vec![Message::user("a"), Message::assistant("b")]);
        let prefix = store.snapshot().await;
        store.append(Message::user("c")).await;

        assert!(store.replace_prefix(&prefix, vec![Message::system("S")]).await);
        let texts: Vec<String> = store.snapshot().await.iter().map(Message::text).collect();
        assert_eq!(texts, ["S", "c"]);
    }

    #[tokio::test]
    async fn replace_prefix_on_rewritten_history_replaces_all() {
        let store = MessageStore::with_messages(vec![Message::user("a")]);
        let prefix = store.snapshot().await;
        store.replace_all(vec![Message::user("x"), Message::user("y")]).await;

        assert!(!store.replace_prefix(&prefix, vec![Message::system("S")]).await);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.snapshot().await[0].text(), "S");
    }

    #[tokio::test]
    async fn concurrent_appends_are_all_kept() {
        let store = std::sync::Arc::new(MessageStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .extend([Message::user(format!("q{i}")), Message::assistant("a")])
                    .await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let snapshot = store.snapshot().await;
        assert_eq!(snapshot.len(), 32);
        // Pairs stay adjacent because each extend holds the lock once.
        for pair in snapshot.chunks(2) {
            assert!(pair[0].text().starts_with('q'));
            assert_eq!(pair[1].text(), "a");
        }
    }
}
