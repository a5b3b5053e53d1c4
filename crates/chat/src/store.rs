//! Conversation state with a lock-free read side.
//!
//! [`ConversationStore`] is owned by the controller task, which is its only
//! mutator. Everyone else holds a [`StoreReader`]: the latest snapshot is an
//! `ArcSwap` load, and listeners are called after every commit.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use arc_swap::ArcSwap;

use crate::ids::ConversationId;
use crate::message::Message;
use crate::transcript::Transcript;
use crate::turn::TurnStatus;

/// Immutable view of a conversation at one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSnapshot {
    pub version: u64,
    pub conversation_id: ConversationId,
    pub messages: Vec<Message>,
    pub status: TurnStatus,
}

impl ConversationSnapshot {
    fn empty(conversation_id: ConversationId) -> Self {
        Self {
            version: 0,
            conversation_id,
            messages: Vec::new(),
            status: TurnStatus::Idle,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.status.is_busy()
    }

    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.iter().find(|message| message.is_streaming())
    }
}

type Listener = Arc<dyn Fn(&ConversationSnapshot) + Send + Sync + 'static>;

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: BTreeMap<u64, Listener>,
}

struct Shared {
    snapshot: ArcSwap<ConversationSnapshot>,
    listeners: Mutex<Listeners>,
}

impl Shared {
    fn listeners(&self) -> std::sync::MutexGuard<'_, Listeners> {
        // Listener bookkeeping cannot be left half-updated, so a poisoned
        // lock is still usable.
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cheap, cloneable read handle onto a conversation.
#[derive(Clone)]
pub struct StoreReader {
    shared: Arc<Shared>,
}

impl StoreReader {
    pub fn snapshot(&self) -> Arc<ConversationSnapshot> {
        self.shared.snapshot.load_full()
    }

    /// Registers `listener` for every future commit. The listener runs on the
    /// controller task and must not block.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ConversationSnapshot) + Send + Sync + 'static,
    {
        let mut listeners = self.shared.listeners();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners.entries.insert(id, Arc::new(listener));

        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners().entries.len()
    }
}

/// Keeps a listener registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription immediately unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.listeners().entries.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Subscription")
            .field("id", &self.id)
            .finish()
    }
}

pub struct ConversationStore {
    conversation_id: ConversationId,
    transcript: Transcript,
    status: TurnStatus,
    version: u64,
    shared: Arc<Shared>,
}

impl ConversationStore {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            transcript: Transcript::new(),
            status: TurnStatus::Idle,
            version: 0,
            shared: Arc::new(Shared {
                snapshot: ArcSwap::from_pointee(ConversationSnapshot::empty(conversation_id)),
                listeners: Mutex::new(Listeners::default()),
            }),
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn reader(&self) -> StoreReader {
        StoreReader {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Changes made here stay private until [`Self::commit`].
    pub fn transcript_mut(&mut self) -> &mut Transcript {
        &mut self.transcript
    }

    pub fn status(&self) -> &TurnStatus {
        &self.status
    }

    pub fn set_status(&mut self, status: TurnStatus) {
        self.status = status;
    }

    /// Publishes the current state as the next version and notifies listeners.
    pub fn commit(&mut self) -> Arc<ConversationSnapshot> {
        self.version += 1;
        let snapshot = Arc::new(ConversationSnapshot {
            version: self.version,
            conversation_id: self.conversation_id,
            messages: self.transcript.messages().to_vec(),
            status: self.status.clone(),
        });
        self.shared.snapshot.store(Arc::clone(&snapshot));

        // Call outside the lock so listeners may subscribe or unsubscribe.
        let listeners: Vec<Listener> = self.shared.listeners().entries.values().cloned().collect();
        for listener in listeners {
            listener(&snapshot);
        }

        snapshot
    }
}
