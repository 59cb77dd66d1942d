use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;
use uuid::Uuid;

use parley_db::Database;
use parley_types::events::GatewayEvent;

use crate::dispatcher::Dispatcher;

/// How long a typing entry stays live without a refresh. Clients re-send
/// their typing state while composing, so a healthy entry keeps sliding;
/// one from a crashed client expires on its own.
pub const TYPING_TTL: Duration = Duration::from_secs(5);

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// In-memory typing state: (conversation, user) -> deadline. Nothing here
/// is persisted; a restart simply forgets who was typing.
#[derive(Clone, Default)]
pub struct TypingTracker {
    entries: Arc<Mutex<HashMap<(Uuid, Uuid), Instant>>>,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a typing start/stop. Returns whether the caller owes members a
    /// transition event: refreshing a live entry extends its deadline without
    /// counting, and a stop counts as long as the entry was still present.
    /// The sweeper removes an entry when it announces the expiry, so each
    /// typing episode ends in exactly one TypingStop no matter who wins.
    pub fn set_typing(&self, conversation_id: Uuid, user_id: Uuid, is_typing: bool) -> bool {
        let now = Instant::now();
        let key = (conversation_id, user_id);
        let mut entries = self.entries.lock().expect("typing lock poisoned");

        if is_typing {
            let was_live = entries.get(&key).is_some_and(|deadline| *deadline > now);
            entries.insert(key, now + TYPING_TTL);
            !was_live
        } else {
            entries.remove(&key).is_some()
        }
    }

    /// Users with a live typing entry in the conversation, sorted for
    /// deterministic output. Expired entries are filtered here even before
    /// the sweeper removes them.
    pub fn typing_users(&self, conversation_id: Uuid) -> Vec<Uuid> {
        let now = Instant::now();
        let entries = self.entries.lock().expect("typing lock poisoned");
        let mut users: Vec<Uuid> = entries
            .iter()
            .filter(|(key, deadline)| key.0 == conversation_id && **deadline > now)
            .map(|(key, _)| key.1)
            .collect();
        users.sort();
        users
    }

    /// First user other than the requester currently typing, if any.
    pub fn typing_indicator(&self, conversation_id: Uuid, requester: Uuid) -> Option<Uuid> {
        self.typing_users(conversation_id)
            .into_iter()
            .find(|user| *user != requester)
    }

    /// Removes every expired entry and returns them, so the caller can tell
    /// conversation members the silence was noticed.
    pub fn sweep(&self) -> Vec<(Uuid, Uuid)> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("typing lock poisoned");
        let expired: Vec<(Uuid, Uuid)> = entries
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            entries.remove(key);
        }
        expired
    }
}

/// Background reclaim: expired typing entries turn into TypingStop events
/// for the conversation's members. Runs for the life of the server.
pub async fn run_sweep_loop(tracker: TypingTracker, db: Arc<Database>, dispatcher: Dispatcher) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;

        for (conversation_id, user_id) in tracker.sweep() {
            let members = match db.conversation_member_ids(&conversation_id.to_string()) {
                Ok(ids) => ids,
                Err(e) => {
                    warn!("Typing sweep member lookup failed: {:#}", e);
                    continue;
                }
            };
            let member_ids: Vec<Uuid> = members
                .iter()
                .filter_map(|id| Uuid::parse_str(id).ok())
                .collect();
            dispatcher
                .fan_out(
                    &member_ids,
                    GatewayEvent::TypingStop {
                        conversation_id,
                        user_id,
                    },
                )
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn typing_expires_after_ttl() {
        let tracker = TypingTracker::new();
        let conv = Uuid::new_v4();
        let alice = Uuid::new_v4();

        assert!(tracker.set_typing(conv, alice, true));
        assert_eq!(tracker.typing_users(conv), vec![alice]);

        advance(Duration::from_secs(4)).await;
        assert_eq!(tracker.typing_users(conv), vec![alice]);

        advance(Duration::from_secs(2)).await;
        assert!(tracker.typing_users(conv).is_empty());

        // The expired entry surfaces in exactly one sweep.
        assert_eq!(tracker.sweep(), vec![(conv, alice)]);
        assert!(tracker.sweep().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_slides_the_deadline() {
        let tracker = TypingTracker::new();
        let conv = Uuid::new_v4();
        let alice = Uuid::new_v4();

        assert!(tracker.set_typing(conv, alice, true));
        advance(Duration::from_secs(3)).await;

        // A refresh is not a transition but keeps the entry alive.
        assert!(!tracker.set_typing(conv, alice, true));
        advance(Duration::from_secs(3)).await;
        assert_eq!(tracker.typing_users(conv), vec![alice]);

        // Starting again after expiry is a transition again.
        advance(Duration::from_secs(5)).await;
        assert!(tracker.set_typing(conv, alice, true));
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_stop_clears_immediately() {
        let tracker = TypingTracker::new();
        let conv = Uuid::new_v4();
        let alice = Uuid::new_v4();

        tracker.set_typing(conv, alice, true);
        assert!(tracker.set_typing(conv, alice, false));
        assert!(tracker.typing_users(conv).is_empty());
        assert!(tracker.sweep().is_empty());

        // Stopping with no entry at all reports nothing owed.
        assert!(!tracker.set_typing(conv, alice, false));

        // An expired entry the sweeper has not collected yet still owes
        // members their TypingStop; whoever removes it announces it.
        tracker.set_typing(conv, alice, true);
        advance(Duration::from_secs(6)).await;
        assert!(tracker.set_typing(conv, alice, false));
        assert!(tracker.sweep().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn indicator_skips_the_requester() {
        let tracker = TypingTracker::new();
        let conv = Uuid::new_v4();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        tracker.set_typing(conv, alice, true);
        assert_eq!(tracker.typing_indicator(conv, alice), None);
        assert_eq!(tracker.typing_indicator(conv, bob), Some(alice));

        tracker.set_typing(conv, bob, true);
        assert_eq!(tracker.typing_indicator(conv, alice), Some(bob));

        // Entries are scoped per conversation.
        assert_eq!(tracker.typing_indicator(Uuid::new_v4(), bob), None);
    }
}
