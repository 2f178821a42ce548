//! In-memory session and subscription state. Never persisted — a broker
//! restart drops every live session and its subscriptions.

use std::collections::HashMap;

use mqtt_core::{id::IdGenerator, Packet, Will};
use tokio::sync::{mpsc, Mutex};

/// A QoS-2 publish recorded between PUBREC and the matching PUBREL.
pub struct PendingPublish {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// One connected client. `outbox` is the write-half of this connection's
/// channel: dispatch from any connection's task sends a `Packet` here, and
/// that connection's own writer task drains it onto the socket, which is
/// what lets the router hand off a PUBLISH to a subscriber without holding
/// that subscriber's socket directly.
pub struct Session {
    pub client_id: String,
    pub user_id: i64,
    pub username: String,
    pub will: Option<Will>,
    pub outbox: mpsc::UnboundedSender<Packet>,
    id_gen: IdGenerator,
    pending_pubrec: HashMap<u16, PendingPublish>,
}

impl Session {
    pub fn new(
        client_id: String,
        user_id: i64,
        username: String,
        will: Option<Will>,
        outbox: mpsc::UnboundedSender<Packet>,
    ) -> Self {
        Self {
            client_id,
            user_id,
            username,
            will,
            outbox,
            id_gen: IdGenerator::new(),
            pending_pubrec: HashMap::new(),
        }
    }

    pub fn next_id(&mut self) -> u16 {
        self.id_gen.next_id()
    }
}

#[derive(Clone)]
pub struct SessionSummary {
    pub client_id: String,
    pub username: String,
    pub subscription_count: usize,
}

struct SubscriptionEntry {
    client_id: String,
    filter: mqtt_core::TopicFilter,
    raw_filter: String,
    qos: mqtt_core::QosLevel,
}

/// Owns `sessions: client_id -> Session` and the flat subscription list
/// of `(client_id, topic_filter)` entries. Every mutation is serialized
/// behind a `tokio::sync::Mutex`.
pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    subscriptions: Mutex<Vec<SubscriptionEntry>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Inserts `session`, evicting and dropping any prior session under the
    /// same client id along with its subscriptions. Dropping the evicted
    /// session's `outbox` closes that connection's write channel, which is
    /// what drives its own connection handler into its own cleanup path
    /// (and LWT fire, if a non-clean exit) — eviction here never fires the
    /// evicted session's will directly.
    pub async fn create_session(&self, session: Session) {
        let client_id = session.client_id.clone();
        {
            let mut sessions = self.sessions.lock().await;
            sessions.insert(client_id.clone(), session);
        }
        let mut subs = self.subscriptions.lock().await;
        subs.retain(|entry| entry.client_id != client_id);
    }

    pub async fn terminate_session(&self, client_id: &str) -> Option<Will> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions.remove(client_id)?;
        drop(sessions);

        let mut subs = self.subscriptions.lock().await;
        subs.retain(|entry| entry.client_id != client_id);

        session.will
    }

    pub async fn next_id(&self, client_id: &str) -> Option<u16> {
        let mut sessions = self.sessions.lock().await;
        sessions.get_mut(client_id).map(Session::next_id)
    }

    pub async fn record_pending_pubrec(&self, client_id: &str, id: u16, pending: PendingPublish) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(client_id) {
            session.pending_pubrec.insert(id, pending);
        }
    }

    pub async fn take_pending_pubrec(&self, client_id: &str, id: u16) -> Option<PendingPublish> {
        let mut sessions = self.sessions.lock().await;
        sessions.get_mut(client_id)?.pending_pubrec.remove(&id)
    }

    pub async fn user_id_of(&self, client_id: &str) -> Option<i64> {
        let sessions = self.sessions.lock().await;
        sessions.get(client_id).map(|s| s.user_id)
    }

    pub async fn outbox_of(&self, client_id: &str) -> Option<mpsc::UnboundedSender<Packet>> {
        let sessions = self.sessions.lock().await;
        sessions.get(client_id).map(|s| s.outbox.clone())
    }

    pub async fn add_subscription(
        &self,
        client_id: &str,
        raw_filter: &str,
        filter: mqtt_core::TopicFilter,
        qos: mqtt_core::QosLevel,
    ) {
        let mut subs = self.subscriptions.lock().await;
        subs.push(SubscriptionEntry {
            client_id: client_id.to_owned(),
            filter,
            raw_filter: raw_filter.to_owned(),
            qos,
        });
    }

    /// Returns `(client_id, raw_filter, subscriber_qos)` for every
    /// subscription whose filter matches `topic` — used both by live
    /// dispatch and by retained replay on matching SUBSCRIBE.
    pub async fn subscriptions_matching(
        &self,
        topic: &str,
    ) -> Vec<(String, String, mqtt_core::QosLevel)> {
        let subs = self.subscriptions.lock().await;
        subs.iter()
            .filter(|entry| entry.filter.matches(topic))
            .map(|entry| (entry.client_id.clone(), entry.raw_filter.clone(), entry.qos))
            .collect()
    }

    pub async fn list_sessions(&self) -> Vec<SessionSummary> {
        let sessions = self.sessions.lock().await;
        let subs = self.subscriptions.lock().await;
        sessions
            .values()
            .map(|session| SessionSummary {
                client_id: session.client_id.clone(),
                username: session.username.clone(),
                subscription_count: subs
                    .iter()
                    .filter(|entry| entry.client_id == session.client_id)
                    .count(),
            })
            .collect()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
