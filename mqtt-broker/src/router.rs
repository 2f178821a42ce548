//! The protocol state machine. One `Router::run_connection` call drives
//! one connection from its first CONNECT through to cleanup.

use std::sync::Arc;

use mqtt_core::{Packet, QosLevel, TopicFilter};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, Lines},
    sync::mpsc,
};

use crate::{
    auth::AuthManager,
    session::{PendingPublish, Session, SessionManager},
    storage::Storage,
};

pub struct Router {
    storage: Arc<Storage>,
    auth: AuthManager,
    sessions: Arc<SessionManager>,
}

impl Router {
    pub fn new(storage: Arc<Storage>, sessions: Arc<SessionManager>) -> Self {
        let auth = AuthManager::new(storage.clone());
        Self {
            storage,
            auth,
            sessions,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Publishes as the system principal — the admin seam and LWT dispatch
    /// both go through this path.
    pub async fn publish_on_behalf(&self, topic: &str, payload: &str, retain: bool) {
        if retain {
            self.update_retained(topic, payload, QosLevel::AtMostOnce).await;
        }
        self.dispatch(topic, payload, QosLevel::AtMostOnce).await;
    }

    /// Drives one connection end to end: INIT (awaiting CONNECT) through
    /// ACTIVE (main loop) to CLOSED (cleanup). `tx` is this connection's
    /// outbox — the channel its writer task drains onto the socket.
    pub async fn run_connection<R>(&self, reader: R, tx: mpsc::UnboundedSender<Packet>)
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = AsyncBufReadExt::lines(reader);

        let client_id = match self.handle_connect(&mut lines, &tx).await {
            Some(client_id) => client_id,
            None => return,
        };

        self.replay_retained_on_connect(&client_id, &tx).await;

        let clean = self.main_loop(&client_id, &mut lines, &tx).await;
        self.cleanup(&client_id, clean).await;
    }

    async fn handle_connect<R>(
        &self,
        lines: &mut Lines<R>,
        tx: &mpsc::UnboundedSender<Packet>,
    ) -> Option<String>
    where
        R: AsyncBufRead + Unpin,
    {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            _ => return None,
        };

        let packet = match Packet::decode(&line) {
            Ok(packet) => packet,
            Err(err) => {
                log::warn!("malformed CONNECT: {err}");
                return None;
            }
        };

        let Packet::Connect {
            client_id,
            username,
            password,
            last_will,
        } = packet
        else {
            log::warn!("first packet on connection was not CONNECT");
            return None;
        };

        let user = self
            .with_storage({
                let username = username.clone();
                let password = password.clone();
                move |_storage, auth| auth.verify_user(&username, &password)
            })
            .await
            .unwrap_or(None);

        let Some(user) = user else {
            self.log_event(None, None, "CONNECT", false, "auth failed")
                .await;
            let _ = tx.send(Packet::ConnAck { success: false });
            return None;
        };

        let session = Session::new(
            client_id.clone(),
            user.id,
            user.username,
            last_will,
            tx.clone(),
        );
        self.sessions.create_session(session).await;

        self.log_event(Some(&client_id), None, "CONNECT", true, "")
            .await;
        let _ = tx.send(Packet::ConnAck { success: true });

        Some(client_id)
    }

    /// Retained replay at CONNECT time: every retained topic the connecting
    /// user can subscribe to, checked directly against the ACL evaluator —
    /// there is no subscription list yet to consult.
    async fn replay_retained_on_connect(&self, client_id: &str, tx: &mpsc::UnboundedSender<Packet>) {
        let Some(user_id) = self.sessions.user_id_of(client_id).await else {
            return;
        };

        let retained = self
            .with_storage(|storage, _auth| storage.all_retained())
            .await
            .unwrap_or_default();

        for message in retained {
            let allowed = self
                .with_storage({
                    let topic = message.topic.clone();
                    move |_storage, auth| auth.can_subscribe(user_id, &topic)
                })
                .await
                .unwrap_or(false);

            if allowed {
                let _ = tx.send(Packet::Publish {
                    topic: message.topic,
                    payload: message.payload,
                    qos: QosLevel::AtMostOnce,
                    retain: true,
                    id: None,
                });
            }
        }
    }

    /// Returns `true` for a clean DISCONNECT, `false` for EOF, a read
    /// error, or a malformed/unexpected packet.
    async fn main_loop<R>(
        &self,
        client_id: &str,
        lines: &mut Lines<R>,
        tx: &mpsc::UnboundedSender<Packet>,
    ) -> bool
    where
        R: AsyncBufRead + Unpin,
    {
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return false,
                Err(err) => {
                    log::warn!("read error on connection {client_id}: {err}");
                    return false;
                }
            };

            let packet = match Packet::decode(&line) {
                Ok(packet) => packet,
                Err(err) => {
                    log::warn!("malformed packet from {client_id}: {err}");
                    return false;
                }
            };

            match packet {
                Packet::Subscribe { topic, qos } => {
                    self.handle_subscribe(client_id, &topic, qos, tx).await;
                }
                Packet::Publish {
                    topic,
                    payload,
                    qos,
                    retain,
                    id,
                } => {
                    self.handle_publish(client_id, topic, payload, qos, retain, id, tx)
                        .await;
                }
                Packet::PubRel { id } => {
                    self.handle_pubrel(client_id, id, tx).await;
                }
                Packet::Disconnect => return true,
                other => {
                    log::warn!("protocol violation from {client_id}: unexpected {other:?}");
                    return false;
                }
            }
        }
    }

    async fn handle_subscribe(
        &self,
        client_id: &str,
        raw_filter: &str,
        qos: QosLevel,
        tx: &mpsc::UnboundedSender<Packet>,
    ) {
        let Some(user_id) = self.sessions.user_id_of(client_id).await else {
            return;
        };

        let allowed = self
            .with_storage({
                let filter = raw_filter.to_owned();
                move |_storage, auth| auth.can_subscribe(user_id, &filter)
            })
            .await
            .unwrap_or(false);

        if !allowed {
            self.log_event(Some(client_id), Some(raw_filter), "SUBSCRIBE", false, "ACL denied")
                .await;
            let _ = tx.send(Packet::SubAck {
                success: false,
                topic: raw_filter.to_owned(),
            });
            return;
        }

        let Ok(filter) = TopicFilter::parse(raw_filter) else {
            let _ = tx.send(Packet::SubAck {
                success: false,
                topic: raw_filter.to_owned(),
            });
            return;
        };

        self.sessions
            .add_subscription(client_id, raw_filter, filter.clone(), qos)
            .await;
        self.log_event(Some(client_id), Some(raw_filter), "SUBSCRIBE", true, "")
            .await;
        let _ = tx.send(Packet::SubAck {
            success: true,
            topic: raw_filter.to_owned(),
        });

        let retained = self
            .with_storage(|storage, _auth| storage.all_retained())
            .await
            .unwrap_or_default();
        for message in retained {
            if filter.matches(&message.topic) {
                let _ = tx.send(Packet::Publish {
                    topic: message.topic,
                    payload: message.payload,
                    qos: QosLevel::AtMostOnce,
                    retain: true,
                    id: None,
                });
            }
        }
    }

    async fn handle_publish(
        &self,
        client_id: &str,
        topic: String,
        payload: String,
        qos: QosLevel,
        retain: bool,
        id: Option<u16>,
        tx: &mpsc::UnboundedSender<Packet>,
    ) {
        let Some(user_id) = self.sessions.user_id_of(client_id).await else {
            return;
        };

        let allowed = self
            .with_storage({
                let topic = topic.clone();
                move |_storage, auth| auth.can_publish(user_id, &topic)
            })
            .await
            .unwrap_or(false);

        if !allowed {
            self.log_event(Some(client_id), Some(&topic), "PUBLISH", false, "ACL denied")
                .await;
            // A compliant client's handshake must not stall even when the
            // publish is denied: still acknowledge at QoS 1/2.
            match (qos, id) {
                (QosLevel::AtLeastOnce, Some(id)) => {
                    let _ = tx.send(Packet::PubAck { id });
                }
                (QosLevel::ExactlyOnce, Some(id)) => {
                    let _ = tx.send(Packet::PubRec { id });
                }
                _ => {}
            }
            return;
        }

        self.log_event(Some(client_id), Some(&topic), "PUBLISH", true, "")
            .await;

        if retain {
            self.update_retained(&topic, &payload, qos).await;
        }

        match (qos, id) {
            (QosLevel::AtMostOnce, _) => {
                self.dispatch(&topic, &payload, qos).await;
            }
            (QosLevel::AtLeastOnce, Some(id)) => {
                let _ = tx.send(Packet::PubAck { id });
                self.dispatch(&topic, &payload, qos).await;
            }
            (QosLevel::ExactlyOnce, Some(id)) => {
                self.sessions
                    .record_pending_pubrec(
                        client_id,
                        id,
                        PendingPublish {
                            topic,
                            payload,
                            retain,
                        },
                    )
                    .await;
                let _ = tx.send(Packet::PubRec { id });
            }
            (_, None) => {
                log::warn!("PUBLISH at qos={qos:?} from {client_id} carried no packet id");
            }
        }
    }

    async fn handle_pubrel(&self, client_id: &str, id: u16, tx: &mpsc::UnboundedSender<Packet>) {
        if let Some(pending) = self.sessions.take_pending_pubrec(client_id, id).await {
            self.dispatch(&pending.topic, &pending.payload, QosLevel::ExactlyOnce)
                .await;
        }
        let _ = tx.send(Packet::PubComp { id });
    }

    /// Forwards to every subscription whose filter matches `topic`,
    /// downgrading delivery QoS to `min(pub_qos, sub_qos)` and allocating a
    /// fresh packet id from the destination session when that minimum is
    /// at least 1. The retained flag on dispatched copies is always false.
    async fn dispatch(&self, topic: &str, payload: &str, pub_qos: QosLevel) {
        let targets = self.sessions.subscriptions_matching(topic).await;
        for (target_id, _filter, sub_qos) in targets {
            let out_qos = pub_qos.downgrade(sub_qos);
            let id = if out_qos != QosLevel::AtMostOnce {
                self.sessions.next_id(&target_id).await
            } else {
                None
            };

            let Some(outbox) = self.sessions.outbox_of(&target_id).await else {
                continue;
            };
            let _ = outbox.send(Packet::Publish {
                topic: topic.to_owned(),
                payload: payload.to_owned(),
                qos: out_qos,
                retain: false,
                id,
            });
        }
    }

    /// Runs on every exit from the main loop. `clean` distinguishes a
    /// DISCONNECT packet from EOF/error/protocol-violation exits — only
    /// the latter fire the session's LWT, if one was registered.
    async fn cleanup(&self, client_id: &str, clean: bool) {
        let will = self.sessions.terminate_session(client_id).await;
        self.log_event(Some(client_id), None, "DISCONNECT", true, "").await;

        if clean {
            return;
        }

        if let Some(will) = will {
            if will.retain {
                self.update_retained(&will.topic, &will.payload, QosLevel::AtMostOnce)
                    .await;
            }
            self.dispatch(&will.topic, &will.payload, QosLevel::AtMostOnce)
                .await;
        }
    }

    /// Upsert-or-clear: an empty payload deletes the retained entry for
    /// that topic instead of storing an empty one.
    async fn update_retained(&self, topic: &str, payload: &str, qos: QosLevel) {
        let result = if payload.is_empty() {
            self.with_storage({
                let topic = topic.to_owned();
                move |storage, _auth| storage.delete_retained(&topic)
            })
            .await
        } else {
            self.with_storage({
                let topic = topic.to_owned();
                let payload = payload.to_owned();
                move |storage, _auth| storage.put_retained(&topic, &payload, qos as u8)
            })
            .await
        };

        if let Err(err) = result {
            log::error!("retained store update failed for {topic}: {err}");
        }
    }

    async fn log_event(
        &self,
        client_id: Option<&str>,
        topic: Option<&str>,
        action: &str,
        success: bool,
        details: &str,
    ) {
        let entry = crate::storage::SessionLogEntry {
            client_id: client_id.unwrap_or("").to_owned(),
            topic: topic.unwrap_or("").to_owned(),
            action: action.to_owned(),
            success,
            details: details.to_owned(),
        };

        let result = self
            .with_storage(move |storage, _auth| storage.append_log(&entry))
            .await;

        if let Err(err) = result {
            log::error!("failed to write audit log entry: {err}");
        }
    }

    /// Runs synchronous storage/auth work on the blocking pool:
    /// `rusqlite` connections are blocking, so no storage call may run
    /// directly on a tokio worker thread.
    async fn with_storage<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&Storage, &AuthManager) -> T + Send + 'static,
        T: Send + 'static,
    {
        let storage = self.storage.clone();
        let auth = self.auth.clone();
        tokio::task::spawn_blocking(move || f(&storage, &auth))
            .await
            .expect("storage worker task panicked")
    }
}
