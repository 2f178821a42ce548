//! Credential verification and the ACL evaluator. `can_subscribe` and
//! `can_publish` are intentionally asymmetric: subscribe checks are a set
//! of narrow SQL-level heuristics (exact match, `/#` prefix, `+`-bearing
//! parent prefix) while publish checks fetch every publish filter the user
//! holds and run full MQTT wildcard matching in process.

use std::sync::Arc;

use mqtt_core::TopicFilter;

use crate::storage::{Storage, StorageError};

pub struct AuthenticatedUser {
    pub id: i64,
    pub username: String,
}

#[derive(Clone)]
pub struct AuthManager {
    storage: Arc<Storage>,
}

impl AuthManager {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    pub fn verify_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<AuthenticatedUser>, StorageError> {
        let Some(record) = self.storage.find_user_by_username(username)? else {
            return Ok(None);
        };

        let matches = bcrypt::verify(password, &record.password_hash).unwrap_or(false);
        if !matches {
            return Ok(None);
        }

        Ok(Some(AuthenticatedUser {
            id: record.id,
            username: record.username,
        }))
    }

    /// True if any of:
    /// 1. an exact ACL row on `topic_filter` with `can_subscribe=1`,
    /// 2. `topic_filter` ends in `/#` and an ACL row exists on the prefix
    ///    before `/#`,
    /// 3. `topic_filter` contains `+` and an ACL row exists whose topic
    ///    begins with `<first level>/`.
    pub fn can_subscribe(&self, user_id: i64, topic_filter: &str) -> Result<bool, StorageError> {
        if self
            .storage
            .acl_exact_match(user_id, topic_filter, true)?
        {
            return Ok(true);
        }

        if let Some(prefix) = topic_filter.strip_suffix("/#") {
            if self.storage.acl_exact_match(user_id, prefix, true)? {
                return Ok(true);
            }
        }

        if topic_filter.contains('+') {
            let first_level = topic_filter.split('/').next().unwrap_or("");
            let like_pattern = format!("{first_level}/%");
            if self.storage.acl_prefix_like(user_id, &like_pattern)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// True if any publish filter the user holds matches `topic` under
    /// MQTT-style wildcard rules.
    pub fn can_publish(&self, user_id: i64, topic: &str) -> Result<bool, StorageError> {
        let filters = self.storage.publish_topics_for_user(user_id)?;
        for raw_filter in filters {
            if let Ok(filter) = TopicFilter::parse(&raw_filter) {
                if filter.matches(topic) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn storage_with_acl(
        user: &str,
        pass_hash: &str,
        topic: &str,
        can_pub: bool,
        can_sub: bool,
    ) -> (tempfile::TempDir, Arc<Storage>, i64) {
        let dir = tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("t.db"), &dir.path().join("t.key")).unwrap();
        let role_id = storage.role_id_by_name("Student").unwrap().unwrap();
        let user_id = storage.create_user(user, pass_hash, role_id).unwrap();
        storage.add_acl(user_id, topic, can_pub, can_sub).unwrap();
        (dir, Arc::new(storage), user_id)
    }

    #[test]
    fn verifies_bcrypt_password() {
        let hash = bcrypt::hash("secret", bcrypt::DEFAULT_COST).unwrap();
        let (_dir, storage, _uid) = storage_with_acl("teacher1", &hash, "school/#", true, true);
        let auth = AuthManager::new(storage);

        let ok = auth.verify_user("teacher1", "secret").unwrap();
        assert!(ok.is_some());

        let bad = auth.verify_user("teacher1", "wrong").unwrap();
        assert!(bad.is_none());
    }

    #[test]
    fn subscribe_allows_hash_suffix_prefix_match() {
        let hash = bcrypt::hash("secret", bcrypt::DEFAULT_COST).unwrap();
        let (_dir, storage, uid) = storage_with_acl("teacher1", &hash, "school", true, true);
        let auth = AuthManager::new(storage);
        assert!(auth.can_subscribe(uid, "school/#").unwrap());
    }

    #[test]
    fn subscribe_denies_without_acl() {
        let hash = bcrypt::hash("secret", bcrypt::DEFAULT_COST).unwrap();
        let (_dir, storage, uid) =
            storage_with_acl("student1", &hash, "school/demo", false, false);
        let auth = AuthManager::new(storage);
        assert!(!auth.can_subscribe(uid, "school/#").unwrap());
    }

    #[test]
    fn publish_matches_wildcard_filter() {
        let hash = bcrypt::hash("secret", bcrypt::DEFAULT_COST).unwrap();
        let (_dir, storage, uid) = storage_with_acl("teacher1", &hash, "school/#", true, true);
        let auth = AuthManager::new(storage);
        assert!(auth.can_publish(uid, "school/demo").unwrap());
        assert!(!auth.can_publish(uid, "other/demo").unwrap());
    }
}
