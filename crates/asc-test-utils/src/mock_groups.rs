//! Mock group directory for ASC testing.
//!
//! # Example
//!
//! ```rust,ignore
//! use asc_test_utils::MockGroupDirectory;
//!
//! let groups = MockGroupDirectory::new();
//! groups.add_member(group_id, alice);
//! groups.add_admin(group_id, moderator);
//! ```

use asc_service::errors::AscError;
use asc_service::groups::GroupDirectory;
use async_trait::async_trait;
use common::types::{GroupId, UserId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct GroupsInner {
    members: Mutex<HashSet<(GroupId, UserId)>>,
    admins: Mutex<HashSet<(GroupId, UserId)>>,
    unavailable: AtomicBool,
}

/// In-memory [`GroupDirectory`]. Admins are members too.
#[derive(Clone, Default)]
pub struct MockGroupDirectory {
    inner: Arc<GroupsInner>,
}

impl MockGroupDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, group_id: GroupId, user_id: UserId) {
        self.inner
            .members
            .lock()
            .unwrap()
            .insert((group_id, user_id));
    }

    pub fn add_admin(&self, group_id: GroupId, user_id: UserId) {
        self.add_member(group_id, user_id);
        self.inner
            .admins
            .lock()
            .unwrap()
            .insert((group_id, user_id));
    }

    pub fn remove_member(&self, group_id: GroupId, user_id: UserId) {
        self.inner
            .members
            .lock()
            .unwrap()
            .remove(&(group_id, user_id));
        self.inner
            .admins
            .lock()
            .unwrap()
            .remove(&(group_id, user_id));
    }

    /// Make every lookup fail as if the group service were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), AscError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            Err(AscError::GroupDirectory(
                "group service unreachable".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GroupDirectory for MockGroupDirectory {
    async fn is_member(&self, group_id: GroupId, user_id: UserId) -> Result<bool, AscError> {
        self.check_available()?;
        Ok(self
            .inner
            .members
            .lock()
            .unwrap()
            .contains(&(group_id, user_id)))
    }

    async fn is_admin(&self, group_id: GroupId, user_id: UserId) -> Result<bool, AscError> {
        self.check_available()?;
        Ok(self
            .inner
            .admins
            .lock()
            .unwrap()
            .contains(&(group_id, user_id)))
    }
}
