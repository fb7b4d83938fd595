//! Authorization policy injected into the flows.

use crate::model::{Event, UserId};
use std::collections::HashSet;

pub trait AuthorizationPolicy: Send + Sync {
    fn is_admin(&self, user: UserId) -> bool;

    /// Owners and admins may edit or resolve an event.
    fn can_manage(&self, user: UserId, event: &Event) -> bool {
        event.created_by == user || self.is_admin(user)
    }
}

/// Fixed set of administrator ids, usually taken from configuration.
#[derive(Debug, Clone, Default)]
pub struct AdminList {
    admins: HashSet<UserId>,
}

impl AdminList {
    pub fn new(admins: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
        }
    }
}

impl AuthorizationPolicy for AdminList {
    fn is_admin(&self, user: UserId) -> bool {
        self.admins.contains(&user)
    }
}
