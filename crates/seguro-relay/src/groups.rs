use dashmap::{mapref::entry::Entry, DashMap};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::delivery::{Delivery, DeliveryEngine, Outgoing};
use crate::error::RelayError;

/// An immutable group. `members` always contains `admin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub group_id: String,
    pub members: Vec<String>,
    pub admin: String,
}

impl Group {
    /// Drops duplicate members and appends the admin if missing. Order of
    /// first appearance is kept.
    pub fn new(group_id: impl Into<String>, members: Vec<String>, admin: impl Into<String>) -> Self {
        let admin = admin.into();
        let mut normalized: Vec<String> = Vec::with_capacity(members.len() + 1);
        for member in members {
            if !normalized.contains(&member) {
                normalized.push(member);
            }
        }
        if !normalized.contains(&admin) {
            normalized.push(admin.clone());
        }
        Self {
            group_id: group_id.into(),
            members: normalized,
            admin,
        }
    }

    pub fn is_member(&self, client_id: &str) -> bool {
        self.members.iter().any(|m| m == client_id)
    }
}

#[derive(Clone)]
pub struct GroupDirectory {
    groups: Arc<DashMap<String, Arc<Group>>>,
    delivery: DeliveryEngine,
}

impl GroupDirectory {
    pub fn new(delivery: DeliveryEngine) -> Self {
        Self {
            groups: Arc::new(DashMap::new()),
            delivery,
        }
    }

    pub fn create(&self, group: Group) -> Result<Arc<Group>, RelayError> {
        match self.groups.entry(group.group_id.clone()) {
            Entry::Occupied(_) => Err(RelayError::Conflict(format!("group {}", group.group_id))),
            Entry::Vacant(slot) => {
                let group = Arc::new(group);
                slot.insert(Arc::clone(&group));
                info!(group_id = %group.group_id, members = group.members.len(), "group created");
                Ok(group)
            }
        }
    }

    pub fn members_of(&self, group_id: &str) -> Result<Arc<Group>, RelayError> {
        self.groups
            .get(group_id)
            .map(|g| Arc::clone(g.value()))
            .ok_or_else(|| RelayError::NotFound(format!("group {group_id}")))
    }

    /// Ids of every group `member_id` belongs to, sorted.
    pub fn groups_for(&self, member_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .groups
            .iter()
            .filter(|g| g.value().is_member(member_id))
            .map(|g| g.key().clone())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Delivers `blob` independently to every member except the sender.
    pub fn fanout(&self, group_id: &str, sender_id: &str, blob: &str) -> Result<Vec<(String, Delivery)>, RelayError> {
        let group = self.members_of(group_id)?;
        if !group.is_member(sender_id) {
            return Err(RelayError::Forbidden(format!(
                "{sender_id} is not a member of group {group_id}"
            )));
        }

        let deliveries: Vec<(String, Delivery)> = group
            .members
            .iter()
            .filter(|m| m.as_str() != sender_id)
            .map(|member| {
                let delivery = self
                    .delivery
                    .deliver(member, Outgoing::group(group_id, sender_id, blob));
                (member.clone(), delivery)
            })
            .collect();
        debug!(group_id, sender_id, recipients = deliveries.len(), "group fanout");
        Ok(deliveries)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
