// Authorization Adapter
//
// The engine never decides who may do what. It asks an external
// authorizer, passing the caller identity explicitly.

use std::collections::HashSet;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::log::TableId;

/// Identity of the principal making a call.
///
/// The admin capability travels with the caller; it is never looked up
/// from shared state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    pub user_id: u64,
    #[serde(default)]
    pub anonymous: bool,
    #[serde(default)]
    pub admin: bool,
}

impl CallerContext {
    pub fn user(user_id: u64) -> Self {
        Self {
            user_id,
            anonymous: false,
            admin: false,
        }
    }

    pub fn anonymous() -> Self {
        Self {
            user_id: 0,
            anonymous: true,
            admin: false,
        }
    }

    pub fn admin(user_id: u64) -> Self {
        Self {
            user_id,
            anonymous: false,
            admin: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    Entity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessType {
    Read,
    Update,
    Create,
    Delete,
}

/// Capability check consumed by the engine.
pub trait Authorizer: Send + Sync {
    fn is_anonymous(&self, caller: &CallerContext) -> bool;

    fn can_access(
        &self,
        caller: &CallerContext,
        object_id: &TableId,
        object_type: ObjectType,
        access: AccessType,
    ) -> bool;
}

/// Grant table kept in memory. Admins pass every check.
#[derive(Debug, Default)]
pub struct StaticAuthorizer {
    grants: RwLock<HashSet<(u64, TableId, AccessType)>>,
    allow_all: bool,
}

impl StaticAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every authenticated caller may access every table.
    pub fn permissive() -> Self {
        Self {
            grants: RwLock::new(HashSet::new()),
            allow_all: true,
        }
    }

    pub fn grant(&self, user_id: u64, table_id: TableId, access: AccessType) {
        self.grants.write().insert((user_id, table_id, access));
    }

    pub fn revoke(&self, user_id: u64, table_id: &TableId, access: AccessType) {
        self.grants
            .write()
            .remove(&(user_id, table_id.clone(), access));
    }
}

impl Authorizer for StaticAuthorizer {
    fn is_anonymous(&self, caller: &CallerContext) -> bool {
        caller.anonymous
    }

    fn can_access(
        &self,
        caller: &CallerContext,
        object_id: &TableId,
        _object_type: ObjectType,
        access: AccessType,
    ) -> bool {
        if caller.admin {
            return true;
        }
        if caller.anonymous && access != AccessType::Read {
            return false;
        }
        self.allow_all
            || self
                .grants
                .read()
                .contains(&(caller.user_id, object_id.clone(), access))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grants_are_per_user_table_and_access() {
        let auth = StaticAuthorizer::new();
        let table = TableId::new();
        auth.grant(7, table.clone(), AccessType::Read);

        let caller = CallerContext::user(7);
        assert!(auth.can_access(&caller, &table, ObjectType::Entity, AccessType::Read));
        assert!(!auth.can_access(&caller, &table, ObjectType::Entity, AccessType::Update));
        assert!(!auth.can_access(
            &CallerContext::user(8),
            &table,
            ObjectType::Entity,
            AccessType::Read
        ));

        auth.revoke(7, &table, AccessType::Read);
        assert!(!auth.can_access(&caller, &table, ObjectType::Entity, AccessType::Read));
    }

    #[test]
    fn admin_bypasses_grants_and_anonymous_cannot_mutate() {
        let auth = StaticAuthorizer::permissive();
        let table = TableId::new();

        assert!(auth.can_access(
            &CallerContext::admin(1),
            &table,
            ObjectType::Entity,
            AccessType::Delete
        ));
        assert!(!auth.can_access(
            &CallerContext::anonymous(),
            &table,
            ObjectType::Entity,
            AccessType::Update
        ));
        assert!(auth.is_anonymous(&CallerContext::anonymous()));
    }
}
