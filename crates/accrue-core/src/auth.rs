//! In-process role table implementing [`Authorizer`].

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::traits::Authorizer;
use crate::types::{AccountId, Role};

/// Role grants keyed by role.
///
/// Granting is not itself permissioned here; the surrounding deployment
/// decides who may call [`grant`](Self::grant).
#[derive(Debug, Default)]
pub struct RoleTable {
    grants: RwLock<HashMap<Role, HashSet<AccountId>>>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table where `admin` holds [`Role::Admin`] and [`Role::EpochKeeper`].
    pub fn with_admin(admin: AccountId) -> Self {
        let table = Self::new();
        table.grant(admin, Role::Admin);
        table.grant(admin, Role::EpochKeeper);
        table
    }

    /// Returns `false` if the grant already existed.
    pub fn grant(&self, who: AccountId, role: Role) -> bool {
        self.grants.write().entry(role).or_default().insert(who)
    }

    /// Returns `false` if there was nothing to revoke.
    pub fn revoke(&self, who: &AccountId, role: Role) -> bool {
        self.grants
            .write()
            .get_mut(&role)
            .is_some_and(|holders| holders.remove(who))
    }

    pub fn holders(&self, role: Role) -> Vec<AccountId> {
        let mut holders: Vec<AccountId> = self
            .grants
            .read()
            .get(&role)
            .map(|h| h.iter().copied().collect())
            .unwrap_or_default();
        holders.sort();
        holders
    }
}

impl Authorizer for RoleTable {
    fn has_role(&self, caller: &AccountId, role: Role) -> bool {
        self.grants
            .read()
            .get(&role)
            .is_some_and(|holders| holders.contains(caller))
    }
}
