use std::ops::{BitAnd, BitOr};

use fnv::FnvHashMap;
use parking_lot::RwLock;

use crate::*;

/// The anonymous user.
pub const GUEST: u32 = 0;
/// The superuser. Passes every check.
pub const ADMIN: u32 = 1;

/// A set of access rights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Privileges(u8);

impl Privileges {
    pub const NONE: Privileges = Privileges(0);
    pub const READ: Privileges = Privileges(1);
    pub const WRITE: Privileges = Privileges(1 << 1);
    pub const ALTER: Privileges = Privileges(1 << 2);
    pub const DROP: Privileges = Privileges(1 << 3);
    pub const ALL: Privileges = Privileges(0b1111);

    pub fn contains(self, other: Privileges) -> bool {
        self.0 & other.0 == other.0
    }

    fn name(self) -> &'static str {
        match self {
            Privileges::READ => "Read",
            Privileges::WRITE => "Write",
            Privileges::ALTER => "Alter",
            Privileges::DROP => "Drop",
            _ => "Access",
        }
    }
}

impl BitOr for Privileges {
    type Output = Privileges;

    fn bitor(self, rhs: Privileges) -> Privileges {
        Privileges(self.0 | rhs.0)
    }
}

impl BitAnd for Privileges {
    type Output = Privileges;

    fn bitand(self, rhs: Privileges) -> Privileges {
        Privileges(self.0 & rhs.0)
    }
}

/// Per-object grants, consulted before every DML and DDL operation.
#[derive(Debug, Default)]
pub struct AccessCache {
    grants: RwLock<FnvHashMap<u32, Privileges>>,
}

impl AccessCache {
    pub fn grant(&self, user: u32, privileges: Privileges) {
        let mut grants = self.grants.write();
        let entry = grants.entry(user).or_default();
        *entry = *entry | privileges;
    }

    pub fn revoke(&self, user: u32, privileges: Privileges) {
        let mut grants = self.grants.write();
        if let Some(entry) = grants.get_mut(&user) {
            *entry = Privileges(entry.0 & !privileges.0);
        }
    }

    pub fn granted(&self, user: u32) -> Privileges {
        self.grants.read().get(&user).copied().unwrap_or_default()
    }

    /// Fails with `AccessDenied` unless `user` owns the object, is the
    /// admin, or was granted `access`.
    pub fn check(
        &self,
        user: u32,
        owner: u32,
        access: Privileges,
        object_type: SchemaObjectType,
        object: &str,
    ) -> Result<()> {
        if user == ADMIN || user == owner || self.granted(user).contains(access)
        {
            return Ok(());
        }
        Err(Error::AccessDenied {
            access: access.name(),
            object_type: object_type.name(),
            object: object.to_owned(),
            user,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_and_admin_always_pass() {
        let cache = AccessCache::default();
        let check = |user| {
            cache.check(user, 7, Privileges::WRITE, SchemaObjectType::Space, "t")
        };
        assert!(check(7).is_ok());
        assert!(check(ADMIN).is_ok());
        assert_eq!(check(GUEST).unwrap_err().kind(), ErrorKind::Denied);

        cache.grant(GUEST, Privileges::READ | Privileges::WRITE);
        assert!(check(GUEST).is_ok());
        cache.revoke(GUEST, Privileges::WRITE);
        assert!(check(GUEST).is_err());
    }
}
