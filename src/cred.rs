//! Credential & Identity Resolver.
//!
//! Pure functions: username &harr; uid, group name &harr; gid, and the
//! supplementary groups of a user. Everything routes through the
//! [`IdentityDirectory`] trait so the property handlers that call
//! `can_control` are testable without a real `/etc/passwd`.

use std::collections::HashSet;

use crate::error::{CoreError, CoreResult};

/// Capability bitmask table, in the order the kernel assigns capability
/// numbers. Names are the uppercase, `CAP_`-stripped tokens the
/// `capabilities` property accepts.
pub const CAPABILITY_NAMES: &[(&str, u32)] = &[
    ("CHOWN", 0),
    ("DAC_OVERRIDE", 1),
    ("DAC_READ_SEARCH", 2),
    ("FOWNER", 3),
    ("FSETID", 4),
    ("KILL", 5),
    ("SETGID", 6),
    ("SETUID", 7),
    ("SETPCAP", 8),
    ("LINUX_IMMUTABLE", 9),
    ("NET_BIND_SERVICE", 10),
    ("NET_BROADCAST", 11),
    ("NET_ADMIN", 12),
    ("NET_RAW", 13),
    ("IPC_LOCK", 14),
    ("IPC_OWNER", 15),
    ("SYS_MODULE", 16),
    ("SYS_RAWIO", 17),
    ("SYS_CHROOT", 18),
    ("SYS_PTRACE", 19),
    ("SYS_PACCT", 20),
    ("SYS_ADMIN", 21),
    ("SYS_BOOT", 22),
    ("SYS_NICE", 23),
    ("SYS_RESOURCE", 24),
    ("SYS_TIME", 25),
    ("SYS_TTY_CONFIG", 26),
    ("MKNOD", 27),
    ("LEASE", 28),
    ("AUDIT_WRITE", 29),
    ("AUDIT_CONTROL", 30),
    ("SETFCAP", 31),
    ("MAC_OVERRIDE", 32),
    ("MAC_ADMIN", 33),
    ("SYSLOG", 34),
    ("WAKE_ALARM", 35),
    ("BLOCK_SUSPEND", 36),
    ("AUDIT_READ", 37),
];

/// A bitmask of the capability table above, indexed by capability number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilityMask(pub u64);

impl CapabilityMask {
    pub fn empty() -> Self {
        CapabilityMask(0)
    }

    pub fn all_up_to(last_capability: u32) -> Self {
        let mut mask = 0u64;
        for &(_, bit) in CAPABILITY_NAMES {
            if bit <= last_capability {
                mask |= 1 << bit;
            }
        }
        CapabilityMask(mask)
    }

    pub fn parse(text: &str, last_capability: u32) -> CoreResult<Self> {
        let mut mask = 0u64;
        for token in text.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (_, bit) = CAPABILITY_NAMES
                .iter()
                .find(|(name, _)| *name == token)
                .ok_or_else(|| CoreError::invalid_value(format!("unknown capability: {token}")))?;
            if *bit > last_capability {
                return Err(CoreError::invalid_value(format!(
                    "capability {token} is above this kernel's last capability ({last_capability})"
                )));
            }
            mask |= 1 << bit;
        }
        Ok(CapabilityMask(mask))
    }

    pub fn format(&self) -> String {
        CAPABILITY_NAMES
            .iter()
            .filter(|(_, bit)| self.0 & (1 << bit) != 0)
            .map(|(name, _)| *name)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Owning credentials of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerCred {
    pub uid: u32,
    pub gid: u32,
    pub groups: Vec<u32>,
}

impl OwnerCred {
    pub fn root() -> Self {
        OwnerCred {
            uid: 0,
            gid: 0,
            groups: vec![0],
        }
    }

    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

/// Credentials the spawned task itself runs under; distinct from the
/// owner so that, e.g., a root-owned container can still drop privileges
/// for its task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskCred {
    pub uid: u32,
    pub gid: u32,
}

/// "May principal `acting` control principal `target`?".
///
/// True iff acting is root, is the same uid as target, or is a member of
/// target's primary group.
pub fn can_control(acting: &OwnerCred, target: &OwnerCred) -> bool {
    acting.is_root() || acting.uid == target.uid || acting.groups.contains(&target.gid)
}

/// Resolves usernames/group names to ids and enumerates supplementary
/// groups. The production implementation calls into `getpwnam`/`getgrnam`/
/// `getgrouplist`; tests use an in-memory fake.
pub trait IdentityDirectory {
    fn uid_of(&self, username: &str) -> CoreResult<u32>;
    fn gid_of(&self, groupname: &str) -> CoreResult<u32>;
    fn user_name(&self, uid: u32) -> CoreResult<String>;
    fn group_name(&self, gid: u32) -> CoreResult<String>;
    fn primary_gid(&self, uid: u32) -> CoreResult<u32>;
    fn supplementary_gids(&self, uid: u32, primary_gid: u32) -> CoreResult<Vec<u32>>;

    fn resolve_owner(&self, username: &str, groupname: &str) -> CoreResult<OwnerCred> {
        let uid = self.uid_of(username)?;
        let gid = self.gid_of(groupname)?;
        let mut groups = self.supplementary_gids(uid, gid)?;
        let set: HashSet<u32> = groups.drain(..).chain(std::iter::once(gid)).collect();
        Ok(OwnerCred {
            uid,
            gid,
            groups: set.into_iter().collect(),
        })
    }
}

/// Resolves identities against the host's real `passwd`/`group` databases.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemIdentityDirectory;

impl IdentityDirectory for SystemIdentityDirectory {
    fn uid_of(&self, username: &str) -> CoreResult<u32> {
        if let Ok(uid) = username.parse::<u32>() {
            return Ok(uid);
        }
        nix::unistd::User::from_name(username)
            .map_err(|e| CoreError::Unknown(e.to_string()))?
            .map(|u| u.uid.as_raw())
            .ok_or_else(|| CoreError::not_found(format!("no such user: {username}")))
    }

    fn gid_of(&self, groupname: &str) -> CoreResult<u32> {
        if let Ok(gid) = groupname.parse::<u32>() {
            return Ok(gid);
        }
        nix::unistd::Group::from_name(groupname)
            .map_err(|e| CoreError::Unknown(e.to_string()))?
            .map(|g| g.gid.as_raw())
            .ok_or_else(|| CoreError::not_found(format!("no such group: {groupname}")))
    }

    fn user_name(&self, uid: u32) -> CoreResult<String> {
        nix::unistd::User::from_uid(uid.into())
            .map_err(|e| CoreError::Unknown(e.to_string()))?
            .map(|u| u.name)
            .ok_or_else(|| CoreError::not_found(format!("no such uid: {uid}")))
    }

    fn group_name(&self, gid: u32) -> CoreResult<String> {
        nix::unistd::Group::from_gid(gid.into())
            .map_err(|e| CoreError::Unknown(e.to_string()))?
            .map(|g| g.name)
            .ok_or_else(|| CoreError::not_found(format!("no such gid: {gid}")))
    }

    fn primary_gid(&self, uid: u32) -> CoreResult<u32> {
        nix::unistd::User::from_uid(uid.into())
            .map_err(|e| CoreError::Unknown(e.to_string()))?
            .map(|u| u.gid.as_raw())
            .ok_or_else(|| CoreError::not_found(format!("no such uid: {uid}")))
    }

    fn supplementary_gids(&self, uid: u32, primary_gid: u32) -> CoreResult<Vec<u32>> {
        let username = self.user_name(uid)?;
        let cname = std::ffi::CString::new(username)
            .map_err(|e| CoreError::Unknown(e.to_string()))?;
        let mut groups: Vec<libc::gid_t> = vec![0; 64];
        loop {
            let mut ngroups: libc::c_int = groups.len() as libc::c_int;
            // SAFETY: `cname` is a valid NUL-terminated string for the
            // duration of the call; `groups` has `ngroups` capacity and
            // getgrouplist never writes past it.
            let rc = unsafe {
                libc::getgrouplist(
                    cname.as_ptr(),
                    primary_gid as libc::gid_t,
                    groups.as_mut_ptr(),
                    &mut ngroups,
                )
            };
            if rc >= 0 {
                groups.truncate(ngroups as usize);
                return Ok(groups.into_iter().map(|g| g as u32).collect());
            }
            // buffer was too small; ngroups now holds the required size
            groups.resize(ngroups.max(groups.len() as libc::c_int * 2) as usize, 0);
        }
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod fakes {
    use std::collections::HashMap;

    use super::*;

    /// In-memory identity directory for tests, so handler/propagation
    /// tests don't depend on the host's real `passwd`/`group` databases.
    #[derive(Debug, Default)]
    pub struct FakeIdentityDirectory {
        pub users: HashMap<String, (u32, u32)>, // name -> (uid, primary gid)
        pub groups: HashMap<String, u32>,       // name -> gid
        pub supplementary: HashMap<u32, Vec<u32>>, // uid -> extra gids
    }

    impl IdentityDirectory for FakeIdentityDirectory {
        fn uid_of(&self, username: &str) -> CoreResult<u32> {
            self.users
                .get(username)
                .map(|(uid, _)| *uid)
                .ok_or_else(|| CoreError::not_found(format!("no such user: {username}")))
        }

        fn gid_of(&self, groupname: &str) -> CoreResult<u32> {
            self.groups
                .get(groupname)
                .copied()
                .ok_or_else(|| CoreError::not_found(format!("no such group: {groupname}")))
        }

        fn user_name(&self, uid: u32) -> CoreResult<String> {
            self.users
                .iter()
                .find(|(_, (u, _))| *u == uid)
                .map(|(name, _)| name.clone())
                .ok_or_else(|| CoreError::not_found(format!("no such uid: {uid}")))
        }

        fn group_name(&self, gid: u32) -> CoreResult<String> {
            self.groups
                .iter()
                .find(|(_, g)| **g == gid)
                .map(|(name, _)| name.clone())
                .ok_or_else(|| CoreError::not_found(format!("no such gid: {gid}")))
        }

        fn primary_gid(&self, uid: u32) -> CoreResult<u32> {
            self.users
                .values()
                .find(|(u, _)| *u == uid)
                .map(|(_, gid)| *gid)
                .ok_or_else(|| CoreError::not_found(format!("no such uid: {uid}")))
        }

        fn supplementary_gids(&self, uid: u32, _primary_gid: u32) -> CoreResult<Vec<u32>> {
            Ok(self.supplementary.get(&uid).cloned().unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{fakes::FakeIdentityDirectory, *};

    fn directory() -> FakeIdentityDirectory {
        let mut dir = FakeIdentityDirectory::default();
        dir.users.insert("alice".into(), (1000, 1000));
        dir.users.insert("bob".into(), (1001, 1001));
        dir.groups.insert("alice".into(), 1000);
        dir.groups.insert("devs".into(), 2000);
        dir.supplementary.insert(1000, vec![2000]);
        dir
    }

    #[test]
    fn resolve_owner_includes_primary_and_supplementary_groups() {
        let dir = directory();
        let owner = dir.resolve_owner("alice", "devs").unwrap();
        assert_eq!(owner.uid, 1000);
        assert_eq!(owner.gid, 2000);
        assert!(owner.groups.contains(&2000));
    }

    #[test]
    fn can_control_allows_root() {
        let root = OwnerCred::root();
        let target = OwnerCred { uid: 1000, gid: 1000, groups: vec![1000] };
        assert!(can_control(&root, &target));
    }

    #[test]
    fn can_control_allows_same_uid() {
        let a = OwnerCred { uid: 1000, gid: 1000, groups: vec![1000] };
        assert!(can_control(&a, &a.clone()));
    }

    #[test]
    fn can_control_allows_primary_group_membership() {
        let acting = OwnerCred { uid: 1001, gid: 1001, groups: vec![1001, 2000] };
        let target = OwnerCred { uid: 1000, gid: 2000, groups: vec![2000] };
        assert!(can_control(&acting, &target));
    }

    #[test]
    fn can_control_denies_unrelated_principal() {
        let acting = OwnerCred { uid: 1001, gid: 1001, groups: vec![1001] };
        let target = OwnerCred { uid: 1000, gid: 1000, groups: vec![1000] };
        assert!(!can_control(&acting, &target));
    }

    #[test]
    fn capability_mask_parses_known_names() {
        let mask = CapabilityMask::parse("CHOWN; NET_ADMIN", 40).unwrap();
        assert_eq!(mask.0, (1 << 0) | (1 << 12));
        assert_eq!(mask.format(), "CHOWN; NET_ADMIN");
    }

    #[test]
    fn capability_mask_rejects_unknown_name() {
        assert!(CapabilityMask::parse("NOT_A_CAP", 40).is_err());
    }

    #[test]
    fn capability_mask_rejects_above_last_capability() {
        assert!(CapabilityMask::parse("AUDIT_READ", 10).is_err());
    }
}
