//! `PropMask`: per-container bits recording which properties were set by
//! an explicit client request rather than inherited via propagation or a
//! virt-mode back-fill.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PropMask: u64 {
        const USER               = 1 << 0;
        const GROUP               = 1 << 1;
        const MEMORY_GUARANTEE_SET = 1 << 2;
        const COMMAND_SET         = 1 << 3;
        const VIRT_MODE_SET       = 1 << 4;
        const CWD_SET             = 1 << 5;
        const STDIN_PATH_SET      = 1 << 6;
        const STDOUT_PATH_SET     = 1 << 7;
        const STDERR_PATH_SET     = 1 << 8;
        const BIND_DNS_SET        = 1 << 9;
        const ISOLATE_SET         = 1 << 10;
        const ROOT_SET            = 1 << 11;
        const ROOT_READONLY_SET   = 1 << 12;
        const NET_SET             = 1 << 13;
        const HOSTNAME_SET        = 1 << 14;
        const ENV_SET             = 1 << 15;
        const BIND_SET            = 1 << 16;
        const IP_SET              = 1 << 17;
        const CAPABILITIES_SET    = 1 << 18;
        const DEFAULT_GW_SET      = 1 << 19;
        const RESOLV_CONF_SET     = 1 << 20;
        const DEVICES_SET         = 1 << 21;
        const ULIMIT_SET          = 1 << 22;
        const PORTO_NAMESPACE_SET = 1 << 23;
        const STDOUT_LIMIT_SET    = 1 << 24;
        const MEMORY_LIMIT_SET    = 1 << 25;
        const ANON_LIMIT_SET      = 1 << 26;
        /// Distinct from `ANON_LIMIT_SET` (see DESIGN.md) so the two
        /// properties propagate independently instead of sharing a
        /// bug. See DESIGN.md's Open Question resolutions.
        const DIRTY_LIMIT_SET     = 1 << 27;
        const RECHARGE_ON_PGFAULT_SET = 1 << 28;
        const CPU_POLICY_SET      = 1 << 29;
        const CPU_LIMIT_SET       = 1 << 30;
        const CPU_GUARANTEE_SET   = 1 << 31;
        const IO_POLICY_SET       = 1 << 32;
        const IO_LIMIT_SET        = 1 << 33;
        const IO_OPS_LIMIT_SET    = 1 << 34;
        const NET_GUARANTEE_SET   = 1 << 35;
        const NET_LIMIT_SET       = 1 << 36;
        const NET_PRIORITY_SET    = 1 << 37;
        const RESPAWN_SET         = 1 << 38;
        const MAX_RESPAWNS_SET    = 1 << 39;
        /// Newly allocated (see DESIGN.md) so `private` participates in
        /// the commit protocol like every other settable property.
        /// We allocate one rather than leaving the omission in place.
        const PRIVATE_SET         = 1 << 40;
        const NET_TOS_SET         = 1 << 41;
        const AGING_TIME_SET      = 1 << 42;
        const ENABLE_PORTO_SET    = 1 << 43;
        const WEAK_SET            = 1 << 44;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_and_anon_limit_bits_are_distinct() {
        assert_ne!(PropMask::ANON_LIMIT_SET, PropMask::DIRTY_LIMIT_SET);
        assert!(!PropMask::ANON_LIMIT_SET.intersects(PropMask::DIRTY_LIMIT_SET));
    }

    #[test]
    fn private_has_its_own_bit() {
        assert!(PropMask::PRIVATE_SET.bits() != 0);
    }

    #[test]
    fn bits_combine_and_check_independently() {
        let mask = PropMask::COMMAND_SET | PropMask::CWD_SET;
        assert!(mask.contains(PropMask::COMMAND_SET));
        assert!(!mask.contains(PropMask::VIRT_MODE_SET));
    }
}
