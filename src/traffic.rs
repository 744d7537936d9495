//! Traffic Class Coordinator.
//!
//! Keeps one hierarchical token-bucket class per (container, interface)
//! in sync with the container tree: a child's class is parented under its
//! parent's class handle, so `tc`-style borrowing/ceiling falls out of the
//! kernel qdisc hierarchy instead of being recomputed here. This module
//! only decides *what* the desired class set is and pushes it through
//! [`NetworkCapability`]; it holds no netlink state of its own.

use std::collections::BTreeSet;

use crate::capability::TrafficClassUpdate;
use crate::container::resolve_net_map;
use crate::error::{CoreError, CoreResult};
use crate::holder::Holder;

pub struct TrafficCoordinator;

impl TrafficCoordinator {
    /// Recomputes and pushes the traffic class for `name` and every
    /// descendant, depth-first. Used after `net_guarantee`/`net_limit`/
    /// `net_priority` change anywhere in a subtree, since limits are
    /// expressed per-interface and a child with no explicit entry falls
    /// back to its own `"default"` key rather than inheriting the parent's
    /// resolved number.
    pub fn sync_subtree(holder: &mut Holder, name: &str) -> CoreResult<()> {
        Self::sync_one(holder, name)?;
        let children = holder.container(name)?.children.clone();
        for child in children {
            Self::sync_subtree(holder, &child)?;
        }
        Ok(())
    }

    fn sync_one(holder: &mut Holder, name: &str) -> CoreResult<()> {
        let (id, parent_id, ifaces, rates, ceils, prios) = {
            let c = holder.container(name)?;
            let parent_id = match &c.parent {
                Some(p) => holder.container(p)?.id as u32,
                None => 0,
            };
            let mut ifaces: BTreeSet<String> = BTreeSet::new();
            ifaces.extend(c.net_guarantee.keys().cloned());
            ifaces.extend(c.net_limit.keys().cloned());
            ifaces.extend(c.net_priority.keys().cloned());
            ifaces.retain(|i| i != "default");
            if ifaces.is_empty() {
                ifaces.insert("default".to_string());
            }
            (
                c.id as u32,
                parent_id,
                ifaces,
                c.net_guarantee.clone(),
                c.net_limit.clone(),
                c.net_priority.clone(),
            )
        };

        for iface in &ifaces {
            let rate = resolve_net_map(&rates, iface).copied().unwrap_or(0);
            let ceil = resolve_net_map(&ceils, iface).copied().unwrap_or(u64::MAX);
            let prio = resolve_net_map(&prios, iface).copied().unwrap_or(0);

            if rate > holder.config.max_net_guarantee {
                log::warn!("net_guarantee {rate} on {name}/{iface} exceeds the configured bound of {}", holder.config.max_net_guarantee);
                return Err(CoreError::ResourceNotAvailable(format!(
                    "net_guarantee {rate} on {iface} exceeds the configured bound of {}",
                    holder.config.max_net_guarantee
                )));
            }
            if ceil != u64::MAX && ceil > holder.config.max_net_limit {
                log::warn!("net_limit {ceil} on {name}/{iface} exceeds the configured bound of {}", holder.config.max_net_limit);
                return Err(CoreError::ResourceNotAvailable(format!(
                    "net_limit {ceil} on {iface} exceeds the configured bound of {}",
                    holder.config.max_net_limit
                )));
            }

            let mut update = TrafficClassUpdate {
                parent_minor: parent_id,
                minor: id,
                ..Default::default()
            };
            update.rate.insert(iface.clone(), rate);
            update.ceil.insert(iface.clone(), ceil);
            update.prio.insert(iface.clone(), prio);

            holder.network.update_traffic_classes(iface, &update)?;
            log::trace!("synced traffic class {name}/{iface}: rate={rate} ceil={ceil} prio={prio}");
        }
        Ok(())
    }

    pub fn remove(holder: &mut Holder, name: &str) -> CoreResult<()> {
        let (id, ifaces) = {
            let c = holder.container(name)?;
            let mut ifaces: BTreeSet<String> = BTreeSet::new();
            ifaces.extend(c.net_guarantee.keys().cloned());
            ifaces.extend(c.net_limit.keys().cloned());
            (c.id as u32, ifaces)
        };
        for iface in ifaces {
            holder.network.remove_traffic_classes(&iface, id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::holder::test_support::test_holder;

    #[test]
    fn sync_one_pushes_resolved_rate_and_ceil() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        {
            let c = holder.container_mut("a").unwrap();
            c.net_guarantee.insert("default".to_string(), 1000);
            c.net_limit.insert("eth0".to_string(), 5000);
        }
        TrafficCoordinator::sync_subtree(&mut holder, "a").unwrap();
        let id = holder.container("a").unwrap().id as u32;
        assert_eq!(
            holder.network.traffic_counters("eth0", id, crate::capability::TrafficStatKind::Bytes).unwrap(),
            0
        );
    }

    #[test]
    fn sync_rejects_guarantee_above_configured_bound() {
        let mut holder = test_holder();
        holder.config.max_net_guarantee = 100;
        holder.create_container("a", None).unwrap();
        holder.container_mut("a").unwrap().net_guarantee.insert("default".to_string(), 1000);
        assert!(TrafficCoordinator::sync_subtree(&mut holder, "a").is_err());
    }

    #[test]
    fn child_class_is_parented_under_its_parent_minor() {
        let mut holder = test_holder();
        holder.create_container("a", None).unwrap();
        holder.create_container("b", Some("a".into())).unwrap();
        TrafficCoordinator::sync_subtree(&mut holder, "a").unwrap();
        let a_id = holder.container("a").unwrap().id as u32;
        let b_id = holder.container("a/b").unwrap().id as u32;
        let class = holder.network.current_class("default", b_id).unwrap();
        assert_eq!(class.parent_minor, a_id);
    }
}
