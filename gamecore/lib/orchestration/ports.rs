//! Host port allocation.

use std::{
    collections::{HashMap, HashSet},
    net::{Ipv4Addr, TcpListener, UdpSocket},
};

use crate::{
    config::PortRange,
    models::{Gameserver, PortMapping, Protocol},
    GamecoreError, GamecoreResult,
};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Decides whether a host port can currently be bound.
pub trait PortProbe: Send + Sync {
    /// Returns true if `port` is free on the host for `protocol`.
    fn is_bindable(&self, port: u16, protocol: Protocol) -> bool;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Probes a port by binding a socket on all interfaces and dropping it immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct BindProbe;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the host ports claimed by the fleet, leaving out the gameserver with id `exclude`.
pub fn claimed_ports<'a>(
    fleet: impl IntoIterator<Item = &'a Gameserver>,
    exclude: Option<i64>,
) -> HashSet<u16> {
    fleet
        .into_iter()
        .filter(|gameserver| Some(gameserver.id) != exclude)
        .flat_map(|gameserver| gameserver.host_ports())
        .collect()
}

/// Assigns a host port to every unassigned mapping in place.
///
/// For each mapping with a zero host port, in order:
/// 1. A host port already assigned to a mapping with the same name is reused.
/// 2. Otherwise the container port is taken if it is inside `range`, not in `claimed` and
///    bindable.
/// 3. Otherwise the range is scanned forward from the container port, wrapping around to the
///    bottom of the range, and the first unclaimed bindable port is taken.
///
/// Every port taken is added to `claimed` right away. If no port can be found the error is
/// returned and the assignments made so far are kept.
pub fn allocate_ports(
    mappings: &mut [PortMapping],
    claimed: &mut HashSet<u16>,
    range: &PortRange,
    probe: &dyn PortProbe,
) -> GamecoreResult<()> {
    let mut by_name: HashMap<String, u16> = mappings
        .iter()
        .filter(|mapping| mapping.is_assigned())
        .map(|mapping| (mapping.name.clone(), mapping.host_port))
        .collect();

    for mapping in mappings.iter_mut().filter(|mapping| !mapping.is_assigned()) {
        if let Some(port) = by_name.get(&mapping.name) {
            mapping.host_port = *port;
            continue;
        }

        let protocol = mapping.protocol;
        let usable = |port: u16, claimed: &HashSet<u16>| {
            range.contains(port) && !claimed.contains(&port) && probe.is_bindable(port, protocol)
        };

        let preferred = mapping.container_port;
        let port = if usable(preferred, claimed) {
            Some(preferred)
        } else {
            range.scan_from(preferred).find(|port| usable(*port, claimed))
        };

        let Some(port) = port else {
            return Err(GamecoreError::PortRangeExhausted {
                name: mapping.name.clone(),
                protocol: protocol.to_string(),
                range: range.to_string(),
            });
        };

        tracing::debug!(
            mapping = %mapping.name,
            protocol = %protocol,
            container_port = preferred,
            host_port = port,
            "assigned host port"
        );

        mapping.host_port = port;
        claimed.insert(port);
        by_name.insert(mapping.name.clone(), port);
    }

    Ok(())
}

/// Checks explicitly requested host ports.
///
/// A nonzero host port must lie inside `range`, must not be claimed by another gameserver, and
/// must match any other nonzero host port given for the same name.
pub fn validate_requested_ports(
    mappings: &[PortMapping],
    claimed: &HashSet<u16>,
    range: &PortRange,
) -> GamecoreResult<()> {
    let mut by_name: HashMap<&str, u16> = HashMap::new();
    for mapping in mappings.iter().filter(|mapping| mapping.is_assigned()) {
        if !range.contains(mapping.host_port) {
            return Err(GamecoreError::InvalidPortMapping(format!(
                "{} is outside the port range {}",
                mapping, range
            )));
        }

        if claimed.contains(&mapping.host_port) {
            return Err(GamecoreError::InvalidPortMapping(format!(
                "{} uses a host port held by another gameserver",
                mapping
            )));
        }

        match by_name.insert(mapping.name.as_str(), mapping.host_port) {
            Some(other) if other != mapping.host_port => {
                return Err(GamecoreError::InvalidPortMapping(format!(
                    "mappings named '{}' use different host ports {} and {}",
                    mapping.name, other, mapping.host_port
                )));
            }
            _ => {}
        }
    }

    Ok(())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl PortProbe for BindProbe {
    fn is_bindable(&self, port: u16, protocol: Protocol) -> bool {
        let addr = (Ipv4Addr::UNSPECIFIED, port);
        match protocol {
            Protocol::Tcp => TcpListener::bind(addr).is_ok(),
            Protocol::Udp => UdpSocket::bind(addr).is_ok(),
        }
    }
}

impl<F> PortProbe for F
where
    F: Fn(u16, Protocol) -> bool + Send + Sync,
{
    fn is_bindable(&self, port: u16, protocol: Protocol) -> bool {
        self(port, protocol)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn free(_: u16, _: Protocol) -> bool {
        true
    }

    fn mapping(s: &str) -> PortMapping {
        s.parse().unwrap()
    }

    #[test]
    fn test_allocate_prefers_container_port() -> anyhow::Result<()> {
        let mut mappings = vec![mapping("game:25565/tcp")];
        let mut claimed = HashSet::new();

        allocate_ports(&mut mappings, &mut claimed, &PortRange::default(), &free)?;

        assert_eq!(mappings[0].host_port, 25565);
        assert!(claimed.contains(&25565));
        Ok(())
    }

    #[test]
    fn test_allocate_scans_forward_when_preferred_claimed() -> anyhow::Result<()> {
        let mut mappings = vec![mapping("game:25565/tcp")];
        let mut claimed = HashSet::from([25565, 25566]);

        allocate_ports(&mut mappings, &mut claimed, &PortRange::default(), &free)?;

        assert_eq!(mappings[0].host_port, 25567);
        Ok(())
    }

    #[test]
    fn test_allocate_wraps_around_to_bottom_of_range() -> anyhow::Result<()> {
        let range = PortRange::new(25560, 25566)?;
        let mut mappings = vec![mapping("game:25565/tcp")];
        let mut claimed = HashSet::from([25565, 25566]);

        allocate_ports(&mut mappings, &mut claimed, &range, &free)?;

        assert_eq!(mappings[0].host_port, 25560);
        Ok(())
    }

    #[test]
    fn test_allocate_preferred_outside_range_scans_from_bottom() -> anyhow::Result<()> {
        let range = PortRange::new(30000, 30010)?;
        let mut mappings = vec![mapping("game:7777/udp")];
        let mut claimed = HashSet::new();

        allocate_ports(&mut mappings, &mut claimed, &range, &free)?;

        assert_eq!(mappings[0].host_port, 30000);
        Ok(())
    }

    #[test]
    fn test_allocate_groups_protocol_variants_by_name() -> anyhow::Result<()> {
        let mut mappings = vec![
            mapping("game:2456/udp"),
            mapping("game:2456/tcp"),
            mapping("query:2457/udp"),
        ];
        let mut claimed = HashSet::new();

        allocate_ports(&mut mappings, &mut claimed, &PortRange::default(), &free)?;

        assert_eq!(mappings[0].host_port, 2456);
        assert_eq!(mappings[1].host_port, 2456);
        assert_eq!(mappings[2].host_port, 2457);
        Ok(())
    }

    #[test]
    fn test_allocate_reuses_port_already_on_record() -> anyhow::Result<()> {
        let mut mappings = vec![mapping("game:2456/udp"), mapping("game:30001:2456/tcp")];
        let mut claimed = HashSet::new();

        allocate_ports(&mut mappings, &mut claimed, &PortRange::default(), &free)?;

        assert_eq!(mappings[0].host_port, 30001);
        Ok(())
    }

    #[test]
    fn test_allocate_skips_unbindable_ports() -> anyhow::Result<()> {
        let mut mappings = vec![mapping("game:25565/tcp")];
        let mut claimed = HashSet::new();
        let probe = |port: u16, _: Protocol| port != 25565;

        allocate_ports(&mut mappings, &mut claimed, &PortRange::default(), &probe)?;

        assert_eq!(mappings[0].host_port, 25566);
        Ok(())
    }

    #[test]
    fn test_allocate_exhausted_keeps_earlier_assignments() -> anyhow::Result<()> {
        let range = PortRange::new(25565, 25565)?;
        let mut mappings = vec![mapping("game:25565/tcp"), mapping("rcon:25575/tcp")];
        let mut claimed = HashSet::new();

        let err = allocate_ports(&mut mappings, &mut claimed, &range, &free).unwrap_err();

        assert!(matches!(err, GamecoreError::PortRangeExhausted { ref name, .. } if name == "rcon"));
        assert_eq!(mappings[0].host_port, 25565);
        assert_eq!(mappings[1].host_port, 0);
        Ok(())
    }

    #[test]
    fn test_allocate_is_deterministic() -> anyhow::Result<()> {
        let run = || -> anyhow::Result<Vec<u16>> {
            let mut mappings = vec![mapping("game:25565/tcp"), mapping("rcon:25565/tcp")];
            let mut claimed = HashSet::from([25566]);
            allocate_ports(&mut mappings, &mut claimed, &PortRange::default(), &free)?;
            Ok(mappings.iter().map(|m| m.host_port).collect())
        };

        assert_eq!(run()?, vec![25565, 25567]);
        assert_eq!(run()?, run()?);
        Ok(())
    }

    #[test]
    fn test_validate_requested_ports() -> anyhow::Result<()> {
        let range = PortRange::new(20000, 30000)?;
        let claimed = HashSet::from([25000]);

        assert!(validate_requested_ports(&[mapping("game:25565:25565/tcp")], &claimed, &range).is_ok());
        assert!(validate_requested_ports(&[mapping("game:25000:25565/tcp")], &claimed, &range).is_err());
        assert!(validate_requested_ports(&[mapping("game:8080:8080/tcp")], &claimed, &range).is_err());
        assert!(validate_requested_ports(
            &[mapping("game:25565:25565/tcp"), mapping("game:25566:25565/udp")],
            &claimed,
            &range
        )
        .is_err());
        // Unassigned mappings are left for the allocator.
        assert!(validate_requested_ports(&[mapping("game:25565/tcp")], &claimed, &range).is_ok());

        Ok(())
    }
}
