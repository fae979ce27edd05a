//! Selection and persistence of the UDP discovery port.
//!
//! The chosen port is written to a marker file so that every later build
//! step (start, stop, administer) talks to the same discovery service.

use std::fs;
use std::net::{Ipv4Addr, UdpSocket};
use std::ops::RangeInclusive;
use std::path::Path;

use rand::Rng;
use tracing::{debug, warn};

/// Ports the allocator picks from.
pub const EPHEMERAL_PORTS: RangeInclusive<u16> = 49152..=65535;

/// Number of random candidates tried before giving up.
pub const MAX_ATTEMPTS: usize = 10_000;

/// Returns the discovery port to use.
///
/// An explicit port wins. Otherwise a port previously persisted in `marker`
/// is reused. Otherwise random ports from [`EPHEMERAL_PORTS`] are probed
/// until one can be bound, and the winner is persisted to `marker`.
///
/// Returns 0 when no port could be found; the caller treats that as
/// "let the backend pick".
#[must_use]
pub fn resolve_discovery_port(explicit: Option<u16>, marker: &Path) -> u16 {
    if let Some(port) = explicit {
        return port;
    }

    if let Some(port) = read_port_file(marker) {
        debug!("reusing discovery port {} from {}", port, marker.display());
        return port;
    }

    if let Some(parent) = marker.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("unable to create directory {}: {}", parent.display(), e);
                return 0;
            }
        }
    }

    let mut rng = rand::thread_rng();
    for _ in 0..MAX_ATTEMPTS {
        let port = rng.gen_range(EPHEMERAL_PORTS);

        if is_udp_port_available(port) {
            if let Err(e) = fs::write(marker, format!("{port}\n")) {
                warn!("unable to persist discovery port to {}: {}", marker.display(), e);
            }
            debug!("selected discovery port {}", port);
            return port;
        }
    }

    warn!(
        "no free discovery port found after {} attempts, using the default",
        MAX_ATTEMPTS
    );
    0
}

/// Reads a port persisted by [`resolve_discovery_port`].
///
/// Returns `None` when the file is missing or its first line is not a port.
#[must_use]
pub fn read_port_file(path: &Path) -> Option<u16> {
    let contents = fs::read_to_string(path).ok()?;

    match contents.lines().next().map(str::trim)?.parse() {
        Ok(port) => Some(port),
        Err(e) => {
            warn!("ignoring unreadable port file {}: {}", path.display(), e);
            None
        }
    }
}

/// Checks whether a UDP socket can be bound to `port`.
#[must_use]
pub fn is_udp_port_available(port: u16) -> bool {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[test]
    fn test_explicit_port_wins() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("discovery.port");
        std::fs::write(&marker, "50000\n").unwrap();

        assert_eq!(resolve_discovery_port(Some(54321), &marker), 54321);
    }

    #[test]
    fn test_port_is_stable_across_calls() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("target").join("discovery.port");

        let first = resolve_discovery_port(None, &marker);
        let second = resolve_discovery_port(None, &marker);

        assert!(EPHEMERAL_PORTS.contains(&first));
        assert_eq!(first, second);
        assert_eq!(
            std::fs::read_to_string(&marker).unwrap(),
            format!("{first}\n")
        );
    }

    #[test]
    fn test_persisted_port_is_reused() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("discovery.port");
        std::fs::write(&marker, "50123\n").unwrap();

        assert_eq!(resolve_discovery_port(None, &marker), 50123);
    }

    #[test]
    fn test_garbage_port_file_is_replaced() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("discovery.port");
        std::fs::write(&marker, "not a port\n").unwrap();

        let port = resolve_discovery_port(None, &marker);

        assert!(EPHEMERAL_PORTS.contains(&port));
        assert_eq!(read_port_file(&marker), Some(port));
    }

    #[test]
    fn test_bound_port_is_unavailable() {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = socket.local_addr().unwrap().port();

        assert!(!is_udp_port_available(port));
    }
}
