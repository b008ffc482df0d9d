//! Network reachability probe

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::retry::{RetryPolicy, retry};

pub trait NetworkProbe {
    fn is_reachable(&self) -> bool;
}

/// Reachable when a TCP connect to any of the well-known addresses succeeds
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addresses: Vec<String>,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addresses: Vec<String>, timeout: Duration) -> Self {
        Self { addresses, timeout }
    }

    fn resolve(address: &str) -> Vec<SocketAddr> {
        match address.to_socket_addrs() {
            Ok(addrs) => addrs.collect(),
            Err(e) => {
                debug!(address, error = %e, "Cannot resolve probe address");
                Vec::new()
            }
        }
    }
}

impl NetworkProbe for TcpProbe {
    fn is_reachable(&self) -> bool {
        self.addresses.iter().any(|address| {
            Self::resolve(address)
                .iter()
                .any(|addr| TcpStream::connect_timeout(addr, self.timeout).is_ok())
        })
    }
}

/// Wait for the network, bounded by `policy`; never fatal
/// Returns whether the network came up before the deadline
pub fn wait_for_network(probe: &dyn NetworkProbe, policy: &RetryPolicy) -> bool {
    let result = retry(policy, "network", || {
        if probe.is_reachable() {
            Ok(())
        } else {
            Err("no probe address reachable")
        }
    });

    match result {
        Ok(()) => {
            info!("Network reachable");
            true
        }
        Err(timeout) => {
            warn!(waited = ?timeout.waited, attempts = timeout.attempts, "Network not reachable, continuing anyway");
            false
        }
    }
}
