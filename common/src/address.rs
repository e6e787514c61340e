// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Common IPv4 addressing functionality.
//!
//! Cluster networking is described with CIDR strings supplied by operators
//! (machine, cluster and service networks) and with dotted-quad strings
//! reported by agents.  Both arrive untrusted, so every helper here parses
//! rather than assumes.

use crate::api::external::Error;
use ipnetwork::Ipv4Network;
use std::net::Ipv4Addr;

/// Parses an IPv4 CIDR such as `192.168.126.0/24`
///
/// `label` names the field being parsed and is used in the error.
pub fn parse_ipv4_network(
    label: &str,
    cidr: &str,
) -> Result<Ipv4Network, Error> {
    cidr.parse::<Ipv4Network>().map_err(|e| Error::InvalidValue {
        label: label.to_string(),
        message: format!("{:?} is not an IPv4 CIDR: {}", cidr, e),
    })
}

/// Parses a dotted-quad IPv4 address
pub fn parse_ipv4_addr(label: &str, addr: &str) -> Result<Ipv4Addr, Error> {
    addr.parse::<Ipv4Addr>().map_err(|e| Error::InvalidValue {
        label: label.to_string(),
        message: format!("{:?} is not an IPv4 address: {}", addr, e),
    })
}

/// Returns whether `addr` lies within `network`
pub fn ipv4_in_network(addr: Ipv4Addr, network: &Ipv4Network) -> bool {
    network.contains(addr)
}

/// Verifies that the textual address `addr` lies in the textual CIDR `cidr`
///
/// Returns a conflict error naming `label` when it doesn't, since the request
/// itself was well-formed but disagrees with the cluster's topology.
pub fn verify_ipv4_in_network(
    label: &str,
    addr: &str,
    cidr: &str,
) -> Result<(), Error> {
    let network = parse_ipv4_network("machine_network_cidr", cidr)?;
    let parsed = parse_ipv4_addr(label, addr)?;
    if !ipv4_in_network(parsed, &network) {
        return Err(Error::conflict(&format!(
            "{} {} does not belong to machine-network-cidr {}",
            label, addr, cidr
        )));
    }
    Ok(())
}
