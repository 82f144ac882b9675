// Copyright (c) 2023 Yan Ka, Chiu.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions
// are met:
// 1. Redistributions of source code must retain the above copyright
//    notice, this list of conditions, and the following disclaimer,
//    without modification, immediately at the beginning of the file.
// 2. The name of the author may not be used to endorse or promote products
//    derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE AUTHOR AND CONTRIBUTORS ``AS IS'' AND
// ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE
// IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE
// ARE DISCLAIMED. IN NO EVENT SHALL THE AUTHOR OR CONTRIBUTORS BE LIABLE FOR
// ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL
// DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS
// OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION)
// HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT
// LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY
// OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF
// SUCH DAMAGE.

//! Network and endpoint descriptors, and the `NetDriver` sum type used in
//! place of driver-selection-by-string.

use netcidr::Ipv4Cidr;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// `bridge|host|none|container` re-expressed as an exhaustive enum.
/// `Container` is reserved per Open Questions (not implemented; selecting
/// it is a `UserInput` error at parse time, same policy as an unknown
/// driver string).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetDriver {
    Bridge,
    Host,
    None,
    Container,
}

impl FromStr for NetDriver {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bridge" => Ok(NetDriver::Bridge),
            "host" => Ok(NetDriver::Host),
            "none" => Ok(NetDriver::None),
            "container" => Ok(NetDriver::Container),
            other => Err(format!("unknown network driver: {other}")),
        }
    }
}

impl std::fmt::Display for NetDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NetDriver::Bridge => "bridge",
            NetDriver::Host => "host",
            NetDriver::None => "none",
            NetDriver::Container => "container",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub subnet: Ipv4Cidr,
    pub gateway: Ipv4Addr,
    pub driver: NetDriver,
}

impl Network {
    pub fn new(id: String, subnet: Ipv4Cidr, driver: NetDriver) -> Network {
        let gateway = subnet
            .addr_at_offset(0)
            .expect("a /24-or-larger CIDR always has a host offset 0");
        Network {
            id,
            subnet,
            gateway,
            driver,
        }
    }

    pub fn bridge_name(&self, prefix: &str) -> String {
        format!("{prefix}-{}", self.id)
    }
}

/// One host-side binding for a published container port.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortBinding {
    pub host_ip: String,
    pub host_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub network_id: String,
    pub host_device: String,
    pub peer_device: String,
    pub container_ip: Ipv4Addr,
    pub mac_address: String,
    /// `"<port>/<proto>"` -> bindings.
    pub ports: HashMap<String, Vec<PortBinding>>,
}

impl Endpoint {
    /// `<containerID>-<networkID>`.
    pub fn new_id(container_id: &str, network_id: &str) -> String {
        format!("{container_id}-{network_id}")
    }

    /// First 5 characters of the endpoint id, used to derive device names
    /// short enough for the kernel's 15-byte `IFNAMSIZ` limit.
    fn short_id(endpoint_id: &str) -> String {
        endpoint_id.chars().take(5).collect()
    }

    pub fn host_device_name(endpoint_id: &str) -> String {
        format!("qsrveth{}", Self::short_id(endpoint_id))
    }

    pub fn peer_device_name(endpoint_id: &str) -> String {
        format!("bridge-{}", Self::short_id(endpoint_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_names_use_first_five_chars() {
        let id = "abcdefgh-n1";
        assert_eq!(Endpoint::host_device_name(id), "qsrvethabcde");
        assert_eq!(Endpoint::peer_device_name(id), "bridge-abcde");
    }

    #[test]
    fn network_gateway_is_offset_zero() {
        let subnet: Ipv4Cidr = "172.30.0.0/24".parse().unwrap();
        let net = Network::new("n1".to_string(), subnet, NetDriver::Bridge);
        assert_eq!(net.gateway, Ipv4Addr::new(172, 30, 0, 1));
    }
}
