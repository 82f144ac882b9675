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

//! Bridge Driver: the uniform `Name`/`Create`/`Delete`/`Connect`/
//! `Disconnect` interface over `bridge|host|none|container`, re-expressed
//! as an exhaustive match over a small closed policy enum.

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::models::{Endpoint, NetDriver, Network};
use crate::subnet::{SubnetAllocator, SubnetError};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Net(#[from] linux::net::NetError),
    #[error(transparent)]
    Subnet(#[from] SubnetError),
    #[error("the container network driver is reserved and not implemented")]
    ContainerDriverUnimplemented,
    #[error(transparent)]
    Ns(#[from] linux::ns::NsError),
    #[error(transparent)]
    PacketFilter(#[from] crate::packet_filter::PacketFilterError),
}

/// Create the kernel bridge device for `network`, assign the gateway
/// address and install the per-bridge packet-filter rules. A no-op for
/// every driver except `bridge`.
pub fn create(network: &Network, bridge_prefix: &str) -> Result<(), BridgeError> {
    match network.driver {
        NetDriver::Bridge => {
            let name = network.bridge_name(bridge_prefix);
            linux::net::bridge::ensure_bridge(&name)?;
            let gw_cidr = format!("{}/{}", network.gateway, network.subnet.mask);
            linux::net::bridge::add_address(&name, &gw_cidr)?;
            crate::packet_filter::ensure_global_chains()?;
            crate::packet_filter::install_bridge_rules(&name, &network.subnet.to_string())?;
            Ok(())
        }
        NetDriver::Host | NetDriver::None => Ok(()),
        NetDriver::Container => Err(BridgeError::ContainerDriverUnimplemented),
    }
}

pub fn delete(network: &Network, bridge_prefix: &str) -> Result<(), BridgeError> {
    match network.driver {
        NetDriver::Bridge => {
            let name = network.bridge_name(bridge_prefix);
            let _ = crate::packet_filter::remove_bridge_rules(&name, &network.subnet.to_string());
            linux::net::bridge::delete_link(&name)?;
            Ok(())
        }
        NetDriver::Host | NetDriver::None => Ok(()),
        NetDriver::Container => Err(BridgeError::ContainerDriverUnimplemented),
    }
}

/// Allocate an endpoint: a veth pair, the host side attached to the
/// bridge, an IP from the subnet allocator and the endpoint's MAC read
/// back from the freshly-created host-side device.
pub fn connect(
    network: &Network,
    container_id: &str,
    bridge_prefix: &str,
    allocator: &SubnetAllocator,
) -> Result<Endpoint, BridgeError> {
    match network.driver {
        NetDriver::Bridge => {
            let endpoint_id = Endpoint::new_id(container_id, &network.id);
            let host_dev = Endpoint::host_device_name(&endpoint_id);
            let peer_dev = Endpoint::peer_device_name(&endpoint_id);
            linux::net::bridge::add_veth_pair(&host_dev, &peer_dev)?;
            let bridge_name = network.bridge_name(bridge_prefix);
            linux::net::bridge::set_master(&host_dev, &bridge_name)?;
            linux::net::bridge::set_up(&host_dev)?;

            let container_ip = allocator.allocate(&network.subnet)?;
            let mac = read_mac_address(&host_dev).unwrap_or_default();

            Ok(Endpoint {
                id: endpoint_id,
                network_id: network.id.clone(),
                host_device: host_dev,
                peer_device: peer_dev,
                container_ip,
                mac_address: mac,
                ports: Default::default(),
            })
        }
        NetDriver::Host | NetDriver::None => Ok(Endpoint {
            id: Endpoint::new_id(container_id, &network.id),
            network_id: network.id.clone(),
            host_device: String::new(),
            peer_device: String::new(),
            container_ip: Ipv4Addr::UNSPECIFIED,
            mac_address: String::new(),
            ports: Default::default(),
        }),
        NetDriver::Container => Err(BridgeError::ContainerDriverUnimplemented),
    }
}

/// Move the peer device into the container's network namespace and
/// rename it to `eth0`. Run by the orchestrator once the child PID is
/// known, before the cmd-pipe write.
pub fn move_peer_into_namespace(endpoint: &Endpoint, pid: u32) -> Result<(), BridgeError> {
    if endpoint.peer_device.is_empty() {
        return Ok(());
    }
    linux::net::bridge::set_netns(&endpoint.peer_device, pid)?;
    Ok(())
}

/// Finish wiring the moved peer device from inside the container's own
/// network namespace: rename it to `eth0`, give it its allocated address,
/// bring it and `lo` up, and point its default route at the bridge
/// gateway. Grounded on the original's `configEndpointIPAddressAndRoute`,
/// which enters the container's net namespace from the host the same way
/// (save the caller's own netns, `setns` into the target, configure,
/// `setns` back) rather than doing this configuration from inside the
/// init process.
pub fn configure_peer_in_namespace(
    pid: u32,
    endpoint: &Endpoint,
    network: &Network,
) -> Result<(), BridgeError> {
    if endpoint.peer_device.is_empty() {
        return Ok(());
    }

    let host_netns = std::fs::File::open("/proc/self/ns/net").map_err(|source| {
        BridgeError::Ns(linux::ns::NsError::Open {
            path: "/proc/self/ns/net".to_string(),
            source,
        })
    })?;

    linux::ns::setns(
        std::path::Path::new(&format!("/proc/{pid}/ns/net")),
        nix::sched::CloneFlags::CLONE_NEWNET,
    )?;

    let result = (|| -> Result<(), BridgeError> {
        linux::net::bridge::rename(&endpoint.peer_device, "eth0")?;
        let cidr = format!("{}/{}", endpoint.container_ip, network.subnet.mask);
        linux::net::bridge::add_address("eth0", &cidr)?;
        linux::net::bridge::set_up("eth0")?;
        linux::net::bridge::set_up("lo")?;
        linux::net::bridge::set_default_route(&network.gateway.to_string())?;
        Ok(())
    })();

    use std::os::fd::AsRawFd;
    nix::sched::setns(host_netns.as_raw_fd(), nix::sched::CloneFlags::CLONE_NEWNET).map_err(|source| {
        BridgeError::Ns(linux::ns::NsError::Setns {
            path: "/proc/self/ns/net (restore)".to_string(),
            source,
        })
    })?;

    result
}

/// Delete the host-side veth (which implicitly removes the peer), then
/// release the container IP and per-endpoint packet-filter rules. Order
/// matters: the IP can't be released until the device referencing it is
/// gone.
pub fn disconnect(
    network: &Network,
    endpoint: &Endpoint,
    bridge_prefix: &str,
    allocator: &SubnetAllocator,
) -> Result<(), BridgeError> {
    if network.driver != NetDriver::Bridge {
        return Ok(());
    }
    let _ = linux::net::bridge::delete_link(&endpoint.host_device);
    allocator.release(&network.subnet, endpoint.container_ip)?;
    let bridge_name = network.bridge_name(bridge_prefix);
    for (port_proto, bindings) in &endpoint.ports {
        let Some((port, proto)) = port_proto.split_once('/') else {
            continue;
        };
        let Ok(container_port) = port.parse::<u16>() else {
            continue;
        };
        for binding in bindings {
            let _ = crate::packet_filter::remove_port_rules(
                &bridge_name,
                endpoint.container_ip,
                container_port,
                proto,
                binding,
            );
        }
    }
    Ok(())
}

fn read_mac_address(device: &str) -> Option<String> {
    let path = format!("/sys/class/net/{device}/address");
    std::fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}
