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

//! `ip link`/`ip addr` invocations for bridge devices, veth pairs and
//! moving one end of a veth into a container's network namespace. Same
//! "build a command, run it, check the exit status" shape throughout,
//! via `command_macros::cmd!`.

use command_macros::cmd;

use super::{check_output, NetError};

/// Create a bridge device named `name` if it doesn't already exist.
pub fn ensure_bridge(name: &str) -> Result<(), NetError> {
    let exists = cmd!(ip link show (name))
        .output()
        .map_err(|e| NetError::Spawn {
            command: format!("ip link show {name}"),
            source: e,
        })?
        .status
        .success();
    if exists {
        return Ok(());
    }
    let out = cmd!(ip link add (name) type bridge)
        .output()
        .map_err(|e| NetError::Spawn {
            command: format!("ip link add {name} type bridge"),
            source: e,
        })?;
    check_output("ip link add type bridge", out)?;
    set_up(name)
}

pub fn set_up(device: &str) -> Result<(), NetError> {
    let out = cmd!(ip link set (device) up)
        .output()
        .map_err(|e| NetError::Spawn {
            command: format!("ip link set {device} up"),
            source: e,
        })?;
    check_output("ip link set up", out).map(|_| ())
}

pub fn set_master(device: &str, bridge: &str) -> Result<(), NetError> {
    let out = cmd!(ip link set (device) master (bridge))
        .output()
        .map_err(|e| NetError::Spawn {
            command: format!("ip link set {device} master {bridge}"),
            source: e,
        })?;
    check_output("ip link set master", out).map(|_| ())
}

pub fn add_address(device: &str, cidr: &str) -> Result<(), NetError> {
    let out = cmd!(ip addr add (cidr) dev (device))
        .output()
        .map_err(|e| NetError::Spawn {
            command: format!("ip addr add {cidr} dev {device}"),
            source: e,
        })?;
    check_output("ip addr add", out).map(|_| ())
}

/// Create a veth pair `host_side`<->`container_side`.
pub fn add_veth_pair(host_side: &str, container_side: &str) -> Result<(), NetError> {
    let out = cmd!(ip link add (host_side) type veth peer name (container_side))
        .output()
        .map_err(|e| NetError::Spawn {
            command: format!("ip link add {host_side} type veth peer name {container_side}"),
            source: e,
        })?;
    check_output("ip link add veth", out).map(|_| ())
}

/// Move `device` into the network namespace of process `pid`.
pub fn set_netns(device: &str, pid: u32) -> Result<(), NetError> {
    let out = cmd!(ip link set (device) netns (pid.to_string()))
        .output()
        .map_err(|e| NetError::Spawn {
            command: format!("ip link set {device} netns {pid}"),
            source: e,
        })?;
    check_output("ip link set netns", out).map(|_| ())
}

/// Rename a device, run inside the target namespace after `set_netns` so
/// the container always sees a predictable interface name such as `eth0`.
pub fn rename(old: &str, new: &str) -> Result<(), NetError> {
    let out = cmd!(ip link set (old) name (new))
        .output()
        .map_err(|e| NetError::Spawn {
            command: format!("ip link set {old} name {new}"),
            source: e,
        })?;
    check_output("ip link set name", out).map(|_| ())
}

pub fn set_default_route(via: &str) -> Result<(), NetError> {
    let out = cmd!(ip route add default via (via))
        .output()
        .map_err(|e| NetError::Spawn {
            command: format!("ip route add default via {via}"),
            source: e,
        })?;
    check_output("ip route add default", out).map(|_| ())
}

pub fn delete_link(device: &str) -> Result<(), NetError> {
    let out = cmd!(ip link delete (device))
        .output()
        .map_err(|e| NetError::Spawn {
            command: format!("ip link delete {device}"),
            source: e,
        })?;
    check_output("ip link delete", out).map(|_| ())
}
