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

//! Packet Filter Controller: installs the fixed `QSRDOCKER` chain topology
//! (global chains and hooks, per-bridge forward/masquerade rules,
//! per-endpoint publish rules) by shelling out to `iptables` directly,
//! with the idempotent-insert handling the global/bridge rules need that
//! `linux::net`'s plain command helpers don't provide.

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::models::PortBinding;

#[derive(Debug, Error)]
pub enum PacketFilterError {
    #[error(transparent)]
    Net(#[from] linux::net::NetError),
}

fn run(mut cmd: std::process::Command, desc: &str) -> Result<(), PacketFilterError> {
    let out = cmd
        .output()
        .map_err(|e| linux::net::NetError::Spawn {
            command: desc.to_string(),
            source: e,
        })?;
    if !out.status.success() {
        let stderr = String::from_utf8_lossy(&out.stderr).into_owned();
        // Idempotent for the global chains only: "already exists" is the
        // expected shape of the error on a second engine invocation.
        if stderr.contains("Chain already exists") {
            return Ok(());
        }
        return Err(linux::net::NetError::NonZero {
            command: desc.to_string(),
            status: out.status,
            stderr,
        }
        .into());
    }
    Ok(())
}

fn iptables(args: &[&str]) -> std::process::Command {
    let mut cmd = std::process::Command::new("iptables");
    cmd.args(args);
    cmd
}

/// Add a rule unless a `-C` check shows it's already there. Used for the
/// two hooks below, which aren't chain creation but are just as safe to
/// make idempotent.
fn add_rule_if_missing(args: &[&str]) -> Result<(), PacketFilterError> {
    let mut check_args: Vec<&str> = args.to_vec();
    check_args[args.iter().position(|a| *a == "-A").unwrap()] = "-C";
    let already_present = iptables(&check_args)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false);
    if already_present {
        return Ok(());
    }
    run(iptables(args), "iptables -A (idempotent hook)")
}

/// Installed once, at first container-network use: the `QSRDOCKER` chains
/// in both `filter` and `nat`, and the two hooks that route inbound
/// LOCAL-destined traffic into it.
pub fn ensure_global_chains() -> Result<(), PacketFilterError> {
    run(iptables(&["-N", "QSRDOCKER"]), "iptables -N QSRDOCKER (filter)")?;
    run(
        iptables(&["-t", "nat", "-N", "QSRDOCKER"]),
        "iptables -t nat -N QSRDOCKER",
    )?;
    add_rule_if_missing(&[
        "-t", "nat", "-A", "PREROUTING", "-m", "addrtype", "--dst-type", "LOCAL", "-j",
        "QSRDOCKER",
    ])?;
    add_rule_if_missing(&[
        "-t", "nat", "-A", "OUTPUT", "!", "-d", "127.0.0.0/8", "-m", "addrtype", "--dst-type",
        "LOCAL", "-j", "QSRDOCKER",
    ])?;
    Ok(())
}

/// Per-bridge rules installed on `network create`.
pub fn install_bridge_rules(bridge: &str, subnet_cidr: &str) -> Result<(), PacketFilterError> {
    run(
        iptables(&["-A", "FORWARD", "-o", bridge, "-j", "QSRDOCKER"]),
        "iptables -A FORWARD -o <br> -j QSRDOCKER",
    )?;
    run(
        iptables(&[
            "-A", "FORWARD", "-o", bridge, "-m", "conntrack", "--ctstate",
            "RELATED,ESTABLISHED", "-j", "ACCEPT",
        ]),
        "iptables -A FORWARD -o <br> conntrack ACCEPT",
    )?;
    run(
        iptables(&["-A", "FORWARD", "-i", bridge, "!", "-o", bridge, "-j", "ACCEPT"]),
        "iptables -A FORWARD -i <br> ! -o <br> ACCEPT",
    )?;
    run(
        iptables(&["-A", "FORWARD", "-i", bridge, "-o", bridge, "-j", "ACCEPT"]),
        "iptables -A FORWARD -i <br> -o <br> ACCEPT",
    )?;
    run(
        iptables(&[
            "-t", "nat", "-A", "POSTROUTING", "-s", subnet_cidr, "!", "-o", bridge, "-j",
            "MASQUERADE",
        ]),
        "iptables -t nat -A POSTROUTING MASQUERADE",
    )?;
    run(
        iptables(&["-t", "nat", "-A", "QSRDOCKER", "-i", bridge, "-j", "RETURN"]),
        "iptables -t nat -A QSRDOCKER -i <br> RETURN",
    )?;
    Ok(())
}

pub fn remove_bridge_rules(bridge: &str, subnet_cidr: &str) -> Result<(), PacketFilterError> {
    run(
        iptables(&["-D", "FORWARD", "-o", bridge, "-j", "QSRDOCKER"]),
        "iptables -D FORWARD -o <br> -j QSRDOCKER",
    )?;
    run(
        iptables(&[
            "-D", "FORWARD", "-o", bridge, "-m", "conntrack", "--ctstate",
            "RELATED,ESTABLISHED", "-j", "ACCEPT",
        ]),
        "iptables -D FORWARD conntrack ACCEPT",
    )?;
    run(
        iptables(&["-D", "FORWARD", "-i", bridge, "!", "-o", bridge, "-j", "ACCEPT"]),
        "iptables -D FORWARD -i <br> ! -o <br>",
    )?;
    run(
        iptables(&["-D", "FORWARD", "-i", bridge, "-o", bridge, "-j", "ACCEPT"]),
        "iptables -D FORWARD -i <br> -o <br>",
    )?;
    run(
        iptables(&[
            "-t", "nat", "-D", "POSTROUTING", "-s", subnet_cidr, "!", "-o", bridge, "-j",
            "MASQUERADE",
        ]),
        "iptables -t nat -D POSTROUTING MASQUERADE",
    )?;
    run(
        iptables(&["-t", "nat", "-D", "QSRDOCKER", "-i", bridge, "-j", "RETURN"]),
        "iptables -t nat -D QSRDOCKER -i <br> RETURN",
    )?;
    Ok(())
}

/// Per-endpoint rules installed for one published port. Not idempotent —
/// callers must not install twice.
pub fn install_port_rules(
    bridge: &str,
    container_ip: Ipv4Addr,
    container_port: u16,
    proto: &str,
    binding: &PortBinding,
) -> Result<(), PacketFilterError> {
    let cidr32 = format!("{container_ip}/32");
    let to = format!("{container_ip}:{container_port}");
    run(
        iptables(&[
            "-A", "QSRDOCKER", "-d", &cidr32, "!", "-i", bridge, "-o", bridge, "-p", proto,
            "--dport", &container_port.to_string(), "-j", "ACCEPT",
        ]),
        "iptables -A QSRDOCKER (accept published port)",
    )?;
    run(
        iptables(&[
            "-t", "nat", "-A", "POSTROUTING", "-s", &cidr32, "-d", &cidr32, "-p", proto,
            "--dport", &container_port.to_string(), "-j", "MASQUERADE",
        ]),
        "iptables -t nat -A POSTROUTING (hairpin masquerade)",
    )?;
    run(
        iptables(&[
            "-t", "nat", "-A", "QSRDOCKER", "!", "-i", bridge, "-p", proto, "--dport",
            &binding.host_port.to_string(), "-j", "DNAT", "--to", &to,
        ]),
        "iptables -t nat -A QSRDOCKER (dnat)",
    )?;
    Ok(())
}

pub fn remove_port_rules(
    bridge: &str,
    container_ip: Ipv4Addr,
    container_port: u16,
    proto: &str,
    binding: &PortBinding,
) -> Result<(), PacketFilterError> {
    let cidr32 = format!("{container_ip}/32");
    let to = format!("{container_ip}:{container_port}");
    run(
        iptables(&[
            "-D", "QSRDOCKER", "-d", &cidr32, "!", "-i", bridge, "-o", bridge, "-p", proto,
            "--dport", &container_port.to_string(), "-j", "ACCEPT",
        ]),
        "iptables -D QSRDOCKER (accept published port)",
    )?;
    run(
        iptables(&[
            "-t", "nat", "-D", "POSTROUTING", "-s", &cidr32, "-d", &cidr32, "-p", proto,
            "--dport", &container_port.to_string(), "-j", "MASQUERADE",
        ]),
        "iptables -t nat -D POSTROUTING (hairpin masquerade)",
    )?;
    run(
        iptables(&[
            "-t", "nat", "-D", "QSRDOCKER", "!", "-i", bridge, "-p", proto, "--dport",
            &binding.host_port.to_string(), "-j", "DNAT", "--to", &to,
        ]),
        "iptables -t nat -D QSRDOCKER (dnat)",
    )?;
    Ok(())
}
