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

//! Lifecycle Orchestrator: composes the subsystems above into
//! `run`/`stop`/`rm`/`commit`, the four operations the CLI exposes
//! directly on a container id or name.

use chrono::Utc;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use thiserror::Error;

use crate::config::QsrConfig;
use crate::error::EngineError;
use crate::image_store::ImageStore;
use crate::models::{ContainerDescriptor, ContainerStatus, GraphDriverData, MountRecord, NetDriver, PortBinding};
use crate::network_store::NetworkStore;
use crate::registry::NameRegistry;
use crate::resources::{CgroupGroup, ResourceLimits};
use crate::state_store::ContainerStore;
use crate::subnet::SubnetAllocator;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("container is running; stop it first or pass force")]
    StillRunning,
    #[error("command must not be empty and no entrypoint is set on the image")]
    NoCommand,
}

impl From<OrchestratorError> for EngineError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::StillRunning => EngineError::Conflict(e.to_string()),
            OrchestratorError::NoCommand => EngineError::UserInput(e.to_string()),
        }
    }
}

/// Port publish request: container-side port/proto, bound to a host port.
pub struct PortPublish {
    pub container_port: u16,
    pub proto: String,
    pub binding: PortBinding,
}

pub struct RunRequest {
    pub image: String,
    pub name: Option<String>,
    pub entrypoint: Option<String>,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub volumes: Vec<String>,
    pub network: String,
    pub ports: Vec<PortPublish>,
    pub memory: Option<String>,
    pub cpu_shares: Option<u64>,
    pub cpuset_cpus: Option<String>,
    pub cpuset_mems: Option<String>,
    pub oom_kill_disable: Option<bool>,
    pub tty: bool,
}

fn split_image_ref(image: &str) -> (&str, &str) {
    image.split_once(':').unwrap_or((image, "latest"))
}

/// Name and CIDR `network create` lazily uses the first time anything
/// runs with `-n default` (or no `-n` at all) and no such network has
/// ever been registered.
pub const DEFAULT_NETWORK_NAME: &str = "default";
const DEFAULT_NETWORK_SUBNET: &str = "172.18.0.0/24";

/// Resolve `name` to its persisted [`crate::models::Network`], creating
/// the default bridge network on the fly the first time it's requested
/// and nothing by that name exists yet.
fn ensure_default_network(
    config: &QsrConfig,
    stores: &Stores,
    name: &str,
) -> Result<crate::models::Network, EngineError> {
    match stores.networks.get(name) {
        Ok(network) => Ok(network),
        Err(crate::network_store::NetworkStoreError::NotFound(_)) if name == DEFAULT_NETWORK_NAME => {
            let subnet: netcidr::Ipv4Cidr = DEFAULT_NETWORK_SUBNET
                .parse()
                .map_err(|e| EngineError::Other(anyhow::anyhow!("bad default subnet: {e}")))?;
            create_network(config, stores, name, subnet, NetDriver::Bridge)
        }
        Err(e) => Err(e.into()),
    }
}

/// Shared body of `network create` and the default-network lazy path:
/// register the CIDR with the allocator, consume the gateway address,
/// bring up the bridge, persist the descriptor.
fn create_network(
    config: &QsrConfig,
    stores: &Stores,
    name: &str,
    subnet: netcidr::Ipv4Cidr,
    driver: NetDriver,
) -> Result<crate::models::Network, EngineError> {
    stores.subnets.create(&subnet)?;
    let gateway = stores.subnets.allocate(&subnet)?;
    let network = crate::models::Network::new(name.to_string(), subnet, driver);
    debug_assert_eq!(gateway, network.gateway);
    crate::bridge::create(&network, &config.bridge_prefix).map_err(|e| EngineError::KernelCall(e.into()))?;
    stores.networks.create(name, &network)?;
    Ok(network)
}

/// Env var carrying the link file's absolute (pre-pivot) host path into
/// the init stage. Not part of `ContainerDescriptor::env` — it's stripped
/// from the launch environment view the init process hands off to the
/// user program, same treatment the reentry control vars get.
pub const LINK_PATH_VAR: &str = "QSRDOCKER_LINK_PATH";

fn with_link_path_var(env: &[String], link_path: &std::path::Path) -> Vec<String> {
    let mut launch_env = env.to_vec();
    launch_env.push(format!("{LINK_PATH_VAR}={}", link_path.display()));
    launch_env
}

struct Stores {
    containers: ContainerStore,
    names: NameRegistry,
    images: ImageStore,
    networks: NetworkStore,
    subnets: SubnetAllocator,
}

fn open_stores(config: &QsrConfig) -> Stores {
    Stores {
        containers: ContainerStore::new(config.container_dir()),
        names: NameRegistry::new(config.names_path()),
        images: ImageStore::new(config.image_dir(), config.repositories_path()),
        networks: NetworkStore::new(config.network_dir()),
        subnets: SubnetAllocator::new(config.subnet_state_path(), config.subnet_lock_path()),
    }
}

/// Resolve a user-supplied name-or-id to the canonical container id.
pub fn resolve_container(config: &QsrConfig, name_or_id: &str) -> Result<String, EngineError> {
    let names = NameRegistry::new(config.names_path());
    names
        .resolve(name_or_id)?
        .ok_or_else(|| EngineError::NotFound(format!("no such container: {name_or_id}")))
}

/// `run`: assemble a container's overlay root, wire its network endpoint,
/// apply cgroup limits, launch the init process and release it onto the
/// user's command. Returns the stored descriptor once the container is
/// observed running.
pub fn run(config: &QsrConfig, req: RunRequest) -> Result<ContainerDescriptor, EngineError> {
    let stores = open_stores(config);

    if let Some(name) = &req.name {
        if stores.names.is_name_taken(name)? {
            return Err(EngineError::Conflict(format!("name {name} already in use")));
        }
    }

    let (image_name, tag) = split_image_ref(&req.image);
    let repositories = stores.images.load_repositories()?;
    let lower_chain = crate::overlay::resolve_lower_chain(&config.image_dir(), &repositories, image_name, tag)?;
    let top_image_id = repositories
        .resolve(image_name, tag)
        .and_then(|chain| chain.first().cloned());
    let metadata = top_image_id
        .as_deref()
        .and_then(|id| stores.images.load_metadata(id).ok());

    let entrypoint = req
        .entrypoint
        .or_else(|| metadata.as_ref().map(|m| m.entrypoint.clone()))
        .ok_or(OrchestratorError::NoCommand)?;
    let args = if !req.args.is_empty() {
        req.args
    } else {
        metadata.as_ref().map(|m| m.args.clone()).unwrap_or_default()
    };
    let image_env = metadata.as_ref().map(|m| m.env.clone()).unwrap_or_default();
    let env = varutil::env::merge(&image_env, &req.env);

    let container_id = crate::util::new_container_id();

    let layout = crate::overlay::OverlayLayout::for_container(&config.mount_dir(), &container_id);
    crate::overlay::assemble(&layout, &lower_chain)?;

    std::fs::create_dir_all(stores.containers.container_root(&container_id))
        .map_err(|e| EngineError::Other(e.into()))?;

    let mounts: Vec<MountRecord> = req
        .volumes
        .iter()
        .map(|spec| crate::volume::parse_spec(spec))
        .collect::<Result<_, _>>()?;
    let link_path = stores.containers.container_root(&container_id).join("link");
    crate::volume::write_link_file(&link_path, &mounts)?;

    let bridge_prefix = &config.bridge_prefix;
    let (network, endpoint) = if req.network == "none" {
        (None, None)
    } else {
        let network = ensure_default_network(config, &stores, &req.network)?;
        let mut endpoint =
            crate::bridge::connect(&network, &container_id, bridge_prefix, &stores.subnets)?;
        for publish in &req.ports {
            let key = format!("{}/{}", publish.container_port, publish.proto);
            endpoint
                .ports
                .entry(key)
                .or_default()
                .push(publish.binding.clone());
            if network.driver == NetDriver::Bridge {
                crate::packet_filter::install_port_rules(
                    &network.bridge_name(bridge_prefix),
                    endpoint.container_ip,
                    publish.container_port,
                    &publish.proto,
                    &publish.binding,
                )?;
            }
        }
        (Some(network), Some(endpoint))
    };

    let limits = ResourceLimits {
        memory_bytes: req.memory.as_deref().and_then(crate::resources::parse_memory_spec),
        cpu_shares: req.cpu_shares,
        cpu_quota_us: None,
        cpu_period_us: None,
        cpuset_cpus: req.cpuset_cpus,
        cpuset_mems: req.cpuset_mems,
        oom_kill_disable: req.oom_kill_disable,
    };
    let cgroup = CgroupGroup::new(container_id.clone());
    cgroup.apply(&limits).map_err(|e| EngineError::KernelCall(e.into()))?;

    let ns_spec = linux::ns::NamespaceSpec {
        network: endpoint.is_some(),
        user: true,
    };
    let self_exe = std::env::current_exe().map_err(|e| EngineError::Other(e.into()))?;
    let stdio_log = stores.containers.container_root(&container_id).join("stdio.log");
    let launch_env = with_link_path_var(&env, &link_path);
    let request = crate::launcher::LaunchRequest {
        ns_spec,
        cwd: layout.merged.as_path(),
        env: &launch_env,
        stdio_log: Some(stdio_log.as_path()),
        tty: req.tty,
        self_exe: self_exe.as_path(),
    };
    let (spawned, sync_write) = crate::launcher::spawn(&request)?;

    if let (Some(endpoint), Some(network)) = (&endpoint, &network) {
        crate::bridge::move_peer_into_namespace(endpoint, spawned.pid.as_raw() as u32)
            .map_err(|e| EngineError::KernelCall(e.into()))?;
        crate::bridge::configure_peer_in_namespace(spawned.pid.as_raw() as u32, endpoint, network)
            .map_err(|e| EngineError::KernelCall(e.into()))?;
    }

    let uid = nix::unistd::geteuid().as_raw();
    let gid = nix::unistd::getegid().as_raw();
    crate::launcher::finish_user_ns_setup(spawned.pid, uid, gid, sync_write)?;

    cgroup.add_task(spawned.pid.as_raw()).map_err(|e| EngineError::KernelCall(e.into()))?;

    let mut argv = vec![entrypoint.clone()];
    argv.extend(args.iter().cloned());
    crate::launcher::send_command(spawned.cmd_pipe_write, &argv)?;

    let descriptor = ContainerDescriptor {
        id: container_id.clone(),
        name: req.name.clone(),
        image: req.image.clone(),
        created_at: Utc::now(),
        status: ContainerStatus::Running,
        pid: spawned.pid.as_raw(),
        entrypoint,
        args,
        env,
        graph_driver: GraphDriverData {
            driver: "overlay".to_string(),
            lower_chain: lower_chain
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(":"),
        },
        mounts,
        volumes: req.volumes,
        cgroup_manager: "cgroupfs".to_string(),
        tty: req.tty,
        endpoint,
        limits,
    };
    stores.containers.put(&descriptor)?;
    stores.names.register(&container_id, req.name.as_deref())?;

    let _ = network;
    Ok(descriptor)
}

/// `start`: resume a `Paused` container. Unlike `run`, storage assembly is
/// skipped — the overlay mount from the original `run` is reused as-is,
/// after a health check confirms it's still mounted. Network is
/// reconnected from scratch (a fresh veth pair, a newly allocated IP) but
/// the previously-parsed port-publish map is carried over so the same
/// host ports re-bind to the new container IP.
pub fn start(config: &QsrConfig, name_or_id: &str) -> Result<ContainerDescriptor, EngineError> {
    let id = resolve_container(config, name_or_id)?;
    let stores = open_stores(config);
    let mut descriptor = stores.containers.get(&id)?;
    if descriptor.status == ContainerStatus::Running {
        return Err(EngineError::Conflict(format!("{name_or_id} is already running")));
    }

    let layout = crate::overlay::OverlayLayout::for_container(&config.mount_dir(), &id);
    crate::overlay::require_healthy(&layout, &id)?;

    let bridge_prefix = &config.bridge_prefix;
    let (endpoint, network) = if let Some(previous) = &descriptor.endpoint {
        let network = stores.networks.get(&previous.network_id)?;
        let mut endpoint = crate::bridge::connect(&network, &id, bridge_prefix, &stores.subnets)?;
        endpoint.ports = previous.ports.clone();
        for (port_proto, bindings) in &endpoint.ports {
            let Some((port, proto)) = port_proto.split_once('/') else {
                continue;
            };
            let Ok(container_port) = port.parse::<u16>() else {
                continue;
            };
            for binding in bindings {
                if network.driver == NetDriver::Bridge {
                    crate::packet_filter::install_port_rules(
                        &network.bridge_name(bridge_prefix),
                        endpoint.container_ip,
                        container_port,
                        proto,
                        binding,
                    )?;
                }
            }
        }
        (Some(endpoint), Some(network))
    } else {
        (None, None)
    };

    let ns_spec = linux::ns::NamespaceSpec {
        network: endpoint.is_some(),
        user: true,
    };
    let self_exe = std::env::current_exe().map_err(|e| EngineError::Other(e.into()))?;
    let stdio_log = stores.containers.container_root(&id).join("stdio.log");
    let link_path = stores.containers.container_root(&id).join("link");
    let launch_env = with_link_path_var(&descriptor.env, &link_path);
    let request = crate::launcher::LaunchRequest {
        ns_spec,
        cwd: layout.merged.as_path(),
        env: &launch_env,
        stdio_log: Some(stdio_log.as_path()),
        tty: descriptor.tty,
        self_exe: self_exe.as_path(),
    };
    let (spawned, sync_write) = crate::launcher::spawn(&request)?;

    if let (Some(endpoint), Some(network)) = (&endpoint, &network) {
        crate::bridge::move_peer_into_namespace(endpoint, spawned.pid.as_raw() as u32)
            .map_err(|e| EngineError::KernelCall(e.into()))?;
        crate::bridge::configure_peer_in_namespace(spawned.pid.as_raw() as u32, endpoint, network)
            .map_err(|e| EngineError::KernelCall(e.into()))?;
    }

    let uid = nix::unistd::geteuid().as_raw();
    let gid = nix::unistd::getegid().as_raw();
    crate::launcher::finish_user_ns_setup(spawned.pid, uid, gid, sync_write)?;

    let cgroup = CgroupGroup::new(id.clone());
    cgroup.apply(&descriptor.limits).map_err(|e| EngineError::KernelCall(e.into()))?;
    cgroup.add_task(spawned.pid.as_raw()).map_err(|e| EngineError::KernelCall(e.into()))?;

    let mut argv = vec![descriptor.entrypoint.clone()];
    argv.extend(descriptor.args.iter().cloned());
    crate::launcher::send_command(spawned.cmd_pipe_write, &argv)?;

    descriptor.status = ContainerStatus::Running;
    descriptor.pid = spawned.pid.as_raw();
    descriptor.endpoint = endpoint;
    stores.containers.put(&descriptor)?;
    Ok(descriptor)
}

/// `stop`: disconnect the network, wait out the grace period, then send
/// `SIGTERM` to the init process and mark the container `Paused`.
pub fn stop(config: &QsrConfig, name_or_id: &str, grace: std::time::Duration) -> Result<(), EngineError> {
    let id = resolve_container(config, name_or_id)?;
    let stores = open_stores(config);
    let mut descriptor = stores.containers.get(&id)?;
    if descriptor.status != ContainerStatus::Running {
        return Err(EngineError::Conflict(format!("{name_or_id} is not running")));
    }

    if let Some(endpoint) = &descriptor.endpoint {
        if let Ok(network) = stores.networks.get(&endpoint.network_id) {
            if network.driver == NetDriver::Bridge {
                let _ = crate::bridge::disconnect(&network, endpoint, &config.bridge_prefix, &stores.subnets);
            }
        }
    }

    if !grace.is_zero() {
        std::thread::sleep(grace);
    }
    linux::proc::signal_pid(Pid::from_raw(descriptor.pid), Signal::SIGTERM)
        .map_err(|e| EngineError::KernelCall(anyhow::anyhow!("{e}")))?;

    descriptor.status = ContainerStatus::Paused;
    descriptor.pid = -1;
    stores.containers.put(&descriptor)?;
    Ok(())
}

/// `rm`: tear down a stopped container's network endpoint, cgroup and
/// overlay workspace, then forget its name. Refuses a running container
/// unless `force` is set, in which case it's stopped (zero grace) first.
pub fn rm(config: &QsrConfig, name_or_id: &str, force: bool) -> Result<(), EngineError> {
    let id = resolve_container(config, name_or_id)?;
    let stores = open_stores(config);
    let mut descriptor = stores.containers.get(&id)?;
    if descriptor.status == ContainerStatus::Running {
        if !force {
            return Err(OrchestratorError::StillRunning.into());
        }
        stop(config, &id, std::time::Duration::ZERO)?;
        descriptor = stores.containers.get(&id)?;
    }

    if let Some(endpoint) = &descriptor.endpoint {
        if !endpoint.network_id.is_empty() {
            if let Ok(network) = stores.networks.get(&endpoint.network_id) {
                let _ = crate::bridge::disconnect(&network, endpoint, &config.bridge_prefix, &stores.subnets);
            }
        }
    }

    let cgroup = CgroupGroup::new(id.clone());
    let _ = cgroup.destroy();

    let layout = crate::overlay::OverlayLayout::for_container(&config.mount_dir(), &id);
    let _ = crate::overlay::teardown(&layout);

    stores.containers.remove_workspace(&id)?;
    stores.names.unregister(&id)?;
    Ok(())
}

/// `commit`: tar the container's diff layer into a new addressable image
/// layer, prepend it to the lower chain the container was started from,
/// and tag `name:tag` onto the resulting chain.
pub fn commit(config: &QsrConfig, name_or_id: &str, image_name: &str, tag: &str) -> Result<String, EngineError> {
    let id = resolve_container(config, name_or_id)?;
    let stores = open_stores(config);
    let descriptor = stores.containers.get(&id)?;

    let layout = crate::overlay::OverlayLayout::for_container(&config.mount_dir(), &id);
    let (new_image_id, _reused) = crate::image_store::commit_layer(&stores.images, &layout.diff)?;

    let mut chain: Vec<String> = vec![new_image_id.clone()];
    chain.extend(
        descriptor
            .graph_driver
            .lower_chain
            .split(':')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string()),
    );

    let metadata = crate::models::ImageMetadata {
        entrypoint: descriptor.entrypoint.clone(),
        args: descriptor.args.clone(),
        env: descriptor.env.clone(),
        created_at: Utc::now(),
    };
    stores.images.store_metadata(&new_image_id, &metadata)?;

    let mut repositories = stores.images.load_repositories()?;
    repositories.tag(image_name, tag, &chain);
    stores.images.store_repositories(&repositories)?;

    Ok(new_image_id)
}

/// `network create`: register the CIDR with the subnet allocator and bring
/// up the bridge (or no-op for `host`/`none`).
pub fn network_create(
    config: &QsrConfig,
    name: &str,
    subnet: netcidr::Ipv4Cidr,
    driver: NetDriver,
) -> Result<(), EngineError> {
    let stores = open_stores(config);
    // Consuming the bitmap's first bit (offset 0, the gateway) up front
    // ensures the first container connected to this network isn't handed
    // the same address the bridge itself is using.
    create_network(config, &stores, name, subnet, driver)?;
    Ok(())
}

pub fn network_remove(config: &QsrConfig, name: &str) -> Result<(), EngineError> {
    let stores = open_stores(config);
    let network = stores.networks.get(name)?;
    crate::bridge::delete(&network, &config.bridge_prefix).map_err(|e| EngineError::KernelCall(e.into()))?;
    let _ = stores.subnets.release(&network.subnet, network.gateway);
    stores.networks.remove(name)?;
    Ok(())
}

pub fn network_list(config: &QsrConfig) -> Result<Vec<(String, crate::models::Network)>, EngineError> {
    let stores = open_stores(config);
    Ok(stores.networks.list()?)
}
