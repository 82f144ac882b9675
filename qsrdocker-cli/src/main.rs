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

mod error;
mod format;

use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use nix::unistd::Pid;
use tracing::debug;

use error::ActionError;
use format::{EnvPair, PublishSpec};
use qsrdocker::models::{ContainerStatus, NetDriver};
use qsrdocker::orchestrator::{self, PortPublish, RunRequest};
use qsrdocker::QsrConfig;

/// Parsed from `-p [HOSTIP:]HOSTPORT:CONTAINERPORT[/proto]` into the
/// orchestrator's request shape.
fn to_port_publish(spec: PublishSpec) -> PortPublish {
    PortPublish {
        container_port: spec.container_port,
        proto: spec.proto,
        binding: spec.binding,
    }
}

#[derive(Parser, Debug)]
#[command(name = "qsrdocker", version, about = "A single-host Linux container engine")]
struct Args {
    /// Override the engine root directory (default `/var/qsrdocker`),
    /// mirroring `xc-bin`'s `-s`/`--socket-path` config override.
    #[arg(long = "root", global = true)]
    root: Option<String>,
    #[arg(long = "config", global = true, default_value = "/etc/qsrdocker/config.json")]
    config: PathBuf,
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Create and start a new container from an image.
    Run {
        #[arg(long = "ti", action)]
        tty: bool,
        #[arg(short = 'd', long = "detach", action)]
        detach: bool,
        #[arg(short = 'm', long = "memory")]
        memory: Option<String>,
        #[arg(long = "cpushare")]
        cpu_shares: Option<u64>,
        #[arg(long = "cpuset")]
        cpuset: Option<String>,
        #[arg(long = "cpumem")]
        cpu_mems: Option<String>,
        #[arg(long = "name")]
        name: Option<String>,
        #[arg(long = "oom_kill_disable")]
        oom_kill_disable: Option<u8>,
        #[arg(short = 'v', long = "volume")]
        volumes: Vec<String>,
        #[arg(short = 'e', long = "env")]
        env: Vec<EnvPair>,
        #[arg(short = 'n', long = "network", default_value = "default")]
        network: String,
        #[arg(long = "netdriver", default_value = "bridge")]
        netdriver: NetDriver,
        #[arg(long = "container")]
        container: Option<String>,
        #[arg(short = 'p', long = "publish")]
        publish: Vec<PublishSpec>,
        image: String,
        cmd: Vec<String>,
    },
    /// Internal: begin the init stage inside a freshly-unshared container.
    /// Never invoked directly by a user; the process launcher re-execs
    /// itself with this sub-command as argv[0]'s continuation.
    #[command(hide = true)]
    Init,
    /// Resume one or more paused containers.
    Start { names: Vec<String> },
    /// Signal a running container's init process.
    Stop {
        #[arg(short = 't', long = "time", default_value_t = 0)]
        grace_secs: u64,
        name: String,
    },
    /// Remove one or more containers.
    Rm {
        #[arg(short = 'f', long = "force", action)]
        force: bool,
        #[arg(short = 'v', long = "volumes", action)]
        volumes: bool,
        names: Vec<String>,
    },
    /// List containers.
    Ps {
        #[arg(short = 'a', long = "all", action)]
        all: bool,
    },
    /// Show a container's stdout/stderr log.
    Logs {
        #[arg(short = 'f', long = "follow", action)]
        follow: bool,
        #[arg(short = 't', long = "tail", default_value_t = 0)]
        tail: usize,
        name: String,
    },
    /// Enter a running container's namespaces and run a command.
    Exec {
        #[arg(short = 't', long = "ti", action)]
        tty: bool,
        name: String,
        cmd: Vec<String>,
    },
    /// Print a container's descriptor as JSON.
    Inspect { name: String },
    /// Snapshot a container's upper layer into a new image.
    Commit { container: String, image: String },
    #[command(subcommand)]
    Image(ImageAction),
    #[command(subcommand)]
    Network(NetworkAction),
}

#[derive(Subcommand, Debug)]
enum ImageAction {
    /// List images with size and creation time.
    Ls,
}

#[derive(Subcommand, Debug)]
enum NetworkAction {
    Create {
        #[arg(long = "driver", default_value = "bridge")]
        driver: NetDriver,
        #[arg(long = "subnet")]
        subnet: netcidr::Ipv4Cidr,
        name: String,
    },
    Ls,
    Remove { name: String },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = match qsrdocker::QsrConfig::load(&args.config) {
        Ok(c) => c.with_root_override(args.root.clone()),
        Err(e) => {
            eprintln!("failed to load config {}: {e}", args.config.display());
            std::process::exit(1);
        }
    };

    if let Err(e) = run(&config, args.action) {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

fn run(config: &QsrConfig, action: Action) -> Result<(), ActionError> {
    match action {
        Action::Run { .. } => run_container(config, action),
        Action::Init => init_stage(),
        Action::Start { names } => {
            for name in names {
                let descriptor = orchestrator::start(config, &name)?;
                println!("{}", descriptor.id);
            }
            Ok(())
        }
        Action::Stop { grace_secs, name } => {
            orchestrator::stop(config, &name, Duration::from_secs(grace_secs))?;
            println!("{name}");
            Ok(())
        }
        Action::Rm { force, volumes, names } => remove(config, &names, force, volumes),
        Action::Ps { all } => ps(config, all),
        Action::Logs { follow, tail, name } => logs(config, &name, tail, follow),
        Action::Exec { tty, name, cmd } => exec(config, &name, tty, &cmd),
        Action::Inspect { name } => inspect(config, &name),
        Action::Commit { container, image } => commit(config, &container, &image),
        Action::Image(ImageAction::Ls) => image_ls(config),
        Action::Network(net_action) => network(config, net_action),
    }
}

fn run_container(config: &QsrConfig, action: Action) -> Result<(), ActionError> {
    let Action::Run {
        tty,
        detach,
        memory,
        cpu_shares,
        cpuset,
        cpu_mems,
        name,
        oom_kill_disable,
        volumes,
        env,
        network,
        netdriver: _netdriver,
        container: _container,
        publish,
        image,
        cmd,
    } = action
    else {
        unreachable!("run_container only called for Action::Run")
    };

    let (entrypoint, args) = match cmd.split_first() {
        Some((entrypoint, rest)) => (Some(entrypoint.clone()), rest.to_vec()),
        None => (None, Vec::new()),
    };

    let tty = tty && !detach;
    let req = RunRequest {
        image,
        name,
        entrypoint,
        args,
        env: env.into_iter().map(|pair| pair.0).collect(),
        volumes,
        network,
        ports: publish.into_iter().map(to_port_publish).collect(),
        memory,
        cpu_shares,
        cpuset_cpus: cpuset,
        cpuset_mems: cpu_mems,
        oom_kill_disable: oom_kill_disable.map(|v| v != 0),
        tty,
    };

    let descriptor = orchestrator::run(config, req)?;
    println!("{}", descriptor.id);
    if tty {
        // Attached mode: block until the init process exits, then clean
        // up the same way `rm` does (remove the name registry entry,
        // delete the workspace, destroy the cgroup).
        let _ = nix::sys::wait::waitpid(Pid::from_raw(descriptor.pid), None);
        orchestrator::rm(config, &descriptor.id, true)?;
    }
    Ok(())
}

/// Runs inside the freshly-unshared namespaces after the self-re-exec.
/// Implements C11 in order: read command off the cmd pipe, read the link
/// file while the pre-pivot host root is still directly reachable, pivot
/// root and mount proc/dev, bind-mount volumes from under the stashed old
/// root, detach that old root, then resolve and exec the user program.
fn init_stage() -> Result<(), ActionError> {
    use qsrdocker::init;
    use qsrdocker::orchestrator::LINK_PATH_VAR;

    let argv = init::read_command().map_err(|e| ActionError::Anyhow(e.into()))?;

    // Read before pivot_root: the link file's host_path entries are
    // absolute paths on the pre-pivot root, which is still mounted as "/"
    // at this point.
    let mounts = match std::env::var(LINK_PATH_VAR) {
        Ok(path) => qsrdocker::volume::read_link_file(std::path::Path::new(&path))
            .map_err(|e| ActionError::Anyhow(e.into()))?,
        Err(_) => Vec::new(),
    };
    std::env::remove_var(LINK_PATH_VAR);

    let cwd = std::env::current_dir()?;
    init::setup_mounts(&cwd).map_err(|e| ActionError::Anyhow(e.into()))?;

    if !mounts.is_empty() {
        init::apply_volumes(&mounts).map_err(|e| ActionError::Anyhow(e.into()))?;
    }
    init::cleanup_old_root().map_err(|e| ActionError::Anyhow(e.into()))?;

    let path_env = std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string());
    let resolved = init::resolve_program(&argv[0], &path_env).map_err(|e| ActionError::Anyhow(e.into()))?;
    init::exec_user_program(&resolved, &argv).map_err(|e| ActionError::Anyhow(e.into()))?;
    Ok(())
}

fn remove(config: &QsrConfig, names: &[String], force: bool, remove_volumes: bool) -> Result<(), ActionError> {
    for name in names {
        if remove_volumes {
            let id = orchestrator::resolve_container(config, name)?;
            let store = qsrdocker::state_store::ContainerStore::new(config.container_dir());
            if let Ok(descriptor) = store.get(&id) {
                for mount in &descriptor.mounts {
                    let _ = std::fs::remove_dir_all(&mount.host_path);
                }
            }
        }
        orchestrator::rm(config, name, force)?;
        println!("{name}");
    }
    Ok(())
}

fn ps(config: &QsrConfig, all: bool) -> Result<(), ActionError> {
    let store = qsrdocker::state_store::ContainerStore::new(config.container_dir());
    let descriptors = store.list().map_err(|e| ActionError::Anyhow(e.into()))?;
    println!("{:<12}{:<20}{:<24}{:<10}{}", "ID", "NAME", "IMAGE", "STATUS", "COMMAND");
    for descriptor in descriptors {
        if !all && descriptor.status != ContainerStatus::Running {
            continue;
        }
        println!(
            "{:<12}{:<20}{:<24}{:<10}{}",
            descriptor.id,
            descriptor.name.as_deref().unwrap_or("-"),
            descriptor.image,
            descriptor.status,
            descriptor.command_line(),
        );
    }
    Ok(())
}

fn logs(config: &QsrConfig, name: &str, tail: usize, follow: bool) -> Result<(), ActionError> {
    use std::io::{Read, Seek, SeekFrom};

    let id = orchestrator::resolve_container(config, name)?;
    let path = config.container_dir().join(&id).join("stdio.log");
    let print_tail = |contents: &str| {
        if tail == 0 {
            print!("{contents}");
        } else {
            for line in contents.lines().rev().take(tail).collect::<Vec<_>>().into_iter().rev() {
                println!("{line}");
            }
        }
    };

    let mut file = std::fs::File::open(&path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    print_tail(&contents);

    if follow {
        let mut pos = file.stream_position()?;
        loop {
            std::thread::sleep(Duration::from_millis(500));
            let metadata = file.metadata()?;
            if metadata.len() > pos {
                file.seek(SeekFrom::Start(pos))?;
                let mut chunk = String::new();
                file.read_to_string(&mut chunk)?;
                print!("{chunk}");
                pos = file.stream_position()?;
            }
        }
    }
    Ok(())
}

/// `exec`: read the target container's environment off `/proc/<pid>/environ`
/// so the re-entered shell inherits container-set variables, set the two
/// re-entry control variables, and re-exec this same binary — the
/// `ctor`-based constructor in `qsrdocker::reentry` intercepts before this
/// process's `main` (or `Action::Exec` arm) is ever reached in the child.
fn exec(config: &QsrConfig, name: &str, _tty: bool, cmd: &[String]) -> Result<(), ActionError> {
    let id = orchestrator::resolve_container(config, name)?;
    let store = qsrdocker::state_store::ContainerStore::new(config.container_dir());
    let descriptor = store.get(&id).map_err(|e| ActionError::Anyhow(e.into()))?;
    if descriptor.status != ContainerStatus::Running {
        return Err(ActionError::UserInput(format!("{name} is not running")));
    }

    let pid = descriptor.pid;
    let container_env = linux::proc::read_environ(Pid::from_raw(pid)).unwrap_or_default();
    let joined_cmd = if cmd.is_empty() {
        descriptor.command_line()
    } else {
        cmd.join(" ")
    };

    let self_exe = std::env::current_exe()?;
    let mut command = std::process::Command::new(&self_exe);
    command.env_clear();
    for entry in &container_env {
        if let Some((key, value)) = entry.split_once('=') {
            command.env(key, value);
        }
    }
    for (key, value) in qsrdocker::reentry::reentry_env(pid, &joined_cmd) {
        command.env(key, value);
    }
    command.arg("exec").arg(name);
    debug!(pid, cmd = %joined_cmd, "re-exec for namespace re-entry");
    // `exec` replaces this process image; the ctor in the child
    // intercepts before any of this binary's `main` logic runs again.
    let err = command.exec();
    Err(ActionError::Io(err))
}

fn inspect(config: &QsrConfig, name: &str) -> Result<(), ActionError> {
    let id = orchestrator::resolve_container(config, name)?;
    let store = qsrdocker::state_store::ContainerStore::new(config.container_dir());
    let descriptor = store.get(&id).map_err(|e| ActionError::Anyhow(e.into()))?;
    let pretty = serde_json::to_string_pretty(&descriptor).map_err(|e| ActionError::Anyhow(e.into()))?;
    println!("{pretty}");
    Ok(())
}

fn commit(config: &QsrConfig, container: &str, image: &str) -> Result<(), ActionError> {
    let (name, tag) = image.split_once(':').unwrap_or((image, "last"));
    let image_id = orchestrator::commit(config, container, name, tag)?;
    println!("{image_id}");
    Ok(())
}

fn dir_size(path: &std::path::Path) -> u64 {
    let mut total = 0u64;
    let Ok(entries) = std::fs::read_dir(path) else {
        return 0;
    };
    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if metadata.is_dir() {
            total += dir_size(&entry.path());
        } else {
            total += metadata.len();
        }
    }
    total
}

fn image_ls(config: &QsrConfig) -> Result<(), ActionError> {
    let images = qsrdocker::image_store::ImageStore::new(config.image_dir(), config.repositories_path());
    let repositories = images.load_repositories().map_err(|e| ActionError::Anyhow(e.into()))?;
    println!("{:<20}{:<10}{:<14}{:<24}{}", "REPOSITORY", "TAG", "IMAGE ID", "CREATED", "SIZE");
    for (name, tags) in &repositories.images {
        for (tag, chain) in tags {
            let Some(top_id) = chain.split(':').next() else {
                continue;
            };
            let created = images
                .load_metadata(top_id)
                .map(|m| m.created_at.to_rfc3339())
                .unwrap_or_else(|_| "-".to_string());
            let size = format::format_capacity(dir_size(&images.layer_dir(top_id)));
            println!("{:<20}{:<10}{:<14}{:<24}{}", name, tag, top_id, created, size);
        }
    }
    Ok(())
}

fn network(config: &QsrConfig, action: NetworkAction) -> Result<(), ActionError> {
    match action {
        NetworkAction::Create { driver, subnet, name } => {
            orchestrator::network_create(config, &name, subnet, driver)?;
            println!("{name}");
        }
        NetworkAction::Ls => {
            let list = orchestrator::network_list(config)?;
            println!("{:<16}{:<18}{:<16}{}", "NAME", "SUBNET", "GATEWAY", "DRIVER");
            for (name, net) in list {
                println!("{:<16}{:<18}{:<16}{}", name, net.subnet, net.gateway, net.driver);
            }
        }
        NetworkAction::Remove { name } => {
            orchestrator::network_remove(config, &name)?;
            println!("{name}");
        }
    }
    Ok(())
}
