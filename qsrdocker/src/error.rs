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

//! Top-level error ladder. Every subsystem defines its own `thiserror` enum
//! (`subnet::SubnetError`, `overlay::OverlayError`, ...); each converts into
//! [`EngineError`] here so the CLI boundary has one place to map a failure
//! onto an error kind (and, in turn, a process exit code).

use thiserror::Error;

/// The propagation-policy kinds from the error handling design: which ones
/// surface to the user and which are logged-and-swallowed is a property of
/// *where* they're produced, not of the variant itself, so this enum only
/// carries the surfaceable kinds. `Partial` and `Cleanup` failures are
/// logged at their call site via `tracing::warn!`/`tracing::error!` and
/// never constructed as an `EngineError`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0}")]
    UserInput(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("kernel call failed: {0}")]
    KernelCall(#[source] anyhow::Error),
    #[error("lock busy: {0}")]
    LockBusy(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    /// Exit code the CLI surfaces this error as, mirroring how
    /// `xc-bin`'s action error maps a `PreconditionFailure`'s errno onto
    /// the process's exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::UserInput(_) => 2,
            EngineError::NotFound(_) => 3,
            EngineError::Conflict(_) => 4,
            EngineError::KernelCall(_) => 5,
            EngineError::LockBusy(_) => 6,
            EngineError::Other(_) => 1,
        }
    }
}

impl From<crate::subnet::SubnetError> for EngineError {
    fn from(e: crate::subnet::SubnetError) -> Self {
        use crate::subnet::SubnetError as S;
        match e {
            S::Exists(_) | S::Conflicts(_) | S::PrefixTooSmall(_) => {
                EngineError::Conflict(e.to_string())
            }
            S::Missing(_) | S::Exhausted(_) => EngineError::NotFound(e.to_string()),
            S::LockBusy => EngineError::LockBusy(e.to_string()),
            S::Io(_) | S::Json(_) => EngineError::Other(e.into()),
        }
    }
}

impl From<crate::overlay::OverlayError> for EngineError {
    fn from(e: crate::overlay::OverlayError) -> Self {
        use crate::overlay::OverlayError as O;
        match e {
            O::ImageMissing(_) => EngineError::NotFound(e.to_string()),
            O::WorkspaceCorrupt(_) => EngineError::Conflict(e.to_string()),
            O::Mount(_) | O::Io(_) => EngineError::KernelCall(e.into()),
        }
    }
}

impl From<crate::registry::RegistryError> for EngineError {
    fn from(e: crate::registry::RegistryError) -> Self {
        EngineError::Other(e.into())
    }
}

impl From<crate::state_store::StoreError> for EngineError {
    fn from(e: crate::state_store::StoreError) -> Self {
        match &e {
            crate::state_store::StoreError::NotFound(_) => EngineError::NotFound(e.to_string()),
            _ => EngineError::Other(e.into()),
        }
    }
}

impl From<crate::bridge::BridgeError> for EngineError {
    fn from(e: crate::bridge::BridgeError) -> Self {
        use crate::bridge::BridgeError as B;
        match e {
            B::ContainerDriverUnimplemented => EngineError::UserInput(e.to_string()),
            B::Subnet(inner) => inner.into(),
            B::Net(_) | B::Ns(_) | B::PacketFilter(_) => EngineError::KernelCall(e.into()),
        }
    }
}

impl From<crate::packet_filter::PacketFilterError> for EngineError {
    fn from(e: crate::packet_filter::PacketFilterError) -> Self {
        EngineError::KernelCall(e.into())
    }
}

impl From<crate::volume::VolumeError> for EngineError {
    fn from(e: crate::volume::VolumeError) -> Self {
        EngineError::KernelCall(e.into())
    }
}

impl From<crate::launcher::LaunchError> for EngineError {
    fn from(e: crate::launcher::LaunchError) -> Self {
        match &e {
            crate::launcher::LaunchError::EmptyCommand => EngineError::UserInput(e.to_string()),
            _ => EngineError::KernelCall(e.into()),
        }
    }
}
