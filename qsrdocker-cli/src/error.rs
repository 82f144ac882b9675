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

//! Boundary error type between the orchestrator and the process exit code.
//! `qsrdocker::EngineError` already tags each variant with its surfaceable
//! exit-code kind; this wraps it plus the handful of errors that only
//! arise at the CLI boundary itself (bad flag values clap's own parsing
//! doesn't catch, e.g. an invalid port-publish value).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Engine(#[from] qsrdocker::EngineError),
    #[error("{0}")]
    UserInput(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl ActionError {
    /// Exit code surfaced by `main`. Mirrors `qsrdocker::EngineError::exit_code`
    /// for the wrapped case and reserves 2 (clap's own convention for a
    /// usage error) for errors raised at the CLI boundary.
    pub fn exit_code(&self) -> i32 {
        match self {
            ActionError::Engine(e) => e.exit_code(),
            ActionError::UserInput(_) => 2,
            ActionError::Io(_) | ActionError::Anyhow(_) => 1,
        }
    }
}
