// Copyright 2024, The Android Open Source Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error types shared by the passthrough stack.

use thiserror::Error;

/// Startup configuration errors. These are fatal and end the process with
/// [`crate::EXIT_INVALID_ARGUMENT`] before any transport is created.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Address is not defined")]
    MissingAddress,

    #[error("Unknown type '{0}'")]
    UnknownRole(String),

    #[error("No binder slots configured")]
    NoSlots,

    #[error("Cannot open service manager on {0}")]
    NoServiceManager(String),

    #[error("Built without a binder backend")]
    NoBinderBackend,
}

/// Failures of a call on the bus endpoint.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BusError {
    /// No connection is currently established.
    #[error("No connection ({0})")]
    NotConnected(String),

    /// The call reached the endpoint but failed there, or timed out.
    #[error("Failed to call {method}(): {reason}")]
    Remote { method: &'static str, reason: String },
}

/// Invalid transitions of the peer state machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeerError {
    #[error("{0} is already attached")]
    AlreadyAttached(String),

    #[error("{0} has been detached")]
    Detached(String),
}
