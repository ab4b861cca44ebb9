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

//! Binder-style transport seam.
//!
//! The stack only talks to the binder world through a [`ServiceManager`]. Every
//! asynchronous notification of the underlying transport (registration,
//! presence, death, inbound transactions) is posted to the event loop as a
//! [`crate::Message`], so handlers never run from transport threads.

pub mod protocol;

#[cfg(feature = "gbinder")]
mod ffi;
#[cfg(feature = "gbinder")]
mod gbinder;
#[cfg(test)]
pub(crate) mod loopback;
#[cfg(any(test, feature = "gbinder"))]
mod replier;

use crate::error::ConfigError;
use crate::Message;
use tokio::sync::mpsc::UnboundedSender;

/// Identifier of a peer, unique for the process lifetime. A replaced peer never
/// reuses the identifier of its predecessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(pub u64);

/// Which handler receives the transactions of a local object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalTarget {
    /// The object registered as the well-known service (Server role).
    Service,
    /// The callback object handed to a peer (Client role).
    Peer(PeerId),
}

macro_rules! handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, PartialEq, Eq, Hash)]
        pub struct $name(u64);

        impl $name {
            /// Wraps a backend specific identifier.
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            /// Backend specific identifier.
            pub fn raw(&self) -> u64 {
                self.0
            }
        }
    };
}

handle!(
    /// Strong reference on a remote object, released with
    /// [`ServiceManager::release_remote`].
    RemoteHandle
);
handle!(
    /// Local object able to receive transactions.
    LocalHandle
);
handle!(
    /// Registration or presence handler installed on the service manager.
    WatchHandle
);
handle!(
    /// Death handler installed on a remote object.
    DeathHandle
);

/// Name-resolution service of the binder-style transport.
///
/// Methods returning handles never fail: an absent service is reported as
/// `None`, and a failing one-way call only through its status code.
pub trait ServiceManager {
    /// Blocks until the service manager is present. Returns false if it never
    /// shows up.
    fn wait(&self) -> bool;

    /// Resolves `fqname` to a live remote object.
    fn get_service(&self, fqname: &str) -> Option<RemoteHandle>;

    /// Posts [`Message::Registration`] for `peer` each time `fqname` is registered.
    fn add_registration_handler(&self, fqname: &str, peer: PeerId) -> WatchHandle;

    /// Posts [`Message::ServiceManagerPresence`] when the service manager
    /// appears or disappears.
    fn add_presence_handler(&self) -> WatchHandle;

    /// Removes a registration or presence handler.
    fn remove_handler(&self, handler: WatchHandle);

    /// Posts [`Message::RemoteDied`] for `peer` when `remote` dies.
    fn add_death_handler(&self, remote: &RemoteHandle, peer: PeerId) -> DeathHandle;

    fn remove_death_handler(&self, remote: &RemoteHandle, handler: DeathHandle);

    fn release_remote(&self, remote: RemoteHandle);

    /// Creates a local object implementing `iface`. Its transactions are posted
    /// as [`Message::Transaction`] addressed to `target`.
    fn new_local_object(&self, iface: &'static str, target: LocalTarget) -> LocalHandle;

    fn drop_local_object(&self, local: LocalHandle);

    /// One-way transaction on `remote` carrying `local` as its only argument.
    /// Returns the transport status, 0 on success.
    fn transact_oneway(
        &self,
        remote: &RemoteHandle,
        iface: &str,
        code: u32,
        local: &LocalHandle,
    ) -> i32;

    /// Registers `local` under `name`. Completion is posted as
    /// [`Message::ServiceAdded`].
    fn add_service(&self, name: &str, local: &LocalHandle);
}

/// Opens the service manager on `device`.
#[cfg(feature = "gbinder")]
pub fn open(
    device: &str,
    binder_index: u32,
    tx: UnboundedSender<Message>,
) -> Result<Box<dyn ServiceManager>, ConfigError> {
    match gbinder::GBinderServiceManager::new(device, binder_index, tx) {
        Some(sm) => Ok(Box::new(sm)),
        None => Err(ConfigError::NoServiceManager(device.to_string())),
    }
}

/// Opens the service manager on `device`.
#[cfg(not(feature = "gbinder"))]
pub fn open(
    device: &str,
    _binder_index: u32,
    _tx: UnboundedSender<Message>,
) -> Result<Box<dyn ServiceManager>, ConfigError> {
    log::error!("Cannot open {}: no binder backend compiled in", device);
    Err(ConfigError::NoBinderBackend)
}
