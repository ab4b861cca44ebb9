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

//! Operating roles of the daemon.
//!
//! The role is chosen once at startup. Both roles share the bus client held in
//! the [`Context`]; they differ in which side initiates the relayed calls.

mod client;
mod server;

pub use client::ClientRole;
pub use server::{Registration, ServerRole};

use crate::binder::protocol::{InboundCall, Reply};
use crate::binder::{LocalTarget, PeerId};
use crate::config::{Config, RoleKind};
use crate::error::ConfigError;
use crate::slots::{Slot, SlotSource};
use crate::Context;
use log::debug;
use std::ops::ControlFlow;

pub enum Role {
    Server(ServerRole),
    Client(ClientRole),
}

impl Role {
    /// Builds the role selected by `config` and starts connecting the bus.
    pub fn init(
        config: &Config,
        ctx: &mut Context,
        slots: &dyn SlotSource,
    ) -> Result<Self, ConfigError> {
        debug!("Using {} implementation", config.role.name());
        Ok(match config.role {
            RoleKind::Server => Role::Server(ServerRole::init(config, ctx)),
            RoleKind::Client => Role::Client(ClientRole::init(ctx, slots)?),
        })
    }

    pub fn kind(&self) -> RoleKind {
        match self {
            Role::Server(_) => RoleKind::Server,
            Role::Client(_) => RoleKind::Client,
        }
    }

    /// Waits for the service manager. The event loop only runs if it is there.
    pub fn wait(&self, ctx: &Context) -> bool {
        ctx.sm.wait()
    }

    pub fn shutdown(&mut self, ctx: &mut Context) {
        match self {
            Role::Server(server) => server.shutdown(ctx),
            Role::Client(client) => client.shutdown(ctx),
        }
    }

    pub fn on_bus_connected(&mut self, ctx: &mut Context) {
        match self {
            Role::Server(server) => server.on_bus_connected(ctx),
            Role::Client(client) => client.on_bus_connected(ctx),
        }
    }

    pub fn on_registration(&mut self, ctx: &mut Context, peer: PeerId, name: &str) {
        match self {
            Role::Client(client) => client.on_registration(ctx, peer, name),
            Role::Server(_) => debug!("{} appeared", name),
        }
    }

    pub fn on_remote_died(&mut self, ctx: &mut Context, peer: PeerId) {
        if let Role::Client(client) = self {
            client.on_remote_died(ctx, peer);
        }
    }

    pub fn on_presence(&mut self, ctx: &mut Context, present: bool) {
        match self {
            Role::Server(server) => server.on_presence(ctx, present),
            Role::Client(_) => debug!("Service manager present: {}", present),
        }
    }

    /// Returns `Break` when the daemon cannot go on.
    pub fn on_service_added(&mut self, name: &str, status: i32) -> ControlFlow<()> {
        match self {
            Role::Server(server) => server.on_service_added(name, status),
            Role::Client(_) => ControlFlow::Continue(()),
        }
    }

    pub fn on_transaction(
        &mut self,
        ctx: &mut Context,
        target: LocalTarget,
        call: InboundCall,
    ) -> Reply {
        match self {
            Role::Server(server) => server.on_transaction(ctx, target, call),
            Role::Client(client) => client.on_transaction(ctx, target, call),
        }
    }

    pub fn reconfigure(&mut self, ctx: &mut Context, slots: Vec<Slot>) {
        match self {
            Role::Client(client) => client.reconfigure(ctx, slots),
            Role::Server(_) => {
                debug!("Ignoring slot configuration in {} role", RoleKind::Server.name())
            }
        }
    }
}
