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

//! Audio parameter passthrough between binder services and the audio server's
//! D-Bus endpoint.
//!
//! Everything runs on one thread. Binder callbacks, bus retry ticks and
//! signals are turned into [`Message`]s and handled one at a time by
//! [`Stack::handle_message`]:
//!
//! ```text
//!   binder thread ──┐
//!   retry timer ────┼──> mpsc ──> Stack::dispatch ──> Role ──> BusClient
//!   signals ────────┘
//! ```

pub mod binder;
pub mod bus;
pub mod config;
pub mod error;
pub mod peer;
pub mod relay;
pub mod role;
pub mod slots;

#[cfg(test)]
mod fakes;

use binder::protocol::{InboundCall, Reply};
use binder::{LocalTarget, PeerId, ServiceManager};
use bus::{BusClient, Dialer};
use config::Config;
use error::ConfigError;
use log::{debug, info, warn};
use role::Role;
use slots::{Slot, SlotSource};
use std::ops::ControlFlow;
use tokio::sync::{mpsc, oneshot};

/// Process exit status on a clean shutdown.
pub const EXIT_OK: i32 = 0;
/// Process exit status on configuration or initialisation errors.
pub const EXIT_INVALID_ARGUMENT: i32 = 2;

/// Events processed by the event loop.
#[derive(Debug)]
pub enum Message {
    /// The bus retry timer fired.
    BusRetry,
    /// The bus link came up for the first time.
    BusConnected,
    /// `name` was registered with the service manager, as watched for `peer`.
    Registration { peer: PeerId, name: String },
    /// The remote object attached for `peer` died.
    RemoteDied { peer: PeerId },
    /// The service manager appeared (true) or went away (false).
    ServiceManagerPresence(bool),
    /// Completion of [`ServiceManager::add_service`]. Zero status is success.
    ServiceAdded { name: String, status: i32 },
    /// Incoming call on one of our local objects.
    Transaction(Transaction),
    /// New slot configuration.
    Reconfigure(Vec<Slot>),
    Shutdown,
}

/// An incoming binder call waiting for its reply.
#[derive(Debug)]
pub struct Transaction {
    pub target: LocalTarget,
    pub call: InboundCall,
    /// The binder thread blocks until this is answered or dropped.
    pub reply: oneshot::Sender<Reply>,
}

/// Resources shared by the roles.
pub struct Context {
    pub sm: Box<dyn ServiceManager>,
    pub bus: BusClient,
}

/// The running daemon.
pub struct Stack {
    ctx: Context,
    role: Role,
}

impl Stack {
    /// Builds the role chosen in `config` on top of `sm` and starts connecting
    /// to the bus endpoint through `dialer`.
    pub fn new(
        config: &Config,
        sm: Box<dyn ServiceManager>,
        dialer: Box<dyn Dialer>,
        slots: &dyn SlotSource,
        tx: mpsc::UnboundedSender<Message>,
    ) -> Result<Self, ConfigError> {
        let bus = BusClient::new(&config.address, dialer, tx, config.reconnect);
        let mut ctx = Context { sm, bus };
        let role = Role::init(config, &mut ctx, slots)?;
        Ok(Self { ctx, role })
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn bus(&self) -> &BusClient {
        &self.ctx.bus
    }

    /// Waits for the service manager, returns false if it never shows up.
    pub fn wait(&self) -> bool {
        self.role.wait(&self.ctx)
    }

    /// Handles one message to completion. `Break` ends the event loop.
    pub fn handle_message(&mut self, message: Message) -> ControlFlow<()> {
        let ctx = &mut self.ctx;
        match message {
            Message::BusRetry => {
                ctx.bus.on_retry();
            }
            Message::BusConnected => self.role.on_bus_connected(ctx),
            Message::Registration { peer, name } => self.role.on_registration(ctx, peer, &name),
            Message::RemoteDied { peer } => self.role.on_remote_died(ctx, peer),
            Message::ServiceManagerPresence(present) => self.role.on_presence(ctx, present),
            Message::ServiceAdded { name, status } => {
                return self.role.on_service_added(&name, status);
            }
            Message::Transaction(Transaction { target, call, reply }) => {
                let result = self.role.on_transaction(ctx, target, call);
                if reply.send(result).is_err() {
                    warn!("Caller went away before the reply");
                }
            }
            Message::Reconfigure(slots) => self.role.reconfigure(ctx, slots),
            Message::Shutdown => {
                debug!("Shutdown requested");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Runs the event loop until shutdown or until every sender is gone.
    pub async fn dispatch(&mut self, rx: &mut mpsc::UnboundedReceiver<Message>) {
        info!("starting event loop");
        while let Some(message) = rx.recv().await {
            if self.handle_message(message).is_break() {
                break;
            }
        }
    }

    /// Releases peers, handlers and local objects, stops the bus client and
    /// returns the process exit status.
    pub fn shutdown(mut self) -> i32 {
        self.role.shutdown(&mut self.ctx);
        self.ctx.bus.done();
        EXIT_OK
    }
}
