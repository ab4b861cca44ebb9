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

//! Server role: present ourselves as `media.audio_flinger` and relay the
//! parameter calls made on it to the bus endpoint.

use crate::binder::protocol::{
    audio_flinger_code, InboundCall, Reply, AUDIO_FLINGER_IFACE, AUDIO_FLINGER_SERVICE,
    QCRIL_AUDIO_CALLBACK_IFACE,
};
use crate::binder::{LocalHandle, LocalTarget, WatchHandle};
use crate::config::Config;
use crate::relay::{relay, Origin, RelayCall};
use crate::Context;
use log::{debug, error};
use std::ops::ControlFlow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Unregistered,
    Pending,
    Registered,
}

pub struct ServerRole {
    local: Option<LocalHandle>,
    presence: Option<WatchHandle>,
    registration: Registration,
    bus_up: bool,
}

impl ServerRole {
    pub(super) fn init(config: &Config, ctx: &mut Context) -> Self {
        debug!(
            "{}::setParameters is transaction {}",
            AUDIO_FLINGER_IFACE,
            audio_flinger_code(config.binder_index, 0)
        );
        let local = ctx.sm.new_local_object(AUDIO_FLINGER_IFACE, LocalTarget::Service);
        let presence = ctx.sm.add_presence_handler();
        ctx.bus.connect();
        Self {
            local: Some(local),
            presence: Some(presence),
            registration: Registration::Unregistered,
            bus_up: false,
        }
    }

    pub fn registration(&self) -> Registration {
        self.registration
    }

    fn register(&mut self, ctx: &mut Context) {
        if let Some(local) = &self.local {
            ctx.sm.add_service(AUDIO_FLINGER_SERVICE, local);
            self.registration = Registration::Pending;
        }
    }

    pub(super) fn on_bus_connected(&mut self, ctx: &mut Context) {
        debug!("DBus up, connect service");
        self.bus_up = true;
        self.register(ctx);
    }

    pub(super) fn on_presence(&mut self, ctx: &mut Context, present: bool) {
        if !present {
            debug!("Service manager has died.");
            self.registration = Registration::Unregistered;
            return;
        }

        debug!("Service manager has reappeared.");
        if self.bus_up {
            self.register(ctx);
        }
    }

    pub(super) fn on_service_added(&mut self, name: &str, status: i32) -> ControlFlow<()> {
        if name != AUDIO_FLINGER_SERVICE {
            return ControlFlow::Continue(());
        }
        if status != 0 {
            error!("Failed to add {} ({})", name, status);
            self.registration = Registration::Unregistered;
            return ControlFlow::Break(());
        }
        debug!("Added {}", name);
        self.registration = Registration::Registered;
        ControlFlow::Continue(())
    }

    pub(super) fn on_transaction(
        &mut self,
        ctx: &mut Context,
        target: LocalTarget,
        call: InboundCall,
    ) -> Reply {
        if target != LocalTarget::Service {
            error!("Unexpected transaction target {:?}", target);
            return Reply::Failed;
        }

        match call {
            InboundCall::SetParameters { token, io_handle, key_value_pairs } => relay(
                &RelayCall::set(Origin::AudioFlinger { token, io_handle }, &key_value_pairs),
                &mut ctx.bus,
            ),
            InboundCall::GetParameters { token, io_handle, keys } => {
                let origin = Origin::AudioFlinger { token, io_handle };
                relay(&RelayCall::get(origin, &keys), &mut ctx.bus)
            }
            InboundCall::RegisterClient => {
                debug!("register client");
                Reply::None
            }
            InboundCall::UnknownCode { code } => {
                error!("Unknown code ({})", code);
                Reply::None
            }
            InboundCall::Unsupported { iface, code } => {
                error!("Unexpected interface \"{}\" ({})", iface, code);
                Reply::Failed
            }
            InboundCall::CallbackGetParameters { .. }
            | InboundCall::CallbackSetParameters { .. } => {
                error!("Unexpected interface \"{}\"", QCRIL_AUDIO_CALLBACK_IFACE);
                Reply::Failed
            }
        }
    }

    pub(super) fn shutdown(&mut self, ctx: &mut Context) {
        if let Some(presence) = self.presence.take() {
            ctx.sm.remove_handler(presence);
        }
        if let Some(local) = self.local.take() {
            ctx.sm.drop_local_object(local);
        }
        self.registration = Registration::Unregistered;
    }
}
