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

//! Client role: attach to the IQcRilAudio service of every configured modem
//! slot and relay the calls it makes on our callback object.

use crate::binder::protocol::{
    qcril_audio_fqname, InboundCall, Reply, QCRIL_AUDIO_CALLBACK_IFACE, QCRIL_AUDIO_IFACE,
    QCRIL_AUDIO_SET_CALLBACK,
};
use crate::binder::{LocalTarget, PeerId};
use crate::error::ConfigError;
use crate::peer::{Attach, CallbackRegistration, Peer};
use crate::relay::{relay, Origin, RelayCall};
use crate::slots::{Slot, SlotSource};
use crate::Context;
use log::{debug, error};

const QCRIL_AUDIO_CALLBACK: CallbackRegistration = CallbackRegistration {
    remote_iface: QCRIL_AUDIO_IFACE,
    local_iface: QCRIL_AUDIO_CALLBACK_IFACE,
    code: QCRIL_AUDIO_SET_CALLBACK,
};

/// A peer together with the slot it was created for.
struct SlotPeer {
    slot: Slot,
    peer: Peer,
}

pub struct ClientRole {
    peers: Vec<SlotPeer>,
    next_id: u64,
    bus_up: bool,
}

impl ClientRole {
    pub(super) fn init(ctx: &mut Context, source: &dyn SlotSource) -> Result<Self, ConfigError> {
        let slots = source.slots();
        if slots.is_empty() {
            return Err(ConfigError::NoSlots);
        }

        let mut client = Self { peers: Vec::new(), next_id: 0, bus_up: false };
        for slot in slots {
            let peer = client.new_peer(&slot);
            client.peers.push(SlotPeer { slot, peer });
        }
        ctx.bus.connect();
        Ok(client)
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter().map(|p| &p.peer)
    }

    fn new_peer(&mut self, slot: &Slot) -> Peer {
        self.next_id += 1;
        Peer::new(
            PeerId(self.next_id),
            &slot.label,
            &qcril_audio_fqname(&slot.label),
            Some(QCRIL_AUDIO_CALLBACK),
        )
    }

    fn peer_mut(&mut self, id: PeerId) -> Option<&mut Peer> {
        self.peers.iter_mut().map(|p| &mut p.peer).find(|p| p.id() == id)
    }

    fn attach(ctx: &Context, peer: &mut Peer) {
        match peer.attach(&*ctx.sm) {
            Ok(Attach::Attached) | Ok(Attach::Watching) => {}
            Err(e) => error!("{}", e),
        }
    }

    pub(super) fn on_bus_connected(&mut self, ctx: &mut Context) {
        debug!("DBus up, connect clients");
        self.bus_up = true;
        for entry in self.peers.iter_mut() {
            Self::attach(ctx, &mut entry.peer);
        }
    }

    pub(super) fn on_registration(&mut self, ctx: &mut Context, id: PeerId, name: &str) {
        match self.peer_mut(id) {
            Some(peer) => peer.on_registered(&*ctx.sm, name),
            None => debug!("{} appeared", name),
        }
    }

    pub(super) fn on_remote_died(&mut self, ctx: &mut Context, id: PeerId) {
        if let Some(peer) = self.peer_mut(id) {
            peer.on_died(&*ctx.sm);
        }
    }

    /// Replaces the peers of the labels in `slots` whose transport changed.
    /// Unchanged and unlisted labels are left alone.
    pub(super) fn reconfigure(&mut self, ctx: &mut Context, slots: Vec<Slot>) {
        for slot in slots {
            if let Some(pos) = self.peers.iter().position(|p| p.slot.label == slot.label) {
                if self.peers[pos].slot == slot {
                    debug!("{} unchanged", self.peers[pos].peer.fqname());
                    continue;
                }
                let mut old = self.peers.remove(pos);
                debug!("Replacing {}", old.peer.fqname());
                old.peer.detach(&*ctx.sm);
            }

            let mut peer = self.new_peer(&slot);
            if self.bus_up {
                Self::attach(ctx, &mut peer);
            }
            self.peers.push(SlotPeer { slot, peer });
        }
    }

    pub(super) fn on_transaction(
        &mut self,
        ctx: &mut Context,
        target: LocalTarget,
        call: InboundCall,
    ) -> Reply {
        let LocalTarget::Peer(id) = target else {
            error!("Unexpected transaction target {:?}", target);
            return Reply::Failed;
        };
        let Some(slot) = self.peer_mut(id).map(|p| p.label().to_string()) else {
            error!("Transaction for a released callback object");
            return Reply::Failed;
        };

        match call {
            InboundCall::CallbackGetParameters { keys } => {
                relay(&RelayCall::get(Origin::Slot(slot), &keys), &mut ctx.bus)
            }
            InboundCall::CallbackSetParameters { key_value_pairs } => {
                relay(&RelayCall::set(Origin::Slot(slot), &key_value_pairs), &mut ctx.bus)
            }
            call => {
                error!("Unexpected callback {:?}", call);
                Reply::Failed
            }
        }
    }

    pub(super) fn shutdown(&mut self, ctx: &mut Context) {
        for mut entry in self.peers.drain(..) {
            entry.peer.detach(&*ctx.sm);
        }
    }
}
