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

//! Lifecycle of binder-style peers.
//!
//! A peer is either attached (remote handle + death handler) or watching (a
//! registration handler waiting for the name to show up), never both:
//!
//!   unattached --> watching <--> attached --(death)--> watching --> ... --> detached
//!
//! Absence of a peer is an expected state and never reported as an error.

use crate::binder::{
    DeathHandle, LocalHandle, LocalTarget, PeerId, RemoteHandle, ServiceManager, WatchHandle,
};
use crate::error::PeerError;
use log::debug;

/// Callback object a peer is told about once attached (Client role).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackRegistration {
    /// Interface of the remote object receiving the one-way registration call.
    pub remote_iface: &'static str,
    /// Interface implemented by our local callback object.
    pub local_iface: &'static str,
    /// Code of the one-way registration call.
    pub code: u32,
}

enum State {
    Unattached,
    Watching(WatchHandle),
    Attached { remote: RemoteHandle, death: DeathHandle },
    Detached,
}

/// Outcome of [`Peer::attach`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    Attached,
    Watching,
}

/// Observable state of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Unattached,
    Watching,
    Attached,
    Detached,
}

/// A binder-style remote endpoint.
pub struct Peer {
    id: PeerId,
    label: String,
    fqname: String,
    callback: Option<CallbackRegistration>,
    local: Option<LocalHandle>,
    state: State,
}

impl Peer {
    /// Creates an unattached peer for the instance `fqname`, labelled `label`.
    pub fn new(
        id: PeerId,
        label: &str,
        fqname: &str,
        callback: Option<CallbackRegistration>,
    ) -> Self {
        Self {
            id,
            label: label.to_string(),
            fqname: fqname.to_string(),
            callback,
            local: None,
            state: State::Unattached,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn fqname(&self) -> &str {
        &self.fqname
    }

    pub fn state(&self) -> PeerState {
        match self.state {
            State::Unattached => PeerState::Unattached,
            State::Watching(_) => PeerState::Watching,
            State::Attached { .. } => PeerState::Attached,
            State::Detached => PeerState::Detached,
        }
    }

    /// Resolves the peer and attaches to it, or starts watching for its
    /// registration if it is not around.
    pub fn attach(&mut self, sm: &dyn ServiceManager) -> Result<Attach, PeerError> {
        match self.state {
            State::Attached { .. } => return Err(PeerError::AlreadyAttached(self.fqname.clone())),
            State::Detached => return Err(PeerError::Detached(self.fqname.clone())),
            State::Unattached | State::Watching(_) => {}
        }

        let Some(remote) = sm.get_service(&self.fqname) else {
            if matches!(self.state, State::Unattached) {
                debug!("Waiting for {}", self.fqname);
                self.state = State::Watching(sm.add_registration_handler(&self.fqname, self.id));
            }
            return Ok(Attach::Watching);
        };

        debug!("Connected to {}", self.fqname);
        let death = sm.add_death_handler(&remote, self.id);
        if let Some(callback) = self.callback {
            let target = LocalTarget::Peer(self.id);
            let local = self
                .local
                .get_or_insert_with(|| sm.new_local_object(callback.local_iface, target));
            let status = sm.transact_oneway(&remote, callback.remote_iface, callback.code, local);
            debug!("setCallback {} status {}", self.label, status);
        }

        if let State::Watching(watch) =
            std::mem::replace(&mut self.state, State::Attached { remote, death })
        {
            sm.remove_handler(watch);
        }
        Ok(Attach::Attached)
    }

    /// Handles the death of the remote object. Spurious notifications while not
    /// attached are ignored.
    pub fn on_died(&mut self, sm: &dyn ServiceManager) {
        if !matches!(self.state, State::Attached { .. }) {
            debug!("{}: ignoring death notification", self.fqname);
            return;
        }

        debug!("{} has died", self.fqname);
        if let State::Attached { remote, death } =
            std::mem::replace(&mut self.state, State::Unattached)
        {
            sm.remove_death_handler(&remote, death);
            sm.release_remote(remote);
        }
        // Wait for it to re-appear
        self.state = State::Watching(sm.add_registration_handler(&self.fqname, self.id));
    }

    /// Handles the registration of `name` while watching.
    pub fn on_registered(&mut self, sm: &dyn ServiceManager, name: &str) {
        if name != self.fqname || !matches!(self.state, State::Watching(_)) {
            debug!("{} appeared", name);
            return;
        }

        if let Ok(Attach::Attached) = self.attach(sm) {
            debug!("{} has reanimated", self.fqname);
        }
    }

    /// Releases everything the peer holds. The peer cannot be attached again.
    pub fn detach(&mut self, sm: &dyn ServiceManager) {
        match std::mem::replace(&mut self.state, State::Detached) {
            State::Watching(watch) => sm.remove_handler(watch),
            State::Attached { remote, death } => {
                sm.remove_death_handler(&remote, death);
                sm.release_remote(remote);
            }
            State::Unattached | State::Detached => {}
        }
        if let Some(local) = self.local.take() {
            sm.drop_local_object(local);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::loopback::Loopback;
    use crate::binder::protocol::{
        qcril_audio_fqname, QCRIL_AUDIO_CALLBACK_IFACE, QCRIL_AUDIO_IFACE, QCRIL_AUDIO_SET_CALLBACK,
    };
    use crate::Message;
    use tokio::sync::mpsc;

    const CALLBACK: CallbackRegistration = CallbackRegistration {
        remote_iface: QCRIL_AUDIO_IFACE,
        local_iface: QCRIL_AUDIO_CALLBACK_IFACE,
        code: QCRIL_AUDIO_SET_CALLBACK,
    };

    fn setup() -> (Loopback, mpsc::UnboundedReceiver<Message>, Peer) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sm = Loopback::new(tx);
        let name = qcril_audio_fqname("slot1");
        (sm, rx, Peer::new(PeerId(1), "slot1", &name, Some(CALLBACK)))
    }

    fn deliver(sm: &Loopback, rx: &mut mpsc::UnboundedReceiver<Message>, peer: &mut Peer) {
        while let Ok(msg) = rx.try_recv() {
            match msg {
                Message::Registration { peer: id, name } if id == peer.id() => {
                    peer.on_registered(sm, &name)
                }
                Message::RemoteDied { peer: id } if id == peer.id() => peer.on_died(sm),
                _ => {}
            }
        }
    }

    #[test]
    fn attach_to_present_peer_registers_callback() {
        let (sm, _rx, mut peer) = setup();
        sm.publish(peer.fqname());

        assert_eq!(peer.attach(&sm), Ok(Attach::Attached));
        assert_eq!(peer.state(), PeerState::Attached);
        assert_eq!(sm.oneway_calls(peer.fqname()), vec![(QCRIL_AUDIO_IFACE.to_string(), 1)]);
        assert_eq!(sm.death_handlers(peer.id()), 1);
        assert_eq!(sm.registration_handlers(peer.id()), 0);
    }

    #[test]
    fn attach_to_absent_peer_watches() {
        let (sm, _rx, mut peer) = setup();

        assert_eq!(peer.attach(&sm), Ok(Attach::Watching));
        assert_eq!(peer.state(), PeerState::Watching);
        assert_eq!(sm.registration_handlers(peer.id()), 1);

        // Still absent: no second watch.
        assert_eq!(peer.attach(&sm), Ok(Attach::Watching));
        assert_eq!(sm.registration_handlers(peer.id()), 1);
    }

    #[test]
    fn attach_twice_is_rejected() {
        let (sm, _rx, mut peer) = setup();
        sm.publish(peer.fqname());

        assert_eq!(peer.attach(&sm), Ok(Attach::Attached));
        assert!(matches!(peer.attach(&sm), Err(PeerError::AlreadyAttached(_))));
        assert_eq!(sm.oneway_calls(peer.fqname()).len(), 1);
    }

    #[test]
    fn death_goes_back_to_watching() {
        let (sm, mut rx, mut peer) = setup();
        sm.publish(peer.fqname());
        peer.attach(&sm).unwrap();

        sm.kill(peer.fqname());
        deliver(&sm, &mut rx, &mut peer);

        assert_eq!(peer.state(), PeerState::Watching);
        assert_eq!(sm.registration_handlers(peer.id()), 1);
        assert_eq!(sm.death_handlers(peer.id()), 0);
        assert_eq!(sm.held_remotes(), 0);
    }

    #[test]
    fn repeated_death_notifications_are_ignored() {
        let (sm, mut rx, mut peer) = setup();
        sm.publish(peer.fqname());
        peer.attach(&sm).unwrap();
        sm.kill(peer.fqname());
        deliver(&sm, &mut rx, &mut peer);

        peer.on_died(&sm);
        peer.on_died(&sm);

        assert_eq!(peer.state(), PeerState::Watching);
        assert_eq!(sm.registration_handlers(peer.id()), 1);
    }

    #[test]
    fn registration_reattaches_and_reuses_callback_object() {
        let (sm, mut rx, mut peer) = setup();
        sm.publish(peer.fqname());
        peer.attach(&sm).unwrap();
        sm.kill(peer.fqname());
        deliver(&sm, &mut rx, &mut peer);

        sm.publish(peer.fqname());
        deliver(&sm, &mut rx, &mut peer);

        assert_eq!(peer.state(), PeerState::Attached);
        assert_eq!(sm.registration_handlers(peer.id()), 0);
        assert_eq!(sm.oneway_calls(peer.fqname()).len(), 2);
        assert_eq!(sm.local_objects(), 1);
    }

    #[test]
    fn lost_registration_race_keeps_watching() {
        let (sm, mut rx, mut peer) = setup();
        peer.attach(&sm).unwrap();

        // Registered and gone again before the notification is handled.
        sm.publish(peer.fqname());
        sm.kill(peer.fqname());
        deliver(&sm, &mut rx, &mut peer);
        assert_eq!(peer.state(), PeerState::Watching);
        assert_eq!(sm.registration_handlers(peer.id()), 1);

        sm.publish(peer.fqname());
        deliver(&sm, &mut rx, &mut peer);
        assert_eq!(peer.state(), PeerState::Attached);
    }

    #[test]
    fn other_names_do_not_attach() {
        let (sm, mut rx, mut peer) = setup();
        peer.attach(&sm).unwrap();

        peer.on_registered(&sm, &qcril_audio_fqname("slot2"));
        assert_eq!(peer.state(), PeerState::Watching);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn detach_releases_everything() {
        let (sm, _rx, mut peer) = setup();
        sm.publish(peer.fqname());
        peer.attach(&sm).unwrap();

        peer.detach(&sm);
        assert_eq!(peer.state(), PeerState::Detached);
        assert_eq!(sm.death_handlers(peer.id()), 0);
        assert_eq!(sm.held_remotes(), 0);
        assert_eq!(sm.local_objects(), 0);

        peer.detach(&sm);
        assert_eq!(peer.state(), PeerState::Detached);
        assert!(matches!(peer.attach(&sm), Err(PeerError::Detached(_))));
    }

    #[test]
    fn detach_cancels_watch() {
        let (sm, _rx, mut peer) = setup();
        peer.attach(&sm).unwrap();

        peer.detach(&sm);
        assert_eq!(sm.registration_handlers(peer.id()), 0);
    }

    #[test]
    fn peer_without_callback_only_attaches() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let sm = Loopback::new(tx);
        let name = "android.hardware.foo@1.0::IFoo/default";
        let mut peer = Peer::new(PeerId(7), "default", name, None);
        sm.publish(peer.fqname());

        assert_eq!(peer.attach(&sm), Ok(Attach::Attached));
        assert!(sm.oneway_calls(peer.fqname()).is_empty());
        assert_eq!(sm.local_objects(), 0);
    }
}
