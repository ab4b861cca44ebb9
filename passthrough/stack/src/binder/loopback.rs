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

//! In-process service manager, standing in for the binder driver in tests.

use super::{
    DeathHandle, LocalHandle, LocalTarget, PeerId, RemoteHandle, ServiceManager, WatchHandle,
};
use crate::Message;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use tokio::sync::mpsc::UnboundedSender;

struct Inner {
    tx: UnboundedSender<Message>,
    present: bool,
    fail_add_service: bool,
    next_id: u64,
    /// Registered names and the object behind them.
    services: HashMap<String, u64>,
    /// Object names, alive or dead.
    objects: HashMap<u64, String>,
    /// Remote handles handed out, by object.
    handles: HashMap<u64, u64>,
    registration_handlers: HashMap<u64, (String, PeerId)>,
    presence_handlers: HashSet<u64>,
    death_handlers: HashMap<u64, (u64, PeerId)>,
    locals: HashMap<u64, (&'static str, LocalTarget)>,
    oneway: Vec<(String, String, u32)>,
    added: Vec<String>,
}

impl Inner {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Clone)]
pub(crate) struct Loopback {
    inner: Rc<RefCell<Inner>>,
}

impl Loopback {
    pub(crate) fn new(tx: UnboundedSender<Message>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                tx,
                present: true,
                fail_add_service: false,
                next_id: 0,
                services: HashMap::new(),
                objects: HashMap::new(),
                handles: HashMap::new(),
                registration_handlers: HashMap::new(),
                presence_handlers: HashSet::new(),
                death_handlers: HashMap::new(),
                locals: HashMap::new(),
                oneway: Vec::new(),
                added: Vec::new(),
            })),
        }
    }

    /// A remote process registers `name`.
    pub(crate) fn publish(&self, name: &str) {
        let mut inner = self.inner.borrow_mut();
        let object = inner.next_id();
        inner.objects.insert(object, name.to_string());
        inner.services.insert(name.to_string(), object);
        for (fqname, peer) in inner.registration_handlers.values() {
            if fqname == name {
                let message = Message::Registration { peer: *peer, name: name.to_string() };
                let _ = inner.tx.send(message);
            }
        }
    }

    /// The remote process behind `name` dies.
    pub(crate) fn kill(&self, name: &str) {
        let mut inner = self.inner.borrow_mut();
        let Some(object) = inner.services.remove(name) else {
            return;
        };
        for (dead, peer) in inner.death_handlers.values() {
            if *dead == object {
                let _ = inner.tx.send(Message::RemoteDied { peer: *peer });
            }
        }
    }

    /// The service manager restarts or goes away.
    pub(crate) fn set_present(&self, present: bool) {
        let mut inner = self.inner.borrow_mut();
        inner.present = present;
        if !present {
            inner.services.clear();
        }
        for _ in inner.presence_handlers.iter() {
            let _ = inner.tx.send(Message::ServiceManagerPresence(present));
        }
    }

    pub(crate) fn fail_add_service(&self, fail: bool) {
        self.inner.borrow_mut().fail_add_service = fail;
    }

    pub(crate) fn registration_handlers(&self, peer: PeerId) -> usize {
        self.inner.borrow().registration_handlers.values().filter(|(_, p)| *p == peer).count()
    }

    pub(crate) fn presence_handlers(&self) -> usize {
        self.inner.borrow().presence_handlers.len()
    }

    pub(crate) fn death_handlers(&self, peer: PeerId) -> usize {
        self.inner.borrow().death_handlers.values().filter(|(_, p)| *p == peer).count()
    }

    /// Remote handles not released yet.
    pub(crate) fn held_remotes(&self) -> usize {
        self.inner.borrow().handles.len()
    }

    pub(crate) fn local_objects(&self) -> usize {
        self.inner.borrow().locals.len()
    }

    /// One-way calls received by the objects registered as `name`, as
    /// `(interface, code)`.
    pub(crate) fn oneway_calls(&self, name: &str) -> Vec<(String, u32)> {
        let inner = self.inner.borrow();
        inner
            .oneway
            .iter()
            .filter(|(n, _, _)| n == name)
            .map(|(_, iface, code)| (iface.clone(), *code))
            .collect()
    }

    /// Services we added, in order.
    pub(crate) fn added_services(&self) -> Vec<String> {
        self.inner.borrow().added.clone()
    }
}

impl ServiceManager for Loopback {
    fn wait(&self) -> bool {
        self.inner.borrow().present
    }

    fn get_service(&self, fqname: &str) -> Option<RemoteHandle> {
        let mut inner = self.inner.borrow_mut();
        let object = *inner.services.get(fqname)?;
        let handle = inner.next_id();
        inner.handles.insert(handle, object);
        Some(RemoteHandle::from_raw(handle))
    }

    fn add_registration_handler(&self, fqname: &str, peer: PeerId) -> WatchHandle {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id();
        inner.registration_handlers.insert(id, (fqname.to_string(), peer));
        WatchHandle::from_raw(id)
    }

    fn add_presence_handler(&self) -> WatchHandle {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id();
        inner.presence_handlers.insert(id);
        WatchHandle::from_raw(id)
    }

    fn remove_handler(&self, handler: WatchHandle) {
        let mut inner = self.inner.borrow_mut();
        inner.registration_handlers.remove(&handler.raw());
        inner.presence_handlers.remove(&handler.raw());
    }

    fn add_death_handler(&self, remote: &RemoteHandle, peer: PeerId) -> DeathHandle {
        let mut inner = self.inner.borrow_mut();
        let object = inner.handles[&remote.raw()];
        let id = inner.next_id();
        inner.death_handlers.insert(id, (object, peer));
        DeathHandle::from_raw(id)
    }

    fn remove_death_handler(&self, _remote: &RemoteHandle, handler: DeathHandle) {
        self.inner.borrow_mut().death_handlers.remove(&handler.raw());
    }

    fn release_remote(&self, remote: RemoteHandle) {
        self.inner.borrow_mut().handles.remove(&remote.raw());
    }

    fn new_local_object(&self, iface: &'static str, target: LocalTarget) -> LocalHandle {
        let mut inner = self.inner.borrow_mut();
        let id = inner.next_id();
        inner.locals.insert(id, (iface, target));
        LocalHandle::from_raw(id)
    }

    fn drop_local_object(&self, local: LocalHandle) {
        self.inner.borrow_mut().locals.remove(&local.raw());
    }

    fn transact_oneway(
        &self,
        remote: &RemoteHandle,
        iface: &str,
        code: u32,
        _local: &LocalHandle,
    ) -> i32 {
        let mut inner = self.inner.borrow_mut();
        let object = inner.handles[&remote.raw()];
        let name = inner.objects[&object].clone();
        inner.oneway.push((name, iface.to_string(), code));
        0
    }

    fn add_service(&self, name: &str, _local: &LocalHandle) {
        let mut inner = self.inner.borrow_mut();
        inner.added.push(name.to_string());
        let status = if inner.fail_add_service { -1 } else { 0 };
        let _ = inner.tx.send(Message::ServiceAdded { name: name.to_string(), status });
    }
}
