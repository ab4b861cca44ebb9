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

//! libgbinder backend.
//!
//! libgbinder is driven by the default GLib main context, which runs on a
//! thread of its own. Every libgbinder call is made on that thread: the event
//! loop hands it over with `g_main_context_invoke()` and waits until it has
//! run. Notifications are posted back as [`Message`]s. Inbound transactions
//! are blocked and completed once the event loop has answered them, so the
//! loop thread itself never waits on the event loop.

use super::ffi;
use super::protocol::{self, ParcelReader, Reply};
use super::replier::{Pending, Replier};
use super::{
    DeathHandle, LocalHandle, LocalTarget, PeerId, RemoteHandle, ServiceManager, WatchHandle,
};
use crate::{Message, Transaction};
use core::ffi::{c_char, c_int, c_uint, c_void};
use log::{debug, error, warn};
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::ptr;
use std::sync::mpsc::{self, SyncSender};
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc::UnboundedSender, oneshot};

/// Main loop pointer moved to the loop thread.
struct MainLoop(*mut ffi::GMainLoop);

// SAFETY: g_main_loop_run() and g_main_loop_quit() may be called from any
//         thread, and the loop is only unreferenced after its thread is joined.
unsafe impl Send for MainLoop {}

/// `user_data` of registration and death handlers.
struct Notify {
    tx: UnboundedSender<Message>,
    peer: PeerId,
}

/// `user_data` of presence handlers.
struct Presence {
    tx: UnboundedSender<Message>,
}

/// `user_data` of local objects.
struct Local {
    tx: UnboundedSender<Message>,
    target: LocalTarget,
    iface: &'static str,
    binder_index: u32,
    replies: Option<mpsc::Sender<Pending<Blocked>>>,
}

/// `user_data` of a pending add_service, reclaimed by its completion.
struct AddService {
    tx: UnboundedSender<Message>,
    name: String,
}

/// Inbound request waiting for the event loop's answer. `req` is null for
/// one-way calls, which take no reply.
struct Blocked {
    obj: *mut ffi::GBinderLocalObject,
    req: *mut ffi::GBinderRemoteRequest,
}

// SAFETY: both pointers carry their own reference and are only dereferenced by
//         Blocked::complete(), on the loop thread.
unsafe impl Send for Blocked {}

impl Blocked {
    /// Sends `reply` and drops the references taken by on_transact().
    ///
    /// # Safety
    /// Runs on the loop thread.
    unsafe fn complete(self, reply: Reply) {
        if !self.req.is_null() {
            let (status, local) = encode_reply(self.obj, reply);
            ffi::gbinder_remote_request_complete(self.req, local, status);
            if !local.is_null() {
                ffi::gbinder_local_reply_unref(local);
            }
            ffi::gbinder_remote_request_unref(self.req);
        }
        ffi::gbinder_local_object_unref(self.obj);
    }
}

#[derive(Default)]
struct Tables {
    next_id: u64,
    remotes: HashMap<u64, *mut ffi::GBinderRemoteObject>,
    watches: HashMap<u64, ffi::gulong>,
    deaths: HashMap<u64, ffi::gulong>,
    locals: HashMap<u64, *mut ffi::GBinderLocalObject>,
    /// Handler data stays allocated until the loop thread is stopped, a
    /// notification may be in flight while its handler is removed.
    user_data: Vec<Box<dyn Any>>,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Keeps `data` alive and returns the pointer handed to libgbinder.
    fn retain<T: 'static>(&mut self, data: T) -> *mut c_void {
        let boxed = Box::new(data);
        let ptr = &*boxed as *const T as *mut c_void;
        self.user_data.push(boxed);
        ptr
    }
}

fn c_string(s: &str) -> CString {
    CString::new(s).unwrap_or_else(|_| {
        error!("Interior NUL in \"{}\"", s.escape_debug());
        CString::default()
    })
}

/// # Safety
/// `s` is null or a valid C string.
unsafe fn from_c_string(s: *const c_char) -> Option<String> {
    if s.is_null() {
        return None;
    }
    Some(CStr::from_ptr(s).to_string_lossy().into_owned())
}

fn post(tx: &UnboundedSender<Message>, message: Message) {
    if tx.send(message).is_err() {
        debug!("Event loop is gone, notification dropped");
    }
}

/// A call handed to the loop thread by [`run_on_loop`].
struct Call<'a> {
    f: Option<Box<dyn FnOnce() + 'a>>,
    done: Option<SyncSender<()>>,
}

/// Runs `f` on the thread owning the default main context and returns once it
/// has run.
fn run_on_loop<'a>(f: impl FnOnce() + 'a) {
    let (done, rx) = mpsc::sync_channel(1);
    let mut call = Call { f: Some(Box::new(f)), done: Some(done) };
    // SAFETY: the caller stays parked below until run_call() is done with
    //         `call`, so `f` and what it borrows are used by one thread at a time.
    unsafe {
        ffi::g_main_context_invoke(ptr::null_mut(), run_call, &mut call as *mut Call as *mut c_void)
    };
    if rx.recv().is_err() {
        error!("Binder loop dropped a call");
    }
}

unsafe extern "C" fn run_call(data: *mut c_void) -> ffi::gboolean {
    let call = &mut *(data as *mut Call);
    let done = call.done.take();
    if let Some(f) = call.f.take() {
        f();
    }
    if let Some(done) = done {
        let _ = done.send(());
    }
    ffi::G_SOURCE_REMOVE
}

type Detached = Box<dyn FnOnce() + Send>;

/// Queues `f` on the thread owning the default main context without waiting.
fn invoke_on_loop(f: Detached) {
    let data = Box::into_raw(Box::new(f));
    // SAFETY: ownership of `data` passes to run_detached().
    unsafe { ffi::g_main_context_invoke(ptr::null_mut(), run_detached, data as *mut c_void) };
}

unsafe extern "C" fn run_detached(data: *mut c_void) -> ffi::gboolean {
    let f = Box::from_raw(data as *mut Detached);
    f();
    ffi::G_SOURCE_REMOVE
}

pub struct GBinderServiceManager {
    sm: *mut ffi::GBinderServiceManager,
    tx: UnboundedSender<Message>,
    binder_index: u32,
    main_loop: *mut ffi::GMainLoop,
    thread: Option<JoinHandle<()>>,
    replier: Replier<Blocked>,
    tables: RefCell<Tables>,
}

impl GBinderServiceManager {
    pub fn new(device: &str, binder_index: u32, tx: UnboundedSender<Message>) -> Option<Self> {
        let replier = match Replier::spawn(|blocked: Blocked, reply| {
            // SAFETY: the closure runs on the loop thread.
            invoke_on_loop(Box::new(move || unsafe { blocked.complete(reply) }))
        }) {
            Ok(replier) => replier,
            Err(e) => {
                error!("Failed to start the binder replier: {}", e);
                return None;
            }
        };

        // Nothing runs the default context yet, libgbinder may be called here.
        let dev = c_string(device);
        // SAFETY: `dev` is a valid C string for the duration of the call.
        let sm = unsafe { ffi::gbinder_servicemanager_new(dev.as_ptr()) };
        if sm.is_null() {
            error!("Failed to get ServiceManager on {}", device);
            return None;
        }

        // SAFETY: a null context selects the default main context.
        let main_loop = unsafe { ffi::g_main_loop_new(ptr::null_mut(), 0) };
        let handle = MainLoop(main_loop);
        let thread = thread::Builder::new().name("gbinder".to_string()).spawn(move || {
            let handle = handle;
            // SAFETY: the loop outlives this thread, see Drop.
            unsafe { ffi::g_main_loop_run(handle.0) }
        });
        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                error!("Failed to start the binder loop: {}", e);
                // SAFETY: both objects were created above and are not shared.
                unsafe {
                    ffi::g_main_loop_unref(main_loop);
                    ffi::gbinder_servicemanager_unref(sm);
                }
                return None;
            }
        };

        debug!("Using {}", device);
        Some(Self {
            sm,
            tx,
            binder_index,
            main_loop,
            thread: Some(thread),
            replier,
            tables: RefCell::new(Tables::default()),
        })
    }
}

impl ServiceManager for GBinderServiceManager {
    fn wait(&self) -> bool {
        let sm = self.sm;
        let mut present = false;
        // SAFETY: `sm` is valid until drop.
        run_on_loop(|| present = unsafe { ffi::gbinder_servicemanager_wait(sm, -1) != 0 });
        present
    }

    fn get_service(&self, fqname: &str) -> Option<RemoteHandle> {
        let sm = self.sm;
        let name = c_string(fqname);
        let mut status: c_int = 0;
        let mut remote = ptr::null_mut();
        // SAFETY: `sm` is valid until drop, `name` outlives the call. The
        //         returned object is auto-released, take our own reference.
        run_on_loop(|| unsafe {
            remote = ffi::gbinder_servicemanager_get_service_sync(sm, name.as_ptr(), &mut status);
            if !remote.is_null() {
                ffi::gbinder_remote_object_ref(remote);
            }
        });
        if remote.is_null() {
            debug!("{} not found ({})", fqname, status);
            return None;
        }

        let mut tables = self.tables.borrow_mut();
        let id = tables.next_id();
        tables.remotes.insert(id, remote);
        Some(RemoteHandle::from_raw(id))
    }

    fn add_registration_handler(&self, fqname: &str, peer: PeerId) -> WatchHandle {
        let sm = self.sm;
        let name = c_string(fqname);
        let mut tables = self.tables.borrow_mut();
        let data = tables.retain(Notify { tx: self.tx.clone(), peer });
        let mut handler = 0;
        // SAFETY: `data` lives until the loop thread is stopped.
        run_on_loop(|| unsafe {
            handler = ffi::gbinder_servicemanager_add_registration_handler(
                sm,
                name.as_ptr(),
                on_registration,
                data,
            )
        });
        let id = tables.next_id();
        tables.watches.insert(id, handler);
        WatchHandle::from_raw(id)
    }

    fn add_presence_handler(&self) -> WatchHandle {
        let sm = self.sm;
        let mut tables = self.tables.borrow_mut();
        let data = tables.retain(Presence { tx: self.tx.clone() });
        let mut handler = 0;
        // SAFETY: `data` lives until the loop thread is stopped.
        run_on_loop(|| unsafe {
            handler = ffi::gbinder_servicemanager_add_presence_handler(sm, on_presence, data)
        });
        let id = tables.next_id();
        tables.watches.insert(id, handler);
        WatchHandle::from_raw(id)
    }

    fn remove_handler(&self, handler: WatchHandle) {
        let sm = self.sm;
        if let Some(id) = self.tables.borrow_mut().watches.remove(&handler.raw()) {
            // SAFETY: `id` was returned by libgbinder for `sm`.
            run_on_loop(|| unsafe { ffi::gbinder_servicemanager_remove_handler(sm, id) });
        }
    }

    fn add_death_handler(&self, remote: &RemoteHandle, peer: PeerId) -> DeathHandle {
        let mut tables = self.tables.borrow_mut();
        let id = tables.next_id();
        let Some(&obj) = tables.remotes.get(&remote.raw()) else {
            warn!("Death handler for a released remote object");
            return DeathHandle::from_raw(id);
        };
        let data = tables.retain(Notify { tx: self.tx.clone(), peer });
        let mut handler = 0;
        // SAFETY: `obj` holds our reference, `data` lives until the loop
        //         thread is stopped.
        run_on_loop(|| unsafe {
            handler = ffi::gbinder_remote_object_add_death_handler(obj, on_death, data)
        });
        tables.deaths.insert(id, handler);
        DeathHandle::from_raw(id)
    }

    fn remove_death_handler(&self, remote: &RemoteHandle, handler: DeathHandle) {
        let mut tables = self.tables.borrow_mut();
        let Some(id) = tables.deaths.remove(&handler.raw()) else {
            return;
        };
        if let Some(&obj) = tables.remotes.get(&remote.raw()) {
            // SAFETY: `id` was returned by libgbinder for `obj`.
            run_on_loop(|| unsafe { ffi::gbinder_remote_object_remove_handler(obj, id) });
        }
    }

    fn release_remote(&self, remote: RemoteHandle) {
        if let Some(obj) = self.tables.borrow_mut().remotes.remove(&remote.raw()) {
            // SAFETY: drops the reference taken in get_service().
            run_on_loop(|| unsafe { ffi::gbinder_remote_object_unref(obj) });
        }
    }

    fn new_local_object(&self, iface: &'static str, target: LocalTarget) -> LocalHandle {
        let sm = self.sm;
        let name = c_string(iface);
        let mut tables = self.tables.borrow_mut();
        let data = tables.retain(Local {
            tx: self.tx.clone(),
            target,
            iface,
            binder_index: self.binder_index,
            replies: self.replier.sender(),
        });
        let mut obj = ptr::null_mut();
        // SAFETY: `data` lives until the loop thread is stopped.
        run_on_loop(|| unsafe {
            obj = ffi::gbinder_servicemanager_new_local_object(sm, name.as_ptr(), on_transact, data)
        });
        let id = tables.next_id();
        tables.locals.insert(id, obj);
        LocalHandle::from_raw(id)
    }

    fn drop_local_object(&self, local: LocalHandle) {
        if let Some(obj) = self.tables.borrow_mut().locals.remove(&local.raw()) {
            // SAFETY: `obj` was created by new_local_object() and not dropped yet.
            run_on_loop(|| unsafe { ffi::gbinder_local_object_drop(obj) });
        }
    }

    fn transact_oneway(
        &self,
        remote: &RemoteHandle,
        iface: &str,
        code: u32,
        local: &LocalHandle,
    ) -> i32 {
        let tables = self.tables.borrow();
        let (Some(&obj), Some(&local)) =
            (tables.remotes.get(&remote.raw()), tables.locals.get(&local.raw()))
        else {
            return ffi::GBINDER_STATUS_FAILED;
        };
        let iface = c_string(iface);

        let mut status = ffi::GBINDER_STATUS_FAILED;
        // SAFETY: `obj` and `local` are alive, the client and request are
        //         released before returning.
        run_on_loop(|| unsafe {
            let client = ffi::gbinder_client_new(obj, iface.as_ptr());
            if client.is_null() {
                return;
            }
            let req = ffi::gbinder_client_new_request(client);
            ffi::gbinder_local_request_append_local_object(req, local);
            status = ffi::gbinder_client_transact_sync_oneway(client, code, req);
            ffi::gbinder_local_request_unref(req);
            ffi::gbinder_client_unref(client);
        });
        status
    }

    fn add_service(&self, name: &str, local: &LocalHandle) {
        let Some(&obj) = self.tables.borrow().locals.get(&local.raw()) else {
            post(
                &self.tx,
                Message::ServiceAdded {
                    name: name.to_string(),
                    status: ffi::GBINDER_STATUS_FAILED,
                },
            );
            return;
        };
        let sm = self.sm;
        let c_name = c_string(name);
        let data = AddService { tx: self.tx.clone(), name: name.to_string() };
        let data = Box::into_raw(Box::new(data));
        // SAFETY: ownership of `data` passes to on_service_added().
        run_on_loop(|| unsafe {
            ffi::gbinder_servicemanager_add_service(
                sm,
                c_name.as_ptr(),
                obj,
                on_service_added,
                data as *mut c_void,
            );
        });
    }
}

impl Drop for GBinderServiceManager {
    fn drop(&mut self) {
        let sm = self.sm;
        let tables = self.tables.get_mut();
        let watches: Vec<_> = tables.watches.drain().map(|(_, id)| id).collect();
        let locals: Vec<_> = tables.locals.drain().map(|(_, obj)| obj).collect();
        let remotes: Vec<_> = tables.remotes.drain().map(|(_, obj)| obj).collect();
        // SAFETY: every pointer below was obtained from libgbinder and not
        //         released yet.
        run_on_loop(|| unsafe {
            for id in watches {
                ffi::gbinder_servicemanager_remove_handler(sm, id);
            }
            for obj in locals {
                ffi::gbinder_local_object_drop(obj);
            }
            for obj in remotes {
                ffi::gbinder_remote_object_unref(obj);
            }
        });

        // SAFETY: the loop is valid until unreferenced below.
        unsafe { ffi::g_main_loop_quit(self.main_loop) };
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Binder loop thread panicked");
            }
        }

        // Blocked requests still complete, on the replier thread now that
        // nothing owns the default context.
        tables.user_data.clear();
        self.replier.stop();

        // SAFETY: no thread calls into libgbinder anymore.
        unsafe {
            ffi::gbinder_servicemanager_unref(self.sm);
            ffi::g_main_loop_unref(self.main_loop);
        }
    }
}

extern "C" fn on_registration(
    _sm: *mut ffi::GBinderServiceManager,
    name: *const c_char,
    user_data: *mut c_void,
) {
    // SAFETY: `user_data` is a retained Notify, `name` is null or a C string.
    let (data, name) = unsafe { (&*(user_data as *const Notify), from_c_string(name)) };
    if let Some(name) = name {
        post(&data.tx, Message::Registration { peer: data.peer, name });
    }
}

extern "C" fn on_presence(sm: *mut ffi::GBinderServiceManager, user_data: *mut c_void) {
    // SAFETY: `user_data` is a retained Presence, `sm` is the notifying manager.
    let (data, present) = unsafe {
        (&*(user_data as *const Presence), ffi::gbinder_servicemanager_is_present(sm))
    };
    post(&data.tx, Message::ServiceManagerPresence(present != 0));
}

extern "C" fn on_death(_obj: *mut ffi::GBinderRemoteObject, user_data: *mut c_void) {
    // SAFETY: `user_data` is a retained Notify.
    let data = unsafe { &*(user_data as *const Notify) };
    post(&data.tx, Message::RemoteDied { peer: data.peer });
}

extern "C" fn on_service_added(
    _sm: *mut ffi::GBinderServiceManager,
    status: c_int,
    user_data: *mut c_void,
) {
    // SAFETY: `user_data` was leaked by add_service() for this completion.
    let data = unsafe { Box::from_raw(user_data as *mut AddService) };
    post(&data.tx, Message::ServiceAdded { name: data.name, status });
}

/// Reads from a transaction parcel.
struct RequestReader(ffi::GBinderReader);

impl ParcelReader for RequestReader {
    fn read_i32(&mut self) -> Option<i32> {
        let mut value = 0;
        // SAFETY: the reader was initialised from a live request.
        let ok = unsafe { ffi::gbinder_reader_read_int32(&mut self.0, &mut value) };
        (ok != 0).then_some(value)
    }

    fn read_string8(&mut self) -> Option<String> {
        // SAFETY: the reader was initialised from a live request.
        unsafe { from_c_string(ffi::gbinder_reader_read_string8(&mut self.0)) }
    }

    fn read_hidl_string(&mut self) -> Option<String> {
        // SAFETY: the reader was initialised from a live request.
        unsafe { from_c_string(ffi::gbinder_reader_read_hidl_string_c(&mut self.0)) }
    }
}

extern "C" fn on_transact(
    obj: *mut ffi::GBinderLocalObject,
    req: *mut ffi::GBinderRemoteRequest,
    code: c_uint,
    flags: c_uint,
    status: *mut c_int,
    user_data: *mut c_void,
) -> *mut ffi::GBinderLocalReply {
    // SAFETY: `user_data` is a retained Local, `req` is valid during the call.
    let (data, iface, mut reader) = unsafe {
        let mut reader = RequestReader(ffi::GBinderReader::zeroed());
        ffi::gbinder_remote_request_init_reader(req, &mut reader.0);
        (
            &*(user_data as *const Local),
            from_c_string(ffi::gbinder_remote_request_interface(req)).unwrap_or_default(),
            reader,
        )
    };
    let set_status = |code: c_int| {
        if !status.is_null() {
            // SAFETY: `status` points to libgbinder's status slot for this call.
            unsafe { *status = code };
        }
    };

    let Some(replies) = &data.replies else {
        set_status(ffi::GBINDER_STATUS_FAILED);
        return ptr::null_mut();
    };

    let call = protocol::decode(data.iface, &iface, code, data.binder_index, &mut reader);
    let (reply, rx) = oneshot::channel();
    let transaction = Transaction { target: data.target, call, reply };
    if data.tx.send(Message::Transaction(transaction)).is_err() {
        set_status(ffi::GBINDER_STATUS_FAILED);
        return ptr::null_mut();
    }

    let oneway = flags & ffi::GBINDER_TX_FLAG_ONEWAY != 0;
    // SAFETY: `obj` and `req` are alive during the call; the references taken
    //         here are dropped by Blocked::complete().
    let blocked = unsafe {
        ffi::gbinder_local_object_ref(obj);
        if oneway {
            Blocked { obj, req: ptr::null_mut() }
        } else {
            ffi::gbinder_remote_request_ref(req);
            ffi::gbinder_remote_request_block(req);
            Blocked { obj, req }
        }
    };
    if let Err(mpsc::SendError(pending)) = replies.send(Pending { request: blocked, reply: rx }) {
        warn!("Replier is gone, failing the transaction");
        // SAFETY: we are on the loop thread.
        unsafe { pending.request.complete(Reply::Failed) };
    }
    set_status(ffi::GBINDER_STATUS_OK);
    ptr::null_mut()
}

/// # Safety
/// `obj` is a live local object.
unsafe fn encode_reply(
    obj: *mut ffi::GBinderLocalObject,
    reply: Reply,
) -> (c_int, *mut ffi::GBinderLocalReply) {
    let local = match reply {
        Reply::None => return (ffi::GBINDER_STATUS_OK, ptr::null_mut()),
        Reply::Failed => return (ffi::GBINDER_STATUS_FAILED, ptr::null_mut()),
        _ => ffi::gbinder_local_object_new_reply(obj),
    };

    let mut writer = ffi::GBinderWriter::zeroed();
    match reply {
        Reply::Int32(value) => {
            ffi::gbinder_local_reply_append_int32(local, value as u32);
        }
        Reply::String8(value) => {
            let value = c_string(&value);
            ffi::gbinder_local_reply_append_string8(local, value.as_ptr());
        }
        Reply::HidlString(value) => {
            let value = c_string(&value);
            ffi::gbinder_local_reply_init_writer(local, &mut writer);
            ffi::gbinder_writer_append_int32(&mut writer, protocol::STATUS_OK as u32);
            let copy = ffi::gbinder_writer_strdup(&mut writer, value.as_ptr());
            ffi::gbinder_writer_append_hidl_string(&mut writer, copy);
        }
        Reply::HidlInt32(value) => {
            ffi::gbinder_local_reply_init_writer(local, &mut writer);
            ffi::gbinder_writer_append_int32(&mut writer, protocol::STATUS_OK as u32);
            ffi::gbinder_writer_append_int32(&mut writer, value as u32);
        }
        Reply::None | Reply::Failed => {}
    }
    (ffi::GBINDER_STATUS_OK, local)
}
