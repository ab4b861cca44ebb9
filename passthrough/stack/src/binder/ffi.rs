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

//! Raw bindings to the parts of libgbinder and GLib used by the backend.
//! Link flags come from `pkg-config` in the build script.

#![allow(non_camel_case_types)]

use core::ffi::{c_char, c_int, c_long, c_uint, c_ulong, c_void};

pub type gboolean = c_int;
pub type gulong = c_ulong;

pub const GBINDER_STATUS_OK: c_int = 0;
pub const GBINDER_STATUS_FAILED: c_int = 1;
pub const GBINDER_TX_FLAG_ONEWAY: c_uint = 0x01;
pub const G_SOURCE_REMOVE: gboolean = 0;

macro_rules! opaque {
    ($($name:ident),* $(,)?) => {
        $(
            #[repr(C)]
            pub struct $name {
                _private: [u8; 0],
            }
        )*
    };
}

opaque!(
    GBinderServiceManager,
    GBinderRemoteObject,
    GBinderLocalObject,
    GBinderRemoteRequest,
    GBinderLocalRequest,
    GBinderLocalReply,
    GBinderClient,
    GMainLoop,
    GMainContext,
);

/// `GBinderReader`, caller-allocated and initialised by libgbinder.
#[repr(C)]
#[allow(dead_code)]
pub struct GBinderReader {
    d: [*const c_void; 6],
}

impl GBinderReader {
    pub fn zeroed() -> Self {
        Self { d: [core::ptr::null(); 6] }
    }
}

/// `GBinderWriter`, caller-allocated and initialised by libgbinder.
#[repr(C)]
#[allow(dead_code)]
pub struct GBinderWriter {
    d: [*const c_void; 8],
}

impl GBinderWriter {
    pub fn zeroed() -> Self {
        Self { d: [core::ptr::null(); 8] }
    }
}

pub type GSourceFunc = unsafe extern "C" fn(user_data: *mut c_void) -> gboolean;
pub type GBinderServiceManagerFunc =
    unsafe extern "C" fn(sm: *mut GBinderServiceManager, user_data: *mut c_void);
pub type GBinderServiceManagerRegistrationFunc = unsafe extern "C" fn(
    sm: *mut GBinderServiceManager,
    name: *const c_char,
    user_data: *mut c_void,
);
pub type GBinderServiceManagerAddServiceFunc =
    unsafe extern "C" fn(sm: *mut GBinderServiceManager, status: c_int, user_data: *mut c_void);
pub type GBinderRemoteObjectNotifyFunc =
    unsafe extern "C" fn(obj: *mut GBinderRemoteObject, user_data: *mut c_void);
pub type GBinderLocalTransactFunc = unsafe extern "C" fn(
    obj: *mut GBinderLocalObject,
    req: *mut GBinderRemoteRequest,
    code: c_uint,
    flags: c_uint,
    status: *mut c_int,
    user_data: *mut c_void,
) -> *mut GBinderLocalReply;

extern "C" {
    pub fn gbinder_servicemanager_new(dev: *const c_char) -> *mut GBinderServiceManager;
    pub fn gbinder_servicemanager_unref(sm: *mut GBinderServiceManager);
    pub fn gbinder_servicemanager_is_present(sm: *mut GBinderServiceManager) -> gboolean;
    pub fn gbinder_servicemanager_wait(sm: *mut GBinderServiceManager, max_wait_ms: c_long)
        -> gboolean;
    pub fn gbinder_servicemanager_get_service_sync(
        sm: *mut GBinderServiceManager,
        name: *const c_char,
        status: *mut c_int,
    ) -> *mut GBinderRemoteObject;
    pub fn gbinder_servicemanager_add_registration_handler(
        sm: *mut GBinderServiceManager,
        name: *const c_char,
        func: GBinderServiceManagerRegistrationFunc,
        user_data: *mut c_void,
    ) -> gulong;
    pub fn gbinder_servicemanager_add_presence_handler(
        sm: *mut GBinderServiceManager,
        func: GBinderServiceManagerFunc,
        user_data: *mut c_void,
    ) -> gulong;
    pub fn gbinder_servicemanager_remove_handler(sm: *mut GBinderServiceManager, id: gulong);
    pub fn gbinder_servicemanager_new_local_object(
        sm: *mut GBinderServiceManager,
        iface: *const c_char,
        handler: GBinderLocalTransactFunc,
        user_data: *mut c_void,
    ) -> *mut GBinderLocalObject;
    pub fn gbinder_servicemanager_add_service(
        sm: *mut GBinderServiceManager,
        name: *const c_char,
        obj: *mut GBinderLocalObject,
        func: GBinderServiceManagerAddServiceFunc,
        user_data: *mut c_void,
    ) -> gulong;

    pub fn gbinder_remote_object_ref(obj: *mut GBinderRemoteObject) -> *mut GBinderRemoteObject;
    pub fn gbinder_remote_object_unref(obj: *mut GBinderRemoteObject);
    pub fn gbinder_remote_object_add_death_handler(
        obj: *mut GBinderRemoteObject,
        func: GBinderRemoteObjectNotifyFunc,
        user_data: *mut c_void,
    ) -> gulong;
    pub fn gbinder_remote_object_remove_handler(obj: *mut GBinderRemoteObject, id: gulong);

    pub fn gbinder_local_object_ref(obj: *mut GBinderLocalObject) -> *mut GBinderLocalObject;
    pub fn gbinder_local_object_unref(obj: *mut GBinderLocalObject);
    pub fn gbinder_local_object_drop(obj: *mut GBinderLocalObject);
    pub fn gbinder_local_object_new_reply(obj: *mut GBinderLocalObject) -> *mut GBinderLocalReply;
    pub fn gbinder_local_reply_append_int32(
        reply: *mut GBinderLocalReply,
        value: u32,
    ) -> *mut GBinderLocalReply;
    pub fn gbinder_local_reply_append_string8(
        reply: *mut GBinderLocalReply,
        s: *const c_char,
    ) -> *mut GBinderLocalReply;
    pub fn gbinder_local_reply_unref(reply: *mut GBinderLocalReply);
    pub fn gbinder_local_reply_init_writer(
        reply: *mut GBinderLocalReply,
        writer: *mut GBinderWriter,
    );
    pub fn gbinder_writer_append_int32(writer: *mut GBinderWriter, value: u32);
    pub fn gbinder_writer_strdup(writer: *mut GBinderWriter, s: *const c_char) -> *mut c_char;
    pub fn gbinder_writer_append_hidl_string(writer: *mut GBinderWriter, s: *const c_char);

    pub fn gbinder_remote_request_ref(req: *mut GBinderRemoteRequest) -> *mut GBinderRemoteRequest;
    pub fn gbinder_remote_request_unref(req: *mut GBinderRemoteRequest);
    pub fn gbinder_remote_request_block(req: *mut GBinderRemoteRequest);
    pub fn gbinder_remote_request_complete(
        req: *mut GBinderRemoteRequest,
        reply: *mut GBinderLocalReply,
        status: c_int,
    );
    pub fn gbinder_remote_request_interface(req: *mut GBinderRemoteRequest) -> *const c_char;
    pub fn gbinder_remote_request_init_reader(
        req: *mut GBinderRemoteRequest,
        reader: *mut GBinderReader,
    );
    pub fn gbinder_reader_read_int32(reader: *mut GBinderReader, value: *mut i32) -> gboolean;
    pub fn gbinder_reader_read_string8(reader: *mut GBinderReader) -> *const c_char;
    pub fn gbinder_reader_read_hidl_string_c(reader: *mut GBinderReader) -> *const c_char;

    pub fn gbinder_client_new(
        remote: *mut GBinderRemoteObject,
        iface: *const c_char,
    ) -> *mut GBinderClient;
    pub fn gbinder_client_unref(client: *mut GBinderClient);
    pub fn gbinder_client_new_request(client: *mut GBinderClient) -> *mut GBinderLocalRequest;
    pub fn gbinder_client_transact_sync_oneway(
        client: *mut GBinderClient,
        code: u32,
        req: *mut GBinderLocalRequest,
    ) -> c_int;
    pub fn gbinder_local_request_append_local_object(
        req: *mut GBinderLocalRequest,
        obj: *mut GBinderLocalObject,
    ) -> *mut GBinderLocalRequest;
    pub fn gbinder_local_request_unref(req: *mut GBinderLocalRequest);

    pub fn g_main_loop_new(context: *mut GMainContext, is_running: gboolean) -> *mut GMainLoop;
    pub fn g_main_loop_run(main_loop: *mut GMainLoop);
    pub fn g_main_loop_quit(main_loop: *mut GMainLoop);
    pub fn g_main_loop_unref(main_loop: *mut GMainLoop);
    pub fn g_main_context_invoke(
        context: *mut GMainContext,
        function: GSourceFunc,
        data: *mut c_void,
    );
}
