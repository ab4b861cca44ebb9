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

//! Synchronous relay of parameter calls between the two transports.
//!
//! A [`RelayCall`] lives for the duration of one forwarded call. Transport
//! failures never leave this module: they are turned into the failure reply of
//! the transport the call came from.

use crate::binder::protocol::Reply;
use crate::bus::ParameterBus;
use log::{debug, error};

/// Status returned to the binder side for a failed `setParameters`.
pub const SET_FAILED: i32 = 1;

/// Where a relayed call came from, and how its reply must be shaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Inbound `IAudioFlinger` call (Server role).
    AudioFlinger { token: i32, io_handle: i32 },
    /// Call of the modem slot's `IQcRilAudio` service on our callback object
    /// (Client role).
    Slot(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Opaque key string, forwarded as is.
    Get { keys: String },
    /// Delimited `key=value` tokens, forwarded as is.
    Set { key_value_pairs: String },
}

/// One in-flight forwarded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayCall {
    pub origin: Origin,
    pub request: Request,
}

impl RelayCall {
    pub fn get(origin: Origin, keys: &str) -> Self {
        Self { origin, request: Request::Get { keys: keys.to_string() } }
    }

    pub fn set(origin: Origin, key_value_pairs: &str) -> Self {
        Self { origin, request: Request::Set { key_value_pairs: key_value_pairs.to_string() } }
    }
}

/// Forwards `keys` to the bus endpoint. `None` if the call failed.
pub fn forward_get(bus: &mut dyn ParameterBus, keys: &str) -> Option<String> {
    match bus.get_parameters(keys) {
        Ok(values) => Some(values),
        Err(e) => {
            error!("getParameters({}) not relayed: {}", keys, e);
            None
        }
    }
}

/// Forwards `key_value_pairs` to the bus endpoint. Returns 0 on success.
pub fn forward_set(bus: &mut dyn ParameterBus, key_value_pairs: &str) -> i32 {
    match bus.set_parameters(key_value_pairs) {
        Ok(()) => 0,
        Err(e) => {
            error!("setParameters({}) not relayed: {}", key_value_pairs, e);
            SET_FAILED
        }
    }
}

/// Relays `call` and builds the reply of its originating transport.
///
/// A failed get is answered with an empty string on IAudioFlinger and rejected
/// on IQcRilAudioCallback, matching what each caller expects.
pub fn relay(call: &RelayCall, bus: &mut dyn ParameterBus) -> Reply {
    match (&call.origin, &call.request) {
        (Origin::AudioFlinger { token, io_handle }, Request::Set { key_value_pairs }) => {
            debug!("({}) setParameters({}, \"{}\")", token, io_handle, key_value_pairs);
            Reply::Int32(forward_set(bus, key_value_pairs))
        }
        (Origin::AudioFlinger { token, io_handle }, Request::Get { keys }) => {
            let values = forward_get(bus, keys).unwrap_or_default();
            debug!("({}) getParameters({}, \"{}\"): \"{}\"", token, io_handle, keys, values);
            Reply::String8(values)
        }
        (Origin::Slot(slot), Request::Set { key_value_pairs }) => {
            debug!("IQcRilAudioCallback::setParameters {} {}", slot, key_value_pairs);
            Reply::HidlInt32(forward_set(bus, key_value_pairs))
        }
        (Origin::Slot(slot), Request::Get { keys }) => {
            debug!("IQcRilAudioCallback::getParameters {} {}", slot, keys);
            forward_get(bus, keys).map(Reply::HidlString).unwrap_or(Reply::Failed)
        }
    }
}
