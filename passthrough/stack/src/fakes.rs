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

//! Test doubles for the bus endpoint.

use crate::bus::{BusLink, Dialer, ParameterBus, METHOD_GET_PARAMETERS, METHOD_SET_PARAMETERS};
use crate::error::BusError;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct StoreState {
    values: BTreeMap<String, String>,
    calls: Vec<(&'static str, String)>,
    fail: bool,
    connected: bool,
}

/// Bus endpoint keeping parameters in memory, like the audio server's
/// hardware parameter accessors would.
#[derive(Clone)]
pub(crate) struct ParameterStore {
    state: Arc<Mutex<StoreState>>,
}

impl ParameterStore {
    pub(crate) fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                values: BTreeMap::new(),
                calls: Vec::new(),
                fail: false,
                connected: true,
            })),
        }
    }

    pub(crate) fn set(&self, key: &str, value: &str) {
        self.state.lock().unwrap().values.insert(key.to_string(), value.to_string());
    }

    pub(crate) fn get(&self, key: &str) -> Option<String> {
        self.state.lock().unwrap().values.get(key).cloned()
    }

    /// Calls received so far, as `(method, argument)`.
    pub(crate) fn calls(&self) -> Vec<(&'static str, String)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn fail_calls(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }

    pub(crate) fn disconnect(&self) {
        self.state.lock().unwrap().connected = false;
    }

    pub(crate) fn reconnect(&self) {
        self.state.lock().unwrap().connected = true;
    }

    fn handle(&self, method: &'static str, arg: &str) -> Result<Option<String>, BusError> {
        let mut state = self.state.lock().unwrap();
        if !state.connected {
            return Err(BusError::Remote { method, reason: "Disconnected".into() });
        }
        state.calls.push((method, arg.to_string()));
        if state.fail {
            return Err(BusError::Remote { method, reason: "Rejected".into() });
        }

        match method {
            METHOD_SET_PARAMETERS => {
                let tokens = arg.split(|c: char| c == ';' || c == ' ');
                for (key, value) in tokens.filter_map(|t| t.split_once('=')) {
                    state.values.insert(key.to_string(), value.to_string());
                }
                Ok(None)
            }
            METHOD_GET_PARAMETERS => {
                let pairs: Vec<String> = arg
                    .split(|c: char| c == ',' || c == ';' || c == ' ')
                    .filter_map(|key| state.values.get(key).map(|v| format!("{}={}", key, v)))
                    .collect();
                Ok(Some(pairs.join(";")))
            }
            _ => Err(BusError::Remote { method, reason: "Unknown method".into() }),
        }
    }
}

impl ParameterBus for ParameterStore {
    fn get_parameters(&mut self, keys: &str) -> Result<String, BusError> {
        Ok(self.handle(METHOD_GET_PARAMETERS, keys)?.unwrap_or_default())
    }

    fn set_parameters(&mut self, key_value_pairs: &str) -> Result<(), BusError> {
        self.handle(METHOD_SET_PARAMETERS, key_value_pairs).map(|_| ())
    }
}

struct StoreLink(ParameterStore);

impl BusLink for StoreLink {
    fn call(&self, method: &'static str, arg: &str) -> Result<Option<String>, BusError> {
        self.0.handle(method, arg)
    }

    fn is_connected(&self) -> bool {
        self.0.state.lock().unwrap().connected
    }
}

/// Dials a [`ParameterStore`] once it is made reachable.
#[derive(Clone)]
pub(crate) struct FakeDialer {
    store: ParameterStore,
    reachable: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl FakeDialer {
    pub(crate) fn new(store: &ParameterStore) -> Self {
        Self {
            store: store.clone(),
            reachable: Arc::new(AtomicBool::new(false)),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Dialer for FakeDialer {
    fn dial(&self, _address: &str) -> Result<Box<dyn BusLink>, String> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.reachable.load(Ordering::SeqCst) {
            Ok(Box::new(StoreLink(self.store.clone())))
        } else {
            Err("Connection refused".to_string())
        }
    }
}
