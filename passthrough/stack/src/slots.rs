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

//! Modem slot discovery from the oFono RIL subscription files.
//!
//! Each `[ril_N]` section whose `transport` is `binder:name=<slot>` names the
//! IQcRilAudio instance of a slot.

use configparser::ini::Ini;
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

pub const RIL_SUBSCRIPTION_CONF: &str = "/etc/ofono/ril_subscription.conf";
pub const RIL_SUBSCRIPTION_D: &str = "/etc/ofono/ril_subscription.d";
const RIL_SLOTS_MAX: usize = 4;

const TRANSPORT_KEY: &str = "transport";
const BINDER_TRANSPORT: &str = "binder:name";

/// One configured slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    /// Instance label, e.g. `slot1`.
    pub label: String,
    /// Transport descriptor the label was taken from.
    pub transport: String,
}

/// Produces the list of slots the Client role attaches to.
pub trait SlotSource {
    fn slots(&self) -> Vec<Slot>;
}

impl SlotSource for Vec<Slot> {
    fn slots(&self) -> Vec<Slot> {
        self.clone()
    }
}

/// Slots with unique labels; a newer entry replaces the older one and moves
/// to the end.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SlotTable {
    slots: Vec<Slot>,
}

impl SlotTable {
    pub fn insert(&mut self, slot: Slot) {
        self.slots.retain(|s| s.label != slot.label);
        self.slots.push(slot);
    }

    pub fn into_vec(self) -> Vec<Slot> {
        self.slots
    }
}

/// Extracts the slot label of a `binder:name=<label>` transport.
pub fn parse_transport(transport: &str) -> Option<Slot> {
    if !transport.starts_with(BINDER_TRANSPORT) {
        return None;
    }
    let (_, label) = transport.rsplit_once('=')?;
    if label.is_empty() {
        return None;
    }
    Some(Slot { label: label.to_string(), transport: transport.to_string() })
}

/// oFono RIL subscription configuration: one main file and a drop-in
/// directory of `*.conf` files read in name order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RilSubscription {
    pub conf: PathBuf,
    pub conf_dir: PathBuf,
}

impl Default for RilSubscription {
    fn default() -> Self {
        Self {
            conf: PathBuf::from(RIL_SUBSCRIPTION_CONF),
            conf_dir: PathBuf::from(RIL_SUBSCRIPTION_D),
        }
    }
}

impl RilSubscription {
    fn drop_in_files(&self) -> Vec<PathBuf> {
        let Ok(entries) = fs::read_dir(&self.conf_dir) else {
            return Vec::new();
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map_or(false, |ext| ext == "conf"))
            .collect();
        files.sort();
        files
    }
}

fn parse_file(table: &mut SlotTable, path: &Path) {
    let mut ini = Ini::new();
    if let Err(e) = ini.load(path) {
        debug!("Skipping {}: {}", path.display(), e);
        return;
    }

    for i in 0..RIL_SLOTS_MAX {
        let section = format!("ril_{}", i);
        if let Some(slot) = ini.get(&section, TRANSPORT_KEY).as_deref().and_then(parse_transport) {
            debug!("{}: [{}] {}", path.display(), section, slot.transport);
            table.insert(slot);
        }
    }
}

impl SlotSource for RilSubscription {
    fn slots(&self) -> Vec<Slot> {
        let mut table = SlotTable::default();
        parse_file(&mut table, &self.conf);
        for path in self.drop_in_files() {
            parse_file(&mut table, &path);
        }
        table.into_vec()
    }
}
