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

//! Daemon configuration and platform defaults.

use crate::binder::protocol::{BINDER_DEVICE, HWBINDER_DEVICE};
use crate::error::ConfigError;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Environment variable carrying the log level of the audio server.
pub const PULSE_ENV_LOG_LEVEL: &str = "PULSE_LOG";
/// `PULSE_LOG` value of the debug level.
pub const PULSE_LOG_LEVEL_DEBUG: i64 = 4;

/// Vendor manifest checked on Android 8 to pick the role at runtime.
pub const VENDOR_MANIFEST: &str = "/vendor/manifest.xml";
const VENDOR_IF_NAME: &str = "IQcRilAudio";

/// Operating role, fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    /// Registers as `media.audio_flinger` and serves inbound calls (`af`).
    Server,
    /// Attaches to the IQcRilAudio service of every modem slot (`hidl`).
    Client,
}

impl RoleKind {
    pub fn name(&self) -> &'static str {
        match self {
            RoleKind::Server => "af",
            RoleKind::Client => "hidl",
        }
    }

    /// Binder device the role's peers live on.
    pub fn binder_device(&self) -> &'static str {
        match self {
            RoleKind::Server => BINDER_DEVICE,
            RoleKind::Client => HWBINDER_DEVICE,
        }
    }
}

impl FromStr for RoleKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "af" => Ok(RoleKind::Server),
            "hidl" => Ok(RoleKind::Client),
            _ => Err(ConfigError::UnknownRole(s.to_string())),
        }
    }
}

/// Daemon configuration, immutable once the stack is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address of the bus endpoint, e.g. `unix:path=/run/pulse/dbus-socket`.
    pub address: String,
    pub role: RoleKind,
    /// Enables debug logs.
    pub verbose: bool,
    /// Running outside of the audio server; only changes log destination.
    pub standalone: bool,
    /// Offset of `IAudioFlinger::setParameters` after the first call transaction.
    pub binder_index: u32,
    /// Re-dial the bus endpoint when an established connection drops.
    pub reconnect: bool,
}

impl Config {
    /// Configuration with the platform defaults for everything but `address`.
    pub fn new(address: &str) -> Self {
        let platform = Platform::from_build();
        Self {
            address: address.to_string(),
            role: platform.default_role(Path::new(VENDOR_MANIFEST)),
            verbose: false,
            standalone: false,
            binder_index: platform.binder_index(),
            reconnect: false,
        }
    }
}

/// Android release the daemon was built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub version_major: Option<u32>,
}

impl Platform {
    /// Reads `ANDROID_VERSION_MAJOR` from the build environment.
    pub fn from_build() -> Self {
        Self { version_major: option_env!("ANDROID_VERSION_MAJOR").and_then(|v| v.parse().ok()) }
    }

    pub fn binder_index(&self) -> u32 {
        match self.version_major {
            Some(v) if v <= 7 => 17,
            _ => 18,
        }
    }

    /// Role used when none is given on the command line. Android 8 decides at
    /// runtime from the vendor manifest.
    pub fn default_role(&self, manifest: &Path) -> RoleKind {
        match self.version_major {
            Some(v) if v <= 7 => RoleKind::Server,
            Some(8) => role_from_manifest(manifest).unwrap_or(RoleKind::Server),
            _ => RoleKind::Client,
        }
    }
}

fn role_from_manifest(manifest: &Path) -> Option<RoleKind> {
    match fs::read_to_string(manifest) {
        Ok(contents) if contents.contains(VENDOR_IF_NAME) => Some(RoleKind::Client),
        Ok(_) => Some(RoleKind::Server),
        Err(e) => {
            log::error!("can't get {} contents: {}", manifest.display(), e);
            None
        }
    }
}

/// Whether a `PULSE_LOG` value selects debug logs. The value is read like
/// `atoi()` and clamped to the debug level.
pub fn pulse_log_verbose(value: Option<&str>) -> bool {
    let Some(value) = value else {
        return false;
    };
    let value = value.trim_start();
    let digits = value
        .char_indices()
        .take_while(|&(i, c)| c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+')))
        .count();
    let level = value[..digits].parse::<i64>().unwrap_or(0);
    level.min(PULSE_LOG_LEVEL_DEBUG) == PULSE_LOG_LEVEL_DEBUG
}
