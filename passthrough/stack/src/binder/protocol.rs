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

//! Interfaces, transaction codes and request layouts of the two binder peers.

/// First user transaction code of a binder interface.
pub const FIRST_CALL_TRANSACTION: u32 = 0x0000_0001;

/// Transport status of a successful transaction.
pub const STATUS_OK: i32 = 0;

/// Binder device of the framework side (Server role).
pub const BINDER_DEVICE: &str = "/dev/binder";
/// Binder device of the vendor side (Client role).
pub const HWBINDER_DEVICE: &str = "/dev/hwbinder";

pub const AUDIO_FLINGER_SERVICE: &str = "media.audio_flinger";
pub const AUDIO_FLINGER_IFACE: &str = "android.media.IAudioFlinger";

pub const QCRIL_AUDIO_IFACE: &str = "vendor.qti.hardware.radio.am@1.0::IQcRilAudio";
pub const QCRIL_AUDIO_CALLBACK_IFACE: &str =
    "vendor.qti.hardware.radio.am@1.0::IQcRilAudioCallback";

/// `oneway IQcRilAudio::setCallback(IQcRilAudioCallback)`
pub const QCRIL_AUDIO_SET_CALLBACK: u32 = FIRST_CALL_TRANSACTION;
/// `IQcRilAudioCallback::getParameters(string) generates (string)`
pub const QCRIL_AUDIO_CALLBACK_GET_PARAMETERS: u32 = FIRST_CALL_TRANSACTION;
/// `IQcRilAudioCallback::setParameters(string) generates (int32_t)`
pub const QCRIL_AUDIO_CALLBACK_SET_PARAMETERS: u32 = FIRST_CALL_TRANSACTION + 1;

/// IAudioFlinger methods, relative to the `binder_index` of the platform.
const AF_SET_PARAMETERS: u32 = 0;
const AF_GET_PARAMETERS: u32 = 1;
const AF_REGISTER_CLIENT: u32 = 2;

/// Instance name of the IQcRilAudio service of a modem slot.
pub fn qcril_audio_fqname(slot: &str) -> String {
    format!("{}/{}", QCRIL_AUDIO_IFACE, slot)
}

/// Transaction code of an IAudioFlinger method on a platform whose
/// `setParameters` sits `binder_index` codes after the first call transaction.
pub fn audio_flinger_code(binder_index: u32, method: u32) -> u32 {
    FIRST_CALL_TRANSACTION + binder_index + method
}

/// Reading side of a transaction parcel.
pub trait ParcelReader {
    fn read_i32(&mut self) -> Option<i32>;
    fn read_string8(&mut self) -> Option<String>;
    fn read_hidl_string(&mut self) -> Option<String>;
}

/// Decoded inbound transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundCall {
    /// `IAudioFlinger::setParameters(int token, int io_handle, String8 kvpairs)`
    SetParameters { token: i32, io_handle: i32, key_value_pairs: String },
    /// `IAudioFlinger::getParameters(int token, int io_handle, String8 keys)`
    GetParameters { token: i32, io_handle: i32, keys: String },
    /// `IAudioFlinger::registerClient(...)`
    RegisterClient,
    /// `IQcRilAudioCallback::getParameters(string)`
    CallbackGetParameters { keys: String },
    /// `IQcRilAudioCallback::setParameters(string)`
    CallbackSetParameters { key_value_pairs: String },
    /// Right interface, code we do not implement.
    UnknownCode { code: u32 },
    /// Wrong interface, or a request missing its arguments.
    Unsupported { iface: String, code: u32 },
}

/// Reply to hand back on the binder side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Status OK without a reply parcel.
    None,
    /// Plain `int32`.
    Int32(i32),
    /// Plain `String8`.
    String8(String),
    /// HIDL status word followed by a `hidl_string`.
    HidlString(String),
    /// HIDL status word followed by an `int32`.
    HidlInt32(i32),
    /// The transaction is rejected at the transport level.
    Failed,
}

/// Decodes a request received by a local object implementing `local_iface`.
pub fn decode(
    local_iface: &str,
    iface: &str,
    code: u32,
    binder_index: u32,
    reader: &mut dyn ParcelReader,
) -> InboundCall {
    let call = if iface != local_iface {
        None
    } else if local_iface == AUDIO_FLINGER_IFACE {
        decode_audio_flinger(code, binder_index, reader)
    } else if local_iface == QCRIL_AUDIO_CALLBACK_IFACE {
        decode_qcril_callback(code, reader)
    } else {
        None
    };

    call.unwrap_or_else(|| InboundCall::Unsupported { iface: iface.to_string(), code })
}

fn decode_audio_flinger(
    code: u32,
    binder_index: u32,
    reader: &mut dyn ParcelReader,
) -> Option<InboundCall> {
    let call = match code.checked_sub(FIRST_CALL_TRANSACTION + binder_index) {
        Some(AF_SET_PARAMETERS) => InboundCall::SetParameters {
            token: reader.read_i32()?,
            io_handle: reader.read_i32()?,
            key_value_pairs: reader.read_string8()?,
        },
        Some(AF_GET_PARAMETERS) => InboundCall::GetParameters {
            token: reader.read_i32()?,
            io_handle: reader.read_i32()?,
            keys: reader.read_string8()?,
        },
        Some(AF_REGISTER_CLIENT) => InboundCall::RegisterClient,
        _ => InboundCall::UnknownCode { code },
    };
    Some(call)
}

fn decode_qcril_callback(code: u32, reader: &mut dyn ParcelReader) -> Option<InboundCall> {
    let call = match code {
        QCRIL_AUDIO_CALLBACK_GET_PARAMETERS => {
            InboundCall::CallbackGetParameters { keys: reader.read_hidl_string()? }
        }
        QCRIL_AUDIO_CALLBACK_SET_PARAMETERS => {
            InboundCall::CallbackSetParameters { key_value_pairs: reader.read_hidl_string()? }
        }
        _ => InboundCall::UnknownCode { code },
    };
    Some(call)
}
