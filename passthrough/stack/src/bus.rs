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

//! Outbound connection to the bus endpoint of the audio server.
//!
//! The connection is dialed on a flat retry interval until it first succeeds.
//! Calls are synchronous and block the event loop until the endpoint replies.

use crate::error::BusError;
use crate::Message;
use dbus::channel::Channel;
use log::{debug, warn};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

pub const PASSTHROUGH_PATH: &str = "/org/sailfishos/hidlpassthrough";
pub const PASSTHROUGH_IFACE: &str = "org.SailfishOS.HIDLPassthrough";

pub const METHOD_GET_PARAMETERS: &str = "get_parameters";
pub const METHOD_SET_PARAMETERS: &str = "set_parameters";

/// Delay between two connection attempts. There is no backoff.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Reply timeout used by libdbus when none is given.
const DBUS_DEFAULT_TIMEOUT: Duration = Duration::from_millis(25_000);

/// The two parameter calls the relay forwards.
pub trait ParameterBus {
    /// Returns the raw `key=value` string of the endpoint for `keys`.
    fn get_parameters(&mut self, keys: &str) -> Result<String, BusError>;

    fn set_parameters(&mut self, key_value_pairs: &str) -> Result<(), BusError>;
}

/// An established link to the endpoint.
pub trait BusLink {
    /// Calls `method` with a single string argument. Returns the string
    /// argument of the reply, if it carries one.
    fn call(&self, method: &'static str, arg: &str) -> Result<Option<String>, BusError>;

    fn is_connected(&self) -> bool;
}

/// Opens links to an address.
pub trait Dialer {
    fn dial(&self, address: &str) -> Result<Box<dyn BusLink>, String>;
}

/// Peer-to-peer D-Bus connections.
pub struct DbusDialer;

impl Dialer for DbusDialer {
    fn dial(&self, address: &str) -> Result<Box<dyn BusLink>, String> {
        let channel = Channel::open_private(address).map_err(|e| e.to_string())?;
        Ok(Box::new(DbusLink { channel }))
    }
}

struct DbusLink {
    channel: Channel,
}

impl BusLink for DbusLink {
    fn call(&self, method: &'static str, arg: &str) -> Result<Option<String>, BusError> {
        let remote = |reason: String| BusError::Remote { method, reason };

        let mut msg = dbus::Message::new_method_call(
            PASSTHROUGH_IFACE,
            PASSTHROUGH_PATH,
            PASSTHROUGH_IFACE,
            method,
        )
        .map_err(remote)?;
        // Peer-to-peer connection, nobody routes on the destination.
        msg.set_destination(None);
        let msg = msg.append1(arg);

        let reply = self
            .channel
            .send_with_reply_and_block(msg, DBUS_DEFAULT_TIMEOUT)
            .map_err(|e| remote(e.message().unwrap_or("no reply").to_string()))?;
        Ok(reply.read1::<String>().ok())
    }

    fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }
}

enum State {
    Disconnected,
    Connecting { retry: JoinHandle<()> },
    Connected(Box<dyn BusLink>),
}

/// Single process-wide client of the bus endpoint.
pub struct BusClient {
    address: String,
    dialer: Box<dyn Dialer>,
    tx: UnboundedSender<Message>,
    state: State,
    reconnect: bool,
    notified: bool,
}

impl BusClient {
    /// Creates a disconnected client for `address`. With `reconnect`, a dropped
    /// link restarts the retry timer instead of degrading calls for good.
    pub fn new(
        address: &str,
        dialer: Box<dyn Dialer>,
        tx: UnboundedSender<Message>,
        reconnect: bool,
    ) -> Self {
        Self {
            address: address.to_string(),
            dialer,
            tx,
            state: State::Disconnected,
            reconnect,
            notified: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected(_))
    }

    /// Starts connecting without blocking. The first attempt happens one retry
    /// interval from now; [`Message::BusConnected`] is posted once connected.
    pub fn connect(&mut self) {
        self.done();
        debug!("Using address: {}", self.address);
        self.start_retry();
    }

    fn start_retry(&mut self) {
        let tx = self.tx.clone();
        let retry = tokio::spawn(async move {
            let mut interval =
                time::interval_at(Instant::now() + CONNECT_RETRY_INTERVAL, CONNECT_RETRY_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tx.send(Message::BusRetry).is_err() {
                    break;
                }
            }
        });
        self.state = State::Connecting { retry };
    }

    /// Handles a retry tick. Returns true if the client is connected afterwards.
    pub fn on_retry(&mut self) -> bool {
        match self.state {
            State::Connected(_) => return true,
            State::Disconnected => return false,
            State::Connecting { .. } => {}
        }

        let link = match self.dialer.dial(&self.address) {
            Ok(link) => link,
            Err(e) => {
                debug!(
                    "Could not connect to {}: {}, try again in {} seconds...",
                    self.address,
                    e,
                    CONNECT_RETRY_INTERVAL.as_secs()
                );
                return false;
            }
        };

        debug!("Connected to DBus socket {}", self.address);
        let previous = std::mem::replace(&mut self.state, State::Connected(link));
        if let State::Connecting { retry } = previous {
            retry.abort();
        }
        if !self.notified {
            self.notified = true;
            if self.tx.send(Message::BusConnected).is_err() {
                warn!("Event loop went away before the connection notice");
            }
        }
        true
    }

    /// Cancels a pending retry and closes the link.
    pub fn done(&mut self) {
        if let State::Connecting { retry } = std::mem::replace(&mut self.state, State::Disconnected)
        {
            retry.abort();
        }
    }

    fn call(&mut self, method: &'static str, arg: &str) -> Result<Option<String>, BusError> {
        let State::Connected(link) = &self.state else {
            return Err(BusError::NotConnected(self.address.clone()));
        };

        if self.reconnect && !link.is_connected() {
            warn!("Lost connection to {}, reconnecting", self.address);
            self.start_retry();
            return Err(BusError::NotConnected(self.address.clone()));
        }

        link.call(method, arg)
    }
}

impl ParameterBus for BusClient {
    fn get_parameters(&mut self, keys: &str) -> Result<String, BusError> {
        self.call(METHOD_GET_PARAMETERS, keys)?.ok_or_else(|| BusError::Remote {
            method: METHOD_GET_PARAMETERS,
            reason: "reply carries no value".to_string(),
        })
    }

    fn set_parameters(&mut self, key_value_pairs: &str) -> Result<(), BusError> {
        self.call(METHOD_SET_PARAMETERS, key_value_pairs).map(|_| ())
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        self.done();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeDialer, ParameterStore};
    use tokio::sync::mpsc;

    fn client(
        dialer: &FakeDialer,
        reconnect: bool,
    ) -> (BusClient, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (BusClient::new("unix:path=/tmp/test", Box::new(dialer.clone()), tx, reconnect), rx)
    }

    #[tokio::test]
    async fn calls_fail_before_first_connection() {
        let store = ParameterStore::new();
        let dialer = FakeDialer::new(&store);
        dialer.set_reachable(true);
        let (mut bus, _rx) = client(&dialer, false);

        bus.connect();
        assert_eq!(
            bus.get_parameters("a"),
            Err(BusError::NotConnected("unix:path=/tmp/test".into()))
        );
        assert_eq!(
            bus.set_parameters("a=1"),
            Err(BusError::NotConnected("unix:path=/tmp/test".into()))
        );

        // Nothing was queued for later delivery.
        assert!(bus.on_retry());
        assert!(store.calls().is_empty());
        assert_eq!(store.get("a"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn connects_once_endpoint_appears() {
        let store = ParameterStore::new();
        let dialer = FakeDialer::new(&store);
        let (mut bus, mut rx) = client(&dialer, false);

        let start = Instant::now();
        bus.connect();
        assert!(matches!(bus.get_parameters("a"), Err(BusError::NotConnected(_))));

        let later = dialer.clone();
        tokio::spawn(async move {
            time::sleep(Duration::from_secs(3)).await;
            later.set_reachable(true);
        });

        let mut connected = 0;
        while let Some(msg) = rx.recv().await {
            match msg {
                Message::BusRetry => {
                    bus.on_retry();
                }
                Message::BusConnected => {
                    connected += 1;
                    break;
                }
                _ => unreachable!(),
            }
        }
        let elapsed = start.elapsed();
        assert_eq!(connected, 1);
        assert!(elapsed >= Duration::from_secs(3), "connected after {:?}", elapsed);
        assert!(elapsed <= Duration::from_secs(5), "connected after {:?}", elapsed);

        store.set("a", "1");
        assert_eq!(bus.get_parameters("a"), Ok("a=1".to_string()));

        // The retry timer is gone: no further attempt is ever made.
        let attempts = dialer.attempts();
        time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(dialer.attempts(), attempts);
    }

    #[tokio::test]
    async fn connects_after_event_loop_went_away() {
        let store = ParameterStore::new();
        let dialer = FakeDialer::new(&store);
        dialer.set_reachable(true);
        let (mut bus, rx) = client(&dialer, false);
        drop(rx);

        bus.connect();
        assert!(bus.on_retry());
        assert!(bus.is_connected());
        assert_eq!(bus.set_parameters("a=1"), Ok(()));
        assert_eq!(store.get("a"), Some("1".to_string()));
    }

    #[tokio::test]
    async fn remote_errors_are_reported() {
        let store = ParameterStore::new();
        let dialer = FakeDialer::new(&store);
        dialer.set_reachable(true);
        let (mut bus, _rx) = client(&dialer, false);
        bus.connect();
        assert!(bus.on_retry());

        store.fail_calls(true);
        assert!(matches!(
            bus.set_parameters("a=1"),
            Err(BusError::Remote { method: METHOD_SET_PARAMETERS, .. })
        ));
        assert!(matches!(
            bus.get_parameters("a"),
            Err(BusError::Remote { method: METHOD_GET_PARAMETERS, .. })
        ));
    }

    #[tokio::test]
    async fn dropped_link_without_reconnect_stays_down() {
        let store = ParameterStore::new();
        let dialer = FakeDialer::new(&store);
        dialer.set_reachable(true);
        let (mut bus, mut rx) = client(&dialer, false);
        bus.connect();
        assert!(bus.on_retry());
        assert!(matches!(rx.try_recv(), Ok(Message::BusConnected)));

        store.disconnect();
        assert!(bus.set_parameters("a=1").is_err());
        assert!(bus.is_connected());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_link_with_reconnect_redials() {
        let store = ParameterStore::new();
        let dialer = FakeDialer::new(&store);
        dialer.set_reachable(true);
        let (mut bus, mut rx) = client(&dialer, true);
        bus.connect();
        assert!(bus.on_retry());
        assert!(matches!(rx.recv().await, Some(Message::BusConnected)));

        store.disconnect();
        assert!(matches!(bus.set_parameters("a=1"), Err(BusError::NotConnected(_))));
        assert!(!bus.is_connected());

        store.reconnect();
        assert!(matches!(rx.recv().await, Some(Message::BusRetry)));
        assert!(bus.on_retry());
        assert_eq!(bus.set_parameters("a=1"), Ok(()));

        // Reconnecting does not notify again.
        assert!(rx.try_recv().is_err());
    }
}
