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

mod args;

use audiosystem_passthrough::binder;
use audiosystem_passthrough::bus::DbusDialer;
use audiosystem_passthrough::config::{pulse_log_verbose, Config, PULSE_ENV_LOG_LEVEL};
use audiosystem_passthrough::slots::{RilSubscription, SlotSource};
use audiosystem_passthrough::{Message, Stack, EXIT_INVALID_ARGUMENT, EXIT_OK};
use log::{debug, error, LevelFilter};
use std::io::Write;
use syslog::{BasicLogger, Facility, Formatter3164};
use tokio::runtime::Builder;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::LocalSet;

const PROCESS_NAME: &str = "hidl-helper";

fn init_logging(config: &Config) -> Result<(), String> {
    let level = if config.verbose { LevelFilter::Debug } else { LevelFilter::Warn };

    if config.standalone {
        let formatter = Formatter3164 {
            facility: Facility::LOG_USER,
            hostname: None,
            process: PROCESS_NAME.into(),
            pid: std::process::id() as _,
        };
        let logger =
            syslog::unix(formatter).map_err(|e| format!("Error initializing syslog: {}", e))?;
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map_err(|e| format!("Error setting logger: {}", e))?;
        log::set_max_level(level);
    } else {
        // The audio server reads our stdout and logs each line itself.
        env_logger::Builder::new()
            .filter_level(level)
            .format(|buf, record| writeln!(buf, "{}", record.args()))
            .target(env_logger::Target::Stdout)
            .try_init()
            .map_err(|e| format!("Error setting logger: {}", e))?;
    }

    log_panics::init();
    Ok(())
}

/// Turns signals into messages. SIGHUP re-reads the slot configuration.
async fn watch_signals(tx: mpsc::UnboundedSender<Message>, slots: RilSubscription) {
    let (mut interrupt, mut terminate, mut hangup) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    ) {
        (Ok(interrupt), Ok(terminate), Ok(hangup)) => (interrupt, terminate, hangup),
        _ => {
            error!("Failed to install signal handlers");
            return;
        }
    };

    loop {
        let message = tokio::select! {
            _ = interrupt.recv() => Message::Shutdown,
            _ = terminate.recv() => Message::Shutdown,
            _ = hangup.recv() => {
                debug!("Reloading slot configuration");
                Message::Reconfigure(slots.slots())
            }
        };
        if tx.send(message).is_err() {
            break;
        }
    }
}

fn run(config: Config) -> i32 {
    let rt = match Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to start tokio runtime: {}", e);
            return EXIT_INVALID_ARGUMENT;
        }
    };
    let local = LocalSet::new();

    local.block_on(&rt, async move {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sm = match binder::open(config.role.binder_device(), config.binder_index, tx.clone()) {
            Ok(sm) => sm,
            Err(e) => {
                error!("{}", e);
                return EXIT_INVALID_ARGUMENT;
            }
        };

        let slots = RilSubscription::default();
        let mut stack = match Stack::new(&config, sm, Box::new(DbusDialer), &slots, tx.clone()) {
            Ok(stack) => stack,
            Err(e) => {
                error!("{}", e);
                return EXIT_INVALID_ARGUMENT;
            }
        };
        let signals = tokio::task::spawn_local(watch_signals(tx, slots));

        if stack.wait() {
            stack.dispatch(&mut rx).await;
        } else {
            error!("Service manager is not available");
        }

        signals.abort();
        // Pending transactions get their callers released before the binder
        // loop is stopped.
        drop(rx);
        stack.shutdown()
    })
}

fn main() {
    let mut config = match args::parse(std::env::args_os()) {
        Ok(config) => config,
        Err(exit) => {
            if exit.code == EXIT_OK {
                println!("{}", exit.message);
            } else {
                eprintln!("{}", exit.message);
            }
            std::process::exit(exit.code);
        }
    };
    if pulse_log_verbose(std::env::var(PULSE_ENV_LOG_LEVEL).ok().as_deref()) {
        config.verbose = true;
    }

    if let Err(e) = init_logging(&config) {
        eprintln!("{}", e);
        std::process::exit(EXIT_INVALID_ARGUMENT);
    }

    std::process::exit(run(config));
}
