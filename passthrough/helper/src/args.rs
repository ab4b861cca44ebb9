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

//! Command line of the helper.

use audiosystem_passthrough::config::Config;
use audiosystem_passthrough::error::ConfigError;
use audiosystem_passthrough::{EXIT_INVALID_ARGUMENT, EXIT_OK};
use clap::{App, Arg, ArgMatches, ErrorKind};
use std::ffi::OsString;

/// Parsing stopped: print `message` and exit with `code`.
#[derive(Debug)]
pub struct Exit {
    pub code: i32,
    pub message: String,
}

fn app() -> App<'static, 'static> {
    App::new("hidl-helper")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Relays audio parameter calls between binder services and the audio server")
        .arg(
            Arg::with_name("type")
                .long("type")
                .short("t")
                .takes_value(true)
                .value_name("TYPE")
                .help("Implementation to use: af or hidl"),
        )
        .arg(
            Arg::with_name("standalone")
                .long("standalone")
                .short("s")
                .help("Not spawned by the audio server, log to syslog"),
        )
        .arg(Arg::with_name("verbose").long("verbose").short("v").help("Enable debug logs"))
        .arg(
            Arg::with_name("reconnect")
                .long("reconnect")
                .help("Reconnect to the bus endpoint when the connection drops"),
        )
        .arg(Arg::with_name("address").value_name("ADDRESS").help("D-Bus address of the endpoint"))
}

fn config_from(matches: &ArgMatches) -> Result<Config, ConfigError> {
    let address = matches.value_of("address").ok_or(ConfigError::MissingAddress)?;
    let mut config = Config::new(address);
    if let Some(role) = matches.value_of("type") {
        config.role = role.parse()?;
    }
    config.standalone = matches.is_present("standalone");
    config.verbose = matches.is_present("verbose");
    config.reconnect = matches.is_present("reconnect");
    Ok(config)
}

pub fn parse<I, T>(args: I) -> Result<Config, Exit>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = app().get_matches_from_safe(args).map_err(|e| match e.kind {
        ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed => {
            Exit { code: EXIT_OK, message: e.message }
        }
        _ => Exit { code: EXIT_INVALID_ARGUMENT, message: e.message },
    })?;

    config_from(&matches).map_err(|e| Exit { code: EXIT_INVALID_ARGUMENT, message: e.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use audiosystem_passthrough::config::RoleKind;

    const ADDRESS: &str = "unix:path=/run/user/100000/pulse/dbus-socket";

    #[test]
    fn address_and_role() {
        let config = parse(["hidl-helper", "-t", "af", ADDRESS]).unwrap();
        assert_eq!(config.address, ADDRESS);
        assert_eq!(config.role, RoleKind::Server);
        assert!(!config.verbose && !config.standalone && !config.reconnect);

        let config = parse(["hidl-helper", "--type", "hidl", ADDRESS]).unwrap();
        assert_eq!(config.role, RoleKind::Client);
    }

    #[test]
    fn flags() {
        let config = parse(["hidl-helper", "-s", "-v", "--reconnect", ADDRESS]).unwrap();
        assert!(config.standalone);
        assert!(config.verbose);
        assert!(config.reconnect);
    }

    #[test]
    fn missing_address() {
        let exit = parse(["hidl-helper", "-v"]).unwrap_err();
        assert_eq!(exit.code, EXIT_INVALID_ARGUMENT);
        assert_eq!(exit.message, "Address is not defined");
    }

    #[test]
    fn unknown_role() {
        let exit = parse(["hidl-helper", "-t", "aidl", ADDRESS]).unwrap_err();
        assert_eq!(exit.code, EXIT_INVALID_ARGUMENT);
        assert!(exit.message.contains("aidl"));
    }

    #[test]
    fn unknown_option() {
        let exit = parse(["hidl-helper", "--volume", ADDRESS]).unwrap_err();
        assert_eq!(exit.code, EXIT_INVALID_ARGUMENT);
    }

    #[test]
    fn help() {
        let exit = parse(["hidl-helper", "--help"]).unwrap_err();
        assert_eq!(exit.code, EXIT_OK);
        assert!(exit.message.contains("ADDRESS"));
    }
}
