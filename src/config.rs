// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

//! Binding configuration
//!
//! A configuration names the module to load and how to talk to it. It can
//! be built in code or read from a TOML file:
//!
//! ```toml
//! library = "/usr/lib64/pkcs11/libsofthsm2.so"
//! application_type = "multi_threaded"
//! profile = "auto"
//! binding = "function_list"
//! init_reserved = "configdir=/etc/token"
//! ```

use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

use pkcs11::{NativeWord, PackingMode, PlatformProfile};
use serde::de;
use serde::{Deserialize, Serialize};
use toml;

pub const DEFAULT_CONF_NAME: &str = "ckbind.conf";

#[cfg(not(test))]
const DEFAULT_CONF_DIR: &str = {
    match option_env!("CONFDIR") {
        Some(p) => p,
        None => "/usr/local/etc",
    }
};
#[cfg(test)]
const DEFAULT_CONF_DIR: &str = "test";

/// Threading model announced to the module in `C_Initialize`
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationType {
    SingleThreaded,
    #[default]
    MultiThreaded,
}

/// Which of the four native ABI variants to use
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileChoice {
    /// Detect the host platform
    #[default]
    Auto,
    W4,
    W4Packed,
    W8,
    W8Packed,
}

impl ProfileChoice {
    pub fn forced(self) -> Option<PlatformProfile> {
        match self {
            ProfileChoice::Auto => None,
            ProfileChoice::W4 => Some(PlatformProfile::W4),
            ProfileChoice::W4Packed => Some(PlatformProfile::W4_PACKED),
            ProfileChoice::W8 => Some(PlatformProfile::W8),
            ProfileChoice::W8Packed => Some(PlatformProfile::W8_PACKED),
        }
    }
}

impl From<PlatformProfile> for ProfileChoice {
    fn from(profile: PlatformProfile) -> ProfileChoice {
        match (profile.word, profile.packing) {
            (NativeWord::Width4, PackingMode::Default) => ProfileChoice::W4,
            (NativeWord::Width4, PackingMode::OneByte) => {
                ProfileChoice::W4Packed
            }
            (NativeWord::Width8, PackingMode::Default) => ProfileChoice::W8,
            (NativeWord::Width8, PackingMode::OneByte) => {
                ProfileChoice::W8Packed
            }
        }
    }
}

/// How the function table is obtained from the module
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindMode {
    /// Resolve every `C_*` entry point by name
    Symbols,
    /// Call `C_GetFunctionList` and read the returned table
    #[default]
    FunctionList,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    pub library: Option<String>,
    #[serde(default)]
    pub application_type: ApplicationType,
    #[serde(default)]
    pub profile: ProfileChoice,
    #[serde(default)]
    pub binding: BindMode,
    pub init_reserved: Option<String>,
}

fn config_error<E: de::Error + Send + Sync + 'static>(error: E) -> Error {
    Error::config_from_error(error)
}

impl Config {
    pub fn new() -> Config {
        Config::default()
    }

    pub fn for_library(library: &str) -> Config {
        Config {
            library: Some(library.to_string()),
            ..Default::default()
        }
    }

    pub fn with_profile(mut self, profile: ProfileChoice) -> Config {
        self.profile = profile;
        self
    }

    pub fn with_binding(mut self, binding: BindMode) -> Config {
        self.binding = binding;
        self
    }

    pub fn with_application_type(mut self, app: ApplicationType) -> Config {
        self.application_type = app;
        self
    }

    pub fn with_init_reserved(mut self, reserved: &str) -> Config {
        self.init_reserved = Some(reserved.to_string());
        self
    }

    pub fn find_conf() -> Result<String> {
        /* First check for our own env var,
         * this has the highest precedence */
        if let Ok(var) = env::var("CKBIND_CONF") {
            return Ok(var);
        }
        /* Freedesktop specification for config dirs first
         * then fallback to use $HOME/.config, if that is also not
         * available see if we have access to a system wide file */
        let conffile = match env::var("XDG_CONFIG_HOME") {
            Ok(xdg) => format!("{}/ckbind/{}", xdg, DEFAULT_CONF_NAME),
            Err(_) => match env::var("HOME") {
                Ok(home) => {
                    format!("{}/.config/ckbind/{}", home, DEFAULT_CONF_NAME)
                }
                Err(_) => {
                    format!("{}/ckbind/{}", DEFAULT_CONF_DIR, DEFAULT_CONF_NAME)
                }
            },
        };
        if Path::new(&conffile).is_file() {
            Ok(conffile)
        } else {
            Err(Error::config(format!(
                "no configuration file found (tried {})",
                conffile
            )))
        }
    }

    pub fn from_file(filename: &str) -> Result<Config> {
        let config_str = fs::read_to_string(filename)?;
        config_str.parse()
    }

    /// Finds the configuration file and loads it
    pub fn load() -> Result<Config> {
        Config::from_file(&Config::find_conf()?)
    }
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(s: &str) -> Result<Config> {
        toml::from_str(s).map_err(config_error)
    }
}
