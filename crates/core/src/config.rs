//
// Copyright (c) 2025 TRUSTEDGE LABS LLC
// This source code is subject to the terms of the Mozilla Public License, v. 2.0.
// If a copy of the MPL was not distributed with this file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Project: murmur — a peer-to-peer terminal chat system.
//
// config.rs - immutable configuration assembled from environment and CLI
// flags at startup (spec §6, §9 "Config is an immutable struct").

use std::path::PathBuf;

use crate::error::ChatError;

/// Default listening port (spec §6).
pub const DEFAULT_PORT: u16 = 7665;

const ENV_BASE_DIR: &str = "MURMUR_BASE_DIR";
const ENV_ROOT_DIR: &str = "MURMUR_ROOT_DIR";
const ENV_DATA_STORAGE_FILE_NAME: &str = "MURMUR_DATA_STORAGE_FILE_NAME";
const ENV_SERVER_PORT: &str = "MURMUR_SERVER_PORT";

/// CLI-level overrides, applied on top of whatever the environment supplies.
#[derive(Debug, Default, Clone)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub storage: Option<PathBuf>,
}

/// Fully resolved, immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub root_dir: PathBuf,
    pub base_dir: PathBuf,
    pub data_storage_file_name: String,
    pub storage_path: PathBuf,
    pub server_port: u16,
}

impl Config {
    /// Resolve configuration from `MURMUR_*` environment variables, with
    /// `overrides` (typically parsed CLI flags) taking precedence.
    pub fn load(overrides: &ConfigOverrides) -> Result<Self, ChatError> {
        let root_dir = std::env::var(ENV_ROOT_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let base_dir = std::env::var(ENV_BASE_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".murmur"));
        let data_storage_file_name =
            std::env::var(ENV_DATA_STORAGE_FILE_NAME).unwrap_or_else(|_| "connection_details.json".to_string());

        let server_port = match overrides.port {
            Some(p) => p,
            None => match std::env::var(ENV_SERVER_PORT) {
                Ok(v) => v
                    .parse()
                    .map_err(|_| ChatError::Config(format!("{ENV_SERVER_PORT} is not a valid port: {v}")))?,
                Err(_) => DEFAULT_PORT,
            },
        };
        if server_port == 0 {
            return Err(ChatError::Config("server port must be nonzero".into()));
        }

        let storage_path = overrides
            .storage
            .clone()
            .unwrap_or_else(|| root_dir.join(&base_dir).join(&data_storage_file_name));

        Ok(Self {
            root_dir,
            base_dir,
            data_storage_file_name,
            storage_path,
            server_port,
        })
    }
}
