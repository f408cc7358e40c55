//! Configuration de l'application, lue depuis l'environnement.

use std::{env, path::PathBuf};

use crate::consts;

pub const DB_FILE_VAR: &str = "GALENO_DB_FILE";
pub const DATA_DIR_VAR: &str = "GALENO_DATA_DIR";
pub const LOG_FILE_VAR: &str = "GALENO_LOG_FILE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub db_file: PathBuf,
    pub data_dir: PathBuf,
    pub log_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_file: consts::DB_FILE.into(),
            data_dir: consts::DATA_DIR.into(),
            log_file: consts::LOG_FILE.into(),
        }
    }
}

impl Config {
    /// Construit la configuration à partir des variables d'environnement.
    /// Une variable absente ou vide garde la valeur par défaut.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |name: &str, default: &str| -> PathBuf {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| default.to_owned())
                .into()
        };

        Self {
            db_file: read(DB_FILE_VAR, consts::DB_FILE),
            data_dir: read(DATA_DIR_VAR, consts::DATA_DIR),
            log_file: read(LOG_FILE_VAR, consts::LOG_FILE),
        }
    }
}
