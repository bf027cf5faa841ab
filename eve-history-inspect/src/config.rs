use eve_history::HistoryOptions;
use eyre::Report;
use log::info;
use serde_derive::Deserialize;
use stable_eyre::eyre::WrapErr;
use std::fs::read_to_string;
use std::io;
use std::path::PathBuf;

const CONFIG_FILENAME: &str = "eve-history.toml";
const DEFAULT_STORAGE_PATH: &str = ".";

#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// The directory holding the snapshot files.
    pub storage_path: PathBuf,
    pub history: HistoryOptions,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            history: HistoryOptions::default(),
        }
    }
}

impl Config {
    /// Read the config file from the working directory, or use the defaults if there is none.
    pub fn from_file() -> Result<Config, Report> {
        match Config::read(CONFIG_FILENAME) {
            Err(e)
                if e.downcast_ref::<io::Error>()
                    .map_or(false, |e| e.kind() == io::ErrorKind::NotFound) =>
            {
                info!("No {} found, using defaults", CONFIG_FILENAME);
                Ok(Config::default())
            }
            result => result,
        }
    }

    fn read(filename: &str) -> Result<Config, Report> {
        let config_file =
            read_to_string(filename).wrap_err_with(|| format!("Reading {}", filename))?;
        Ok(toml::from_str(&config_file)?)
    }
}
