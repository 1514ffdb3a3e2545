use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::regressor::BoostParams;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub model_dir: PathBuf,
    pub work_dir: PathBuf,
    pub history_years: u32,
    pub val_weeks: usize,
    pub test_weeks: usize,
    pub write_chunk_size: usize,
    pub boost: BoostParams,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = BoostParams::default();
        Ok(Self {
            database_url: lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            max_connections: parsed(&lookup, "DB_MAX_CONNECTIONS", 5)?,
            model_dir: lookup("MODEL_DIR").unwrap_or_else(|| "models".into()).into(),
            work_dir: lookup("WORK_DIR").unwrap_or_else(|| "work".into()).into(),
            history_years: parsed(&lookup, "HISTORY_YEARS", 5)?,
            val_weeks: parsed(&lookup, "VAL_WEEKS", 4)?,
            test_weeks: positive(&lookup, "TEST_WEEKS", 4)?,
            write_chunk_size: positive(&lookup, "WRITE_CHUNK_SIZE", 1000)?,
            boost: BoostParams {
                rounds: positive(&lookup, "BOOST_ROUNDS", defaults.rounds)?,
                learning_rate: parsed(&lookup, "BOOST_LEARNING_RATE", defaults.learning_rate)?,
                max_depth: positive(&lookup, "BOOST_MAX_DEPTH", defaults.max_depth)?,
                min_samples_leaf: positive(&lookup, "BOOST_MIN_LEAF", defaults.min_samples_leaf)?,
                early_stopping_rounds: parsed(&lookup, "BOOST_EARLY_STOP", defaults.early_stopping_rounds)?,
                ..defaults
            },
        })
    }
}

fn parsed<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn positive<F>(lookup: &F, key: &'static str, default: usize) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parsed(lookup, key, default)? {
        0 => Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
        }),
        n => Ok(n),
    }
}
