//! Service configuration

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::split::{AmountParsing, SplitPolicy};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// MongoDB connection string; without one everything is kept in memory
    pub mongodb_uri: Option<String>,

    pub database: String,

    pub host: String,

    pub port: u16,

    pub split: SplitPolicy,

    /// Idle settlement sessions are dropped after this many seconds
    pub session_ttl_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongodb_uri: None,
            database: "CourtSplit".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            split: SplitPolicy::default(),
            session_ttl_secs: 30 * 60,
        }
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has an invalid value: {:?}", name, value)))
}

impl Config {
    /// Load from environment variables (and a `.env` file if present)
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(uri) = var("MONGODB_URI").filter(|uri| !uri.trim().is_empty()) {
            config.mongodb_uri = Some(uri);
        }

        if let Some(database) = var("COURTSPLIT_DATABASE") {
            config.database = database;
        }

        if let Some(host) = var("COURTSPLIT_HOST") {
            config.host = host;
        }

        if let Some(port) = var("COURTSPLIT_PORT") {
            config.port = parse_var("COURTSPLIT_PORT", &port)?;
        }

        if let Some(epsilon) = var("COURTSPLIT_SPLIT_EPSILON") {
            let epsilon: Decimal = parse_var("COURTSPLIT_SPLIT_EPSILON", &epsilon)?;
            if epsilon.is_sign_negative() {
                return Err(Error::Config(
                    "COURTSPLIT_SPLIT_EPSILON must not be negative".to_string(),
                ));
            }
            config.split.epsilon = epsilon;
        }

        if let Some(shares) = var("COURTSPLIT_ORGANIZER_SHARES_COST") {
            config.split.organizer_shares_cost =
                parse_var("COURTSPLIT_ORGANIZER_SHARES_COST", &shares)?;
        }

        if let Some(strict) = var("COURTSPLIT_STRICT_AMOUNTS") {
            let strict: bool = parse_var("COURTSPLIT_STRICT_AMOUNTS", &strict)?;
            config.split.amount_parsing = if strict {
                AmountParsing::Strict
            } else {
                AmountParsing::Permissive
            };
        }

        if let Some(ttl) = var("COURTSPLIT_SESSION_TTL_SECS") {
            config.session_ttl_secs = parse_var("COURTSPLIT_SESSION_TTL_SECS", &ttl)?;
        }

        Ok(config)
    }
}
