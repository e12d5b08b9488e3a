//! Node configuration
//!
//! Defaults reproduce the regression-test network: segwit activates at
//! height 432 and the relay fee ceiling is 0.1 coin. Values can be
//! overridden from JSON or from `NAMECHAIN_*` environment variables.

use crate::activation::SegwitGate;
use crate::constants::*;
use crate::error::{ConsensusError, Result};
use crate::mempool::MempoolPolicy;
use crate::types::{Amount, Natural};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// First block height at which witness rules are enforced
    #[serde(default = "default_segwit_activation_height")]
    pub segwit_activation_height: Natural,

    /// Fee ceiling for mempool admission
    #[serde(default = "default_max_fee")]
    pub max_fee: Amount,

    /// Seed the wallet derives its keys from
    #[serde(default = "default_wallet_seed")]
    pub wallet_seed: String,
}

fn default_segwit_activation_height() -> Natural {
    SEGWIT_ACTIVATION_HEIGHT
}

fn default_max_fee() -> Amount {
    COIN / 10
}

fn default_wallet_seed() -> String {
    "namechain-regtest".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            segwit_activation_height: default_segwit_activation_height(),
            max_fee: default_max_fee(),
            wallet_seed: default_wallet_seed(),
        }
    }
}

impl NodeConfig {
    /// Parse a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: NodeConfig =
            serde_json::from_str(json).map_err(|e| ConsensusError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = Self::from_json(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Defaults overridden by environment variables
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("NAMECHAIN_SEGWIT_ACTIVATION_HEIGHT") {
            if let Ok(height) = val.parse::<Natural>() {
                config.segwit_activation_height = height;
            }
        }
        if let Ok(val) = std::env::var("NAMECHAIN_MAX_FEE") {
            if let Ok(fee) = val.parse::<Amount>() {
                config.max_fee = fee;
            }
        }
        if let Ok(val) = std::env::var("NAMECHAIN_WALLET_SEED") {
            config.wallet_seed = val;
        }

        config
    }

    pub fn validate(&self) -> Result<()> {
        if !(0..=MAX_MONEY).contains(&self.max_fee) {
            return Err(ConsensusError::Config(format!("max_fee {} out of range", self.max_fee)));
        }
        if self.wallet_seed.is_empty() {
            return Err(ConsensusError::Config("wallet_seed must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn gate(&self) -> SegwitGate {
        SegwitGate::new(self.segwit_activation_height)
    }

    pub fn policy(&self, allow_high_fees: bool) -> MempoolPolicy {
        MempoolPolicy { max_fee: self.max_fee, allow_high_fees }
    }
}
