//! Segregated witness activation gate
//!
//! Activation is a pure function of block height. Before the deployment
//! height witness programs are anyone-can-spend under consensus rules, while
//! relay policy already evaluates them.

use crate::constants::SEGWIT_ACTIVATION_HEIGHT;
use crate::script::{
    SCRIPT_VERIFY_CLEANSTACK, SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM,
    SCRIPT_VERIFY_P2SH, SCRIPT_VERIFY_WITNESS,
};
use crate::types::Natural;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationState {
    Pre,
    Post,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegwitGate {
    pub deployment_height: Natural,
}

impl Default for SegwitGate {
    fn default() -> Self {
        Self::new(SEGWIT_ACTIVATION_HEIGHT)
    }
}

impl SegwitGate {
    pub fn new(deployment_height: Natural) -> Self {
        Self { deployment_height }
    }

    /// classify: ℕ → {pre, post}
    pub fn classify(&self, height: Natural) -> ActivationState {
        if height >= self.deployment_height {
            ActivationState::Post
        } else {
            ActivationState::Pre
        }
    }

    pub fn is_active(&self, height: Natural) -> bool {
        self.classify(height) == ActivationState::Post
    }

    /// Consensus flags for a block at `height`
    pub fn mandatory_flags(&self, height: Natural) -> u32 {
        match self.classify(height) {
            ActivationState::Pre => SCRIPT_VERIFY_P2SH,
            ActivationState::Post => SCRIPT_VERIFY_P2SH | SCRIPT_VERIFY_WITNESS,
        }
    }

    /// Relay flags; a superset of the mandatory flags at every height
    pub fn standard_flags(&self, height: Natural) -> u32 {
        self.mandatory_flags(height)
            | SCRIPT_VERIFY_WITNESS
            | SCRIPT_VERIFY_CLEANSTACK
            | SCRIPT_VERIFY_DISCOURAGE_UPGRADABLE_WITNESS_PROGRAM
    }
}
