use anyhow::{bail, Result};
use config::{Config, ConfigError};
use serde::Deserialize;
use std::fmt::{Display, Formatter};

pub const CONFIG_KEY_SLOT_LENGTH_MS: &str = "slot-length-ms";
pub const CONFIG_KEY_MAX_BLOCKS_PER_WITNESS_SLOT: &str = "max-blocks-per-witness-slot";
pub const CONFIG_KEY_FINALITY_RULE: &str = "finality-rule";
pub const CONFIG_KEY_CONFIRMATION_DEPTH: &str = "confirmation-depth";

pub const DEFAULT_SLOT_LENGTH_MS: u64 = 3000;
pub const DEFAULT_MAX_BLOCKS_PER_WITNESS_SLOT: u32 = 6;
pub const DEFAULT_CONFIRMATION_DEPTH: u64 = 12;

const NANOS_PER_MILLI: i64 = 1_000_000;

/// Slot length in nanoseconds, if it fits the timestamp range
fn slot_ns(slot_length_ms: u64) -> Option<i64> {
    i64::try_from(slot_length_ms).ok()?.checked_mul(NANOS_PER_MILLI)
}

/// Integer setting, or `default` if the key is absent. A present value of
/// the wrong type is an error.
fn int_or(config: &Config, key: &str, default: i64) -> Result<i64> {
    match config.get_int(key) {
        Ok(value) => Ok(value),
        Err(ConfigError::NotFound(_)) => Ok(default),
        Err(e) => bail!("Invalid {key}: {e}"),
    }
}

/// How the last irreversible block is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinalityRuleKind {
    /// Confirmed by more than two thirds of the active witnesses
    WitnessQuorum,
    /// A fixed number of blocks below the newest linked block
    ConfirmationDepth,
}

impl Display for FinalityRuleKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FinalityRuleKind::WitnessQuorum => write!(f, "witness-quorum"),
            FinalityRuleKind::ConfirmationDepth => write!(f, "confirmation-depth"),
        }
    }
}

/// Consensus parameters shared by every node of a network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainParams {
    /// Length of one production slot
    pub slot_length_ms: u64,

    /// Consecutive blocks one witness may produce inside one slot
    pub max_blocks_per_witness_slot: u32,

    pub finality_rule: FinalityRuleKind,

    /// Depth used by `FinalityRuleKind::ConfirmationDepth`
    pub confirmation_depth: u64,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            slot_length_ms: DEFAULT_SLOT_LENGTH_MS,
            max_blocks_per_witness_slot: DEFAULT_MAX_BLOCKS_PER_WITNESS_SLOT,
            finality_rule: FinalityRuleKind::WitnessQuorum,
            confirmation_depth: DEFAULT_CONFIRMATION_DEPTH,
        }
    }
}

impl ChainParams {
    /// Read parameters from config, falling back to defaults for missing keys.
    /// Keys that are present but unreadable or out of range are errors.
    pub fn from_config(config: &Config) -> Result<Self> {
        let slot_length_ms =
            int_or(config, CONFIG_KEY_SLOT_LENGTH_MS, DEFAULT_SLOT_LENGTH_MS as i64)?;
        if slot_length_ms <= 0 {
            bail!("{CONFIG_KEY_SLOT_LENGTH_MS} must be positive, got {slot_length_ms}");
        }
        if slot_ns(slot_length_ms as u64).is_none() {
            bail!("{CONFIG_KEY_SLOT_LENGTH_MS} of {slot_length_ms} overflows nanosecond time");
        }

        let max_blocks = int_or(
            config,
            CONFIG_KEY_MAX_BLOCKS_PER_WITNESS_SLOT,
            DEFAULT_MAX_BLOCKS_PER_WITNESS_SLOT as i64,
        )?;
        if max_blocks <= 0 || max_blocks > u32::MAX as i64 {
            bail!("{CONFIG_KEY_MAX_BLOCKS_PER_WITNESS_SLOT} out of range: {max_blocks}");
        }

        let finality_rule = match config.get::<FinalityRuleKind>(CONFIG_KEY_FINALITY_RULE) {
            Ok(rule) => rule,
            Err(ConfigError::NotFound(_)) => FinalityRuleKind::WitnessQuorum,
            Err(e) => bail!("Invalid {CONFIG_KEY_FINALITY_RULE}: {e}"),
        };

        let confirmation_depth = int_or(
            config,
            CONFIG_KEY_CONFIRMATION_DEPTH,
            DEFAULT_CONFIRMATION_DEPTH as i64,
        )?;
        if confirmation_depth <= 0 {
            bail!("{CONFIG_KEY_CONFIRMATION_DEPTH} must be positive, got {confirmation_depth}");
        }

        Ok(Self {
            slot_length_ms: slot_length_ms as u64,
            max_blocks_per_witness_slot: max_blocks as u32,
            finality_rule,
            confirmation_depth: confirmation_depth as u64,
        })
    }

    /// Production slot containing the given unix-nanosecond timestamp
    pub fn slot_of(&self, time_ns: i64) -> i64 {
        let slot_ns = slot_ns(self.slot_length_ms).unwrap_or(i64::MAX).max(1);
        time_ns.div_euclid(slot_ns)
    }
}
