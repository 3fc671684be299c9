pub mod clock;
pub mod time;
pub mod txid;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of value across the shielded-pool boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowType {
    /// Transparent funds entering a shielded pool.
    Shield,
    /// Shielded funds leaving to transparent addresses.
    Deshield,
}

impl FlowType {
    pub fn opposite(self) -> Self {
        match self {
            FlowType::Shield => FlowType::Deshield,
            FlowType::Deshield => FlowType::Shield,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowType::Shield => "shield",
            FlowType::Deshield => "deshield",
        }
    }
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shield" => Ok(FlowType::Shield),
            "deshield" => Ok(FlowType::Deshield),
            other => Err(format!("unknown flow type '{other}'")),
        }
    }
}

/// Shielded pool touched by a flow. Informational only, never scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pool {
    Sprout,
    Sapling,
    Orchard,
}

impl Pool {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pool::Sprout => "sprout",
            Pool::Sapling => "sapling",
            Pool::Orchard => "orchard",
        }
    }
}

impl FromStr for Pool {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sprout" => Ok(Pool::Sprout),
            "sapling" => Ok(Pool::Sapling),
            "orchard" => Ok(Pool::Orchard),
            other => Err(format!("unknown pool '{other}'")),
        }
    }
}

/// A confirmed transaction's movement into or out of a shielded pool.
///
/// There is at most one event per `(txid, flow_type)`. A transaction that both
/// shields and deshields shows up as two events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShieldedFlowEvent {
    pub txid: String,
    pub flow_type: FlowType,
    pub block_height: u32,
    /// Unix seconds.
    pub block_time: i64,
    pub amount_zat: u64,
    pub pool: Pool,
    /// Inputs for a shield, outputs for a deshield. Empty until backfilled.
    #[serde(default)]
    pub transparent_addresses: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WarningLevel {
    High,
    Medium,
    Low,
}

impl WarningLevel {
    /// Pair scores: ≥70 high, ≥40 medium.
    pub fn from_pair_score(score: u8) -> Self {
        if score >= 70 {
            WarningLevel::High
        } else if score >= 40 {
            WarningLevel::Medium
        } else {
            WarningLevel::Low
        }
    }

    /// Batch scores: ≥70 high, ≥50 medium.
    pub fn from_batch_score(score: u8) -> Self {
        if score >= 70 {
            WarningLevel::High
        } else if score >= 50 {
            WarningLevel::Medium
        } else {
            WarningLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WarningLevel::High => "HIGH",
            WarningLevel::Medium => "MEDIUM",
            WarningLevel::Low => "LOW",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            WarningLevel::High => "🔴",
            WarningLevel::Medium => "🟡",
            WarningLevel::Low => "🟢",
        }
    }
}

impl fmt::Display for WarningLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Points awarded by each pair-scoring primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub amount_similarity: u8, // 0-40
    pub time_proximity: u8,    // 0-30
    pub amount_rarity: u8,     // 0-30
    /// Rarity/time adjustment actually applied to the base sum.
    pub adjustment: i8,
}

/// Linkability of a single (shield, deshield) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkabilityScore {
    pub score: u8, // 0-100
    pub warning_level: WarningLevel,
    pub breakdown: ScoreBreakdown,
}
