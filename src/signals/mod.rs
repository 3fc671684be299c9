pub mod primitives;
pub mod score;

pub use primitives::{
    FEE_TOLERANCE_ZAT, score_amount_rarity, score_amount_similarity, score_roundness,
    score_time_proximity,
};
pub use score::calculate_linkability_score;
