// src/utils/rank.rs

/// One band of the fixed ascending XP table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankTier {
    pub name: &'static str,
    pub xp_min: i64,
    pub xp_max: i64,
}

/// Rank tiers in ascending order. Bands are contiguous and the last one is
/// open-ended, so every XP value maps to exactly one tier.
pub const RANK_TIERS: [RankTier; 7] = [
    RankTier { name: "Bronze", xp_min: 0, xp_max: 999 },
    RankTier { name: "Silver", xp_min: 1_000, xp_max: 4_999 },
    RankTier { name: "Gold", xp_min: 5_000, xp_max: 14_999 },
    RankTier { name: "Platinum", xp_min: 15_000, xp_max: 29_999 },
    RankTier { name: "Diamond", xp_min: 30_000, xp_max: 59_999 },
    RankTier { name: "Master", xp_min: 60_000, xp_max: 99_999 },
    RankTier { name: "Legend", xp_min: 100_000, xp_max: i64::MAX },
];

/// Maps cumulative XP to (tier index, tier). Total: negative XP clamps to
/// the first band.
pub fn rank_for_xp(xp: i64) -> (i32, &'static RankTier) {
    for (i, tier) in RANK_TIERS.iter().enumerate() {
        if xp <= tier.xp_max {
            return (i as i32, tier);
        }
    }
    let last = RANK_TIERS.len() - 1;
    (last as i32, &RANK_TIERS[last])
}
