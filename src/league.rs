// Leadership score ledger and league tiers.
//
// League is never stored on the child record. It is derived from the score
// every time it is read, so the two can't drift apart.

use spacetimedb::SpacetimeType;

use crate::error::ValidationError;

/// Default breakpoints: minimum score for each tier, ascending
pub const DEFAULT_LEAGUE_BREAKPOINTS: [(u64, League); 6] = [
    (0, League::Bronze),
    (700, League::Silver),
    (5_000, League::Gold),
    (10_000, League::Platinum),
    (18_000, League::Crystal),
    (30_000, League::Leader),
];

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum League {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Crystal,
    Leader,
}

impl League {
    pub fn as_str(&self) -> &'static str {
        match self {
            League::Bronze => "bronze",
            League::Silver => "silver",
            League::Gold => "gold",
            League::Platinum => "platinum",
            League::Crystal => "crystal",
            League::Leader => "leader",
        }
    }
}

/// Scores only ever go up
pub fn add_score(score: u64, amount: u64) -> u64 {
    score.saturating_add(amount)
}

/// Ordered score breakpoints mapping cumulative score to a league
#[derive(Debug, Clone, PartialEq)]
pub struct LeaguePolicy {
    tiers: Vec<(u64, League)>,
}

impl Default for LeaguePolicy {
    fn default() -> Self {
        LeaguePolicy { tiers: DEFAULT_LEAGUE_BREAKPOINTS.to_vec() }
    }
}

impl LeaguePolicy {
    /// Breakpoints must start at 0 and climb strictly in both score and tier,
    /// which is what makes `derive` total and monotone
    pub fn new(tiers: Vec<(u64, League)>) -> Result<Self, ValidationError> {
        match tiers.first() {
            None => return Err(ValidationError::InvalidPolicy("no tiers".into())),
            Some((min, _)) if *min != 0 => {
                return Err(ValidationError::InvalidPolicy(format!("first tier starts at {}, not 0", min)))
            }
            _ => {}
        }
        for pair in tiers.windows(2) {
            let ((lo_score, lo_tier), (hi_score, hi_tier)) = (pair[0], pair[1]);
            if hi_score <= lo_score || hi_tier <= lo_tier {
                return Err(ValidationError::InvalidPolicy(format!(
                    "{}@{} must come before {}@{}",
                    lo_tier.as_str(),
                    lo_score,
                    hi_tier.as_str(),
                    hi_score
                )));
            }
        }
        Ok(LeaguePolicy { tiers })
    }

    pub fn derive(&self, score: u64) -> League {
        self.tiers
            .iter()
            .take_while(|(min, _)| *min <= score)
            .last()
            .map(|(_, league)| *league)
            .unwrap_or(League::Bronze)
    }

    /// Next tier up and the score that reaches it, if any
    pub fn next_threshold(&self, score: u64) -> Option<(League, u64)> {
        self.tiers
            .iter()
            .find(|(min, _)| *min > score)
            .map(|(min, league)| (*league, *min))
    }
}
