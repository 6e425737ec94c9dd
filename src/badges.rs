// Badge unlock registry.
//
// Every rule is a pure predicate over ChildProgress. Evaluation runs to a fixed
// point on a scratch copy: a bonus granted by one badge can cross the score
// threshold of another, and that second badge must land in the same event.

use std::collections::HashSet;

use crate::error::ValidationError;
use crate::league::add_score;
use crate::{ChildProgress, TaskKind};

/// What a child has to reach for a badge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    ScoreAtLeast(u64),
    BestStreakAtLeast(u32),
    FirstTask(TaskKind),
    AllFirstTasks,
    LoginsAtLeast(u32),
    JournalEntriesAtLeast(u32),
}

impl Requirement {
    pub fn is_met(&self, state: &ChildProgress) -> bool {
        match *self {
            Requirement::ScoreAtLeast(min) => state.leadership_score >= min,
            // Best, not current: a broken streak must not make the rule flicker
            Requirement::BestStreakAtLeast(min) => state.best_streak >= min,
            Requirement::FirstTask(kind) => state.first_tasks.get(kind),
            Requirement::AllFirstTasks => state.first_tasks.all_done(),
            Requirement::LoginsAtLeast(min) => state.counters.logins >= min,
            Requirement::JournalEntriesAtLeast(min) => state.counters.journal_entries >= min,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BadgeRule {
    pub id: &'static str,
    pub name: &'static str,
    /// Added to leadership_score together with the grant
    pub bonus: u64,
    pub requirement: Requirement,
}

impl BadgeRule {
    const fn new(id: &'static str, name: &'static str, bonus: u64, requirement: Requirement) -> Self {
        Self { id, name, bonus, requirement }
    }
}

/// Default badge catalogue
pub fn default_badge_rules() -> Vec<BadgeRule> {
    vec![
        // Score milestones
        BadgeRule::new("score_1000", "Rising Leader", 250, Requirement::ScoreAtLeast(1_000)),
        BadgeRule::new("score_5000", "Steady Leader", 500, Requirement::ScoreAtLeast(5_000)),
        BadgeRule::new("score_10000", "Shining Leader", 750, Requirement::ScoreAtLeast(10_000)),

        // Streaks
        BadgeRule::new("streak_3", "Three in a Row", 100, Requirement::BestStreakAtLeast(3)),
        BadgeRule::new("streak_7", "Week of Feelings", 300, Requirement::BestStreakAtLeast(7)),
        BadgeRule::new("streak_30", "Month of Calm", 1_000, Requirement::BestStreakAtLeast(30)),

        // First tasks
        BadgeRule::new("explorer", "Explorer", 300, Requirement::AllFirstTasks),

        // Journaling and showing up
        BadgeRule::new("journal_5", "Feelings Writer", 200, Requirement::JournalEntriesAtLeast(5)),
        BadgeRule::new("journal_20", "Feelings Author", 500, Requirement::JournalEntriesAtLeast(20)),
        BadgeRule::new("logins_10", "Regular Visitor", 150, Requirement::LoginsAtLeast(10)),
    ]
}

/// Result of one evaluation; apply it whole or not at all
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BadgeEvaluation {
    pub newly_granted: Vec<String>,
    pub score_bonus: u64,
}

impl BadgeEvaluation {
    pub fn is_empty(&self) -> bool {
        self.newly_granted.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BadgeRegistry {
    rules: Vec<BadgeRule>,
}

impl Default for BadgeRegistry {
    fn default() -> Self {
        BadgeRegistry { rules: default_badge_rules() }
    }
}

impl BadgeRegistry {
    pub fn new(rules: Vec<BadgeRule>) -> Result<Self, ValidationError> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if !seen.insert(rule.id) {
                return Err(ValidationError::DuplicateBadge(rule.id.to_string()));
            }
        }
        Ok(BadgeRegistry { rules })
    }

    pub fn rule(&self, badge_id: &str) -> Option<&BadgeRule> {
        self.rules.iter().find(|r| r.id == badge_id)
    }

    /// Held badges must all be known and unique
    pub fn check_known(&self, state: &ChildProgress) -> Result<(), ValidationError> {
        let mut seen = HashSet::new();
        for badge in &state.unlocked_badges {
            if self.rule(badge).is_none() {
                return Err(ValidationError::UnknownBadge(badge.clone()));
            }
            if !seen.insert(badge.as_str()) {
                return Err(ValidationError::MalformedState(format!("badge {} held twice", badge)));
            }
        }
        Ok(())
    }

    /// Badges that newly qualify, evaluated to a fixed point. Does not mutate `state`.
    pub fn evaluate(&self, state: &ChildProgress) -> Result<BadgeEvaluation, ValidationError> {
        self.check_known(state)?;

        let mut scratch = state.clone();
        let mut evaluation = BadgeEvaluation::default();
        loop {
            let mut granted_this_pass = false;
            for rule in &self.rules {
                if scratch.has_badge(rule.id) || !rule.requirement.is_met(&scratch) {
                    continue;
                }
                grant_into(&mut scratch, &mut evaluation, rule);
                granted_this_pass = true;
            }
            if !granted_this_pass {
                break;
            }
        }
        Ok(evaluation)
    }

    /// Explicit single-badge grant; already held is an empty evaluation, not an error
    pub fn grant(&self, state: &ChildProgress, badge_id: &str) -> Result<BadgeEvaluation, ValidationError> {
        let rule = self
            .rule(badge_id)
            .ok_or_else(|| ValidationError::UnknownBadge(badge_id.to_string()))?;
        self.check_known(state)?;

        let mut evaluation = BadgeEvaluation::default();
        if !state.has_badge(rule.id) {
            let mut scratch = state.clone();
            grant_into(&mut scratch, &mut evaluation, rule);
        }
        Ok(evaluation)
    }

    /// Apply ids and bonus together
    pub fn apply(&self, state: &mut ChildProgress, evaluation: &BadgeEvaluation) {
        for badge in &evaluation.newly_granted {
            if !state.has_badge(badge) {
                state.unlocked_badges.push(badge.clone());
            }
        }
        state.leadership_score = add_score(state.leadership_score, evaluation.score_bonus);
    }
}

fn grant_into(scratch: &mut ChildProgress, evaluation: &mut BadgeEvaluation, rule: &BadgeRule) {
    scratch.unlocked_badges.push(rule.id.to_string());
    scratch.leadership_score = add_score(scratch.leadership_score, rule.bonus);
    evaluation.newly_granted.push(rule.id.to_string());
    evaluation.score_bonus = add_score(evaluation.score_bonus, rule.bonus);
}
