// Journal aggregation: dedup, per-day buckets, weekly trend.
//
// Read-only over a snapshot of entries. Bucketing compares DateKeys only, so
// there is no time-of-day or timezone comparison that could drop a boundary day.

use std::collections::{HashMap, HashSet};

use spacetimedb::SpacetimeType;

use crate::calendar::{week_start, DateKey, DateRange};
use crate::error::ValidationError;
use crate::JournalEntry;

pub const MIN_INTENSITY: u8 = 1;
pub const MAX_INTENSITY: u8 = 5;

/// Week-over-week mean intensity change below this counts as stable
pub const TREND_EPSILON: f32 = 0.25;

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Afternoon => "afternoon",
            TimeOfDay::Evening => "evening",
            TimeOfDay::Night => "night",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        match s.trim().to_lowercase().as_str() {
            "morning" => Ok(TimeOfDay::Morning),
            "afternoon" => Ok(TimeOfDay::Afternoon),
            "evening" => Ok(TimeOfDay::Evening),
            "night" => Ok(TimeOfDay::Night),
            other => Err(ValidationError::MalformedPayload(format!("unknown time of day '{}'", other))),
        }
    }
}

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Improving,
    Worsening,
    Stable,
    Mixed,
    InsufficientData,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Improving => "improving",
            Trend::Worsening => "worsening",
            Trend::Stable => "stable",
            Trend::Mixed => "mixed",
            Trend::InsufficientData => "insufficient_data",
        }
    }
}

/// Deduplication key: entries sharing one are the same entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    Created(i64),
    Headline(DateKey, String),
}

fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

impl JournalEntry {
    /// Creation timestamp when known, else the day plus a content fingerprint
    pub fn identity_key(&self) -> IdentityKey {
        match self.created_at_micros {
            Some(micros) => IdentityKey::Created(micros),
            None => IdentityKey::Headline(self.occurred_on, self.headline()),
        }
    }

    /// Normalised fingerprint used when no creation timestamp exists
    pub fn headline(&self) -> String {
        let emotions: Vec<String> = self.emotions.iter().map(|e| normalize_label(e)).collect();
        format!(
            "{}|{}|{}|{}",
            self.time_of_day.as_str(),
            emotions.join(","),
            self.intensity,
            normalize_label(&self.trigger)
        )
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !(MIN_INTENSITY..=MAX_INTENSITY).contains(&self.intensity) {
            return Err(ValidationError::IntensityOutOfRange(self.intensity));
        }
        if self.emotions.is_empty() {
            return Err(ValidationError::EmptyEmotions);
        }
        if self.emotions.iter().any(|e| e.trim().is_empty()) {
            return Err(ValidationError::BlankEmotion);
        }
        self.occurred_on.to_naive()?;
        Ok(())
    }
}

/// Deduplicated per-day view of journal entries
#[derive(Debug, Clone, PartialEq)]
pub struct DayBucket {
    pub date: DateKey,
    pub entries: Vec<JournalEntry>,
    /// 0 for an empty day
    pub average_intensity: f32,
    pub dominant_emotion: Option<String>,
}

impl DayBucket {
    fn from_entries(date: DateKey, entries: Vec<JournalEntry>) -> Self {
        DayBucket {
            date,
            average_intensity: mean_intensity(&entries).unwrap_or(0.0),
            dominant_emotion: dominant_emotion(&entries),
            entries,
        }
    }
}

fn mean_intensity(entries: &[JournalEntry]) -> Option<f32> {
    if entries.is_empty() {
        return None;
    }
    let total: u32 = entries.iter().map(|e| e.intensity as u32).sum();
    Some(total as f32 / entries.len() as f32)
}

/// Most frequent label; ties go to the label seen first in entry order
pub fn dominant_emotion(entries: &[JournalEntry]) -> Option<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut first_seen: Vec<String> = Vec::new();
    for label in entries.iter().flat_map(|e| e.emotions.iter()) {
        let label = normalize_label(label);
        let count = counts.entry(label.clone()).or_insert(0);
        if *count == 0 {
            first_seen.push(label);
        }
        *count += 1;
    }

    let best = counts.values().copied().max()?;
    first_seen.into_iter().find(|label| counts[label] == best)
}

/// First occurrence of each identity key, in input order
pub fn dedup(entries: &[JournalEntry]) -> Vec<&JournalEntry> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter(|e| seen.insert(e.identity_key()))
        .collect()
}

/// One bucket per day of `range`, empty days included
pub fn aggregate(entries: &[JournalEntry], range: DateRange) -> Result<Vec<DayBucket>, ValidationError> {
    let mut by_day: HashMap<DateKey, Vec<JournalEntry>> = HashMap::new();
    for entry in dedup(entries) {
        if range.contains(entry.occurred_on) {
            by_day.entry(entry.occurred_on).or_default().push(entry.clone());
        }
    }

    Ok(range
        .days()?
        .into_iter()
        .map(|date| DayBucket::from_entries(date, by_day.remove(&date).unwrap_or_default()))
        .collect())
}

/// Day buckets of one Sunday-start week
#[derive(Debug, Clone, PartialEq)]
pub struct WeekBucket {
    pub week_start: DateKey,
    pub days: Vec<DayBucket>,
    pub entry_count: usize,
    /// Mean over every entry in the week; None when the week is empty
    pub average_intensity: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyAggregate {
    pub weeks: Vec<WeekBucket>,
    pub trend: Trend,
}

impl WeeklyAggregate {
    pub fn active_weeks(&self) -> usize {
        self.weeks.iter().filter(|w| w.entry_count > 0).count()
    }
}

/// Group day buckets by week and classify the intensity trend across weeks
pub fn aggregate_weekly(mut days: Vec<DayBucket>, epsilon: f32) -> Result<WeeklyAggregate, ValidationError> {
    days.sort_by_key(|d| d.date);

    let mut weeks: Vec<WeekBucket> = Vec::new();
    for day in days {
        let start = week_start(day.date)?;
        if weeks.last().map(|w| w.week_start) != Some(start) {
            weeks.push(WeekBucket { week_start: start, days: Vec::new(), entry_count: 0, average_intensity: None });
        }
        if let Some(week) = weeks.last_mut() {
            week.days.push(day);
        }
    }

    for week in &mut weeks {
        let entries: Vec<JournalEntry> = week.days.iter().flat_map(|d| d.entries.iter().cloned()).collect();
        week.entry_count = entries.len();
        week.average_intensity = mean_intensity(&entries);
    }

    let means: Vec<f32> = weeks.iter().filter_map(|w| w.average_intensity).collect();
    Ok(WeeklyAggregate { trend: classify_trend(&means, epsilon), weeks })
}

/// Compare the first half of weekly means against the second half.
/// Lower intensity is better, so a drop reads as improving.
pub fn classify_trend(week_means: &[f32], epsilon: f32) -> Trend {
    if week_means.len() < 2 {
        return Trend::InsufficientData;
    }

    let split = week_means.len() / 2;
    let (first, second) = week_means.split_at(split);
    let mean = |xs: &[f32]| xs.iter().sum::<f32>() / xs.len() as f32;
    let delta = mean(second) - mean(first);

    if delta.abs() < epsilon {
        return Trend::Stable;
    }

    let rose = week_means.windows(2).any(|w| w[1] - w[0] > epsilon);
    let fell = week_means.windows(2).any(|w| w[0] - w[1] > epsilon);
    if rose && fell {
        Trend::Mixed
    } else if delta < 0.0 {
        Trend::Improving
    } else {
        Trend::Worsening
    }
}
