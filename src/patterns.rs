//! Cross-source pattern correlation.
//!
//! Works on the raw signal batch rather than on scores so it can combine
//! categories the scorer sums away. Each pattern is computed on its own and
//! simply yields nothing when its inputs are absent.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::config::{Config, Keywords, PatternThresholds};
use crate::history::Series;
use crate::matcher::EntityMatcher;
use crate::models::{Category, Pattern, PatternKind, SignalRecord};
use crate::scoring::rank_map;

#[derive(Debug, Clone, Copy)]
pub struct PatternInputs<'a> {
    pub as_of: DateTime<Utc>,
    pub records: &'a [SignalRecord],
    /// Current open roles per entity.
    pub hiring: &'a BTreeMap<String, i64>,
    pub momentum: &'a Series,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Negative,
    Positive,
    Neutral,
}

pub struct PatternCorrelator {
    thresholds: PatternThresholds,
    keywords: Keywords,
    matcher: EntityMatcher,
}

impl PatternCorrelator {
    pub fn new(config: &Config) -> Self {
        let mut keywords = config.keywords.clone();
        for list in [&mut keywords.negative, &mut keywords.positive] {
            for word in list.iter_mut() {
                *word = word.to_lowercase();
            }
        }
        Self {
            thresholds: config.patterns.clone(),
            keywords,
            matcher: EntityMatcher::from_config(config),
        }
    }

    /// All patterns, strongest first; patterns without a strength go last.
    pub fn correlate(&self, inputs: &PatternInputs<'_>) -> Vec<Pattern> {
        let mut patterns = self.expansion(inputs);
        patterns.extend(self.pricing_activity(inputs.records, inputs.as_of));
        patterns.extend(self.feature_convergence(inputs.records, inputs.as_of));
        patterns.extend(self.market_shift(inputs.momentum));
        patterns.extend(self.sentiment_mismatch(inputs.records));
        patterns.extend(self.themes(inputs.records));
        patterns.sort_by(|a, b| b.strength.cmp(&a.strength));
        debug!("Correlated {} patterns", patterns.len());
        patterns
    }

    /// Heavy hiring alongside a fresh release or an install spike.
    pub fn expansion(&self, inputs: &PatternInputs<'_>) -> Vec<Pattern> {
        let t = &self.thresholds;
        let growth = self.install_growth(inputs.records);
        let mut releases: BTreeMap<String, usize> = BTreeMap::new();
        for record in self.recent(inputs.records, Category::Changelog, inputs.as_of, t.release_window_days) {
            if let Some(slug) = self.attribute(record) {
                *releases.entry(slug).or_insert(0) += 1;
            }
        }

        let mut patterns: Vec<Pattern> = inputs
            .hiring
            .iter()
            .filter(|(_, jobs)| **jobs >= t.expansion_min_hiring)
            .filter_map(|(slug, jobs)| {
                let release_count = releases.get(slug).copied().unwrap_or(0);
                let weekly = growth.get(slug).copied().unwrap_or(0.0);
                let spiking = weekly > t.install_spike as f64;
                if release_count == 0 && !spiking {
                    return None;
                }

                let mut evidence = vec![format!("{jobs} open roles")];
                let mut strength = 3;
                if release_count > 0 {
                    strength += 2;
                    evidence.push(format!(
                        "{release_count} release(s) in the last {} days",
                        t.release_window_days
                    ));
                }
                if spiking {
                    strength += 2;
                    evidence.push(format!("+{} weekly installs", weekly.round() as i64));
                }
                Some(Pattern {
                    kind: PatternKind::Expansion,
                    entities: vec![slug.clone()],
                    strength: Some(strength),
                    summary: format!("{slug} is expanding: hiring while shipping or gaining users"),
                    evidence,
                })
            })
            .collect();

        patterns.sort_by(|a, b| b.strength.cmp(&a.strength));
        patterns
    }

    /// One aggregate pattern when enough entities moved pricing together.
    pub fn pricing_activity(&self, records: &[SignalRecord], as_of: DateTime<Utc>) -> Option<Pattern> {
        let t = &self.thresholds;
        let mut entities = BTreeSet::new();
        let mut evidence = Vec::new();
        for record in self.recent(records, Category::Pricing, as_of, t.pricing_window_days) {
            if let Some(slug) = self.attribute(record) {
                entities.insert(slug);
                evidence.push(record.raw_text.clone());
            }
        }
        if entities.len() < t.pricing_min_entities {
            return None;
        }
        Some(Pattern {
            kind: PatternKind::PricingActivity,
            strength: Some(entities.len() as i64),
            summary: format!(
                "{} competitors changed pricing in the last {} days",
                entities.len(),
                t.pricing_window_days
            ),
            entities: entities.into_iter().collect(),
            evidence,
        })
    }

    /// Feature buckets that several entities shipped into.
    pub fn feature_convergence(&self, records: &[SignalRecord], as_of: DateTime<Utc>) -> Vec<Pattern> {
        let t = &self.thresholds;
        let releases: Vec<(String, String)> = self
            .recent(records, Category::Changelog, as_of, t.convergence_window_days)
            .filter_map(|r| self.attribute(r).map(|slug| (slug, r.raw_text.to_lowercase())))
            .collect();

        self.keywords
            .features
            .iter()
            .filter_map(|bucket| {
                let entities: BTreeSet<&str> = releases
                    .iter()
                    .filter(|(_, text)| bucket.matches(text))
                    .map(|(slug, _)| slug.as_str())
                    .collect();
                if entities.len() < t.convergence_min_entities {
                    return None;
                }
                Some(Pattern {
                    kind: PatternKind::FeatureConvergence,
                    strength: Some(entities.len() as i64),
                    summary: format!(
                        "{} competitors shipped {} features",
                        entities.len(),
                        bucket.name
                    ),
                    entities: entities.into_iter().map(str::to_string).collect(),
                    evidence: vec![bucket.name.clone()],
                })
            })
            .collect()
    }

    /// Several entities changing momentum rank at once.
    pub fn market_shift(&self, momentum: &Series) -> Option<Pattern> {
        let (previous, latest) = momentum.last_two()?;
        let t = &self.thresholds;
        let before = rank_map(&previous.scores);
        let now = rank_map(&latest.scores);

        let movers: Vec<(String, usize, usize)> = now
            .iter()
            .filter_map(|(slug, &rank)| {
                let old = *before.get(slug)?;
                let changed = previous.scores.get(slug) != latest.scores.get(slug);
                (changed && old.abs_diff(rank) >= t.rank_shift).then(|| (slug.clone(), old, rank))
            })
            .collect();
        if movers.len() < t.market_shift_min_movers {
            return None;
        }

        Some(Pattern {
            kind: PatternKind::MarketShift,
            strength: Some(movers.len() as i64),
            summary: format!("{} competitors changed momentum rank sharply", movers.len()),
            evidence: movers
                .iter()
                .map(|(slug, old, rank)| format!("{slug}: #{old} -> #{rank}"))
                .collect(),
            entities: movers.into_iter().map(|(slug, _, _)| slug).collect(),
        })
    }

    /// Discussion tone pointing one way while installs go the other.
    pub fn sentiment_mismatch(&self, records: &[SignalRecord]) -> Vec<Pattern> {
        let growth = self.install_growth(records);
        let mut tone: BTreeMap<String, (i64, i64)> = BTreeMap::new();
        for record in records.iter().filter(|r| r.category == Category::Social) {
            let Some(slug) = self.attribute(record) else {
                continue;
            };
            let points = post_weight(record);
            let entry = tone.entry(slug).or_insert((0, 0));
            match self.polarity(&record.raw_text) {
                Polarity::Negative => entry.0 = entry.0.saturating_add(points),
                Polarity::Positive => entry.1 = entry.1.saturating_add(points),
                Polarity::Neutral => {}
            }
        }

        tone.into_iter()
            .filter_map(|(slug, (negative, positive))| {
                let weekly = *growth.get(&slug)?;
                let summary = if negative > positive && weekly > 0.0 {
                    format!("{slug} draws criticism yet installs keep growing")
                } else if positive > negative && weekly < 0.0 {
                    format!("{slug} is praised in discussions while installs decline")
                } else {
                    return None;
                };
                Some(Pattern {
                    kind: PatternKind::SentimentMismatch,
                    entities: vec![slug],
                    strength: Some(negative.saturating_sub(positive).saturating_abs()),
                    summary,
                    evidence: vec![
                        format!("negative {negative} pts, positive {positive} pts"),
                        format!("weekly installs {:+}", weekly.round() as i64),
                    ],
                })
            })
            .collect()
    }

    /// Top discussion themes by summed points, attributed or not.
    pub fn themes(&self, records: &[SignalRecord]) -> Vec<Pattern> {
        struct Theme<'r> {
            weight: i64,
            posts: usize,
            entities: BTreeSet<String>,
            top: Option<(i64, &'r str)>,
        }

        let mut themes: Vec<(usize, Theme<'_>)> = Vec::new();
        for (idx, bucket) in self.keywords.themes.iter().enumerate() {
            let mut theme = Theme {
                weight: 0,
                posts: 0,
                entities: BTreeSet::new(),
                top: None,
            };
            for record in records.iter().filter(|r| r.category == Category::Social) {
                if !bucket.matches(&record.raw_text.to_lowercase()) {
                    continue;
                }
                let points = post_weight(record);
                theme.weight = theme.weight.saturating_add(points);
                theme.posts += 1;
                if theme.top.map_or(true, |(best, _)| points > best) {
                    theme.top = Some((points, record.raw_text.as_str()));
                }
                if let Some(slug) = self.attribute(record) {
                    theme.entities.insert(slug);
                }
            }
            if theme.posts > 0 {
                themes.push((idx, theme));
            }
        }

        themes.sort_by(|a, b| b.1.weight.cmp(&a.1.weight).then_with(|| a.0.cmp(&b.0)));
        themes
            .into_iter()
            .take(self.thresholds.top_themes)
            .map(|(idx, theme)| {
                let name = &self.keywords.themes[idx].name;
                Pattern {
                    kind: PatternKind::Theme,
                    entities: theme.entities.into_iter().collect(),
                    strength: Some(theme.weight),
                    summary: format!("{name}: {} discussions, {} points", theme.posts, theme.weight),
                    evidence: theme.top.map(|(_, title)| title.to_string()).into_iter().collect(),
                }
            })
            .collect()
    }

    /// Negative keywords are checked before positive ones; first hit wins.
    pub fn polarity(&self, text: &str) -> Polarity {
        let lower = text.to_lowercase();
        if self.keywords.negative.iter().any(|w| lower.contains(w.as_str())) {
            Polarity::Negative
        } else if self.keywords.positive.iter().any(|w| lower.contains(w.as_str())) {
            Polarity::Positive
        } else {
            Polarity::Neutral
        }
    }

    fn attribute(&self, record: &SignalRecord) -> Option<String> {
        self.matcher
            .resolve(record.entity.as_deref(), &record.raw_text)
            .map(str::to_string)
    }

    fn install_growth(&self, records: &[SignalRecord]) -> BTreeMap<String, f64> {
        let mut growth = BTreeMap::new();
        for record in records.iter().filter(|r| r.category == Category::MarketplaceInstall) {
            let (Some(slug), Ok(weekly)) = (self.attribute(record), record.numeric_magnitude()) else {
                continue;
            };
            *growth.entry(slug).or_insert(0.0) += weekly;
        }
        growth
    }

    fn recent<'r>(
        &self,
        records: &'r [SignalRecord],
        category: Category,
        as_of: DateTime<Utc>,
        window_days: i64,
    ) -> impl Iterator<Item = &'r SignalRecord> {
        let window = Duration::days(window_days);
        records.iter().filter(move |r| {
            r.category == category
                && r.timestamp
                    .map(|ts| ts <= as_of && as_of - ts <= window)
                    .unwrap_or(false)
        })
    }
}

/// Discussion points; a post without a usable score counts once.
fn post_weight(record: &SignalRecord) -> i64 {
    record
        .numeric_magnitude()
        .map(|points| points.round() as i64)
        .unwrap_or(1)
}
