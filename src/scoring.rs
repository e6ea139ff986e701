use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::matcher::EntityMatcher;
use crate::models::{Category, Marketplace, ScoreCard, SignalRecord, SkipReason, SkippedRecord};

pub const MAJOR_FUNDING_POINTS: i64 = 50;
pub const FUNDING_POINTS: i64 = 20;
pub const POINTS_PER_NEW_JOB: i64 = 2;
pub const VSCODE_INSTALLS_PER_POINT: f64 = 10_000.0;
pub const BROWSER_INSTALLS_PER_POINT: f64 = 5_000.0;
pub const NEWS_POINTS: i64 = 5;
pub const SOCIAL_POINTS: i64 = 3;
pub const RELEASE_POINTS: i64 = 10;
pub const RELEASE_WINDOW_DAYS: i64 = 7;

/// Member thresholds checked top-down; first exceeded tier wins.
const COMMUNITY_TIERS: [(f64, i64); 3] = [(50_000.0, 15), (10_000.0, 10), (1_000.0, 5)];

/// What a single record contributed.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Awarded {
        slug: String,
        points: i64,
        explanation: String,
    },
    NoAward,
    Skipped(SkipReason),
}

pub struct ScoringEngine {
    matcher: EntityMatcher,
    roster: Vec<String>,
    funding_major: Vec<Regex>,
    funding_keywords: Vec<String>,
}

impl ScoringEngine {
    pub fn new(config: &Config) -> Result<Self> {
        let funding_major = config
            .keywords
            .funding_major
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map_err(|e| Error::Config(format!("invalid funding pattern '{pattern}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            matcher: EntityMatcher::from_config(config),
            roster: config.slugs().map(str::to_string).collect(),
            funding_major,
            funding_keywords: config.keywords.funding.iter().map(|k| k.to_lowercase()).collect(),
        })
    }

    pub fn matcher(&self) -> &EntityMatcher {
        &self.matcher
    }

    /// Same-day aggregate for every roster entity. Categories are evaluated
    /// in `Category::ALL` order and records within a category in input
    /// order, so explanation lists are stable across runs.
    pub fn score(&self, records: &[SignalRecord], as_of: DateTime<Utc>) -> ScoreCard {
        let mut card = ScoreCard {
            scores: self.roster.iter().map(|s| (s.clone(), 0)).collect(),
            signals: self.roster.iter().map(|s| (s.clone(), Vec::new())).collect(),
            skipped: Vec::new(),
        };
        let mut released: HashSet<String> = HashSet::new();

        for category in Category::ALL {
            for record in records.iter().filter(|r| r.category == category) {
                match self.evaluate(record, as_of) {
                    Outcome::Awarded {
                        slug,
                        points,
                        explanation,
                    } => {
                        if category == Category::Changelog && !released.insert(slug.clone()) {
                            continue;
                        }
                        if let Some(score) = card.scores.get_mut(&slug) {
                            *score = score.saturating_add(points);
                        }
                        if let Some(list) = card.signals.get_mut(&slug) {
                            list.push(explanation);
                        }
                    }
                    Outcome::NoAward => {}
                    Outcome::Skipped(reason) => {
                        match reason {
                            SkipReason::UnresolvedEntity => {
                                debug!("Unattributed {} record: {}", category, record.raw_text)
                            }
                            _ => warn!(
                                "Skipping {} record '{}': {}",
                                category, record.raw_text, reason
                            ),
                        }
                        card.skipped.push(SkippedRecord {
                            category,
                            raw_text: record.raw_text.clone(),
                            reason,
                        });
                    }
                }
            }
        }

        card
    }

    /// Points for one record, independent of every other record.
    pub fn evaluate(&self, record: &SignalRecord, as_of: DateTime<Utc>) -> Outcome {
        let slug = match self.matcher.resolve(record.entity.as_deref(), &record.raw_text) {
            Some(slug) => slug.to_string(),
            None => return Outcome::Skipped(SkipReason::UnresolvedEntity),
        };
        let text = record.raw_text.trim();

        let award = match record.category {
            Category::Funding => self.funding_points(text).map(|points| {
                let label = if points == MAJOR_FUNDING_POINTS {
                    "Major funding"
                } else {
                    "Funding news"
                };
                (points, format!("{label}: {text}"))
            }),
            Category::Hiring => {
                let jobs = match record.numeric_magnitude() {
                    Ok(net) => net.floor() as i64,
                    Err(reason) => return Outcome::Skipped(reason),
                };
                (jobs > 0).then(|| {
                    (
                        jobs.saturating_mul(POINTS_PER_NEW_JOB),
                        format!("+{jobs} new job postings"),
                    )
                })
            }
            Category::MarketplaceInstall => {
                let growth = match record.numeric_magnitude() {
                    Ok(growth) => growth,
                    Err(reason) => return Outcome::Skipped(reason),
                };
                let (divisor, store) = match record.marketplace.unwrap_or_default() {
                    Marketplace::Vscode => (VSCODE_INSTALLS_PER_POINT, "VS Code"),
                    Marketplace::Browser => (BROWSER_INSTALLS_PER_POINT, "browser store"),
                };
                let points = (growth / divisor).floor() as i64;
                (points > 0).then(|| {
                    (points, format!("+{} weekly installs on {store}", growth.round() as i64))
                })
            }
            Category::News => Some((NEWS_POINTS, format!("News: {text}"))),
            Category::Social => Some((SOCIAL_POINTS, format!("Discussion: {text}"))),
            Category::Changelog => {
                let published = match record.timestamp {
                    Some(ts) => ts,
                    None => return Outcome::Skipped(SkipReason::MissingTimestamp),
                };
                let age = (as_of.date_naive() - published.date_naive()).num_days();
                (0..=RELEASE_WINDOW_DAYS)
                    .contains(&age)
                    .then(|| (RELEASE_POINTS, format!("Release: {text}")))
            }
            Category::CommunitySize => {
                let members = match record.numeric_magnitude() {
                    Ok(members) => members,
                    Err(reason) => return Outcome::Skipped(reason),
                };
                community_points(members).map(|points| {
                    (points, format!("{} community members", members.round() as i64))
                })
            }
            Category::Pricing => None,
        };

        match award {
            Some((points, explanation)) => Outcome::Awarded {
                slug,
                points,
                explanation,
            },
            None => Outcome::NoAward,
        }
    }

    fn funding_points(&self, title: &str) -> Option<i64> {
        if self.funding_major.iter().any(|re| re.is_match(title)) {
            return Some(MAJOR_FUNDING_POINTS);
        }
        let lower = title.to_lowercase();
        self.funding_keywords
            .iter()
            .any(|k| lower.contains(k.as_str()))
            .then_some(FUNDING_POINTS)
    }
}

pub fn community_points(members: f64) -> Option<i64> {
    COMMUNITY_TIERS
        .iter()
        .find(|(threshold, _)| members > *threshold)
        .map(|(_, points)| *points)
}

/// Competition ranking by descending score: one plus the number of strictly
/// higher scores, so tied entities share a rank.
pub fn rank_map(scores: &BTreeMap<String, i64>) -> BTreeMap<String, usize> {
    scores
        .iter()
        .map(|(slug, score)| {
            let higher = scores.values().filter(|other| *other > score).count();
            (slug.clone(), higher + 1)
        })
        .collect()
}
