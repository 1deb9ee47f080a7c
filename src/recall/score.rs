//! Memory-strength score composition.
//!
//! The final score is a product of bounded terms plus a small weighted
//! full-text contribution:
//!
//! `cos x recency x importance x strength x freshness x staleness x
//!  quality x around x contradiction + FTS_WEIGHT x fts`

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::{Entry, EntryType, Expiry};

/// Weight of the normalized full-text term.
pub const FTS_WEIGHT: f64 = 0.15;

/// Floor applied to the recall-strength multiplier so never-recalled but
/// important entries do not vanish.
pub const STRENGTH_FLOOR: f64 = 0.5;

/// Default gaussian radius for `around` targeting, in days.
pub const DEFAULT_AROUND_RADIUS_DAYS: f64 = 14.0;

/// Multiplier applied at two or more contradictions.
const CONTRADICTION_PENALTY: f64 = 0.8;

/// Inputs shared by every entry scored in one recall.
#[derive(Debug, Clone, Copy)]
pub struct ScoreContext {
    /// Wall-clock now.
    pub now: DateTime<Utc>,
    /// Reference instant for recency: the `around` target, the `until`
    /// ceiling, or `now`.
    pub effective_now: DateTime<Utc>,
    /// Gaussian target date, when `around` is set.
    pub around: Option<DateTime<Utc>>,
    /// Gaussian radius in days.
    pub around_radius_days: f64,
    /// Pure-cosine mode: every other term forced neutral.
    pub no_boost: bool,
}

/// Per-term breakdown returned alongside each result.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    /// Raw cosine similarity (1.0 on context-only recall).
    pub cosine: f64,
    /// Recency decay term.
    pub recency: f64,
    /// Importance term.
    pub importance: f64,
    /// Recall-strength term before flooring.
    pub recall_strength: f64,
    /// Freshness step boost.
    pub freshness: f64,
    /// Todo staleness decay.
    pub staleness: f64,
    /// Quality band term.
    pub quality: f64,
    /// Normalized full-text score.
    pub fts: f64,
    /// Gaussian around term.
    pub around: f64,
    /// Contradiction penalty.
    pub contradiction_penalty: f64,
    /// Recall-interval spread (diagnostic, not multiplied into the score).
    pub spacing: f64,
}

/// Composes the final score for one entry.
#[must_use]
pub fn score_entry(entry: &Entry, cosine: f64, fts_norm: f64, ctx: &ScoreContext) -> (f64, ScoreBreakdown) {
    if ctx.no_boost {
        let breakdown = ScoreBreakdown {
            cosine,
            recency: 1.0,
            importance: 1.0,
            recall_strength: 1.0,
            freshness: 1.0,
            staleness: 1.0,
            quality: 1.0,
            fts: 0.0,
            around: 1.0,
            contradiction_penalty: 1.0,
            spacing: 1.0,
        };
        return (cosine, breakdown);
    }

    let recency = recency_term(entry, ctx.effective_now);
    let importance = importance_term(entry.importance);
    let strength = strength_term(entry.recall_count, entry.expiry);
    let freshness = freshness_term(entry, ctx);
    let staleness = staleness_term(entry, ctx.now);
    let quality = quality_term(entry);
    let around = around_term(entry, ctx);
    let contradiction = if entry.contradictions >= 2 {
        CONTRADICTION_PENALTY
    } else {
        1.0
    };

    let score = cosine
        * recency
        * importance
        * strength.max(STRENGTH_FLOOR)
        * freshness
        * staleness
        * quality
        * around
        * contradiction
        + FTS_WEIGHT * fts_norm;

    let breakdown = ScoreBreakdown {
        cosine,
        recency,
        importance,
        recall_strength: strength,
        freshness,
        staleness,
        quality,
        fts: fts_norm,
        around,
        contradiction_penalty: contradiction,
        spacing: spacing_term(entry),
    };
    (score, breakdown)
}

/// Browse-mode score: importance and a simple recency term. Ordering in
/// browse mode is importance-first with creation-time tiebreak; this
/// score is the displayed composition.
#[must_use]
pub fn score_browse(entry: &Entry, now: DateTime<Utc>) -> f64 {
    importance_term(entry.importance) * recency_term(entry, now)
}

#[allow(clippy::cast_precision_loss)]
fn age_days(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    let seconds = (to - from).num_seconds().max(0);
    seconds as f64 / 86_400.0
}

fn recency_term(entry: &Entry, effective_now: DateTime<Utc>) -> f64 {
    match entry.expiry.half_life_days() {
        None => 1.0,
        Some(half_life) => {
            let age = age_days(entry.created_at, effective_now);
            (-age / half_life).exp()
        }
    }
}

fn importance_term(importance: u8) -> f64 {
    0.05f64
        .mul_add(f64::from(importance), 0.5)
        .clamp(0.55, 1.0)
}

fn strength_term(recall_count: u32, expiry: Expiry) -> f64 {
    if recall_count == 0 {
        return 0.0;
    }
    let ceiling = f64::from(expiry.recall_ceiling());
    let strength = f64::from(1 + recall_count).log2() / (1.0 + ceiling).log2();
    strength.min(1.0)
}

/// Stepwise boost for fresh, important entries. Inactive when scoring
/// against a shifted reference instant (`around`/`until`): a pre-ceiling
/// entry must not be boosted by its distance from the real now.
fn freshness_term(entry: &Entry, ctx: &ScoreContext) -> f64 {
    if entry.importance < 6 || ctx.effective_now != ctx.now {
        return 1.0;
    }
    let age_hours = age_days(entry.created_at, ctx.now) * 24.0;
    if age_hours <= 1.0 {
        1.5
    } else if age_hours <= 4.0 {
        1.25
    } else if age_hours <= 24.0 {
        1.1
    } else {
        1.0
    }
}

fn staleness_term(entry: &Entry, now: DateTime<Utc>) -> f64 {
    if entry.kind != EntryType::Todo {
        return 1.0;
    }
    let days = age_days(entry.updated_at, now);
    let decay = 0.5f64.powf(days / 7.0);
    let floor = 0.05f64.mul_add(
        f64::from(entry.importance.saturating_sub(7)),
        0.1,
    );
    decay.max(floor)
}

fn quality_term(entry: &Entry) -> f64 {
    0.6f64.mul_add(entry.effective_quality(), 0.7)
}

fn around_term(entry: &Entry, ctx: &ScoreContext) -> f64 {
    let Some(target) = ctx.around else {
        return 1.0;
    };
    let days = (entry.created_at - target).num_seconds().abs();
    #[allow(clippy::cast_precision_loss)]
    let days = days as f64 / 86_400.0;
    let z = days / ctx.around_radius_days.max(f64::EPSILON);
    (-(z * z) / 2.0).exp()
}

/// Spread of the recall-interval log: diagnostic signal for how well the
/// recalls are spaced over distinct days.
fn spacing_term(entry: &Entry) -> f64 {
    if entry.recall_intervals.len() < 2 {
        return 1.0;
    }
    let mut days: Vec<i64> = entry
        .recall_intervals
        .iter()
        .map(|secs| secs / 86_400)
        .collect();
    days.sort_unstable();
    days.dedup();
    #[allow(clippy::cast_precision_loss)]
    let distinct = days.len() as f64;
    0.02f64.mul_add(distinct, 1.0).min(1.2)
}

/// Normalizes a positive BM25-style score into [0, 1).
#[must_use]
pub fn normalize_fts(raw: f64) -> f64 {
    let raw = raw.max(0.0);
    raw / (raw + 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry_at(created: DateTime<Utc>) -> Entry {
        let mut e = Entry::new(
            EntryType::Fact,
            "work",
            "Ships the billing service at work every sprint",
            7,
            Expiry::Permanent,
            created,
        );
        e.updated_at = created;
        e
    }

    fn ctx(now: DateTime<Utc>) -> ScoreContext {
        ScoreContext {
            now,
            effective_now: now,
            around: None,
            around_radius_days: DEFAULT_AROUND_RADIUS_DAYS,
            no_boost: false,
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_recency_core_never_decays() {
        let n = now();
        let mut e = entry_at(n - Duration::days(500));
        e.expiry = Expiry::Core;
        let (_, breakdown) = score_entry(&e, 0.8, 0.0, &ctx(n));
        assert!((breakdown.recency - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_recency_half_life() {
        let n = now();
        let e = entry_at(n - Duration::days(90));
        let (_, breakdown) = score_entry(&e, 0.8, 0.0, &ctx(n));
        // One half-life of a permanent entry: e^-1
        assert!((breakdown.recency - (-1.0f64).exp()).abs() < 1e-6);
    }

    #[test]
    fn test_recency_monotonic_newer_wins() {
        let n = now();
        let older = entry_at(n - Duration::days(60));
        let newer = entry_at(n - Duration::days(5));
        let (s_old, _) = score_entry(&older, 0.8, 0.0, &ctx(n));
        let (s_new, _) = score_entry(&newer, 0.8, 0.0, &ctx(n));
        assert!(s_new >= s_old);
    }

    #[test]
    fn test_importance_clamp() {
        let n = now();
        let mut e = entry_at(n);
        e.importance = 1;
        let (_, b) = score_entry(&e, 1.0, 0.0, &ctx(n));
        assert!((b.importance - 0.55).abs() < f64::EPSILON);
        e.importance = 10;
        let (_, b) = score_entry(&e, 1.0, 0.0, &ctx(n));
        assert!((b.importance - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_strength_zero_and_saturation() {
        assert!(strength_term(0, Expiry::Permanent).abs() < f64::EPSILON);
        // At the ceiling the term saturates at 1.0
        assert!((strength_term(32, Expiry::Permanent) - 1.0).abs() < 1e-9);
        assert!((strength_term(1000, Expiry::SessionOnly) - 1.0).abs() < f64::EPSILON);
        // Diminishing returns: the step from 1 to 2 beats 20 to 21
        let step_low = strength_term(2, Expiry::Permanent) - strength_term(1, Expiry::Permanent);
        let step_high = strength_term(21, Expiry::Permanent) - strength_term(20, Expiry::Permanent);
        assert!(step_low > step_high);
    }

    #[test]
    fn test_strength_floor_in_composition() {
        let n = now();
        let e = entry_at(n - Duration::days(1));
        // Never recalled: raw strength 0, but the floored multiplier keeps
        // the score positive
        let (score, breakdown) = score_entry(&e, 0.9, 0.0, &ctx(n));
        assert!(breakdown.recall_strength.abs() < f64::EPSILON);
        assert!(score > 0.0);
    }

    #[test]
    fn test_freshness_steps() {
        let n = now();
        let cases = [
            (Duration::minutes(30), 1.5),
            (Duration::hours(3), 1.25),
            (Duration::hours(20), 1.1),
            (Duration::days(3), 1.0),
        ];
        for (age, expected) in cases {
            let e = entry_at(n - age);
            let (_, b) = score_entry(&e, 1.0, 0.0, &ctx(n));
            assert!(
                (b.freshness - expected).abs() < f64::EPSILON,
                "age {age:?}: got {}",
                b.freshness
            );
        }
    }

    #[test]
    fn test_freshness_requires_importance() {
        let n = now();
        let mut e = entry_at(n - Duration::minutes(10));
        e.importance = 5;
        let (_, b) = score_entry(&e, 1.0, 0.0, &ctx(n));
        assert!((b.freshness - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_freshness_inactive_under_shifted_reference() {
        let n = now();
        let e = entry_at(n - Duration::minutes(10));
        let shifted = ScoreContext {
            effective_now: n - Duration::days(10),
            ..ctx(n)
        };
        let (_, b) = score_entry(&e, 1.0, 0.0, &shifted);
        assert!((b.freshness - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_todo_staleness_floor_rises_with_importance() {
        let n = now();
        let mut e = entry_at(n - Duration::days(365));
        e.kind = EntryType::Todo;
        e.importance = 7;
        let (_, b) = score_entry(&e, 1.0, 0.0, &ctx(n));
        assert!((b.staleness - 0.1).abs() < 1e-9);

        e.importance = 9;
        let (_, b) = score_entry(&e, 1.0, 0.0, &ctx(n));
        assert!((b.staleness - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_quality_band() {
        let n = now();
        let mut e = entry_at(n);
        e.quality_score = Some(0.0);
        let (_, b) = score_entry(&e, 1.0, 0.0, &ctx(n));
        assert!((b.quality - 0.7).abs() < f64::EPSILON);
        e.quality_score = Some(1.0);
        let (_, b) = score_entry(&e, 1.0, 0.0, &ctx(n));
        assert!((b.quality - 1.3).abs() < f64::EPSILON);
        e.quality_score = None;
        let (_, b) = score_entry(&e, 1.0, 0.0, &ctx(n));
        assert!((b.quality - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_around_gaussian() {
        let n = now();
        let target = n - Duration::days(30);
        let on_target = entry_at(target);
        let off_target = entry_at(target + Duration::days(10));
        let around_ctx = ScoreContext {
            effective_now: target,
            around: Some(target),
            around_radius_days: 7.0,
            ..ctx(n)
        };
        let (_, on) = score_entry(&on_target, 1.0, 0.0, &around_ctx);
        let (_, off) = score_entry(&off_target, 1.0, 0.0, &around_ctx);
        assert!((on.around - 1.0).abs() < 1e-9);
        assert!(off.around < 0.5);
    }

    #[test]
    fn test_contradiction_penalty() {
        let n = now();
        let mut e = entry_at(n);
        e.contradictions = 1;
        let (_, b) = score_entry(&e, 1.0, 0.0, &ctx(n));
        assert!((b.contradiction_penalty - 1.0).abs() < f64::EPSILON);
        e.contradictions = 2;
        let (_, b) = score_entry(&e, 1.0, 0.0, &ctx(n));
        assert!((b.contradiction_penalty - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_no_boost_pure_cosine() {
        let n = now();
        let mut e = entry_at(n - Duration::days(400));
        e.contradictions = 5;
        e.quality_score = Some(0.1);
        let no_boost = ScoreContext {
            no_boost: true,
            ..ctx(n)
        };
        let (score, b) = score_entry(&e, 0.42, 0.9, &no_boost);
        assert!((score - 0.42).abs() < f64::EPSILON);
        assert!((b.fts).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fts_contribution() {
        let n = now();
        let e = entry_at(n);
        let (without, _) = score_entry(&e, 0.5, 0.0, &ctx(n));
        let (with, b) = score_entry(&e, 0.5, 0.8, &ctx(n));
        assert!((with - without - FTS_WEIGHT * 0.8).abs() < 1e-9);
        assert!((b.fts - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn test_normalize_fts() {
        assert!(normalize_fts(0.0).abs() < f64::EPSILON);
        assert!((normalize_fts(1.0) - 0.5).abs() < f64::EPSILON);
        assert!(normalize_fts(100.0) < 1.0);
        assert!(normalize_fts(-5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_browse_score_orders_by_importance() {
        let n = now();
        let mut high = entry_at(n - Duration::days(10));
        high.importance = 9;
        let mut low = entry_at(n - Duration::days(1));
        low.importance = 5;
        assert!(score_browse(&high, n) > score_browse(&low, n));
    }
}
