//! Derived values written back to fundraising pages: activity and donation
//! streaks, and a running total split at an event start.

use crate::config::{FundraiserExtensionsConfig, SplitTotalsConfig, TeamExtensionsConfig};
use crate::errors::ExtensionError;
use crate::patch::Patch;
use crate::streaks::{EpochDays, StreakState, include_donation, include_exercise_log};
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::{Number, Value};
use upstream::metrics_defs::STREAK_THRESHOLDS_AWARDED;
use upstream::{Campaign, Donation, ExerciseLogEntry, FundraisingPage, counter};

/// Inside this many hours before the start a recorded "before" total is never
/// lowered.
const SPLIT_GUARD_HOURS: i64 = 24;

fn award_streak<'a>(
    streak: &'static str,
    page: &FundraisingPage,
    thresholds: &[u32],
    mapping: &str,
    timestamps: impl IntoIterator<Item = &'a str>,
    patch: &mut Patch,
) {
    let Some(configured_max) = thresholds.iter().copied().max() else {
        return;
    };
    let current = page.source.string_at(mapping).unwrap_or_default();
    let mut state = StreakState::parse(&current);
    if state.max_awarded() >= configured_max {
        return;
    }

    let run = EpochDays::from_timestamps(timestamps).longest_run();
    if run <= state.max_awarded() {
        return;
    }

    let added = state.award(run, thresholds);
    if state.as_str() != current {
        tracing::debug!(streak, run, awarded = %state, "Awarding streak thresholds");
        counter!(STREAK_THRESHOLDS_AWARDED, "streak" => streak).increment(added.len() as u64);
        patch.set(mapping, Value::String(state.to_string()));
    }
}

/// Writes the running total into the before or after field depending on
/// which side of the start `now` falls.
///
/// A recorded before total is only protected from decreases during the
/// [`SPLIT_GUARD_HOURS`] leading up to the start. Earlier than that a lower
/// total is written, so corrections made well ahead of the start still land.
fn split_total(
    config: &SplitTotalsConfig,
    campaign: &Campaign,
    page: &FundraisingPage,
    now: DateTime<Utc>,
    patch: &mut Patch,
) -> Result<(), ExtensionError> {
    let Some(start) = campaign.page_default(&config.from) else {
        tracing::debug!(label = %config.from, "No start time configured for split totals");
        return Ok(());
    };
    let start = DateTime::parse_from_rfc3339(start)
        .map_err(|source| ExtensionError::InvalidStart {
            label: config.from.clone(),
            value: start.to_string(),
            source,
        })?
        .to_utc();

    let Some(total) = page.source.int_at(&config.source) else {
        return Ok(());
    };

    let target = if now < start {
        config.before()
    } else {
        config.after()
    };
    let recorded = page.source.int_at(target);
    if recorded == Some(total) {
        return Ok(());
    }

    if now < start
        && now >= start - TimeDelta::hours(SPLIT_GUARD_HOURS)
        && let Some(recorded) = recorded
        && total < recorded
    {
        tracing::warn!(
            field = %target,
            recorded,
            total,
            "Refusing to lower total shortly before the start"
        );
        return Ok(());
    }

    patch.set(target, Value::Number(Number::from(total)));
    Ok(())
}

/// Computes the fundraiser's patch. Streaks first, then the split total.
pub fn apply_fundraiser_extensions(
    config: &FundraiserExtensionsConfig,
    campaign: &Campaign,
    page: &FundraisingPage,
    exercise_logs: &[ExerciseLogEntry],
    donations: &[Donation],
    now: DateTime<Utc>,
) -> Result<Patch, ExtensionError> {
    let mut patch = Patch::new();

    let activity = &config.streaks.activity;
    award_streak(
        "activity",
        page,
        &activity.days,
        &activity.mapping,
        exercise_logs
            .iter()
            .filter(|log| include_exercise_log(log, activity))
            .map(|log| log.date.as_str()),
        &mut patch,
    );

    let donation = &config.streaks.donation;
    award_streak(
        "donation",
        page,
        &donation.days,
        &donation.mapping,
        donations
            .iter()
            .filter(|d| include_donation(d))
            .map(Donation::effective_timestamp),
        &mut patch,
    );

    if let Some(split) = &config.split_totals {
        split_total(split, campaign, page, now, &mut patch)?;
    }
    Ok(patch)
}

/// Computes the patch for a team's own page.
pub fn apply_team_extensions(
    config: &TeamExtensionsConfig,
    campaign: &Campaign,
    team_page: &FundraisingPage,
    now: DateTime<Utc>,
) -> Result<Patch, ExtensionError> {
    let mut patch = Patch::new();
    if let Some(split) = &config.split_totals {
        split_total(split, campaign, team_page, now, &mut patch)?;
    }
    Ok(patch)
}
