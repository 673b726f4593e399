//! Sync configuration as authored in YAML, and its validation.

use crate::errors::{MappingError, TransformError};
use crate::field_id::FieldScope;
use crate::mappings::{FieldMappings, RawFieldMappings};
use crate::transforms::{validate_fundraiser_transforms, validate_team_transforms};
use chrono::DateTime;
use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;
use upstream::FetchPlan;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("invalid field mappings: {0}")]
    Mapping(#[from] MappingError),

    #[error("invalid {table} transforms: {source}")]
    Transform {
        table: &'static str,
        #[source]
        source: TransformError,
    },

    #[error("{table} transform references unmapped field {field}")]
    UnmappedTransformField { table: &'static str, field: String },

    #[error("{streak} streak threshold {days} must be between 1 and 999")]
    StreakThreshold { streak: &'static str, days: u32 },

    #[error("{streak} streak has thresholds but no mapping")]
    StreakMapping { streak: &'static str },

    #[error("activity streak window bound {0:?} is not an RFC 3339 timestamp")]
    StreakWindow(String),

    #[error("split totals need exactly two mappings, found {0}")]
    SplitMappings(usize),

    #[error("activities.{0} is required for the activities target")]
    MissingActivitiesSetting(&'static str),

    #[error("campaign_id is required")]
    MissingCampaignId,
}

/// Where mapped records are sent.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    #[default]
    Contacts,
    Activities,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ActivitiesConfig {
    /// Field the CRM merges people by, e.g. `str:cm:p2p-id`
    pub merge_field: String,
    pub activity_id: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FundraiserMappingsConfig {
    pub builtin: RawFieldMappings,
    pub custom: RawFieldMappings,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TeamMappingsConfig {
    pub custom: RawFieldMappings,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct ActivityStreakConfig {
    /// Ignore logs before this time
    pub from: Option<String>,
    /// Ignore logs after this time
    pub to: Option<String>,
    /// Activity types that count; all types when empty
    pub filter: Vec<String>,
    pub days: Vec<u32>,
    /// Page path holding the awarded thresholds
    pub mapping: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct DonationStreakConfig {
    pub days: Vec<u32>,
    pub mapping: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreaksConfig {
    pub activity: ActivityStreakConfig,
    pub donation: DonationStreakConfig,
}

fn default_split_source() -> String {
    "exerciseTotal".to_string()
}

/// Splits a running total at an event start.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct SplitTotalsConfig {
    /// Label of the page default holding the start time
    pub from: String,
    /// Page paths written before and after the start, in that order
    pub mappings: Vec<String>,
    /// Page path of the running total
    #[serde(default = "default_split_source")]
    pub source: String,
}

impl SplitTotalsConfig {
    pub fn before(&self) -> &str {
        self.mappings.first().map(String::as_str).unwrap_or_default()
    }

    pub fn after(&self) -> &str {
        self.mappings.get(1).map(String::as_str).unwrap_or_default()
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.mappings.len() != 2 {
            return Err(ValidationError::SplitMappings(self.mappings.len()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FundraiserExtensionsConfig {
    pub streaks: StreaksConfig,
    pub split_totals: Option<SplitTotalsConfig>,
}

impl FundraiserExtensionsConfig {
    /// Histories the streaks are computed from.
    pub fn fetch_plan(&self) -> FetchPlan {
        FetchPlan {
            exercise_logs: !self.streaks.activity.days.is_empty(),
            donations: !self.streaks.donation.days.is_empty(),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        let streaks = [
            ("activity", &self.streaks.activity.days, &self.streaks.activity.mapping),
            ("donation", &self.streaks.donation.days, &self.streaks.donation.mapping),
        ];
        for (streak, days, mapping) in streaks {
            if let Some(&bad) = days.iter().find(|d| !(1..=999).contains(*d)) {
                return Err(ValidationError::StreakThreshold { streak, days: bad });
            }
            if !days.is_empty() && mapping.is_empty() {
                return Err(ValidationError::StreakMapping { streak });
            }
        }

        let activity = &self.streaks.activity;
        for bound in [&activity.from, &activity.to].into_iter().flatten() {
            if DateTime::parse_from_rfc3339(bound).is_err() {
                return Err(ValidationError::StreakWindow(bound.clone()));
            }
        }

        if let Some(split) = &self.split_totals {
            split.validate()?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TeamExtensionsConfig {
    pub split_totals: Option<SplitTotalsConfig>,
}

/// Sync configuration for one campaign
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Prefix of the campaign's custom fields, e.g. `spring24`
    pub campaign_prefix: String,
    pub campaign_id: String,
    pub target: Target,
    pub activities: ActivitiesConfig,
    pub fundraiser_field_mappings: FundraiserMappingsConfig,
    /// Encoded field id to transform directive, applied in order
    pub fundraiser_field_transforms: IndexMap<String, String>,
    pub team_field_mappings: TeamMappingsConfig,
    pub team_field_transforms: IndexMap<String, String>,
    pub fundraiser_extensions: FundraiserExtensionsConfig,
    pub team_extensions: TeamExtensionsConfig,
}

/// Expanded mapping tables per entity.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntityMappings {
    pub fundraiser: FieldMappings,
    pub team: FieldMappings,
}

impl SyncConfig {
    pub fn field_mappings(&self) -> Result<EntityMappings, MappingError> {
        let mut fundraiser = FieldMappings::expand(
            &self.fundraiser_field_mappings.builtin,
            FieldScope::Builtin,
        )?;
        fundraiser.extend(FieldMappings::expand(
            &self.fundraiser_field_mappings.custom,
            FieldScope::Custom,
        )?)?;
        let team = FieldMappings::expand(&self.team_field_mappings.custom, FieldScope::Custom)?;
        Ok(EntityMappings { fundraiser, team })
    }

    /// Validates the configuration and returns the expanded mapping tables.
    pub fn validate(&self) -> Result<EntityMappings, ValidationError> {
        if self.campaign_id.is_empty() {
            return Err(ValidationError::MissingCampaignId);
        }
        if self.target == Target::Activities {
            if self.activities.merge_field.is_empty() {
                return Err(ValidationError::MissingActivitiesSetting("merge_field"));
            }
            if self.activities.activity_id.is_empty() {
                return Err(ValidationError::MissingActivitiesSetting("activity_id"));
            }
        }

        let mappings = self.field_mappings()?;

        validate_fundraiser_transforms(&self.fundraiser_field_transforms).map_err(|source| {
            ValidationError::Transform {
                table: "fundraiser",
                source,
            }
        })?;
        check_transform_fields("fundraiser", &self.fundraiser_field_transforms, &mappings.fundraiser)?;

        validate_team_transforms(&self.team_field_transforms).map_err(|source| {
            ValidationError::Transform {
                table: "team",
                source,
            }
        })?;
        check_transform_fields("team", &self.team_field_transforms, &mappings.team)?;

        self.fundraiser_extensions.validate()?;
        if let Some(split) = &self.team_extensions.split_totals {
            split.validate()?;
        }

        Ok(mappings)
    }
}

fn check_transform_fields(
    table: &'static str,
    transforms: &IndexMap<String, String>,
    mappings: &FieldMappings,
) -> Result<(), ValidationError> {
    for field in transforms.keys() {
        if mappings.get_encoded(field).is_none() {
            return Err(ValidationError::UnmappedTransformField {
                table,
                field: field.clone(),
            });
        }
    }
    Ok(())
}
