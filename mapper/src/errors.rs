use crate::field_id::FieldIdError;
use thiserror::Error;
use upstream::path::PathError;
use upstream::{FanOutError, FundraiserData, FundraisingPage, MissingOwner, Team, TeamData, UpstreamError};

/// Result type alias for sync operations
pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Errors raised while building field mapping tables
#[derive(Error, Debug)]
pub enum MappingError {
    #[error("invalid field name {name:?} in {collection}: {source}")]
    InvalidField {
        collection: &'static str,
        name: String,
        #[source]
        source: FieldIdError,
    },

    #[error("field {0:?} is mapped by more than one collection")]
    DuplicateField(String),

    #[error("invalid constant {value:?} for {field}")]
    InvalidConstant { field: String, value: String },

    #[error("invalid path for {field}: {source}")]
    InvalidPath {
        field: String,
        #[source]
        source: PathError,
    },
}

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("unsupported transform {transform:?} for field {field}")]
    Unsupported { field: String, transform: String },

    #[error("invalid transform, field {0} does not exist")]
    MissingField(String),

    #[error("invalid argument {arg:?} for transform {transform:?}: {reason}")]
    InvalidArgument {
        transform: String,
        arg: String,
        reason: String,
    },

    #[error("failed to parse {field}: {source}")]
    InvalidRegistrationDate {
        field: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("failed to check self donation totals in registration window: {0}")]
    DonationCheck(#[source] UpstreamError),

    #[error(transparent)]
    MissingOwner(#[from] MissingOwner),
}

#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("page default {label:?} is not a valid start time ({value:?}): {source}")]
    InvalidStart {
        label: String,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

/// Errors surfaced by the sync facade
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("failed to fetch fundraiser data: {0}")]
    Fundraiser(#[from] FanOutError<FundraiserData>),

    #[error("failed to fetch team data: {0}")]
    Team(#[from] FanOutError<TeamData>),

    #[error("failed to fetch team: {0}")]
    TeamPage(#[from] FanOutError<(Team, FundraisingPage)>),

    #[error("failed to fetch campaign {id}: {source}")]
    Campaign {
        id: String,
        #[source]
        source: UpstreamError,
    },

    #[error("failed to list profiles of campaign {id}: {source}")]
    Profiles {
        id: String,
        #[source]
        source: UpstreamError,
    },

    #[error("failed to update page {id}: {source}")]
    Update {
        id: String,
        #[source]
        source: UpstreamError,
    },

    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("extension failed: {0}")]
    Extension(#[from] ExtensionError),

    #[error("activities.{0} is required for the activities target")]
    ActivitiesConfig(&'static str),
}
