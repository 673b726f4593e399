//! Access to the donation platform: documents, lookups, requests and the
//! concurrent fetcher that assembles fundraiser and team data.

pub mod cache;
pub mod client;
pub mod errors;
pub mod fetcher;
pub mod http;
pub mod metrics_defs;
pub mod model;
pub mod path;
pub mod source;
#[cfg(any(test, feature = "testutils"))]
pub mod testutils;

pub use cache::CampaignCache;
pub use client::Upstream;
pub use errors::{FanOutError, FetchError, MissingOwner, RequestKind, UpstreamError};
pub use fetcher::{FetchPlan, Fetcher, FundraiserData, TeamData};
pub use http::HttpUpstream;
pub use model::{
    Campaign, Donation, DonationsUpTo, ExerciseLogEntry, FundraisingPage, FundraisingProfile,
    PageDefault, ProfilesSince, Team, TeamMember,
};
pub use source::SourceDocument;
