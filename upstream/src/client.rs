use crate::errors::UpstreamError;
use crate::model::{
    Campaign, Donation, DonationsUpTo, ExerciseLogEntry, FundraisingPage, ProfilesSince, Team,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// The donation platform as seen by the sync core. Every call is a single
/// request; pagination and retries are the implementor's concern.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// A fundraiser or team page, including private fields.
    async fn fetch_page(&self, id: &str) -> Result<FundraisingPage, UpstreamError>;

    async fn fetch_team_members(&self, team_id: &str) -> Result<Team, UpstreamError>;

    async fn fetch_campaign(&self, campaign_id: &str) -> Result<Campaign, UpstreamError>;

    async fn fetch_exercise_logs(&self, id: &str) -> Result<Vec<ExerciseLogEntry>, UpstreamError>;

    async fn fetch_donations(&self, id: &str) -> Result<Vec<Donation>, UpstreamError>;

    /// Donations to a profile created up to `up_to`.
    async fn fetch_donations_up_to(
        &self,
        id: &str,
        up_to: DateTime<Utc>,
    ) -> Result<DonationsUpTo, UpstreamError>;

    /// Profiles in a campaign updated after `since`, oldest first.
    async fn fetch_profiles_since(
        &self,
        campaign_id: &str,
        since: DateTime<Utc>,
    ) -> Result<ProfilesSince, UpstreamError>;

    /// Partially updates a page with a JSON patch. Returns the response status.
    async fn update_page(&self, id: &str, patch: &str) -> Result<u16, UpstreamError>;
}
