//! In-memory upstream for tests. Documents are registered per id; failures
//! and delays can be injected per request.

use crate::client::Upstream;
use crate::errors::{RequestKind, UpstreamError};
use crate::model::{
    Campaign, Donation, DonationsUpTo, ExerciseLogEntry, FundraisingPage, FundraisingProfile,
    ProfilesSince, Team, TeamMember,
};
use crate::source::SourceDocument;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct State {
    pages: HashMap<String, Value>,
    teams: HashMap<String, Vec<String>>,
    campaigns: HashMap<String, Value>,
    exercise_logs: HashMap<String, Value>,
    donations: HashMap<String, Value>,
    profiles: HashMap<String, Value>,
    failures: HashSet<(RequestKind, String)>,
    delays: HashMap<String, Duration>,
    calls: HashMap<RequestKind, usize>,
    donations_up_to_requests: Vec<(String, DateTime<Utc>)>,
    updates: Vec<(String, String)>,
}

#[derive(Default)]
pub struct InMemoryUpstream {
    state: Mutex<State>,
    in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn not_found(id: &str) -> UpstreamError {
    UpstreamError::Status {
        status: 404,
        body: format!("{id} not found"),
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    what: &'static str,
    value: Value,
) -> Result<T, UpstreamError> {
    serde_json::from_value(value).map_err(|source| UpstreamError::Decode { what, source })
}

impl InMemoryUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_page(&self, id: &str, page: Value) {
        self.state().pages.insert(id.to_string(), page);
    }

    pub fn add_team(&self, team_id: &str, member_ids: &[&str]) {
        self.state().teams.insert(
            team_id.to_string(),
            member_ids.iter().map(|m| m.to_string()).collect(),
        );
    }

    /// Registers the campaign's `data` document.
    pub fn add_campaign(&self, campaign_id: &str, data: Value) {
        self.state().campaigns.insert(campaign_id.to_string(), data);
    }

    pub fn add_exercise_logs(&self, id: &str, logs: Value) {
        self.state().exercise_logs.insert(id.to_string(), logs);
    }

    /// Registers the raw donation list used by both donation endpoints.
    pub fn add_donations(&self, id: &str, donations: Value) {
        self.state().donations.insert(id.to_string(), donations);
    }

    pub fn add_profiles(&self, campaign_id: &str, profiles: Value) {
        self.state().profiles.insert(campaign_id.to_string(), profiles);
    }

    /// Makes every `kind` request for `id` fail with a 503.
    pub fn fail(&self, kind: RequestKind, id: &str) {
        self.state().failures.insert((kind, id.to_string()));
    }

    /// Delays every request for `id`.
    pub fn delay(&self, id: &str, delay: Duration) {
        self.state().delays.insert(id.to_string(), delay);
    }

    pub fn calls(&self, kind: RequestKind) -> usize {
        self.state().calls.get(&kind).copied().unwrap_or_default()
    }

    /// Requests that have started but not yet completed or been dropped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn donations_up_to_requests(&self) -> Vec<(String, DateTime<Utc>)> {
        self.state().donations_up_to_requests.clone()
    }

    pub fn updates(&self) -> Vec<(String, String)> {
        self.state().updates.clone()
    }

    async fn begin(&self, kind: RequestKind, id: &str) -> Result<InFlight<'_>, UpstreamError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        let (delay, failing) = {
            let mut state = self.state();
            *state.calls.entry(kind).or_default() += 1;
            (
                state.delays.get(id).copied(),
                state.failures.contains(&(kind, id.to_string())),
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(UpstreamError::Status {
                status: 503,
                body: format!("{kind} {id} unavailable"),
            });
        }
        Ok(guard)
    }

    fn document(
        &self,
        select: impl FnOnce(&State) -> Option<&Value>,
        id: &str,
    ) -> Result<Value, UpstreamError> {
        select(&self.state()).cloned().ok_or_else(|| not_found(id))
    }
}

#[async_trait]
impl Upstream for InMemoryUpstream {
    async fn fetch_page(&self, id: &str) -> Result<FundraisingPage, UpstreamError> {
        let _guard = self.begin(RequestKind::Page, id).await?;
        let page = self.document(|s| s.pages.get(id), id)?;
        Ok(FundraisingPage::new(SourceDocument::new(page)))
    }

    async fn fetch_team_members(&self, team_id: &str) -> Result<Team, UpstreamError> {
        let _guard = self.begin(RequestKind::TeamMembers, team_id).await?;
        let members = self
            .state()
            .teams
            .get(team_id)
            .cloned()
            .ok_or_else(|| not_found(team_id))?;
        Ok(Team {
            members: members.into_iter().map(|id| TeamMember { id }).collect(),
        })
    }

    async fn fetch_campaign(&self, campaign_id: &str) -> Result<Campaign, UpstreamError> {
        let _guard = self.begin(RequestKind::Campaign, campaign_id).await?;
        let data = self.document(|s| s.campaigns.get(campaign_id), campaign_id)?;
        Ok(Campaign::from_document(&SourceDocument::new(data)))
    }

    async fn fetch_exercise_logs(&self, id: &str) -> Result<Vec<ExerciseLogEntry>, UpstreamError> {
        let _guard = self.begin(RequestKind::ExerciseLogs, id).await?;
        let logs = self.document(|s| s.exercise_logs.get(id), id)?;
        decode("exercise logs", logs)
    }

    async fn fetch_donations(&self, id: &str) -> Result<Vec<Donation>, UpstreamError> {
        let _guard = self.begin(RequestKind::Donations, id).await?;
        let donations = self.document(|s| s.donations.get(id), id)?;
        decode("donations", donations)
    }

    async fn fetch_donations_up_to(
        &self,
        id: &str,
        up_to: DateTime<Utc>,
    ) -> Result<DonationsUpTo, UpstreamError> {
        let _guard = self.begin(RequestKind::DonationsUpTo, id).await?;
        self.state()
            .donations_up_to_requests
            .push((id.to_string(), up_to));

        let donations: Vec<Value> = decode(
            "donations",
            self.document(|s| s.donations.get(id), id)
                .unwrap_or_else(|_| Value::Array(Vec::new())),
        )?;
        let in_window = donations
            .into_iter()
            .filter(|d| {
                d.get("createdAt")
                    .and_then(Value::as_str)
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .is_none_or(|created| created <= up_to)
            })
            .collect();
        Ok(DonationsUpTo::new(up_to, in_window))
    }

    async fn fetch_profiles_since(
        &self,
        campaign_id: &str,
        since: DateTime<Utc>,
    ) -> Result<ProfilesSince, UpstreamError> {
        let _guard = self.begin(RequestKind::ProfilesSince, campaign_id).await?;
        let profiles: Vec<FundraisingProfile> = decode(
            "profiles",
            self.document(|s| s.profiles.get(campaign_id), campaign_id)?,
        )?;
        Ok(ProfilesSince { since, profiles })
    }

    async fn update_page(&self, id: &str, patch: &str) -> Result<u16, UpstreamError> {
        let _guard = self.begin(RequestKind::UpdatePage, id).await?;
        self.state()
            .updates
            .push((id.to_string(), patch.to_string()));
        Ok(200)
    }
}
