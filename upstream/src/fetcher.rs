//! Concurrent assembly of fundraiser and team data.
//!
//! Each logical fetch starts all of its upstream requests at once and waits
//! for every one of them to settle. Failures are collected rather than
//! short-circuiting, so the caller receives both the partial data and the
//! full list of errors. Dropping a fetch future cancels all of its in-flight
//! requests.

use crate::cache::CampaignCache;
use crate::client::Upstream;
use crate::errors::{FanOutError, FetchError, RequestKind, UpstreamError};
use crate::metrics_defs::{FANOUT_DURATION, UPSTREAM_REQUEST_FAILED};
use crate::model::{Campaign, Donation, ExerciseLogEntry, FundraisingPage, Team};
use crate::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;

/// Which optional histories to fetch alongside a fundraiser's page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchPlan {
    pub exercise_logs: bool,
    pub donations: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FundraiserData {
    pub page: FundraisingPage,
    pub exercise_logs: Vec<ExerciseLogEntry>,
    pub donations: Vec<Donation>,
}

#[derive(Debug, Clone, Default)]
pub struct TeamData {
    pub team: Team,
    pub team_page: FundraisingPage,
    /// One page per roster entry, in roster order.
    pub member_pages: Vec<FundraisingPage>,
}

#[derive(Clone)]
pub struct Fetcher {
    upstream: Arc<dyn Upstream>,
    campaigns: CampaignCache,
}

fn record_failure(errors: &mut Vec<FetchError>, kind: RequestKind, id: &str, e: UpstreamError) {
    counter!(UPSTREAM_REQUEST_FAILED, "kind" => kind.as_str()).increment(1);
    errors.push(FetchError::new(kind, id, e));
}

fn finish<T>(
    operation: &'static str,
    started: Instant,
    data: T,
    errors: Vec<FetchError>,
) -> Result<T, FanOutError<T>> {
    histogram!(FANOUT_DURATION, "operation" => operation).record(started.elapsed().as_secs_f64());
    if errors.is_empty() {
        Ok(data)
    } else {
        Err(FanOutError {
            partial: data,
            errors,
        })
    }
}

impl Fetcher {
    pub fn new(upstream: Arc<dyn Upstream>) -> Self {
        Self::with_cache(upstream, CampaignCache::new())
    }

    pub fn with_cache(upstream: Arc<dyn Upstream>, campaigns: CampaignCache) -> Self {
        Fetcher {
            upstream,
            campaigns,
        }
    }

    pub fn upstream(&self) -> &Arc<dyn Upstream> {
        &self.upstream
    }

    /// Campaign metadata through the process-wide cache.
    pub async fn campaign(
        &self,
        campaign_id: &str,
        refresh: bool,
    ) -> Result<Arc<Campaign>, UpstreamError> {
        self.campaigns
            .get_or_fetch(campaign_id, refresh, || {
                self.upstream.fetch_campaign(campaign_id)
            })
            .await
    }

    /// Fetches a fundraiser's page and, as planned, its exercise logs and
    /// donations in parallel.
    pub async fn fundraiser_data(
        &self,
        id: &str,
        plan: FetchPlan,
    ) -> Result<FundraiserData, FanOutError<FundraiserData>> {
        let started = Instant::now();
        tracing::debug!(id, ?plan, "Fetching fundraiser data");

        let upstream = &self.upstream;
        let page = upstream.fetch_page(id);
        let logs = async {
            match plan.exercise_logs {
                true => Some(upstream.fetch_exercise_logs(id).await),
                false => None,
            }
        };
        let donations = async {
            match plan.donations {
                true => Some(upstream.fetch_donations(id).await),
                false => None,
            }
        };
        let (page, logs, donations) = tokio::join!(page, logs, donations);

        let mut data = FundraiserData::default();
        let mut errors = Vec::new();

        match page {
            Ok(page) => data.page = page,
            Err(e) => record_failure(&mut errors, RequestKind::Page, id, e),
        }
        match logs {
            Some(Ok(logs)) => data.exercise_logs = logs,
            Some(Err(e)) => record_failure(&mut errors, RequestKind::ExerciseLogs, id, e),
            None => {}
        }
        match donations {
            Some(Ok(donations)) => data.donations = donations,
            Some(Err(e)) => record_failure(&mut errors, RequestKind::Donations, id, e),
            None => {}
        }

        finish("fundraiser", started, data, errors)
    }

    /// Fetches a team's roster and its own page in parallel.
    pub async fn team(
        &self,
        team_id: &str,
    ) -> Result<(Team, FundraisingPage), FanOutError<(Team, FundraisingPage)>> {
        let started = Instant::now();
        let (team, page) = tokio::join!(
            self.upstream.fetch_team_members(team_id),
            self.upstream.fetch_page(team_id)
        );

        let mut errors = Vec::new();
        let team = team.unwrap_or_else(|e| {
            record_failure(&mut errors, RequestKind::TeamMembers, team_id, e);
            Team::default()
        });
        let page = page.unwrap_or_else(|e| {
            record_failure(&mut errors, RequestKind::Page, team_id, e);
            FundraisingPage::default()
        });

        finish("team", started, (team, page), errors)
    }

    /// Fetches every member's page in parallel. Pages are returned in roster
    /// order; a failed member leaves an empty page in its slot.
    pub async fn team_members(
        &self,
        team: &Team,
    ) -> Result<Vec<FundraisingPage>, FanOutError<Vec<FundraisingPage>>> {
        let started = Instant::now();
        let mut pages = vec![FundraisingPage::default(); team.members.len()];
        let mut errors = Vec::new();

        // The set aborts every remaining task when dropped.
        let mut join_set = JoinSet::new();
        let mut task_keys = HashMap::new();

        for (index, member) in team.members.iter().enumerate() {
            let upstream = self.upstream.clone();
            let member_id = member.id.clone();
            let abort_handle = join_set.spawn(async move {
                let result = upstream.fetch_page(&member_id).await;
                (index, result)
            });
            task_keys.insert(abort_handle.id(), member.id.clone());
        }

        while let Some(join_result) = join_set.join_next_with_id().await {
            match join_result {
                Ok((task_id, (index, result))) => {
                    let member_id = task_keys.remove(&task_id).unwrap_or_default();
                    match result {
                        Ok(page) => pages[index] = page,
                        Err(e) => record_failure(&mut errors, RequestKind::Page, &member_id, e),
                    }
                }
                Err(e) => {
                    let member_id = task_keys.remove(&e.id()).unwrap_or_default();
                    tracing::error!(member_id = %member_id, error = %e, "Member fetch task failed");
                    record_failure(
                        &mut errors,
                        RequestKind::Page,
                        &member_id,
                        UpstreamError::TaskFailed(e.to_string()),
                    );
                }
            }
        }

        tracing::debug!(members = pages.len(), failed = errors.len(), "Fetched team members");
        finish("team_members", started, pages, errors)
    }

    /// Roster and team page first, then every member page.
    pub async fn team_data(&self, team_id: &str) -> Result<TeamData, FanOutError<TeamData>> {
        let (team, team_page) = match self.team(team_id).await {
            Ok(result) => result,
            Err(e) => {
                return Err(e.map(|(team, team_page)| TeamData {
                    team,
                    team_page,
                    member_pages: Vec::new(),
                }));
            }
        };

        match self.team_members(&team).await {
            Ok(member_pages) => Ok(TeamData {
                team,
                team_page,
                member_pages,
            }),
            Err(e) => Err(e.map(|member_pages| TeamData {
                team,
                team_page,
                member_pages,
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::InMemoryUpstream;
    use serde_json::json;
    use std::time::Duration;

    fn upstream() -> InMemoryUpstream {
        let upstream = InMemoryUpstream::new();
        upstream.add_page("p-1", json!({"uuid": "p-1", "user": {"uuid": "u-1"}}));
        upstream.add_exercise_logs(
            "p-1",
            json!([{"activity": "WALK", "date": "2024-01-01T00:00:00Z", "distance": 3}]),
        );
        upstream.add_donations(
            "p-1",
            json!([{"amount": 500, "createdAt": "2024-01-01T00:00:00Z", "type": "ONLINE"}]),
        );
        upstream
    }

    #[tokio::test]
    async fn test_fundraiser_data_follows_plan() {
        let upstream = Arc::new(upstream());
        let fetcher = Fetcher::new(upstream.clone());

        let data = fetcher
            .fundraiser_data("p-1", FetchPlan::default())
            .await
            .unwrap();
        assert_eq!(data.page.id().as_deref(), Some("p-1"));
        assert!(data.exercise_logs.is_empty());
        assert_eq!(upstream.calls(RequestKind::ExerciseLogs), 0);
        assert_eq!(upstream.calls(RequestKind::Donations), 0);

        let plan = FetchPlan {
            exercise_logs: true,
            donations: true,
        };
        let data = fetcher.fundraiser_data("p-1", plan).await.unwrap();
        assert_eq!(data.exercise_logs.len(), 1);
        assert_eq!(data.donations.len(), 1);
    }

    #[tokio::test]
    async fn test_fundraiser_data_reports_every_failure() {
        let upstream = Arc::new(upstream());
        upstream.fail(RequestKind::Page, "p-1");
        upstream.fail(RequestKind::ExerciseLogs, "p-1");
        upstream.fail(RequestKind::Donations, "p-1");
        let fetcher = Fetcher::new(upstream);

        let plan = FetchPlan {
            exercise_logs: true,
            donations: true,
        };
        let err = fetcher.fundraiser_data("p-1", plan).await.unwrap_err();

        let kinds: Vec<RequestKind> = err.errors.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RequestKind::Page,
                RequestKind::ExerciseLogs,
                RequestKind::Donations
            ]
        );
        assert!(err.to_string().starts_with("3 upstream request(s) failed"));
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successful_branches() {
        let upstream = Arc::new(upstream());
        upstream.fail(RequestKind::Donations, "p-1");
        let fetcher = Fetcher::new(upstream);

        let plan = FetchPlan {
            exercise_logs: true,
            donations: true,
        };
        let err = fetcher.fundraiser_data("p-1", plan).await.unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.partial.page.id().as_deref(), Some("p-1"));
        assert_eq!(err.partial.exercise_logs.len(), 1);
    }

    #[tokio::test]
    async fn test_team_data_keeps_roster_order() {
        let upstream = InMemoryUpstream::new();
        upstream.add_page("t-1", json!({"uuid": "t-1", "user": {"uuid": "u-1"}}));
        upstream.add_team("t-1", &["m-1", "m-2", "m-3"]);
        for (i, id) in ["m-1", "m-2", "m-3"].iter().enumerate() {
            upstream.add_page(id, json!({"uuid": id, "user": {"uuid": format!("u-{}", i + 1)}}));
        }
        // The first member resolves last.
        upstream.delay("m-1", Duration::from_millis(50));
        let fetcher = Fetcher::new(Arc::new(upstream));

        let data = fetcher.team_data("t-1").await.unwrap();
        let ids: Vec<String> = data
            .member_pages
            .iter()
            .map(|p| p.id().unwrap_or_default())
            .collect();
        assert_eq!(ids, vec!["m-1", "m-2", "m-3"]);
        assert_eq!(data.team_page.id().as_deref(), Some("t-1"));
    }

    #[tokio::test]
    async fn test_team_member_failures_are_aggregated() {
        let upstream = InMemoryUpstream::new();
        upstream.add_page("t-1", json!({"uuid": "t-1"}));
        upstream.add_team("t-1", &["m-1", "m-2"]);
        let fetcher = Fetcher::new(Arc::new(upstream));

        let err = fetcher.team_data("t-1").await.unwrap_err();
        let mut ids: Vec<&str> = err.errors.iter().map(|e| e.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["m-1", "m-2"]);
        assert_eq!(err.partial.member_pages.len(), 2);
    }

    #[tokio::test]
    async fn test_team_roster_failure_skips_members() {
        let upstream = Arc::new(InMemoryUpstream::new());
        upstream.add_page("t-1", json!({"uuid": "t-1"}));
        let fetcher = Fetcher::new(upstream.clone());

        let err = fetcher.team_data("t-1").await.unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].kind, RequestKind::TeamMembers);
        assert_eq!(err.partial.team_page.id().as_deref(), Some("t-1"));
        assert_eq!(upstream.calls(RequestKind::Page), 1);
    }

    #[tokio::test]
    async fn test_cancelling_team_fetch_aborts_member_fetches() {
        let upstream = Arc::new(InMemoryUpstream::new());
        upstream.add_page("t-1", json!({"uuid": "t-1"}));
        upstream.add_team("t-1", &["m-1", "m-2"]);
        for id in ["m-1", "m-2"] {
            upstream.add_page(id, json!({"uuid": id}));
            upstream.delay(id, Duration::from_secs(30));
        }
        let fetcher = Fetcher::new(upstream.clone());

        let result =
            tokio::time::timeout(Duration::from_millis(50), fetcher.team_data("t-1")).await;
        assert!(result.is_err());

        // Give the runtime a moment to drop the aborted tasks.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(upstream.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_campaign_falls_back_to_cache() {
        let upstream = Arc::new(InMemoryUpstream::new());
        upstream.add_campaign("c-1", json!({"name": "Spring", "profile": {"uuid": "root"}}));
        let fetcher = Fetcher::new(upstream.clone());

        assert_eq!(fetcher.campaign("c-1", false).await.unwrap().name, "Spring");

        upstream.fail(RequestKind::Campaign, "c-1");
        assert_eq!(fetcher.campaign("c-1", true).await.unwrap().name, "Spring");
        assert!(fetcher.campaign("c-2", false).await.is_err());
    }
}
