use crate::client::Upstream;
use crate::errors::UpstreamError;
use crate::model::{
    Campaign, DataList, Donation, DonationsUpTo, ExerciseLogEntry, FundraisingPage,
    FundraisingProfile, ProfilesSince, Team,
};
use crate::source::SourceDocument;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use url::Url;

const LIST_LIMIT: &str = "1000";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Upstream backed by the platform's REST API.
#[derive(Clone)]
pub struct HttpUpstream {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl HttpUpstream {
    pub fn new(base_url: Url, api_key: String, timeout: Duration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(HttpUpstream {
            client,
            base_url,
            api_key,
        })
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> Result<Url, UpstreamError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| UpstreamError::InvalidUrl(e.to_string()))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn get_json(&self, url: Url) -> Result<Value, UpstreamError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(UpstreamError::InvalidJson)
    }

    async fn get_data(&self, url: Url) -> Result<Value, UpstreamError> {
        let mut json = self.get_json(url).await?;
        Ok(json.get_mut("data").map(Value::take).unwrap_or(Value::Null))
    }

    async fn get_list<T: DeserializeOwned>(
        &self,
        url: Url,
        what: &'static str,
    ) -> Result<Vec<T>, UpstreamError> {
        let json = self.get_json(url).await?;
        serde_json::from_value::<DataList<T>>(json)
            .map(|list| list.data)
            .map_err(|source| UpstreamError::Decode { what, source })
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn fetch_page(&self, id: &str) -> Result<FundraisingPage, UpstreamError> {
        let url = self.url(&format!("/v3/profiles/{id}"), &[("private", "true")])?;
        let data = self.get_data(url).await?;
        Ok(FundraisingPage::new(SourceDocument::new(data)))
    }

    async fn fetch_team_members(&self, team_id: &str) -> Result<Team, UpstreamError> {
        let url = self.url(
            &format!("/v3/profiles/{team_id}/members"),
            &[("private", "true")],
        )?;
        let json = self.get_json(url).await?;
        serde_json::from_value(json).map_err(|source| UpstreamError::Decode {
            what: "team members",
            source,
        })
    }

    async fn fetch_campaign(&self, campaign_id: &str) -> Result<Campaign, UpstreamError> {
        let url = self.url(&format!("/v3/campaigns/{campaign_id}"), &[("private", "true")])?;
        let data = self.get_data(url).await?;
        Ok(Campaign::from_document(&SourceDocument::new(data)))
    }

    async fn fetch_exercise_logs(&self, id: &str) -> Result<Vec<ExerciseLogEntry>, UpstreamError> {
        let url = self.url(
            &format!("/v3/profiles/{id}/exercise-logs"),
            &[("private", "true"), ("limit", LIST_LIMIT)],
        )?;
        self.get_list(url, "exercise logs").await
    }

    async fn fetch_donations(&self, id: &str) -> Result<Vec<Donation>, UpstreamError> {
        let url = self.url(
            &format!("/v3/profiles/{id}/donations"),
            &[("private", "true"), ("limit", LIST_LIMIT)],
        )?;
        self.get_list(url, "donations").await
    }

    async fn fetch_donations_up_to(
        &self,
        id: &str,
        up_to: DateTime<Utc>,
    ) -> Result<DonationsUpTo, UpstreamError> {
        let created_at_to = up_to.format(TIMESTAMP_FORMAT).to_string();
        let url = self.url(
            &format!("/v3/profiles/{id}/donations"),
            &[
                ("private", "true"),
                ("createdAtTo", created_at_to.as_str()),
                ("limit", LIST_LIMIT),
            ],
        )?;
        let donations = self.get_list::<Value>(url, "donations").await?;
        Ok(DonationsUpTo::new(up_to, donations))
    }

    async fn fetch_profiles_since(
        &self,
        campaign_id: &str,
        since: DateTime<Utc>,
    ) -> Result<ProfilesSince, UpstreamError> {
        let updated_at_after = since.format(TIMESTAMP_FORMAT).to_string();
        let url = self.url(
            &format!("/v3/campaigns/{campaign_id}/profiles"),
            &[
                ("updatedAtAfter", updated_at_after.as_str()),
                ("sort", "updatedAt"),
                ("order", "ASC"),
                ("limit", LIST_LIMIT),
            ],
        )?;
        let profiles = self
            .get_list::<FundraisingProfile>(url, "profiles")
            .await?;
        Ok(ProfilesSince { since, profiles })
    }

    async fn update_page(&self, id: &str, patch: &str) -> Result<u16, UpstreamError> {
        let url = self.url(&format!("/v3/profiles/{id}"), &[("partial", "true")])?;
        let response = self
            .client
            .patch(url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(patch.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wiremock::matchers::{body_string, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn upstream(server: &MockServer) -> HttpUpstream {
        HttpUpstream::new(
            Url::parse(&server.uri()).unwrap(),
            "secret-key".into(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_page() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v3/profiles/p-1"))
            .and(query_param("private", "true"))
            .and(header("authorization", "Bearer secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"data": {"uuid": "p-1", "user": {"uuid": "u-1"}, "total": 2500}}"#,
            ))
            .mount(&mock_server)
            .await;

        let page = upstream(&mock_server).fetch_page("p-1").await.unwrap();
        assert_eq!(page.id().as_deref(), Some("p-1"));
        assert_eq!(page.owner().as_deref(), Some("u-1"));
        assert_eq!(page.source.int_at("total"), Some(2500));
    }

    #[tokio::test]
    async fn test_invalid_json_is_an_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v3/profiles/p-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{not json"))
            .mount(&mock_server)
            .await;

        let result = upstream(&mock_server).fetch_page("p-1").await;
        assert!(matches!(result, Err(UpstreamError::InvalidJson(_))));
    }

    #[tokio::test]
    async fn test_error_status() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v3/campaigns/c-1"))
            .respond_with(ResponseTemplate::new(404).set_body_string(r#"{"error":"missing"}"#))
            .mount(&mock_server)
            .await;

        let err = upstream(&mock_server)
            .fetch_campaign("c-1")
            .await
            .unwrap_err();
        match err {
            UpstreamError::Status { status, body } => {
                assert_eq!(status, 404);
                assert!(body.contains("missing"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_campaign() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v3/campaigns/c-1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"data": {"name": "Big Walk", "profile": {"uuid": "root"},
                    "config": {"customFields": {"profile": [{"label": "Start", "default": "2024-05-01T00:00:00Z"}]}}}}"#,
            ))
            .mount(&mock_server)
            .await;

        let campaign = upstream(&mock_server).fetch_campaign("c-1").await.unwrap();
        assert_eq!(campaign.name, "Big Walk");
        assert_eq!(campaign.profile_id, "root");
        assert_eq!(campaign.page_default("Start"), Some("2024-05-01T00:00:00Z"));
    }

    #[tokio::test]
    async fn test_fetch_lists() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v3/profiles/p-1/exercise-logs"))
            .and(query_param("limit", "1000"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"data": [{"activity": "WALK", "date": "2024-01-01T00:00:00Z", "distance": 5}]}"#,
            ))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v3/profiles/p-1/members"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(r#"{"data": [{"uuid": "m-1"}, {"uuid": "m-2"}]}"#),
            )
            .mount(&mock_server)
            .await;

        let client = upstream(&mock_server);
        let logs = client.fetch_exercise_logs("p-1").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].activity, "WALK");
        assert_eq!(logs[0].distance, 5.0);

        let team = client.fetch_team_members("p-1").await.unwrap();
        assert_eq!(team.members.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_donations_up_to() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v3/profiles/p-1/donations"))
            .and(query_param("createdAtTo", "2024-03-02T10:30:00.000"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"data": [
                    {"amount": 7000, "items": [{"type": "REGISTRATION", "amount": 2000}]},
                    {"amount": 1000}
                ]}"#,
            ))
            .mount(&mock_server)
            .await;

        let up_to = Utc.with_ymd_and_hms(2024, 3, 2, 10, 30, 0).unwrap();
        let donations = upstream(&mock_server)
            .fetch_donations_up_to("p-1", up_to)
            .await
            .unwrap();
        assert_eq!(donations.total_donation_amount, 6000);
        assert_eq!(donations.donations.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_profiles_since() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/v3/campaigns/c-1/profiles"))
            .and(query_param("sort", "updatedAt"))
            .and(query_param("order", "ASC"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"data": [{"uuid": "p-1", "type": "INDIVIDUAL", "updatedAt": "2024-01-01T00:00:00Z",
                    "parent": {"uuid": "t-1", "type": "GROUP"}}]}"#,
            ))
            .mount(&mock_server)
            .await;

        let since = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let result = upstream(&mock_server)
            .fetch_profiles_since("c-1", since)
            .await
            .unwrap();
        assert_eq!(result.profiles.len(), 1);
        assert_eq!(result.profiles[0].parent.uuid, "t-1");
    }

    #[tokio::test]
    async fn test_update_page() {
        let mock_server = MockServer::start().await;
        let patch = r#"{"data":{"public":{"activityStreaksAwarded":"010"}}}"#;

        Mock::given(method("PATCH"))
            .and(path("/v3/profiles/p-1"))
            .and(query_param("partial", "true"))
            .and(body_string(patch))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let status = upstream(&mock_server).update_page("p-1", patch).await.unwrap();
        assert_eq!(status, 200);
    }
}
