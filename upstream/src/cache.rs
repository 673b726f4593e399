// Read-through cache of campaign metadata. Entries are never evicted so a
// previously fetched campaign stays available when a refresh fails.
use crate::errors::UpstreamError;
use crate::metrics_defs::{CAMPAIGN_CACHE_HIT, CAMPAIGN_CACHE_MISS, CAMPAIGN_CACHE_STALE};
use crate::model::Campaign;
use crate::counter;
use moka::sync::Cache;
use std::future::Future;
use std::sync::Arc;

#[derive(Clone)]
pub struct CampaignCache {
    cache: Cache<String, Arc<Campaign>>,
}

impl Default for CampaignCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CampaignCache {
    pub fn new() -> Self {
        CampaignCache {
            cache: Cache::builder().build(),
        }
    }

    pub fn get(&self, campaign_id: &str) -> Option<Arc<Campaign>> {
        self.cache.get(campaign_id)
    }

    pub fn insert(&self, campaign_id: &str, campaign: Campaign) -> Arc<Campaign> {
        let campaign = Arc::new(campaign);
        self.cache.insert(campaign_id.to_string(), campaign.clone());
        campaign
    }

    /// Returns the cached campaign unless `refresh` is set, otherwise runs
    /// `fetch` and caches the result. A failed fetch falls back to the cached
    /// value; the error is only returned when nothing is cached.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        campaign_id: &str,
        refresh: bool,
        fetch: F,
    ) -> Result<Arc<Campaign>, UpstreamError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Campaign, UpstreamError>>,
    {
        if !refresh && let Some(campaign) = self.get(campaign_id) {
            counter!(CAMPAIGN_CACHE_HIT).increment(1);
            return Ok(campaign);
        }
        counter!(CAMPAIGN_CACHE_MISS).increment(1);

        match fetch().await {
            Ok(campaign) => Ok(self.insert(campaign_id, campaign)),
            Err(e) => match self.get(campaign_id) {
                Some(stale) => {
                    tracing::warn!(
                        campaign_id,
                        error = %e,
                        "Campaign fetch failed, serving cached campaign"
                    );
                    counter!(CAMPAIGN_CACHE_STALE).increment(1);
                    Ok(stale)
                }
                None => Err(e),
            },
        }
    }
}
