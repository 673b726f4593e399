//! Orchestrates fetching, mapping, transforms and extensions for one
//! campaign.

use crate::config::{EntityMappings, SyncConfig};
use crate::errors::{Result, SyncError};
use crate::extensions::{apply_fundraiser_extensions, apply_team_extensions};
use crate::mapping::{clear_fields, map_fields};
use crate::patch::PagePatch;
use crate::record::{Activity, Contact, Mappable, PersonFieldClassifier};
use crate::transforms::{TransformContext, apply_fundraiser_transforms, apply_team_transforms};
use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::Serialize;
use std::sync::Arc;
use upstream::{Campaign, FetchPlan, Fetcher, FundraisingPage};

/// Pages updated since a point in time, split by what must be resynced.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChangedPages {
    pub fundraisers: Vec<String>,
    pub teams: Vec<String>,
}

pub struct SyncMapper {
    config: SyncConfig,
    mappings: EntityMappings,
    classifier: PersonFieldClassifier,
    fetcher: Fetcher,
}

impl SyncMapper {
    /// `mappings` are the tables returned by [`SyncConfig::validate`].
    pub fn new(config: SyncConfig, mappings: EntityMappings, fetcher: Fetcher) -> Self {
        let classifier = PersonFieldClassifier::new(config.activities.merge_field.clone());
        SyncMapper {
            config,
            mappings,
            classifier,
            fetcher,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn mappings(&self) -> &EntityMappings {
        &self.mappings
    }

    pub fn fetch_plan(&self) -> FetchPlan {
        self.config.fundraiser_extensions.fetch_plan()
    }

    /// The configured campaign, served from the cache unless `refresh` is set.
    pub async fn campaign(&self, refresh: bool) -> Result<Arc<Campaign>> {
        let id = &self.config.campaign_id;
        self.fetcher
            .campaign(id, refresh)
            .await
            .map_err(|source| SyncError::Campaign {
                id: id.clone(),
                source,
            })
    }

    /// Fundraisers and teams whose pages changed since `since`.
    pub async fn changed_since(
        &self,
        campaign: &Campaign,
        since: DateTime<Utc>,
    ) -> Result<ChangedPages> {
        let id = &self.config.campaign_id;
        let listing = self
            .fetcher
            .upstream()
            .fetch_profiles_since(id, since)
            .await
            .map_err(|source| SyncError::Profiles {
                id: id.clone(),
                source,
            })?;

        let mut fundraisers = IndexSet::new();
        let mut teams = IndexSet::new();
        for profile in &listing.profiles {
            if let Some(team_id) = profile.team_id_for(campaign) {
                teams.insert(team_id.to_string());
            }
            if profile.kind != "GROUP" {
                fundraisers.insert(profile.id.clone());
            }
        }
        tracing::debug!(
            fundraisers = fundraisers.len(),
            teams = teams.len(),
            "Listed changed pages"
        );
        Ok(ChangedPages {
            fundraisers: fundraisers.into_iter().collect(),
            teams: teams.into_iter().collect(),
        })
    }

    fn transform_context<'a>(
        &'a self,
        campaign: &'a Campaign,
        skip_donation_check: bool,
    ) -> TransformContext<'a> {
        TransformContext {
            campaign,
            campaign_prefix: &self.config.campaign_prefix,
            upstream: self.fetcher.upstream().as_ref(),
            skip_donation_check,
        }
    }

    /// Maps a fundraiser that is synced on its own. Team fields are nulled.
    async fn map_fundraiser(
        &self,
        campaign: &Campaign,
        page: &FundraisingPage,
        skip_donation_check: bool,
        record: &mut dyn Mappable,
    ) -> Result<()> {
        map_fields(&self.mappings.fundraiser, &page.source, record);
        let ctx = self.transform_context(campaign, skip_donation_check);
        apply_fundraiser_transforms(&self.config.fundraiser_field_transforms, &ctx, record).await?;
        clear_fields(&self.mappings.team, record);
        Ok(())
    }

    async fn map_team_member(
        &self,
        campaign: &Campaign,
        member_page: &FundraisingPage,
        team_page: &FundraisingPage,
        skip_donation_check: bool,
        record: &mut dyn Mappable,
    ) -> Result<()> {
        map_fields(&self.mappings.fundraiser, &member_page.source, record);
        map_fields(&self.mappings.team, &team_page.source, record);
        let ctx = self.transform_context(campaign, skip_donation_check);
        apply_fundraiser_transforms(&self.config.fundraiser_field_transforms, &ctx, record).await?;
        apply_team_transforms(
            &self.config.team_field_transforms,
            member_page,
            team_page,
            record,
        )?;
        Ok(())
    }

    pub async fn map_fundraiser_contact(&self, campaign: &Campaign, id: &str) -> Result<Contact> {
        let data = self.fetcher.fundraiser_data(id, FetchPlan::default()).await?;
        let mut contact = Contact::default();
        self.map_fundraiser(campaign, &data.page, false, &mut contact)
            .await?;
        Ok(contact)
    }

    /// One contact per team member, in roster order.
    pub async fn map_team_contacts(
        &self,
        campaign: &Campaign,
        team_id: &str,
    ) -> Result<Vec<Contact>> {
        let data = self.fetcher.team_data(team_id).await?;
        let mut contacts = Vec::with_capacity(data.member_pages.len());
        for member_page in &data.member_pages {
            let mut contact = Contact::default();
            self.map_team_member(campaign, member_page, &data.team_page, false, &mut contact)
                .await?;
            contacts.push(contact);
        }
        Ok(contacts)
    }

    fn new_activity(&self) -> Result<Activity> {
        let activities = &self.config.activities;
        if activities.merge_field.is_empty() {
            return Err(SyncError::ActivitiesConfig("merge_field"));
        }
        if activities.activity_id.is_empty() {
            return Err(SyncError::ActivitiesConfig("activity_id"));
        }
        Ok(Activity::new(activities.activity_id.clone()))
    }

    pub async fn map_fundraiser_activity(&self, campaign: &Campaign, id: &str) -> Result<Activity> {
        let mut activity = self.new_activity()?;
        let data = self.fetcher.fundraiser_data(id, FetchPlan::default()).await?;
        self.map_fundraiser(campaign, &data.page, false, &mut activity)
            .await?;
        activity.separate_person_fields(&self.classifier);
        Ok(activity)
    }

    /// Team activities skip the registration window donation check.
    pub async fn map_team_activities(
        &self,
        campaign: &Campaign,
        team_id: &str,
    ) -> Result<Vec<Activity>> {
        self.new_activity()?;
        let data = self.fetcher.team_data(team_id).await?;
        let mut activities = Vec::with_capacity(data.member_pages.len());
        for member_page in &data.member_pages {
            let mut activity = self.new_activity()?;
            self.map_team_member(campaign, member_page, &data.team_page, true, &mut activity)
                .await?;
            activity.separate_person_fields(&self.classifier);
            activities.push(activity);
        }
        Ok(activities)
    }

    /// Streaks and the split total for one fundraiser's page.
    pub async fn fundraiser_extensions_patch(
        &self,
        campaign: &Campaign,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<PagePatch> {
        let data = self.fetcher.fundraiser_data(id, self.fetch_plan()).await?;
        let patch = apply_fundraiser_extensions(
            &self.config.fundraiser_extensions,
            campaign,
            &data.page,
            &data.exercise_logs,
            &data.donations,
            now,
        )?;
        Ok(PagePatch {
            page_id: id.to_string(),
            patch,
        })
    }

    /// The team page's patch followed by one patch per member, in roster
    /// order.
    pub async fn team_extensions_patches(
        &self,
        campaign: &Campaign,
        team_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<PagePatch>> {
        let (team, team_page) = self.fetcher.team(team_id).await?;
        let mut patches = Vec::with_capacity(team.members.len() + 1);
        patches.push(PagePatch {
            page_id: team_id.to_string(),
            patch: apply_team_extensions(&self.config.team_extensions, campaign, &team_page, now)?,
        });
        for member in &team.members {
            patches.push(
                self.fundraiser_extensions_patch(campaign, &member.id, now)
                    .await?,
            );
        }
        Ok(patches)
    }

    /// Sends a patch upstream. Empty patches are not sent and return `None`.
    pub async fn apply_patch(&self, patch: &PagePatch) -> Result<Option<u16>> {
        if patch.patch.is_empty() {
            return Ok(None);
        }
        let status = self
            .fetcher
            .upstream()
            .update_page(&patch.page_id, &patch.patch.to_string())
            .await
            .map_err(|source| SyncError::Update {
                id: patch.page_id.clone(),
                source,
            })?;
        tracing::info!(page_id = %patch.page_id, status, "Updated page");
        Ok(Some(status))
    }
}
