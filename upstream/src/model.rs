//! Records returned by the donation platform.

use crate::errors::MissingOwner;
use crate::source::{SourceDocument, as_float};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Treats an explicit `null` the same as a missing field.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// The `{"data": [...]}` envelope used by list endpoints.
#[derive(Deserialize, Debug)]
#[serde(bound = "T: Deserialize<'de>")]
pub(crate) struct DataList<T> {
    #[serde(default = "Vec::new", deserialize_with = "nullable")]
    pub data: Vec<T>,
}

/// One fundraiser's or team's profile page.
#[derive(Debug, Clone, Default)]
pub struct FundraisingPage {
    pub source: SourceDocument,
}

impl FundraisingPage {
    pub fn new(source: SourceDocument) -> Self {
        FundraisingPage { source }
    }

    pub fn id(&self) -> Option<String> {
        self.source.string_at("uuid")
    }

    pub fn owner(&self) -> Option<String> {
        self.source.string_at("user.uuid")
    }

    /// Whether both pages belong to the same user.
    pub fn has_same_owner_as(&self, other: &FundraisingPage) -> Result<bool, MissingOwner> {
        let owner = self.owner().ok_or(MissingOwner { which: "page" })?;
        let other_owner = other.owner().ok_or(MissingOwner { which: "other" })?;
        Ok(owner == other_owner)
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TeamMember {
    #[serde(rename = "uuid")]
    pub id: String,
}

/// A team roster. Member order is the order the platform returned.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Team {
    #[serde(rename = "data", default, deserialize_with = "nullable")]
    pub members: Vec<TeamMember>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageDefault {
    pub label: String,
    pub value: String,
}

/// Campaign metadata used by transforms and extensions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Campaign {
    pub name: String,
    pub profile_id: String,
    pub page_defaults: Vec<PageDefault>,
}

impl Campaign {
    /// Reads a campaign from its `data` document. Only custom profile fields
    /// with both a label and a non-empty default become page defaults.
    pub fn from_document(doc: &SourceDocument) -> Self {
        let page_defaults = doc
            .array_at("config.customFields.profile")
            .into_iter()
            .filter_map(|field| {
                let label = field.string_at("label").filter(|l| !l.is_empty())?;
                let value = field.string_at("default").filter(|d| !d.is_empty())?;
                Some(PageDefault { label, value })
            })
            .collect();

        Campaign {
            name: doc.string_at("name").unwrap_or_default(),
            profile_id: doc.string_at("profile.uuid").unwrap_or_default(),
            page_defaults,
        }
    }

    /// Every default registered under `label`.
    pub fn page_defaults_for<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a str> {
        self.page_defaults
            .iter()
            .filter(move |d| d.label == label)
            .map(|d| d.value.as_str())
    }

    pub fn page_default<'a>(&'a self, label: &'a str) -> Option<&'a str> {
        self.page_defaults_for(label).next()
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ExerciseLogEntry {
    #[serde(default, deserialize_with = "nullable")]
    pub activity: String,
    #[serde(default, deserialize_with = "nullable")]
    pub date: String,
    #[serde(default, deserialize_with = "nullable")]
    pub distance: f64,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct DonationUser {
    #[serde(default, deserialize_with = "nullable")]
    pub uuid: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Donation {
    #[serde(default, deserialize_with = "nullable")]
    pub user: DonationUser,
    #[serde(default, deserialize_with = "nullable")]
    pub created_at: String,
    #[serde(default, deserialize_with = "nullable")]
    pub date: String,
    #[serde(rename = "type", default, deserialize_with = "nullable")]
    pub kind: String,
    #[serde(default, deserialize_with = "nullable")]
    pub amount: f64,
}

impl Donation {
    /// Offline donations carry the date they were made separately from the
    /// date they were entered.
    pub fn effective_timestamp(&self) -> &str {
        if self.kind == "OFFLINE" {
            &self.date
        } else {
            &self.created_at
        }
    }
}

/// Donations made to a profile up to a point in time, with registration fees
/// netted out of the total.
#[derive(Debug, Clone, PartialEq)]
pub struct DonationsUpTo {
    pub up_to: DateTime<Utc>,
    pub donations: Vec<Value>,
    pub total_donation_amount: i64,
    pub total_registration_fee_amount: i64,
}

impl DonationsUpTo {
    pub fn new(up_to: DateTime<Utc>, donations: Vec<Value>) -> Self {
        let total_registration_fee_amount = donations
            .iter()
            .filter_map(|d| d.get("items").and_then(Value::as_array))
            .flatten()
            .filter(|item| item.get("type").and_then(Value::as_str) == Some("REGISTRATION"))
            .filter_map(|item| item.get("amount"))
            .map(|amount| as_float(amount) as i64)
            .sum::<i64>();

        let gross = donations
            .iter()
            .filter_map(|d| d.get("amount"))
            .map(|amount| as_float(amount) as i64)
            .sum::<i64>();

        DonationsUpTo {
            up_to,
            donations,
            total_donation_amount: gross - total_registration_fee_amount,
            total_registration_fee_amount,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ProfileParent {
    #[serde(default, deserialize_with = "nullable")]
    pub uuid: String,
    #[serde(rename = "type", default, deserialize_with = "nullable")]
    pub kind: String,
}

/// A summary profile from the campaign-wide listing.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FundraisingProfile {
    #[serde(rename = "uuid")]
    pub id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub parent: ProfileParent,
    #[serde(default, deserialize_with = "nullable")]
    pub status: String,
    #[serde(rename = "type", default, deserialize_with = "nullable")]
    pub kind: String,
    #[serde(default, deserialize_with = "nullable")]
    pub updated_at: String,
}

impl FundraisingProfile {
    /// The team this profile belongs to. A group profile is its own team,
    /// otherwise its group parent is, unless that parent is the campaign's
    /// root profile.
    pub fn team_id_for(&self, campaign: &Campaign) -> Option<&str> {
        if self.kind == "GROUP" {
            return Some(&self.id);
        }
        if self.parent.kind == "GROUP" && self.parent.uuid != campaign.profile_id {
            return Some(&self.parent.uuid);
        }
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfilesSince {
    pub since: DateTime<Utc>,
    pub profiles: Vec<FundraisingProfile>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_owner() {
        let captain = FundraisingPage::new(json!({"user": {"uuid": "u-1"}}).into());
        let member = FundraisingPage::new(json!({"user": {"uuid": "u-2"}}).into());
        let ownerless = FundraisingPage::new(json!({"uuid": "p-9"}).into());

        assert_eq!(captain.has_same_owner_as(&captain), Ok(true));
        assert_eq!(member.has_same_owner_as(&captain), Ok(false));
        assert_eq!(
            ownerless.has_same_owner_as(&captain),
            Err(MissingOwner { which: "page" })
        );
        assert_eq!(
            captain.has_same_owner_as(&ownerless),
            Err(MissingOwner { which: "other" })
        );
    }

    #[test]
    fn test_campaign_from_document() {
        let doc = SourceDocument::new(json!({
            "name": "Walk the Block",
            "profile": {"uuid": "root-1"},
            "config": {"customFields": {"profile": [
                {"label": "Start", "default": "2024-03-01T00:00:00Z"},
                {"label": "Empty", "default": ""},
                {"label": "", "default": "orphan"},
                {"label": "Goal", "default": 500}
            ]}}
        }));
        let campaign = Campaign::from_document(&doc);

        assert_eq!(campaign.name, "Walk the Block");
        assert_eq!(campaign.profile_id, "root-1");
        assert_eq!(campaign.page_defaults.len(), 2);
        assert_eq!(campaign.page_default("Start"), Some("2024-03-01T00:00:00Z"));
        assert_eq!(campaign.page_default("Goal"), Some("500"));
        assert_eq!(campaign.page_default("Empty"), None);

        let label = String::from("Start");
        let start = campaign.page_default(&label);
        assert_eq!(start, Some("2024-03-01T00:00:00Z"));
    }

    #[test]
    fn test_donation_timestamp() {
        let donations: Vec<Donation> = serde_json::from_value(json!([
            {"createdAt": "2024-01-02T00:00:00Z", "date": "2024-01-01T00:00:00Z", "type": "OFFLINE", "amount": 100},
            {"createdAt": "2024-01-02T00:00:00Z", "date": null, "type": "ONLINE", "amount": 50.5, "user": null}
        ]))
        .unwrap();

        assert_eq!(donations[0].effective_timestamp(), "2024-01-01T00:00:00Z");
        assert_eq!(donations[1].effective_timestamp(), "2024-01-02T00:00:00Z");
        assert_eq!(donations[1].amount, 50.5);
        assert_eq!(donations[1].user.uuid, "");
    }

    #[test]
    fn test_registration_fee_netting() {
        let donations = vec![
            json!({"amount": 5000, "items": [
                {"type": "REGISTRATION", "amount": 2000},
                {"type": "DONATION", "amount": 3000}
            ]}),
            json!({"amount": 1500}),
        ];
        let up_to = DonationsUpTo::new(Utc::now(), donations);

        assert_eq!(up_to.total_registration_fee_amount, 2000);
        assert_eq!(up_to.total_donation_amount, 4500);
    }

    #[test]
    fn test_team_id_for() {
        let campaign = Campaign {
            profile_id: "root".into(),
            ..Default::default()
        };
        let profiles: Vec<FundraisingProfile> = serde_json::from_value(json!([
            {"uuid": "t-1", "type": "GROUP", "parent": {"uuid": "root", "type": "GROUP"}},
            {"uuid": "p-1", "type": "INDIVIDUAL", "parent": {"uuid": "t-1", "type": "GROUP"}},
            {"uuid": "p-2", "type": "INDIVIDUAL", "parent": {"uuid": "root", "type": "GROUP"}},
            {"uuid": "p-3", "type": "INDIVIDUAL", "parent": null}
        ]))
        .unwrap();

        assert_eq!(profiles[0].team_id_for(&campaign), Some("t-1"));
        assert_eq!(profiles[1].team_id_for(&campaign), Some("t-1"));
        assert_eq!(profiles[2].team_id_for(&campaign), None);
        assert_eq!(profiles[3].team_id_for(&campaign), None);
    }

    #[test]
    fn test_team_roster() {
        let team: Team =
            serde_json::from_value(json!({"data": [{"uuid": "a"}, {"uuid": "b"}]})).unwrap();
        assert_eq!(team.members.len(), 2);
        assert_eq!(team.members[1].id, "b");

        let empty: Team = serde_json::from_value(json!({"data": null})).unwrap();
        assert!(empty.members.is_empty());
    }

    #[test]
    fn test_data_list_envelope() {
        let logs: DataList<ExerciseLogEntry> = serde_json::from_value(json!({
            "data": [{"activity": "RUN", "date": "2024-01-01T00:00:00Z", "distance": 2}]
        }))
        .unwrap();
        assert_eq!(logs.data.len(), 1);
        assert_eq!(logs.data[0].activity, "RUN");

        let empty: DataList<Value> = serde_json::from_value(json!({"data": null})).unwrap();
        assert!(empty.data.is_empty());
        let missing: DataList<Value> = serde_json::from_value(json!({})).unwrap();
        assert!(missing.data.is_empty());
    }
}
