//! Conditional per-field rules applied after mapping.
//!
//! A transform table maps an encoded field identifier to a directive of the
//! form `function[:arg[,arg...]]`. Every field named by a table must already
//! be present on the record.

use crate::errors::TransformError;
use crate::record::Mappable;
use chrono::{DateTime, TimeDelta};
use indexmap::IndexMap;
use serde_json::Value;
use std::str::FromStr;
use upstream::metrics_defs::TRANSFORM_FIELD_DELETED;
use upstream::{Campaign, FundraisingPage, Upstream, counter};

#[derive(Debug, Clone, PartialEq)]
pub enum FundraiserTransform {
    /// Deletes the field when it still holds the campaign's page default.
    OnlyIfNotDefault { label: String },
    /// Blanks the field when it still holds the page default. Deprecated.
    BlankIfDefault { label: String },
    WarnIfEqual { sentinel: String },
    /// Keeps the field only when the fundraiser donated at least `amount`
    /// within `window` of registering.
    OnlyIfSelfDonatedDuringRegistrationWindow { amount: i64, window: TimeDelta },
}

impl FromStr for FundraiserTransform {
    type Err = TransformError;

    fn from_str(directive: &str) -> Result<Self, Self::Err> {
        let (function, arg) = directive.split_once(':').unwrap_or((directive, ""));
        match function {
            "onlyIfNotDefault" => Ok(FundraiserTransform::OnlyIfNotDefault {
                label: arg.to_string(),
            }),
            "blankIfDefault" => Ok(FundraiserTransform::BlankIfDefault {
                label: arg.to_string(),
            }),
            "warnIfEqual" => Ok(FundraiserTransform::WarnIfEqual {
                sentinel: arg.to_string(),
            }),
            "onlyIfSelfDonatedDuringRegistrationWindow" => {
                let invalid = |reason: String| TransformError::InvalidArgument {
                    transform: directive.to_string(),
                    arg: arg.to_string(),
                    reason,
                };
                let Some((amount, window)) = arg.split_once(',') else {
                    return Err(invalid("expected two params".into()));
                };
                let amount = amount
                    .parse::<i64>()
                    .map_err(|e| invalid(format!("invalid amount: {e}")))?;
                let window = parse_duration(window)
                    .ok_or_else(|| invalid(format!("invalid duration {window:?}")))?;
                Ok(FundraiserTransform::OnlyIfSelfDonatedDuringRegistrationWindow {
                    amount,
                    window,
                })
            }
            _ => Err(TransformError::Unsupported {
                field: String::new(),
                transform: directive.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeamTransform {
    IsCaptain,
    IsMember,
    OnlyIfOrgTypeSchool,
}

impl FromStr for TeamTransform {
    type Err = TransformError;

    fn from_str(directive: &str) -> Result<Self, Self::Err> {
        let function = directive.split(':').next().unwrap_or_default();
        match function {
            "isCaptain" => Ok(TeamTransform::IsCaptain),
            "isMember" => Ok(TeamTransform::IsMember),
            "onlyIfOrgTypeSchool" => Ok(TeamTransform::OnlyIfOrgTypeSchool),
            _ => Err(TransformError::Unsupported {
                field: String::new(),
                transform: directive.to_string(),
            }),
        }
    }
}

fn parse_directive<T>(field: &str, directive: &str) -> Result<T, TransformError>
where
    T: FromStr<Err = TransformError>,
{
    directive.parse().map_err(|e| match e {
        TransformError::Unsupported { transform, .. } => TransformError::Unsupported {
            field: field.to_string(),
            transform,
        },
        other => other,
    })
}

/// Parses every directive of a fundraiser table.
pub fn validate_fundraiser_transforms(
    transforms: &IndexMap<String, String>,
) -> Result<(), TransformError> {
    for (field, directive) in transforms {
        parse_directive::<FundraiserTransform>(field, directive)?;
    }
    Ok(())
}

pub fn validate_team_transforms(transforms: &IndexMap<String, String>) -> Result<(), TransformError> {
    for (field, directive) in transforms {
        parse_directive::<TeamTransform>(field, directive)?;
    }
    Ok(())
}

/// Parses a duration such as `72h`, `1h30m` or `90s`.
pub fn parse_duration(raw: &str) -> Option<TimeDelta> {
    let (negative, mut rest) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };
    if rest == "0" {
        return Some(TimeDelta::zero());
    }
    if rest.is_empty() {
        return None;
    }

    let mut nanos: f64 = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let number: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        nanos += number * scale;
    }

    let delta = TimeDelta::nanoseconds(nanos.round() as i64);
    Some(if negative { -delta } else { delta })
}

/// Inputs the fundraiser transforms need beyond the record itself.
pub struct TransformContext<'a> {
    pub campaign: &'a Campaign,
    pub campaign_prefix: &'a str,
    pub upstream: &'a dyn Upstream,
    /// Keeps fields guarded by the registration window check instead of
    /// querying donations.
    pub skip_donation_check: bool,
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => "<nil>".to_string(),
        other => upstream::source::as_string(other),
    }
}

fn delete(record: &mut dyn Mappable, field: &str, transform: &'static str) {
    record.delete_field(field);
    counter!(TRANSFORM_FIELD_DELETED, "transform" => transform).increment(1);
}

fn is_page_default(record: &dyn Mappable, field: &str, campaign: &Campaign, label: &str) -> bool {
    match record.get_field(field) {
        Some(Value::String(value)) => campaign.page_defaults_for(label).any(|d| d == value.as_str()),
        _ => false,
    }
}

pub async fn apply_fundraiser_transforms(
    transforms: &IndexMap<String, String>,
    ctx: &TransformContext<'_>,
    record: &mut dyn Mappable,
) -> Result<(), TransformError> {
    for (field, directive) in transforms {
        if !record.has_field(field) {
            return Err(TransformError::MissingField(field.clone()));
        }

        match parse_directive(field, directive)? {
            FundraiserTransform::OnlyIfNotDefault { label } => {
                if is_page_default(record, field, ctx.campaign, &label) {
                    delete(record, field, "onlyIfNotDefault");
                }
            }
            FundraiserTransform::BlankIfDefault { label } => {
                tracing::warn!(
                    field = %field,
                    "Transform blankIfDefault is deprecated, use onlyIfNotDefault instead"
                );
                if is_page_default(record, field, ctx.campaign, &label) {
                    record.set_field(field, Value::String(String::new()));
                }
            }
            FundraiserTransform::WarnIfEqual { sentinel } => {
                let value = record.get_field(field).map(stringify).unwrap_or_default();
                if value == sentinel {
                    tracing::warn!(field = %field, value = %value, "Field holds a sentinel value");
                }
            }
            FundraiserTransform::OnlyIfSelfDonatedDuringRegistrationWindow { amount, window } => {
                if ctx.skip_donation_check {
                    tracing::warn!(
                        field = %field,
                        "Registration window donation check is not supported here, field kept"
                    );
                    continue;
                }
                if !self_donated(ctx, record, amount, window).await? {
                    delete(record, field, "onlyIfSelfDonatedDuringRegistrationWindow");
                }
            }
        }
    }
    Ok(())
}

async fn self_donated(
    ctx: &TransformContext<'_>,
    record: &dyn Mappable,
    amount: i64,
    window: TimeDelta,
) -> Result<bool, TransformError> {
    let date_field = format!("tme:cm:{}-registration-date", ctx.campaign_prefix);
    let Some(Value::String(registered)) = record.get_field(&date_field) else {
        return Ok(false);
    };
    let registered = DateTime::parse_from_rfc3339(registered).map_err(|source| {
        TransformError::InvalidRegistrationDate {
            field: date_field.clone(),
            source,
        }
    })?;

    let id_field = format!("str:cm:{}-p2p-registration-id", ctx.campaign_prefix);
    let Some(Value::String(id)) = record.get_field(&id_field) else {
        return Err(TransformError::MissingField(id_field));
    };

    let up_to = registered.to_utc() + window;
    let donations = ctx
        .upstream
        .fetch_donations_up_to(id, up_to)
        .await
        .map_err(TransformError::DonationCheck)?;

    tracing::debug!(
        id = %id,
        total = donations.total_donation_amount,
        required = amount,
        "Checked registration window donations"
    );
    Ok(donations.total_donation_amount >= amount)
}

/// Applies team transforms to a member's record. Captaincy is decided by the
/// member page and the team page having the same owner.
pub fn apply_team_transforms(
    transforms: &IndexMap<String, String>,
    member_page: &FundraisingPage,
    team_page: &FundraisingPage,
    record: &mut dyn Mappable,
) -> Result<(), TransformError> {
    if transforms.is_empty() {
        return Ok(());
    }

    let captain = member_page.has_same_owner_as(team_page)?;
    let org_type = team_page
        .source
        .string_at("public.organisationType")
        .unwrap_or_default()
        .to_lowercase();

    for (field, directive) in transforms {
        if !record.has_field(field) {
            return Err(TransformError::MissingField(field.clone()));
        }
        match parse_directive(field, directive)? {
            TeamTransform::IsCaptain => record.set_field(field, Value::Bool(captain)),
            TeamTransform::IsMember => record.set_field(field, Value::Bool(!captain)),
            TeamTransform::OnlyIfOrgTypeSchool => {
                if org_type != "school" {
                    delete(record, field, "onlyIfOrgTypeSchool");
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Contact;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use upstream::testutils::InMemoryUpstream;
    use upstream::{PageDefault, RequestKind, SourceDocument};

    fn campaign() -> Campaign {
        Campaign {
            name: "Spring".into(),
            profile_id: "root".into(),
            page_defaults: vec![PageDefault {
                label: "Why I fundraise".into(),
                value: "Because it matters".into(),
            }],
        }
    }

    fn table(entries: &[(&str, &str)]) -> IndexMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn contact(fields: Value) -> Contact {
        Contact {
            fields: serde_json::from_value(fields).unwrap(),
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("72h"), Some(TimeDelta::hours(72)));
        assert_eq!(parse_duration("1h30m"), Some(TimeDelta::minutes(90)));
        assert_eq!(parse_duration("1.5h"), Some(TimeDelta::minutes(90)));
        assert_eq!(parse_duration("250ms"), Some(TimeDelta::milliseconds(250)));
        assert_eq!(parse_duration("-2s"), Some(TimeDelta::seconds(-2)));
        assert_eq!(parse_duration("0"), Some(TimeDelta::zero()));
        assert_eq!(parse_duration("3d"), None);
        assert_eq!(parse_duration("h"), None);
        assert_eq!(parse_duration(""), None);
    }

    #[test]
    fn test_parse_directives() {
        assert_eq!(
            "onlyIfSelfDonatedDuringRegistrationWindow:2000,168h"
                .parse::<FundraiserTransform>()
                .unwrap(),
            FundraiserTransform::OnlyIfSelfDonatedDuringRegistrationWindow {
                amount: 2000,
                window: TimeDelta::hours(168),
            }
        );
        assert!(matches!(
            "onlyIfSelfDonatedDuringRegistrationWindow:2000".parse::<FundraiserTransform>(),
            Err(TransformError::InvalidArgument { .. })
        ));
        assert!(matches!(
            "onlyIfSelfDonatedDuringRegistrationWindow:lots,1h".parse::<FundraiserTransform>(),
            Err(TransformError::InvalidArgument { .. })
        ));
        assert_eq!("isMember".parse::<TeamTransform>().unwrap(), TeamTransform::IsMember);

        let err = validate_fundraiser_transforms(&table(&[("str:cm:bio", "shout")])).unwrap_err();
        assert!(matches!(
            err,
            TransformError::Unsupported { field, transform }
                if field == "str:cm:bio" && transform == "shout"
        ));
    }

    #[tokio::test]
    async fn test_default_transforms() {
        let upstream = InMemoryUpstream::new();
        let campaign = campaign();
        let ctx = TransformContext {
            campaign: &campaign,
            campaign_prefix: "spring",
            upstream: &upstream,
            skip_donation_check: false,
        };
        let transforms = table(&[
            ("txt:cm:why", "onlyIfNotDefault:Why I fundraise"),
            ("txt:cm:story", "onlyIfNotDefault:Why I fundraise"),
            ("txt:cm:legacy", "blankIfDefault:Why I fundraise"),
            ("int:cm:total", "warnIfEqual:0"),
        ]);
        let mut record = contact(json!({
            "txt:cm:why": "Because it matters",
            "txt:cm:story": "My own words",
            "txt:cm:legacy": "Because it matters",
            "int:cm:total": 0
        }));

        apply_fundraiser_transforms(&transforms, &ctx, &mut record)
            .await
            .unwrap();

        assert!(!record.has_field("txt:cm:why"));
        assert_eq!(record.fields["txt:cm:story"], json!("My own words"));
        assert_eq!(record.fields["txt:cm:legacy"], json!(""));
        assert_eq!(record.fields["int:cm:total"], json!(0));
    }

    #[tokio::test]
    async fn test_missing_field_is_an_error() {
        let upstream = InMemoryUpstream::new();
        let campaign = campaign();
        let ctx = TransformContext {
            campaign: &campaign,
            campaign_prefix: "spring",
            upstream: &upstream,
            skip_donation_check: false,
        };
        let mut record = Contact::default();
        let err = apply_fundraiser_transforms(
            &table(&[("txt:cm:why", "onlyIfNotDefault:Why I fundraise")]),
            &ctx,
            &mut record,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TransformError::MissingField(f) if f == "txt:cm:why"));
    }

    fn registered_contact() -> Contact {
        contact(json!({
            "bol:cm:spring-early-bird": true,
            "tme:cm:spring-registration-date": "2024-03-01T10:00:00Z",
            "str:cm:spring-p2p-registration-id": "p-1"
        }))
    }

    fn donations_upstream() -> InMemoryUpstream {
        let upstream = InMemoryUpstream::new();
        upstream.add_donations(
            "p-1",
            json!([
                {"amount": 1500, "createdAt": "2024-03-01T12:00:00Z",
                 "items": [{"type": "REGISTRATION", "amount": 500}]},
                {"amount": 1500, "createdAt": "2024-03-02T12:00:00Z"},
                {"amount": 5000, "createdAt": "2024-04-01T12:00:00Z"}
            ]),
        );
        upstream
    }

    #[tokio::test]
    async fn test_self_donated_within_window() {
        let upstream = donations_upstream();
        let campaign = campaign();
        let ctx = TransformContext {
            campaign: &campaign,
            campaign_prefix: "spring",
            upstream: &upstream,
            skip_donation_check: false,
        };

        // 1500 + 1500 - 500 registration fee
        let mut record = registered_contact();
        let keep = table(&[(
            "bol:cm:spring-early-bird",
            "onlyIfSelfDonatedDuringRegistrationWindow:2500,48h",
        )]);
        apply_fundraiser_transforms(&keep, &ctx, &mut record)
            .await
            .unwrap();
        assert!(record.has_field("bol:cm:spring-early-bird"));
        assert_eq!(
            upstream.donations_up_to_requests(),
            vec![(
                "p-1".to_string(),
                Utc.with_ymd_and_hms(2024, 3, 3, 10, 0, 0).unwrap()
            )]
        );

        let mut record = registered_contact();
        let drop = table(&[(
            "bol:cm:spring-early-bird",
            "onlyIfSelfDonatedDuringRegistrationWindow:3000,48h",
        )]);
        apply_fundraiser_transforms(&drop, &ctx, &mut record)
            .await
            .unwrap();
        assert!(!record.has_field("bol:cm:spring-early-bird"));
    }

    #[tokio::test]
    async fn test_self_donated_edge_cases() {
        let upstream = donations_upstream();
        let campaign = campaign();
        let transforms = table(&[(
            "bol:cm:spring-early-bird",
            "onlyIfSelfDonatedDuringRegistrationWindow:1,48h",
        )]);

        // Skip mode keeps the field without asking upstream.
        let skip = TransformContext {
            campaign: &campaign,
            campaign_prefix: "spring",
            upstream: &upstream,
            skip_donation_check: true,
        };
        let mut record = contact(json!({"bol:cm:spring-early-bird": true}));
        apply_fundraiser_transforms(&transforms, &skip, &mut record)
            .await
            .unwrap();
        assert!(record.has_field("bol:cm:spring-early-bird"));
        assert_eq!(upstream.calls(RequestKind::DonationsUpTo), 0);

        let ctx = TransformContext {
            skip_donation_check: false,
            ..skip
        };

        // No registration date: the field is dropped.
        apply_fundraiser_transforms(&transforms, &ctx, &mut record)
            .await
            .unwrap();
        assert!(!record.has_field("bol:cm:spring-early-bird"));

        let mut record = contact(json!({
            "bol:cm:spring-early-bird": true,
            "tme:cm:spring-registration-date": "last tuesday"
        }));
        assert!(matches!(
            apply_fundraiser_transforms(&transforms, &ctx, &mut record).await,
            Err(TransformError::InvalidRegistrationDate { .. })
        ));

        upstream.fail(RequestKind::DonationsUpTo, "p-1");
        let mut record = registered_contact();
        assert!(matches!(
            apply_fundraiser_transforms(&transforms, &ctx, &mut record).await,
            Err(TransformError::DonationCheck(_))
        ));
    }

    fn page(owner: Option<&str>, org_type: &str) -> FundraisingPage {
        let mut doc = json!({"uuid": "x", "public": {"organisationType": org_type}});
        if let Some(owner) = owner {
            doc["user"] = json!({"uuid": owner});
        }
        FundraisingPage::new(SourceDocument::new(doc))
    }

    #[test]
    fn test_team_transforms() {
        let transforms = table(&[
            ("bol:cm:captain", "isCaptain"),
            ("bol:cm:member", "isMember"),
            ("str:cm:school-name", "onlyIfOrgTypeSchool"),
        ]);
        let fields = json!({
            "bol:cm:captain": null,
            "bol:cm:member": null,
            "str:cm:school-name": "Hillside"
        });

        let mut record = contact(fields.clone());
        apply_team_transforms(
            &transforms,
            &page(Some("u-1"), ""),
            &page(Some("u-1"), "School"),
            &mut record,
        )
        .unwrap();
        assert_eq!(record.fields["bol:cm:captain"], json!(true));
        assert_eq!(record.fields["bol:cm:member"], json!(false));
        assert_eq!(record.fields["str:cm:school-name"], json!("Hillside"));

        let mut record = contact(fields);
        apply_team_transforms(
            &transforms,
            &page(Some("u-2"), ""),
            &page(Some("u-1"), "Company"),
            &mut record,
        )
        .unwrap();
        assert_eq!(record.fields["bol:cm:captain"], json!(false));
        assert_eq!(record.fields["bol:cm:member"], json!(true));
        assert!(!record.has_field("str:cm:school-name"));
    }

    #[test]
    fn test_team_transforms_need_owners() {
        let transforms = table(&[("bol:cm:captain", "isCaptain")]);
        let mut record = contact(json!({"bol:cm:captain": null}));
        let err = apply_team_transforms(
            &transforms,
            &page(Some("u-1"), ""),
            &page(None, ""),
            &mut record,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "other page is missing an owner");

        // Nothing to apply, nothing to check.
        apply_team_transforms(
            &IndexMap::new(),
            &page(None, ""),
            &page(None, ""),
            &mut record,
        )
        .unwrap();
    }
}
