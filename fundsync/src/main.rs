mod config;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use config::{Config, LoggingConfig, MetricsConfig};
use mapper::{FieldMappings, SyncError, SyncMapper, Target};
use metrics_exporter_statsd::StatsdBuilder;
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use upstream::{Fetcher, HttpUpstream, UpstreamError};

#[derive(Parser)]
#[command(about = "Syncs fundraiser and team pages into the CRM")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long)]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Validate the configuration and print the mapped field catalogue
    CheckConfig,
    /// Map one fundraiser
    Fundraiser { id: String },
    /// Map every member of a team
    Team { id: String },
    /// Compute streaks and split totals for a fundraiser or team
    Extensions {
        id: String,
        #[arg(long)]
        team: bool,
        /// Write non-empty patches back to the pages
        #[arg(long)]
        apply: bool,
    },
    /// Print the campaign's metadata
    Campaign {
        #[arg(long)]
        refresh: bool,
    },
    /// List fundraisers and teams changed since a point in time
    Changes {
        #[arg(long)]
        since: DateTime<Utc>,
    },
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("could not write output: {0}")]
    Output(#[from] serde_json::Error),
    #[error("could not install metrics recorder: {0}")]
    Metrics(String),
}

fn init_logging(logging: Option<&LoggingConfig>) -> Option<sentry::ClientInitGuard> {
    let guard = logging.map(|logging| {
        sentry::init((
            logging.sentry_dsn.as_str(),
            sentry::ClientOptions {
                release: sentry::release_name!(),
                ..Default::default()
            },
        ))
    });

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(guard.as_ref().map(|_| sentry::integrations::tracing::layer()))
        .init();

    guard
}

fn init_metrics(metrics: &MetricsConfig) -> Result<(), CliError> {
    let recorder = StatsdBuilder::from(metrics.statsd_host.clone(), metrics.statsd_port)
        .build(Some(&metrics.prefix))
        .map_err(|e| CliError::Metrics(e.to_string()))?;
    metrics::set_global_recorder(recorder).map_err(|e| CliError::Metrics(e.to_string()))?;
    Ok(())
}

fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn field_catalogue(mapper: &SyncMapper) -> Value {
    let catalogue = |mappings: &FieldMappings| {
        mappings
            .all_keys()
            .map(|id| (id.to_string(), Value::String(mappings.describe(id))))
            .collect::<Map<String, Value>>()
    };
    json!({
        "fundraiser": catalogue(&mapper.mappings().fundraiser),
        "team": catalogue(&mapper.mappings().team),
    })
}

async fn run(command: CliCommand, config: Config) -> Result<(), CliError> {
    let upstream = HttpUpstream::new(
        config.upstream.url.clone(),
        config.upstream.api_key.clone(),
        config.upstream.timeout(),
    )?;
    let mapper = SyncMapper::new(config.sync, config.mappings, Fetcher::new(Arc::new(upstream)));
    let target = mapper.config().target;

    match command {
        CliCommand::CheckConfig => print_json(&field_catalogue(&mapper)),
        CliCommand::Fundraiser { id } => {
            let campaign = mapper.campaign(false).await?;
            match target {
                Target::Contacts => print_json(&mapper.map_fundraiser_contact(&campaign, &id).await?),
                Target::Activities => {
                    print_json(&mapper.map_fundraiser_activity(&campaign, &id).await?)
                }
            }
        }
        CliCommand::Team { id } => {
            let campaign = mapper.campaign(false).await?;
            match target {
                Target::Contacts => print_json(&mapper.map_team_contacts(&campaign, &id).await?),
                Target::Activities => print_json(&mapper.map_team_activities(&campaign, &id).await?),
            }
        }
        CliCommand::Extensions { id, team, apply } => {
            let campaign = mapper.campaign(false).await?;
            let now = Utc::now();
            let patches = if team {
                mapper.team_extensions_patches(&campaign, &id, now).await?
            } else {
                vec![mapper.fundraiser_extensions_patch(&campaign, &id, now).await?]
            };

            let mut results = Vec::with_capacity(patches.len());
            for patch in &patches {
                let status = match apply {
                    true => mapper.apply_patch(patch).await?,
                    false => None,
                };
                results.push(json!({
                    "page_id": patch.page_id,
                    "patch": patch.patch.to_value(),
                    "status": status,
                }));
            }
            print_json(&results)
        }
        CliCommand::Campaign { refresh } => {
            let campaign = mapper.campaign(refresh).await?;
            let page_defaults: Vec<Value> = campaign
                .page_defaults
                .iter()
                .map(|d| json!({"label": d.label, "value": d.value}))
                .collect();
            print_json(&json!({
                "name": campaign.name,
                "profile_id": campaign.profile_id,
                "page_defaults": page_defaults,
            }))
        }
        CliCommand::Changes { since } => {
            let campaign = mapper.campaign(false).await?;
            print_json(&mapper.changed_since(&campaign, since).await?)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let _sentry = init_logging(config.common.logging.as_ref());
    if let Some(metrics) = &config.common.metrics
        && let Err(e) = init_metrics(metrics)
    {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    match run(cli.command, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}
