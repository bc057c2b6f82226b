use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use grantdash_core::SourceTag;
use grantdash_sync::{parse_keyword_list, parse_source_list, rank_by_expected_value, GrantDash};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "grantdash")]
#[command(about = "Grant opportunity aggregation, fit scoring and tracking")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Default, Args)]
struct RefreshArgs {
    /// Comma-separated keyword profile; defaults to the configured keywords.
    #[arg(long)]
    keywords: Option<String>,
    /// Comma-separated sources, e.g. `nih-reporter,grants-gov`.
    #[arg(long)]
    sources: Option<String>,
}

impl RefreshArgs {
    fn keywords(&self) -> Option<Vec<String>> {
        self.keywords.as_deref().map(parse_keyword_list)
    }

    fn sources(&self) -> Option<Vec<SourceTag>> {
        self.sources.as_deref().map(parse_source_list)
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch, normalize and score opportunities from every enabled source.
    Refresh {
        #[command(flatten)]
        args: RefreshArgs,
        /// Order by funding-weighted score, then fit score.
        #[arg(long)]
        rank: bool,
        #[arg(long)]
        json: bool,
    },
    /// Refresh, then start tracking the given opportunity titles.
    Track {
        #[arg(required = true)]
        titles: Vec<String>,
        #[command(flatten)]
        args: RefreshArgs,
    },
    /// Edit one field of a tracked grant.
    Update {
        title: String,
        field: String,
        value: String,
    },
    /// Print pursuit metrics over the tracked grants.
    Scorecard {
        #[arg(long)]
        json: bool,
    },
    /// List collaborators and keywords nobody on the roster covers.
    Collaborators {
        /// Comma-separated keywords; defaults to the configured keywords.
        #[arg(long)]
        keywords: Option<String>,
    },
    /// Serve the JSON API on `GRANTDASH_WEB_PORT`.
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fmt_score(score: Option<f64>) -> String {
    score.map(|s| format!("{s:.1}")).unwrap_or_else(|| "-".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Refresh {
        args: RefreshArgs::default(),
        rank: false,
        json: false,
    });

    info!(?command, "grantdash starting");
    let grantdash = GrantDash::from_env().await?;

    match command {
        Commands::Refresh { args, rank, json } => {
            let (keywords, sources) = (args.keywords(), args.sources());
            let mut outcome = grantdash
                .refresh(keywords.as_deref(), sources.as_deref())
                .await;
            if rank {
                outcome.opportunities = rank_by_expected_value(outcome.opportunities);
            }
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&outcome).context("serializing refresh outcome")?
                );
            } else {
                for source in &outcome.sources {
                    match &source.error {
                        Some(err) => println!("{}: {} items ({err})", source.source, source.items),
                        None => println!("{}: {} items", source.source, source.items),
                    }
                }
                for opp in &outcome.opportunities {
                    println!(
                        "[{}] {} | {} | fit={} weighted={} deadline={}",
                        opp.source,
                        opp.title,
                        opp.agency,
                        fmt_score(opp.fit_score),
                        fmt_score(opp.funding_weighted_score),
                        if opp.deadline.is_empty() { "n/a" } else { opp.deadline.as_str() },
                    );
                }
                println!(
                    "refresh complete: run_id={} opportunities={} fallback_used={}",
                    outcome.run_id,
                    outcome.opportunities.len(),
                    outcome.fallback_used
                );
            }
        }
        Commands::Track { titles, args } => {
            let (keywords, sources) = (args.keywords(), args.sources());
            let (_, merged) = grantdash
                .track(&titles, keywords.as_deref(), sources.as_deref())
                .await?;
            for title in &merged.created {
                println!("tracking: {title}");
            }
            for title in &merged.already_tracked {
                println!("already tracked: {title}");
            }
            for title in &merged.unmatched {
                println!("not in this refresh: {title}");
            }
        }
        Commands::Update { title, field, value } => {
            let grant = grantdash.store.update_field(&title, &field, &value).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&grant).context("serializing tracked grant")?
            );
        }
        Commands::Scorecard { json } => {
            let card = grantdash.scorecard().await;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&card).context("serializing scorecard")?
                );
            } else {
                println!("total submitted:   {}", card.total_submitted);
                println!("funded:            {}", card.funded_count);
                println!("success rate:      {:.1}%", card.success_rate);
                println!("average score:     {}", card.average_score);
                println!("resubmission rate: {:.1}%", card.resubmission_rate);
                println!("total funding:     {:.2}", card.total_funding);
            }
        }
        Commands::Collaborators { keywords } => {
            let directory = &grantdash.collaborators;
            let keywords = keywords
                .as_deref()
                .map(parse_keyword_list)
                .unwrap_or_else(|| grantdash.registry.keywords.clone());
            for (label, profiles) in [("current", directory.current()), ("potential", directory.potential())] {
                println!("{label}:");
                for p in profiles {
                    println!("  {} ({}) - {}", p.name, p.organization, p.expertise);
                }
            }
            let gaps = directory.expertise_gaps(&keywords);
            if gaps.is_empty() {
                println!("no expertise gaps for the keyword profile");
            } else {
                println!("expertise gaps: {}", gaps.join(", "));
            }
        }
        Commands::Serve => grantdash_web::serve(grantdash).await?,
    }

    Ok(())
}
