use clap::{Parser, Subcommand};
use localeats::config::{self, Settings};
use localeats::followup::{Followup, FollowupResult, ResultSnapshot};
use localeats::geo::{Geocoder, LlmGeocoder, Place, TableGeocoder};
use localeats::llm::mock_chat::MockChat;
use localeats::llm::mock_embed::MockEmbed;
use localeats::llm::ollama::{OllamaChat, OllamaEmbed};
use localeats::llm::{CanChat, CanEmbed};
use localeats::log::{self, LogLevel};
use localeats::orchestrator::{Orchestrator, PipelineRequest};
use localeats::researcher::MaxPrice;
use localeats::restaurant::{CandidateSet, Restaurant};
use localeats::reviews::ReviewSummarizer;
use localeats::status::{Reporter, StageState};
use localeats::store::{self, RestaurantStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "localeats", version, about = "Restaurant recommendations for the Boston area")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Restaurant data (.jsonl or .db), overrides the configured path
    #[arg(short, long)]
    data: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask for recommendations
    Ask {
        query: String,
        /// Where you are: a quick location like "MIT" or any local place name
        #[arg(long)]
        from: Option<String>,
        /// any, 1-4 or $..$$$$
        #[arg(long, default_value = "any")]
        max_price: MaxPrice,
        #[arg(long, default_value_t = 0.0)]
        min_safety: f64,
        /// Writer/reviewer rounds, defaults to the configured value
        #[arg(long)]
        iterations: Option<usize>,
        /// Review score that ends the loop early
        #[arg(long)]
        threshold: Option<i32>,
        /// Read follow-up questions from stdin afterwards
        #[arg(long)]
        chat: bool,
    },
    /// Look a restaurant up by name
    Find { name: String },
    /// Summarize recent reviews of a restaurant
    Reviews {
        id: String,
        /// Display name used in the prompt, defaults to the id
        #[arg(long)]
        name: Option<String>,
    },
}

struct Services {
    settings: Settings,
    chat: Arc<dyn CanChat>,
    store: Arc<dyn RestaurantStore>,
    geocoder: Arc<dyn Geocoder>,
}

async fn services(cli: &Cli) -> anyhow::Result<Services> {
    let settings = match &cli.config {
        Some(path) => config::load(path).await?,
        None => Settings::default(),
    };
    let profile = settings.llm.profile();
    let (chat, embed): (Arc<dyn CanChat>, Arc<dyn CanEmbed>) = match settings.llm.provider.as_str() {
        "ollama" => (
            Arc::new(OllamaChat::new(settings.llm.base_url.clone())),
            Arc::new(OllamaEmbed::new(settings.llm.base_url.clone())),
        ),
        "mock" => (Arc::new(MockChat::default()), Arc::new(MockEmbed)),
        other => anyhow::bail!("unknown llm provider '{other}'"),
    };
    let geocoder: Arc<dyn Geocoder> = if settings.llm.provider == "mock" {
        Arc::new(TableGeocoder::from_settings(&settings.geo))
    } else {
        Arc::new(LlmGeocoder::new(chat.clone(), profile.clone(), &settings.geo))
    };
    let Some(path) = cli.data.clone().or_else(|| settings.store.path.clone()) else {
        anyhow::bail!("no restaurant data: pass --data or set [store] path");
    };
    let store = store::open(&path, embed, profile).await?;
    Ok(Services {
        settings,
        chat,
        store,
        geocoder,
    })
}

/// Quick location names first, then the geocoder.
async fn resolve_from(services: &Services, name: &str) -> Option<Place> {
    let quick = services
        .settings
        .geo
        .quick_locations
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name.trim()));
    if let Some((key, c)) = quick {
        return Some(Place {
            name: key.clone(),
            coordinates: *c,
        });
    }
    let place = services.geocoder.geocode(name).await;
    if place.is_none() {
        warn!(location = %name, "could not resolve your location, distances disabled");
    }
    place
}

fn print_row(index: usize, r: &Restaurant) {
    let score = r
        .overall_score
        .map_or("N/A".to_string(), |s| format!("{s:.1}"));
    let distance = r
        .distance
        .map(|d| format!(" | {:.1} mi", d.miles))
        .unwrap_or_default();
    println!(
        "{index}. {} ({}) | {} | {} | overall {score}{distance}",
        r.name,
        r.cuisine,
        r.locality(),
        r.price_symbols()
    );
}

fn print_set(set: &CandidateSet) {
    for (i, r) in set.iter().enumerate() {
        print_row(i + 1, r);
    }
}

/// Print stage events to stderr. The task ends once every clone of the
/// returned reporter is dropped.
fn progress() -> (Reporter, JoinHandle<()>) {
    let (reporter, mut rx) = Reporter::channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let mark = match event.state {
                StageState::Running => "..",
                StageState::Success => "ok",
                StageState::Warning => "!!",
                StageState::Failed => "xx",
            };
            eprintln!("[{mark}] {}: {}", event.stage, event.detail);
        }
    });
    (reporter, printer)
}

#[allow(clippy::too_many_arguments)]
async fn ask(
    services: &Services,
    query: String,
    from: Option<String>,
    max_price: MaxPrice,
    min_safety: f64,
    iterations: Option<usize>,
    threshold: Option<i32>,
    chat: bool,
) -> anyhow::Result<()> {
    let settings = &services.settings;
    let reference_point = match &from {
        Some(name) => resolve_from(services, name).await,
        None => None,
    };
    let (reporter, printer) = progress();
    let orchestrator = Orchestrator::new(
        services.chat.clone(),
        services.store.clone(),
        services.geocoder.clone(),
        settings,
    )
    .with_reporter(reporter);

    let mut req = PipelineRequest::new(query);
    req.reference_point = reference_point.clone();
    req.max_price = max_price;
    req.min_safety = min_safety;
    req.max_iterations = iterations.unwrap_or(settings.pipeline.max_iterations);
    req.quality_threshold = threshold.unwrap_or(settings.pipeline.quality_threshold);

    let outcome = orchestrator.run_pipeline(&req).await;
    drop(orchestrator);
    if let Err(e) = printer.await {
        warn!(error = %e, "progress printer stopped");
    }
    let result = match outcome {
        Ok(result) => result,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("Suggestion: {}", e.suggestion());
            std::process::exit(1);
        }
    };

    println!("{}\n", result.narrative);
    print_set(&result.researched.top(settings.pipeline.top_n_written));
    println!(
        "\nQuality score: {}/10 after {} iteration(s)",
        result.quality_score, result.iterations
    );

    if !chat {
        return Ok(());
    }
    let snapshot = ResultSnapshot::from(&result);
    let followup = Followup::new(
        services.chat.clone(),
        settings.llm.profile(),
        services.geocoder.clone(),
        &settings.geo,
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    eprintln!("Ask a follow-up (empty line to quit):");
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            break;
        }
        match followup
            .run_followup(text, &snapshot, reference_point.as_ref())
            .await
        {
            FollowupResult::ShowClosest { results, location } => {
                println!("From {location}:");
                print_set(&results);
            }
            FollowupResult::ShowCheapest { results }
            | FollowupResult::ShowSafest { results }
            | FollowupResult::ShowFiltered { results } => print_set(&results),
            FollowupResult::Error { message }
            | FollowupResult::TriggerNewSearch { message }
            | FollowupResult::Unknown { message } => println!("{message}"),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    log::init(cli.log_level);
    let services = services(&cli).await?;

    match cli.command {
        Command::Ask {
            query,
            from,
            max_price,
            min_safety,
            iterations,
            threshold,
            chat,
        } => {
            ask(
                &services, query, from, max_price, min_safety, iterations, threshold, chat,
            )
            .await
        }
        Command::Find { name } => {
            let found = services.store.find_by_name(&name, 5).await?;
            if found.is_empty() {
                println!("No restaurant named '{name}'");
            }
            for (i, r) in found.iter().enumerate() {
                print_row(i + 1, r);
                println!("   id: {}", r.id);
            }
            Ok(())
        }
        Command::Reviews { id, name } => {
            let name = name.unwrap_or_else(|| id.clone());
            let summary = ReviewSummarizer::new(
                services.chat.clone(),
                services.settings.llm.profile(),
                services.store.clone(),
            )
            .summarize(&id, &name)
            .await;
            println!("{} ({} reviews)", summary.summary, summary.num_reviews);
            for pro in &summary.pros {
                println!("  + {pro}");
            }
            for con in &summary.cons {
                println!("  - {con}");
            }
            Ok(())
        }
    }
}
