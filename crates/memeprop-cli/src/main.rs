//! `memeprop` — batch driver and report queries for the meme propagation
//! engine.
//!
//! Reads `memeprop.toml` (or the path given with `--config`), opens the SQLite
//! store and either recomputes every derived relation or reads them back.
//!
//! # Usage
//!
//! ```
//! memeprop stage posts.jsonl
//! memeprop run --workers 4
//! memeprop stats --order-by peak_score --limit 10
//! memeprop timeline --post t3_abc123
//! ```

mod config;

use std::{fs::File, io::BufReader, path::PathBuf};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use memeprop_core::{
  batch,
  fingerprint::{self, Fingerprint, FingerprintOutcome, PolicyKind},
  post::Post,
  store::{
    AdoptionColumn, AdoptionQuery, FingerprintColumn, FingerprintQuery,
    PropagationStore, SortOrder,
  },
  timeline,
};
use memeprop_store_sqlite::SqliteStore;
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::EngineConfig;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(author, version, about = "Meme propagation analytics")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "memeprop.toml")]
  config: PathBuf,

  /// SQLite store; overrides `store_path` from the config.
  #[arg(long, global = true)]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Append posts from a JSON Lines file to the post store.
  Stage { file: PathBuf },

  /// Recompute every derived relation from the current post snapshot.
  Run {
    #[arg(long)]
    policy:          Option<PolicyKind>,
    #[arg(long)]
    min_appearances: Option<u32>,
    #[arg(long)]
    workers:         Option<usize>,
  },

  /// Print the fingerprint a single title/url pair would receive.
  Fingerprint {
    #[arg(long)]
    title:  Option<String>,
    #[arg(long)]
    url:    Option<String>,
    #[arg(long)]
    policy: Option<PolicyKind>,
  },

  /// Query `fingerprint_stats`.
  Stats {
    #[arg(long)]
    order_by:       Option<FingerprintColumn>,
    #[arg(long)]
    asc:            bool,
    /// Only fingerprints whose peak score is strictly greater.
    #[arg(long)]
    min_peak_score: Option<i64>,
    #[arg(long, default_value_t = 20)]
    limit:          usize,
  },

  /// Query `subreddit_adoption_stats`.
  Adoption {
    #[arg(long)]
    order_by:                Option<AdoptionColumn>,
    #[arg(long)]
    asc:                     bool,
    #[arg(long)]
    min_unique_fingerprints: Option<u64>,
    #[arg(long, default_value_t = 20)]
    limit:                   usize,
  },

  /// Images reposted under more than one caption.
  Mutations {
    #[arg(long, default_value_t = 20)]
    limit:   usize,
    /// Sample posts listed for the top mutated image.
    #[arg(long, default_value_t = 12)]
    samples: usize,
  },

  /// Chronological posts of one fingerprint, with daily score totals.
  Timeline {
    /// Look the fingerprint up from one of its posts.
    #[arg(long, required_unless_present = "fingerprint", conflicts_with = "fingerprint")]
    post:        Option<String>,
    #[arg(long)]
    fingerprint: Option<String>,
  },
}

fn order(asc: bool) -> SortOrder {
  if asc { SortOrder::Asc } else { SortOrder::Desc }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
  let out = serde_json::to_string_pretty(value).context("failed to encode output")?;
  println!("{out}");
  Ok(())
}

async fn open_store(cfg: &EngineConfig) -> anyhow::Result<SqliteStore> {
  SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  // Initialise tracing.
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let mut cfg = EngineConfig::load(&cli.config)?;
  if let Some(store) = cli.store {
    cfg.store_path = store;
  }

  match cli.command {
    Command::Fingerprint { title, url, policy } => {
      let policy = policy.unwrap_or(cfg.policy);
      let post = Post {
        id: String::new(),
        subreddit: String::new(),
        title,
        url,
        score: 0,
        created_utc: None,
      };
      let caption = post.title.as_deref().map(fingerprint::normalize_caption);
      let outcome = match policy.policy().fingerprint(&post) {
        FingerprintOutcome::Assigned(fp) => serde_json::json!({ "fingerprint": fp }),
        FingerprintOutcome::Unfingerprintable(reason) => {
          serde_json::json!({ "rejected": reason.as_str() })
        }
      };
      print_json(&serde_json::json!({
        "policy":             policy.as_str(),
        "normalized_caption": caption,
        "outcome":            outcome,
      }))?;
    }

    Command::Stage { file } => {
      let store = open_store(&cfg).await?;
      let reader = BufReader::new(
        File::open(&file).with_context(|| format!("failed to open {file:?}"))?,
      );
      let posts = serde_json::Deserializer::from_reader(reader)
        .into_iter::<Post>()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("failed to parse posts from {file:?}"))?;
      let staged = store.stage_posts(posts).await.context("failed to stage posts")?;
      tracing::info!(staged, "posts staged");
    }

    Command::Run { policy, min_appearances, workers } => {
      let store = open_store(&cfg).await?;
      if let Some(policy) = policy {
        cfg.policy = policy;
      }
      if let Some(min) = min_appearances {
        cfg.min_appearances = min;
      }
      if let Some(workers) = workers {
        cfg.workers = workers;
      }

      let posts = store.load_posts().await.context("failed to load posts")?;
      let analysis = batch::analyze(&posts, &cfg.analysis()).context("analysis failed")?;
      let run = store
        .materialize(&analysis)
        .await
        .context("failed to materialise analysis")?;
      tracing::info!(run_id = run.run_id, "relations materialised");
      print_json(&run)?;
    }

    Command::Stats { order_by, asc, min_peak_score, limit } => {
      let store = open_store(&cfg).await?;
      let query = FingerprintQuery {
        order_by: order_by.unwrap_or_default(),
        order: order(asc),
        min_peak_score,
        limit: Some(limit),
      };
      print_json(&store.fingerprint_stats(&query).await?)?;
    }

    Command::Adoption { order_by, asc, min_unique_fingerprints, limit } => {
      let store = open_store(&cfg).await?;
      let query = AdoptionQuery {
        order_by: order_by.unwrap_or_default(),
        order: order(asc),
        min_unique_fingerprints,
        limit: Some(limit),
      };
      print_json(&store.adoption_stats(&query).await?)?;
    }

    Command::Mutations { limit, samples } => {
      let store = open_store(&cfg).await?;
      let mutations = store.image_mutations(Some(limit)).await?;
      let sample = match mutations.first() {
        Some(top) => store.posts_for_url(&top.url, Some(samples)).await?,
        None => Vec::new(),
      };
      print_json(&serde_json::json!({
        "mutations":  mutations,
        "top_sample": sample,
      }))?;
    }

    Command::Timeline { post, fingerprint } => {
      let store = open_store(&cfg).await?;
      let fp = match (post, fingerprint) {
        (_, Some(key)) => Fingerprint::new(key),
        (Some(id), None) => store
          .fingerprint_of(&id)
          .await?
          .with_context(|| format!("post {id:?} has no fingerprint"))?,
        (None, None) => anyhow::bail!("either --post or --fingerprint is required"),
      };
      let entries = store.timeline(&fp).await?;
      let daily = timeline::daily_scores(&entries);
      print_json(&serde_json::json!({
        "fingerprint": fp,
        "posts":       entries,
        "daily":       daily,
      }))?;
    }
  }

  Ok(())
}
