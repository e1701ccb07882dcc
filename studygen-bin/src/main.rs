use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use studygen_core::{
    backend::{EdgeFunctionBackend, GenerationBackend, ReplayBackend},
    config::Config,
    generators::{
        GeneratorKind,
        quiz::{questions_from, questions_from_content, score_answers},
    },
    model::{Difficulty, GenerationParams, Length},
    session::{GenerationSession, GenerationState},
    store::{self, MaterialStore},
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about = "Generate and manage AI study materials", long_about = None)]
struct Cli {
    /// JSON or TOML config file. Without one, STUDYGEN_FUNCTIONS_URL and defaults are used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the available generators
    Kinds,
    /// Generate a study material, printing progress as it streams
    Generate {
        #[arg(long)]
        kind: GeneratorKind,
        #[arg(long)]
        topic: String,
        #[arg(long)]
        count: Option<u32>,
        #[arg(long)]
        difficulty: Option<Difficulty>,
        #[arg(long)]
        length: Option<Length>,
        #[arg(long, help = "Replay a recorded event stream instead of calling the endpoint")]
        replay: Option<PathBuf>,
        #[arg(long, help = "Save the finished material")]
        save: bool,
        #[arg(long, value_delimiter = ',', help = "Answer indexes to score a quiz with")]
        answers: Vec<usize>,
    },
    /// List saved materials, newest first
    List,
    /// Print one saved material
    Show {
        #[arg(long)]
        id: Uuid,
    },
    /// Delete one saved material
    Delete {
        #[arg(long)]
        id: Uuid,
    },
    /// Score answers against a saved quiz
    Score {
        #[arg(long)]
        id: Uuid,
        #[arg(long, value_delimiter = ',', required = true)]
        answers: Vec<usize>,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(p) => Config::from_path(p).with_context(|| format!("loading config {}", p.display())),
        None => {
            let url = std::env::var("STUDYGEN_FUNCTIONS_URL")
                .unwrap_or_else(|_| "http://localhost:54321/functions/v1".to_string());
            Ok(Config::with_endpoint(url))
        }
    }
}

fn user_id(cfg: &Config) -> String {
    cfg.user_id
        .clone()
        .or_else(|| std::env::var("STUDYGEN_USER_ID").ok())
        .unwrap_or_else(|| "local".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_ref())?;
    let user = user_id(&cfg);

    match cli.command {
        Commands::Kinds => {
            for kind in GeneratorKind::ALL {
                let count = kind
                    .count_spec()
                    .map(|c| format!(" (count {}-{}, default {})", c.min, c.max, c.default))
                    .unwrap_or_default();
                println!("{:<18} {}{}", kind.tag(), kind.label(), count);
            }
        }
        Commands::Generate {
            kind,
            topic,
            count,
            difficulty,
            length,
            replay,
            save,
            answers,
        } => {
            let backend: Arc<dyn GenerationBackend> = match &replay {
                Some(path) => Arc::new(ReplayBackend::from_path(path)?.with_flush_tail(cfg.stream.flush_trailing_line)),
                None => Arc::new(EdgeFunctionBackend::from_config(&cfg)?),
            };
            let params = GenerationParams {
                topic,
                difficulty,
                length,
                count,
                extra: None,
            };

            let mut session = GenerationSession::new(kind, cfg.stream.clone())?;
            let mut progress = session.subscribe();
            let printer = tokio::spawn(async move {
                while progress.changed().await.is_ok() {
                    let p = progress.borrow_and_update().clone();
                    let items = kind
                        .primary_list()
                        .and_then(|l| p.result.get(l))
                        .and_then(|v| v.as_array())
                        .map_or(0, |a| a.len());
                    eprintln!("[{}] merges={} items={}", p.state.as_str(), p.stats.merges, items);
                    if p.state.is_terminal() {
                        break;
                    }
                }
            });
            let abort = session.abort_handle();
            let ctrl_c = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    abort.abort();
                }
            });

            let state = session.run(backend.as_ref(), params).await?;
            ctrl_c.abort();
            // The terminal snapshot is already published; let the printer show it.
            let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

            if let GenerationState::Failed(failure) = &state {
                bail!("{}", failure.user_message);
            }
            println!("{}", serde_json::to_string_pretty(session.result().fields())?);
            eprintln!("{}: {}", kind.label(), kind.describe(session.result()));

            if !answers.is_empty() {
                if kind != GeneratorKind::Mcqs {
                    bail!("--answers only applies to the mcqs generator");
                }
                let questions = questions_from(session.result())?;
                let answers: Vec<_> = answers.into_iter().map(Some).collect();
                let score = score_answers(&questions, &answers);
                println!("score: {}/{} ({:.0}%)", score.correct, score.total, score.percent());
            }
            if save {
                let store = store::from_config(&cfg)?;
                let rec = session.save(store.as_ref(), &user).await?;
                println!("saved {} to {} store", rec.id, store.name());
            }
        }
        Commands::List => {
            let store = store::from_config(&cfg)?;
            for m in store.list_for_user(&user).await? {
                println!("{}  {}  {:<18} {}", m.id, m.created_at.format("%Y-%m-%d %H:%M"), m.kind, m.title);
            }
        }
        Commands::Show { id } => {
            let store = store::from_config(&cfg)?;
            let Some(m) = store.get(&user, id).await? else {
                bail!("no material {id}");
            };
            println!("{}", serde_json::to_string_pretty(&m)?);
        }
        Commands::Delete { id } => {
            let store = store::from_config(&cfg)?;
            if !store.delete(&user, id).await? {
                bail!("no material {id}");
            }
            println!("deleted {id}");
        }
        Commands::Score { id, answers } => {
            let store: Arc<dyn MaterialStore> = store::from_config(&cfg)?;
            let Some(m) = store.get(&user, id).await? else {
                bail!("no material {id}");
            };
            if m.kind != GeneratorKind::Mcqs.tag() {
                bail!("material {id} is a {}, not a quiz", m.kind);
            }
            let questions = questions_from_content(&m.content)?;
            let answers: Vec<_> = answers.into_iter().map(Some).collect();
            let score = score_answers(&questions, &answers);
            println!("score: {}/{} ({:.0}%)", score.correct, score.total, score.percent());
        }
    }

    Ok(())
}
