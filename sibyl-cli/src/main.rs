//! Sibyl CLI - retrieval, deep search, evaluation, and demo front-end
//!
//! Exit codes: 0 success, 1 usage error, 2 data not found.

mod ragpack;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand, ValueEnum};
use sibyl_core::{init_logging, LoggingConfig, SibylError, SibylResult};
use sibyl_rag::{
    load_config_or_default, DeepSearch, EmbeddingProvider, HashedNgramEmbedder, HybridRetriever,
    MockLlm, ParamBandit, PipelineBuilder, SibylConfig, VectorStore, Verdict,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "sibyl")]
#[command(about = "On-device RAG engine with feedback learning")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Thumbs {
    Up,
    Down,
}

#[derive(Subcommand)]
enum Commands {
    /// Retrieve passages for a query from a RAGpack
    Retrieve {
        /// The query text
        query: String,
        /// RAGpack directory (chunks.json + embeddings.csv)
        #[arg(long)]
        pack: PathBuf,
        /// Number of passages to return
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        /// MMR relevance/diversity trade-off
        #[arg(long, default_value_t = 0.7)]
        lambda: f32,
        /// Print per-stage candidates
        #[arg(long)]
        trace: bool,
    },
    /// Multi-round deep search with query expansion
    Deep {
        query: String,
        #[arg(long)]
        pack: PathBuf,
        /// Expansion rounds
        #[arg(long, default_value_t = 2)]
        rounds: usize,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
    },
    /// Replay a labeled query file and report the hit rate
    Eval {
        #[arg(long)]
        pack: PathBuf,
        /// JSON file: [{"query": "...", "expect": ["substring", ...]}]
        #[arg(long)]
        queries: PathBuf,
        #[arg(long, default_value_t = 5)]
        top_k: usize,
        #[arg(long, default_value_t = 0.7)]
        lambda: f32,
    },
    /// Simulate feedback rounds and print the bandit's posterior table
    Bandit {
        #[arg(long, default_value_t = 300)]
        rounds: usize,
        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Answer a question end-to-end against the scripted binding
    Demo {
        question: String,
        #[arg(long)]
        pack: PathBuf,
        /// Apply answer-level feedback after answering
        #[arg(long, value_enum)]
        thumbs: Option<Thumbs>,
    },
}

fn exit_code(err: &SibylError) -> i32 {
    match err {
        SibylError::NotFound { .. } | SibylError::Corrupt { .. } => 2,
        SibylError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => 2,
        _ => 1,
    }
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    let logging = LoggingConfig {
        level: if cli.verbose { "debug" } else { "warn" }.to_string(),
        ..Default::default()
    };
    if let Err(err) = init_logging(&logging) {
        eprintln!("warning: failed to initialize logging: {}", err);
    }

    if let Err(err) = run(cli).await {
        err.log();
        eprintln!("error: {}", err);
        std::process::exit(exit_code(&err));
    }
}

/// Load config, seed a store from the pack, and build a retriever over it
fn open_pack(config: &SibylConfig, pack: &Path) -> SibylResult<(Arc<VectorStore>, Arc<HybridRetriever>)> {
    let pack = ragpack::load_ragpack(pack)?;

    let provider: Arc<dyn EmbeddingProvider> =
        Arc::new(HashedNgramEmbedder::new(&config.embedding)?);
    let store = Arc::new(VectorStore::new(provider));

    let pack_dimension = pack.dimension();
    store.add(pack.chunks, true);

    // Packs embedded elsewhere rarely match the local model's space;
    // re-embed so dense search compares like with like
    if pack_dimension.is_some() && pack_dimension != Some(store.provider().dimension()) {
        info!(
            "RAGpack dimension {:?} differs from provider {}, re-embedding",
            pack_dimension,
            store.provider().dimension()
        );
        store.reembed_all();
    }

    let retriever = Arc::new(HybridRetriever::new(
        Arc::clone(&store),
        config.retrieval.clone(),
    )?);
    Ok((store, retriever))
}

async fn run(cli: Cli) -> SibylResult<()> {
    let config = load_config_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Retrieve {
            query,
            pack,
            top_k,
            lambda,
            trace,
        } => {
            let (_, retriever) = open_pack(&config, &pack)?;
            let outcome = retriever.retrieve_full(&query, top_k, lambda);

            if trace {
                println!("variants: {:?}", outcome.trace.variants);
                println!("bm25 candidates:");
                for (preview, score) in &outcome.trace.bm25 {
                    println!("  {:8.3}  {}", score, preview);
                }
                println!("dense candidates:");
                for (preview, score) in &outcome.trace.dense {
                    println!("  {:8.3}  {}", score, preview);
                }
                println!("union: {} candidates", outcome.trace.union_size);
            }

            for (rank, scored) in outcome.selected.iter().enumerate() {
                println!("{:2}. [{:.3}] {}", rank + 1, scored.score, scored.chunk.content);
            }
        }

        Commands::Deep {
            query,
            pack,
            rounds,
            top_k,
        } => {
            let (_, retriever) = open_pack(&config, &pack)?;
            let deep = DeepSearch::new(
                retriever,
                sibyl_rag::DeepSearchConfig {
                    rounds,
                    top_k,
                    ..config.deep_search.clone()
                },
            );

            for (rank, scored) in deep.search(&query).iter().enumerate() {
                println!("{:2}. [{:.3}] {}", rank + 1, scored.score, scored.chunk.content);
            }
        }

        Commands::Eval {
            pack,
            queries,
            top_k,
            lambda,
        } => {
            let (_, retriever) = open_pack(&config, &pack)?;
            let cases = load_eval_cases(&queries)?;

            let mut hits = 0;
            for case in &cases {
                let results = retriever.retrieve(&case.query, top_k, lambda);
                let hit = results.iter().any(|s| {
                    let content = s.chunk.content.to_lowercase();
                    case.expect.iter().any(|e| content.contains(&e.to_lowercase()))
                });
                if hit {
                    hits += 1;
                }
                println!("{}  {}", if hit { "HIT " } else { "MISS" }, case.query);
            }
            if cases.is_empty() {
                println!("no queries to evaluate");
            } else {
                println!(
                    "hit rate: {}/{} ({:.1}%)",
                    hits,
                    cases.len(),
                    100.0 * hits as f32 / cases.len() as f32
                );
            }
        }

        Commands::Bandit { rounds, seed } => {
            run_bandit_simulation(&config, rounds, seed)?;
        }

        Commands::Demo {
            question,
            pack,
            thumbs,
        } => {
            let pack = ragpack::load_ragpack(&pack)?;
            let pack_dimension = pack.dimension();
            let pipeline = PipelineBuilder::new(config)
                .with_llm(Arc::new(MockLlm::new(
                    "Based on the cited passages, here is what the corpus says. [1]",
                )))
                .build()?;
            pipeline.store().add(pack.chunks, true);
            if pack_dimension.is_some()
                && pack_dimension != Some(pipeline.store().provider().dimension())
            {
                pipeline.store().reembed_all();
            }

            let result = pipeline.answer(&question).await?;
            println!("qa id : {}", result.qa_id);
            println!("answer: {}", result.answer);
            for (idx, source) in result.sources.iter().enumerate() {
                println!("  [{}] {}", idx + 1, source.content);
            }

            if let Some(thumbs) = thumbs {
                let verdict = match thumbs {
                    Thumbs::Up => Verdict::Up,
                    Thumbs::Down => Verdict::Down,
                };
                pipeline.feedback_answer(result.qa_id, verdict);
                println!(
                    "feedback {:?} applied: cache now holds {} answers",
                    verdict,
                    pipeline.cache().len()
                );

                let again = pipeline.answer(&question).await?;
                println!(
                    "asked again: {}",
                    if again.from_cache { "served from cache" } else { "recomputed" }
                );
            }
        }
    }

    Ok(())
}

#[derive(serde::Deserialize)]
struct EvalCase {
    query: String,
    expect: Vec<String>,
}

fn load_eval_cases(path: &Path) -> SibylResult<Vec<EvalCase>> {
    if !path.is_file() {
        return Err(sibyl_core::not_found_error!(path.display(), "eval"));
    }
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw)
        .map_err(|_| sibyl_core::corrupt_error!("queries file is not valid JSON", "eval"))
}

/// Drive the configured arms with synthetic rewards, then print the table
fn run_bandit_simulation(config: &SibylConfig, rounds: usize, seed: Option<u64>) -> SibylResult<()> {
    let bandit = match seed {
        Some(seed) => ParamBandit::with_uniform_source(
            config.bandit.clone(),
            Box::new(sibyl_rag::FastrandUniform::with_seed(seed)),
        )?,
        None => ParamBandit::new(config.bandit.clone())?,
    };
    let mut outcome_rng = match seed {
        Some(seed) => fastrand::Rng::with_seed(seed.wrapping_add(1)),
        None => fastrand::Rng::new(),
    };

    // First arm rewards at 0.7, the rest at 0.3: the table should tilt
    let queries = ["how do actors work", "what is value semantics", "explain generics"];
    for round in 0..rounds {
        let query = queries[round % queries.len()];
        let qa_id = uuid::Uuid::new_v4();
        let (_, arm) = bandit.choose_params(query, Some(qa_id));

        let p_up = if arm.id == config.bandit.arms[0].id { 0.7 } else { 0.3 };
        let verdict = if outcome_rng.f64() < p_up {
            Verdict::Up
        } else {
            Verdict::Down
        };
        bandit.reward(qa_id, verdict);
    }

    println!("posteriors after {} rounds:", rounds);
    for (cluster, arms) in bandit.posterior_table() {
        println!("{}", cluster);
        for (arm_id, posterior) in arms {
            println!(
                "  {:10} Beta({:.0}, {:.0})  mean {:.3}",
                arm_id,
                posterior.alpha,
                posterior.beta,
                posterior.alpha / (posterior.alpha + posterior.beta)
            );
        }
    }
    Ok(())
}
