//! CLI entry point for the coach backend: fit FAQ bundles, retrieve and chat.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use coach_core::{
    app_data_dir, config_path, load_config, save_config, status, ChatRequest, Config, FaqRetriever,
    FaqTable, HybridChatbot, OllamaEmbedder, OllamaGenerator,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coach")]
#[command(about = "Coach: fitness and nutrition FAQ assistant")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show backend status (for dev).
    Status,
    /// Show where the coach stores its config and bundles (app data directory).
    DataDir,
    /// Print the effective config as TOML.
    Config {
        /// Write a default config file first if none exists.
        #[arg(long)]
        init: bool,
    },
    /// Fit the FAQ retriever from a CSV file and publish the bundle.
    Fit {
        /// FAQ CSV with a header row. Defaults to `faq_csv` from the config.
        #[arg(long, value_name = "PATH")]
        csv: Option<PathBuf>,
        /// Bundle directory. Defaults to `artifact_dir` from the config.
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,
        #[arg(long, default_value = "question")]
        question_field: String,
        #[arg(long, default_value = "answer")]
        answer_field: String,
        /// Default neighbor count stored in the index.
        #[arg(long)]
        neighbors: Option<usize>,
    },
    /// Show the closest FAQ entries for a query.
    Retrieve {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
    },
    /// Ask the hybrid chatbot.
    Ask {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
        /// Print the `/chat` response body as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config();

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => {
            println!("Coach backend");
            println!("  core: {}", status());
            match config.artifact_dir() {
                Some(dir) if dir.is_dir() => println!("  bundle: {}", dir.display()),
                Some(dir) => println!("  bundle: not fitted yet ({})", dir.display()),
                None => println!("  bundle: no app data directory"),
            }
        }
        Commands::DataDir => match app_data_dir() {
            Some(p) => println!("{}", p.display()),
            None => eprintln!("Could not determine app data directory."),
        },
        Commands::Config { init } => {
            if init {
                if let Err(e) = init_config() {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
            if let Some(p) = config_path() {
                println!("# {}", p.display());
            }
            match toml::to_string_pretty(&config) {
                Ok(s) => print!("{s}"),
                Err(e) => eprintln!("Error: {}", e),
            }
        }
        Commands::Fit {
            csv,
            out,
            question_field,
            answer_field,
            neighbors,
        } => {
            let Some(csv) = csv.or_else(|| config.faq_csv()) else {
                eprintln!("Error: no FAQ CSV given (use --csv or set faq_csv in config)");
                std::process::exit(2);
            };
            let Some(out) = out.or_else(|| config.artifact_dir()) else {
                eprintln!("Error: no bundle directory (use --out or set artifact_dir in config)");
                std::process::exit(2);
            };
            let neighbors = neighbors.unwrap_or(config.neighbor_count);
            let fields = (question_field.as_str(), answer_field.as_str());
            if let Err(e) = fit(&config, &csv, &out, fields, neighbors).await {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Retrieve { query, k } => {
            let k = k.unwrap_or(config.top_k);
            match load_retriever(&config) {
                Ok(retriever) => match retriever.retrieve(&query, k).await {
                    Ok(results) => {
                        for r in results {
                            println!("{:>6.3}  #{:<4} {}", r.similarity, r.index, r.question);
                            println!("              {}", r.answer);
                        }
                    }
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        std::process::exit(1);
                    }
                },
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Ask { query, k, json } => {
            let k = k.unwrap_or(config.top_k);
            if let Err(e) = ask(&config, query, k, json).await {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn fit(
    config: &Config,
    csv: &std::path::Path,
    out: &std::path::Path,
    (question_field, answer_field): (&str, &str),
    neighbors: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let table = FaqTable::from_csv_path(csv)?;
    let embedder = OllamaEmbedder::from_url(&config.ollama_url)?.with_model(&config.embed_model);
    let mut retriever = FaqRetriever::new(embedder);
    retriever.fit(&table, question_field, answer_field, neighbors).await?;
    retriever.publish(out)?;
    println!(
        "Fitted {} FAQ entries with '{}' into {}",
        retriever.corpus().map_or(0, |c| c.len()),
        config.embed_model,
        out.display()
    );
    Ok(())
}

/// Write the default config unless a config file is already there.
fn init_config() -> Result<(), Box<dyn std::error::Error>> {
    let path = config_path().ok_or("could not determine app data directory")?;
    if path.is_file() {
        eprintln!("Config already exists at {}", path.display());
        return Ok(());
    }
    save_config(&Config::default())?;
    eprintln!("Wrote default config to {}", path.display());
    Ok(())
}

fn load_retriever(
    config: &Config,
) -> Result<FaqRetriever<OllamaEmbedder>, Box<dyn std::error::Error>> {
    let dir = config.artifact_dir().ok_or("could not determine bundle directory")?;
    let url = config.ollama_url.clone();
    Ok(FaqRetriever::load(&dir, |name| OllamaEmbedder::resolve(&url, name))?)
}

async fn ask(
    config: &Config,
    query: String,
    k: usize,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let retriever = Arc::new(load_retriever(config)?);
    let generator = OllamaGenerator::from_url(&config.ollama_url)?
        .with_model(&config.chat_model)
        .with_sampling(config.sampling())
        .with_timeout(config.generation_timeout());
    let bot = HybridChatbot::new(retriever, generator, config.chatbot_settings());

    let response = bot.respond(ChatRequest { query }, k).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        let score = response
            .response
            .score
            .map_or_else(|| "n/a".to_string(), |s| format!("{s:.3}"));
        println!("[{:?}, score {}]", response.response.mode, score);
        println!("{}", response.response.answer);
    }
    Ok(())
}
