use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use docqa_ai::{EmbeddingCache, RagEngine};
use docqa_core::config::EngineConfig;
use docqa_core::error::AppError;
use serde::Serialize;

mod commands;
mod logging;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch a web page and index its text.
    IngestUrl { url: String },
    /// Index a PDF in place.
    IngestPdf { path: String },
    /// Copy a PDF into the uploads directory and index it.
    Upload { path: PathBuf },
    /// Answer one question.
    Ask {
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },
    /// Interactive session with conversation history.
    Chat,
    /// List indexed sources.
    Sources,
    /// Remove a source (and its uploaded file, for PDFs).
    Remove {
        name: String,
        #[arg(long)]
        short: Option<String>,
    },
    /// Nearest chunks with raw distances.
    Search {
        query: String,
        #[arg(short, long, default_value_t = 5)]
        k: usize,
    },
    /// Index and memory statistics.
    Stats,
    /// Delete the whole index.
    Reset,
    /// Check that the local Ollama backend answers.
    Check,
}

fn print<T: Serialize + std::fmt::Debug>(json: bool, value: &T) {
    if json {
        match serde_json::to_string_pretty(value) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("error: failed to encode output: {e}"),
        }
    } else {
        println!("{value:#?}");
    }
}

fn chat(engine: &RagEngine) -> Result<(), AppError> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    println!("Ask a question. :history, :clear, :stats, :quit");
    loop {
        print!("> ");
        // Prompt only; a failed flush is harmless.
        let _ = stdout.flush();
        let mut line = String::new();
        let n = stdin.lock().read_line(&mut line).map_err(|e| {
            AppError::validation("CLI_INPUT_FAILED", "Failed to read from stdin").with_details(e.to_string())
        })?;
        if n == 0 {
            return Ok(());
        }
        match line.trim() {
            "" => continue,
            ":quit" | ":q" | ":exit" => return Ok(()),
            ":history" => {
                for ex in engine.get_history() {
                    println!("#{} [{}] Q: {}\n   A: {}", ex.sequence_number, ex.recorded_at, ex.question, ex.answer);
                }
            }
            ":clear" => {
                engine.clear_history();
                println!("History cleared.");
            }
            ":stats" => print(false, &engine.get_stats()),
            question => println!("{}\n", engine.query(question)),
        }
    }
}

fn run(args: Args, cfg: EngineConfig) -> Result<(), AppError> {
    if let Command::Check = args.command {
        print(args.json, &commands::health_check(&cfg)?);
        return Ok(());
    }

    let cache = EmbeddingCache::new();
    let engine = RagEngine::from_config(&cfg, &cache)?;

    let result = match args.command {
        Command::IngestUrl { url } => commands::ingest_url(&engine, &url).map(|s| print(args.json, &s)),
        Command::IngestPdf { path } => commands::ingest_pdf(&engine, &path).map(|s| print(args.json, &s)),
        Command::Upload { path } => commands::upload(&engine, &path).map(|s| print(args.json, &s)),
        Command::Ask { question } => {
            let answer = engine.query(&question.join(" "));
            if args.json {
                print(true, &serde_json::json!({ "answer": answer }));
            } else {
                println!("{answer}");
            }
            Ok(())
        }
        Command::Chat => chat(&engine),
        Command::Sources => {
            print(args.json, &commands::sources(&engine));
            Ok(())
        }
        Command::Remove { name, short } => {
            commands::remove(&engine, &name, short.as_deref()).map(|s| print(args.json, &s))
        }
        Command::Search { query, k } => commands::search(&engine, &query, k).map(|h| print(args.json, &h)),
        Command::Stats => {
            print(args.json, &commands::stats(&engine));
            Ok(())
        }
        Command::Reset => engine.reset_index().map(|()| println!("Index cleared.")),
        Command::Check => Ok(()),
    };

    cache.clear();
    result
}

fn main() -> ExitCode {
    let args = Args::parse();

    let cfg = match EngineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    let log_dir = std::env::var("DOCQA_LOG_DIR").ok().filter(|v| !v.trim().is_empty()).map(PathBuf::from);
    logging::init(log_dir.as_deref());

    match run(args, cfg) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(kind = e.kind.as_str(), code = %e.code, err = %e, "command failed");
            eprintln!("error: {}", e.message);
            ExitCode::FAILURE
        }
    }
}
