use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use coach_session::{InferenceFacade, SeedPolicy, SessionConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// coach-cli - ask the on-device coaching model a question
#[derive(Parser)]
#[command(name = "coach-cli", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Load the model from a directory and answer one prompt.
    Ask {
        /// Directory holding the .gguf artifact.
        #[arg(short = 'd', long)]
        model_dir: Option<PathBuf>,

        /// The user's question.
        #[arg(short, long)]
        prompt: String,

        /// Health context block passed to the model verbatim.
        #[arg(short, long, default_value = "")]
        context: String,

        /// Maximum number of tokens to generate.
        #[arg(short, long)]
        max_tokens: Option<usize>,

        /// Seed for reproducible sampling.
        #[arg(short, long)]
        seed: Option<u64>,

        /// Sampling temperature; 0 selects greedily.
        #[arg(short, long)]
        temperature: Option<f32>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Ask {
            model_dir,
            prompt,
            context,
            max_tokens,
            seed,
            temperature,
        } => {
            // Flags override the COACH_* environment, which overrides defaults.
            let mut config = SessionConfig::from_env();
            if let Some(dir) = model_dir {
                config = config.with_model_dir(dir);
            }
            if let Some(n) = max_tokens {
                config = config.with_max_new_tokens(n);
            }
            if let Some(seed) = seed {
                config.sampler.seed = SeedPolicy::Fixed(seed);
            }
            if let Some(t) = temperature {
                config.sampler.temperature = t;
            }
            ask(config, &prompt, &context).await
        }
    }
}

async fn ask(config: SessionConfig, prompt: &str, context: &str) -> ExitCode {
    let facade = match InferenceFacade::spawn(config) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("error: could not start inference worker: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut generation = std::pin::pin!(facade.generate(prompt, context));
    let result = tokio::select! {
        r = &mut generation => r,
        _ = tokio::signal::ctrl_c() => {
            facade.cancel();
            generation.await
        }
    };

    match result {
        Ok(g) => {
            info!(
                prompt_tokens = g.prompt_tokens,
                generated_tokens = g.generated_tokens,
                elapsed_ms = g.elapsed.as_millis() as u64,
                "done"
            );
            println!("{}", g.text);
            if g.is_partial() {
                eprintln!("(reply cut short: {:?})", g.finish);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
