//! DialogTTS CLI - Conversation to Speech
//!
//! A command-line tool that voices scripted multi-speaker conversations with
//! several text-to-speech backends.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};
use colored::Colorize;
use dialogtts_core::{
    BackendKind, BackendRegistry, BackendSettings, Conversation, ConversationPipeline, Mp3Tools,
    PipelineEvent, SelectionPolicy, VoiceCatalog, find_input_files,
};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "dialogtts",
    version,
    about = "DialogTTS - Voice multi-speaker conversations",
    long_about = "Converts conversation JSON files into per-line speech clips, a merged MP3 track and a JSON manifest, assigning voices across Google and ElevenLabs."
)]
struct Cli {
    /// Conversation JSON file, or a directory of them
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Directory for generated audio and manifests
    #[arg(short, long, default_value = "output", value_name = "DIR")]
    output: PathBuf,

    /// Only use these backends (repeatable)
    #[arg(short, long, action = ArgAction::Append, value_name = "NAME")]
    backend: Vec<BackendKind>,

    /// Voice selection policy: fixed, random or gender-balanced
    #[arg(short, long, default_value = "gender-balanced", value_name = "POLICY")]
    policy: SelectionPolicy,

    /// Voice catalog (TOML, or JSON by extension)
    #[arg(long, default_value = "config/voices.toml", value_name = "PATH")]
    voices: PathBuf,

    /// Language hint passed to the backends
    #[arg(long, default_value = "en", value_name = "LANG")]
    lang: String,

    /// Default Google domain for voices without a tld
    #[arg(long, default_value = "com", value_name = "TLD")]
    tld: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value = "30", value_name = "SECS")]
    timeout: u64,

    /// Retries for transient backend failures
    #[arg(long, default_value = "2", value_name = "N")]
    retries: u32,

    /// Seed for reproducible voice choices
    #[arg(long, value_name = "N")]
    seed: Option<u64>,

    /// Show debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let catalog = match VoiceCatalog::load(&cli.voices) {
        Ok(catalog) => catalog,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    let settings = BackendSettings::from_env()
        .with_lang(&cli.lang)
        .with_tld(&cli.tld)
        .with_timeout(Duration::from_secs(cli.timeout))
        .with_retries(cli.retries);

    let mut registry = BackendRegistry::with_default_backends();
    if !cli.backend.is_empty() {
        registry.retain(&cli.backend.iter().copied().collect::<BTreeSet<_>>());
    }
    registry.initialize(&settings);

    // Print header
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", "  DialogTTS - Conversation to Speech".bright_blue().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Voices:".bold(), cli.voices.display().to_string().bright_white());
    println!("{} {}", "Policy:".bold(), cli.policy.to_string().yellow());
    println!("{}", "Backends:".bold());
    for kind in registry.available_backends() {
        println!("  {} {}", "✓".green(), kind.to_string().bright_cyan());
    }
    for (kind, reason) in registry.unavailable() {
        println!("  {} {} {}", "✗".red(), kind.to_string().dimmed(), reason.dimmed());
    }
    println!();

    let pipeline = ConversationPipeline::new(
        catalog,
        registry,
        cli.policy,
        &cli.output,
        Box::new(Mp3Tools),
    );
    let mut pipeline = match pipeline {
        Ok(pipeline) => pipeline
            .with_retries(settings.retries, Duration::from_secs(1))
            .with_callback(create_console_callback()),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };
    if let Some(seed) = cli.seed {
        pipeline = pipeline.with_seed(seed);
    }

    let files = match find_input_files(&cli.input) {
        Ok(files) => files,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    };

    info!(files = files.len(), output = %cli.output.display(), "processing input");

    let mut successful = 0;
    let mut failed = 0;
    for file in &files {
        println!("{}", "─".repeat(70).dimmed());
        println!("{} {}", "▶".bright_cyan(), file.display().to_string().bold());

        let result = match Conversation::from_file(file) {
            Ok(conversation) => pipeline.process(&conversation).await,
            Err(e) => Err(e),
        };
        let manifest = result.and_then(|output| {
            let path = pipeline.write_manifest(&output)?;
            Ok((output, path))
        });

        match manifest {
            Ok((output, path)) => {
                successful += 1;
                println!(
                    "  {} {} lines voiced, {:.2}s total",
                    "✓".green(),
                    format!("{}/{}", output.synthesized_lines(), output.lines.len()).bold(),
                    output.total_duration
                );
                println!("  {} {}", "Output directory:".dimmed(), output.output_directory);
                println!("  {} {}", "Manifest:".dimmed(), path.display());
            }
            Err(e) => {
                failed += 1;
                eprintln!("  {} {}", "Error:".red().bold(), e);
            }
        }
    }

    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "  {} {}   {} {}",
        "Successful:".bold(),
        successful.to_string().bright_green(),
        "Failed:".bold(),
        if failed > 0 {
            failed.to_string().bright_red()
        } else {
            failed.to_string().normal()
        }
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();

    if successful == 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn init_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let filter = if verbose {
        EnvFilter::new("dialogtts=debug")
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("dialogtts=warn"))?
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;
    Ok(())
}

/// Create a callback that prints pipeline events to the console.
fn create_console_callback() -> Box<dyn Fn(PipelineEvent) + Send + Sync> {
    Box::new(move |event| match event {
        PipelineEvent::DialogIdGenerated { dialog_id } => {
            println!(
                "  {} {}",
                "No dialog_id given, using".yellow(),
                dialog_id.yellow().bold()
            );
        }
        PipelineEvent::ConversationStart { dialog_id, lines } => {
            println!(
                "  {} {} ({} lines)",
                "Dialog:".bold(),
                dialog_id.bright_white(),
                lines
            );
        }
        PipelineEvent::LineSynthesized {
            index,
            speaker,
            voice,
            backend,
            start_time,
            duration,
        } => {
            println!(
                "  {:>3} {} {} {} {}",
                index,
                speaker.bright_cyan(),
                format!("[{} via {}]", voice, backend).yellow(),
                format!("@{:.2}s", start_time).dimmed(),
                format!("+{:.2}s", duration).dimmed()
            );
        }
        PipelineEvent::LineFailed {
            index,
            speaker,
            error,
        } => {
            println!(
                "  {:>3} {} {}",
                index,
                speaker.bright_cyan(),
                format!("skipped: {}", error).red()
            );
        }
        PipelineEvent::Merged { path, clips } => {
            println!(
                "  {} {} ({} clips)",
                "Merged:".bold(),
                path.display(),
                clips
            );
        }
        PipelineEvent::ConversationEnd { .. } => {
            // Handled in main
        }
    })
}
