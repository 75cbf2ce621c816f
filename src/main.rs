//! mesmer - Main CLI Entry Point

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::io::Write;
use std::time::Duration;

use mesmer::cli::{Args, Commands};
use mesmer::config::Config;
use mesmer::store::Outcome;
use mesmer::streaming::StreamEvent;
use mesmer::MesmerEngine;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load()?;
    if let Some(db) = args.db {
        config.storage.database_path = Some(db);
    }
    if let Some(url) = args.provider_url {
        config.provider.base_url = Some(url);
    }
    if let Some(model) = args.model {
        config.provider.model = Some(model);
    }

    let engine = MesmerEngine::from_config(&config).await?;

    match args.command {
        Commands::Chat { user, persona } => run_chat(&engine, &user, &persona).await,
        Commands::Stats { persona } => show_stats(&engine, &persona).await,
        Commands::Summary { persona } => {
            println!("{}", engine.learning_summary(&persona).await?);
            Ok(())
        }
        Commands::Memory { user, persona } => {
            println!("{}", engine.memory_summary(&user, &persona).await?);
            Ok(())
        }
        Commands::Personas => {
            for profile in engine.catalog().all() {
                println!(
                    "{}  {}",
                    profile.id.cyan().bold(),
                    profile.display_name
                );
            }
            Ok(())
        }
    }
}

/// Interactive performance loop; /end closes the session and shows the
/// judged outcome
async fn run_chat(engine: &MesmerEngine, user: &str, persona: &str) -> Result<()> {
    let profile = engine
        .catalog()
        .get(persona)
        .ok_or_else(|| anyhow::anyhow!("unknown persona: {persona}"))?
        .clone();
    let session = engine.start_or_resume(user, persona).await?;

    println!(
        "{} {} {}",
        "Performing as".dimmed(),
        profile.display_name.cyan().bold(),
        format!("(session {})", &session.id[..8]).dimmed()
    );
    println!("{}", "Type /end to finish the performance.".dimmed());

    let mut rl = DefaultEditor::new()?;
    loop {
        match rl.readline("you> ") {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if line == "/end" {
                    break;
                }
                let _ = rl.add_history_entry(&line);

                let mut events = engine.submit_turn(&session.id, &line).await?;
                print!("{} ", format!("{}>", profile.display_name).cyan());
                std::io::stdout().flush()?;

                while let Some(event) = events.recv().await {
                    match event {
                        StreamEvent::Delta(delta) => {
                            print!("{}", delta);
                            std::io::stdout().flush()?;
                        }
                        StreamEvent::Done => break,
                        StreamEvent::Error(e) => {
                            println!();
                            println!("{} {}", "stream interrupted:".yellow(), e);
                            break;
                        }
                    }
                }
                println!();
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner());
    spinner.set_message("reading the room...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let outcome = engine.end_session(&session.id).await?;
    spinner.finish_and_clear();

    match outcome {
        Some(outcome) => show_outcome(&outcome),
        None => println!("{}", "Session ended (learning disabled).".dimmed()),
    }
    Ok(())
}

fn show_outcome(outcome: &Outcome) {
    let reaction = match outcome.reaction.as_str() {
        "amazed" | "engaged" => outcome.reaction.as_str().green().bold(),
        "neutral" => outcome.reaction.as_str().yellow(),
        _ => outcome.reaction.as_str().red(),
    };
    println!(
        "Audience reaction: {} (sentiment {:+.2}, {} turns, technique {})",
        reaction,
        outcome.sentiment,
        outcome.turn_count,
        outcome.technique_used.cyan()
    );
    if !outcome.lesson_learned.is_empty() {
        println!("Lesson learned: {}", outcome.lesson_learned);
    }
}

async fn show_stats(engine: &MesmerEngine, persona: &str) -> Result<()> {
    let metrics = engine.technique_metrics(persona).await?;
    if metrics.is_empty() {
        println!("No technique metrics recorded yet.");
        return Ok(());
    }

    println!(
        "{:<24} {:>8} {:>9} {:>12} {:>7}",
        "TECHNIQUE".bold(),
        "ATTEMPTS".bold(),
        "SUCCESSES".bold(),
        "SUCCESS RATE".bold(),
        "RATING".bold()
    );
    for metric in metrics {
        println!(
            "{:<24} {:>8} {:>9} {:>11.0}% {:>7.1}",
            metric.technique,
            metric.total_attempts,
            metric.success_count,
            metric.success_rate * 100.0,
            metric.average_rating
        );
    }
    Ok(())
}
