//! `chorus relay`: Interactive relay through the full request pipeline.
//!
//! Each stdin line is a message from the caller. Replies are generated by the
//! configured backend and delivered as the persona on an in-memory platform,
//! then printed.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chorus_channels::{InMemoryPlatform, attribution};
use chorus_config::{AppConfig, load_persona};
use chorus_core::{ConversationTurn, DestinationId, SafetyMode};
use chorus_runtime::{Caller, DeliveryOutcome, FallbackReason, InferenceRequest, Orchestrator};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

pub async fn run(
    persona: Option<PathBuf>,
    caller: String,
    destination: String,
    nsfw: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let persona = persona.as_deref().map(load_persona).transpose()?;

    let backend = match chorus_providers::build_from_config(&config) {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!();
            eprintln!("  ERROR: {e}");
            eprintln!();
            eprintln!("  Set CHORUS_API_KEY (or OPENAI_API_KEY), or add it to:");
            eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
            eprintln!();
            return Err(e.into());
        }
    };

    let platform = Arc::new(InMemoryPlatform::new());
    let orchestrator = Orchestrator::from_config(&config, backend, platform);
    let mode = if nsfw {
        SafetyMode::Nsfw
    } else {
        config.personas.default_mode
    };
    let destination = DestinationId(destination);
    let caller = Caller::new(format!("cli:{caller}"), caller);

    println!();
    println!("  Chorus relay");
    println!("  Backend:   {}", config.default_backend);
    println!(
        "  Persona:   {}",
        persona
            .as_ref()
            .map_or("(none, direct replies)", |p| p.display_name.as_str())
    );
    println!("  Mode:      {mode:?}");
    println!();
    println!("  Type a message and press Enter. 'exit' or Ctrl+D to quit.");
    println!();

    let mut history: Vec<ConversationTurn> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    prompt()?;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            prompt()?;
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        history.push(ConversationTurn::user(&caller.display_name, line));
        let mut request = InferenceRequest::new(destination.clone(), caller.clone(), history.clone())
            .with_mode(mode);
        if let Some(persona) = &persona {
            request = request.with_persona(persona.clone());
        }

        let result = match orchestrator.submit(request).await {
            Ok(DeliveryOutcome::Deferred {
                retry_after,
                pending,
            }) => {
                println!("  (rate limited, replying in {}s)", retry_after.as_secs());
                pending.await.unwrap_or_else(|e| Err(e.into()))
            }
            other => other,
        };

        match result {
            Ok(outcome) => {
                if let Some(turn) = print_outcome(outcome) {
                    history.push(turn);
                }
            }
            Err(e) => {
                debug!(error = %e, "Request failed");
                eprintln!("  [{:?}] {}", e.kind(), e.user_message());
            }
        }
        println!();
        prompt()?;
    }

    orchestrator.shutdown().await;
    Ok(())
}

/// Print a settled outcome and return the assistant turn to remember.
fn print_outcome(outcome: DeliveryOutcome) -> Option<ConversationTurn> {
    let (speaker, text) = match outcome {
        DeliveryOutcome::Delivered { message, persona } => {
            for line in message.content.lines() {
                println!("  {persona} > {line}");
            }
            (persona, attribution::strip(&message.content))
        }
        DeliveryOutcome::ReplyDirectly { text, reason } => {
            if let FallbackReason::DeliveryFailed(e) = reason {
                eprintln!("  (persona delivery failed: {e})");
            }
            for line in text.lines() {
                println!("  Assistant > {line}");
            }
            ("Assistant".to_string(), text)
        }
        DeliveryOutcome::Deferred { .. } => return None,
    };
    Some(ConversationTurn::assistant(speaker, text))
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}
