//! Command-line surface over the conversation store and chat session.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;

use crate::plugins::history::{Conversation, ImportOutcome};
use crate::services::ai::{self, UserInput};
use crate::services::settings::SavedPrompt;
use crate::AppState;

/// Llama chat client: conversations, chat and model tools
#[derive(Parser, Debug)]
#[command(name = "pwllama")]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List conversations, most recent first
    List,
    /// Print one conversation
    Show { id: String },
    /// Create a conversation
    New {
        /// Conversation name
        #[arg(default_value = crate::plugins::history::DEFAULT_CONVERSATION_NAME)]
        name: String,
    },
    /// Rename a conversation
    Rename { id: String, name: String },
    /// Delete a conversation
    Delete { id: String },
    /// Search names and message text
    Search { query: String },
    /// Export a conversation as JSON
    Export {
        id: String,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Import a conversation exported earlier
    Import { path: PathBuf },
    /// Send a message and print the reply
    Send(SendArgs),
    /// List available models
    Models,
    /// Manage the saved API key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// Show the chat API configuration (no secrets)
    Config,
    /// Show or change advanced settings
    Settings(SettingsArgs),
    /// Browse and extend the prompt library
    Prompts {
        #[command(subcommand)]
        action: PromptAction,
    },
    /// Test every model with one prompt, or rank them on the fixed prompt set
    Benchmark {
        /// Run only this prompt against each model
        #[arg(long)]
        prompt: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
pub struct SendArgs {
    /// Conversation id
    pub id: String,
    /// Message text
    pub message: String,
    /// Print the reply as it streams in
    #[arg(short, long)]
    pub stream: bool,
    /// Model id (defaults to the saved setting)
    #[arg(short, long)]
    pub model: Option<String>,
    #[arg(short, long)]
    pub temperature: Option<f32>,
    #[arg(long)]
    pub max_tokens: Option<u32>,
    /// Image URL or data URI attached to the message
    #[arg(long)]
    pub image: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum KeyAction {
    /// Save an API key
    Set { key: String },
    /// Remove the saved API key
    Clear,
    /// Report whether a key is configured
    Status,
}

#[derive(Subcommand, Debug)]
pub enum PromptAction {
    /// List saved prompts, newest first
    List,
    /// Save a prompt at the top of the library
    Add {
        title: String,
        content: String,
        #[arg(long)]
        persona: Option<String>,
    },
    /// Find prompts by title or text
    Search { query: String },
}

#[derive(clap::Args, Debug)]
pub struct SettingsArgs {
    #[arg(long)]
    pub model: Option<String>,
    #[arg(long)]
    pub temperature: Option<f32>,
    #[arg(long)]
    pub system_prompt: Option<String>,
    #[arg(long)]
    pub persona: Option<String>,
}

fn format_ms(ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms as i64)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn print_summary(conversation: &Conversation) {
    println!(
        "{}  {}  ({} messages, updated {})",
        conversation.id,
        conversation.name,
        conversation.messages.len(),
        format_ms(conversation.updated)
    );
}

fn print_prompts(prompts: &[SavedPrompt]) {
    for prompt in prompts {
        match &prompt.persona {
            Some(persona) => println!("{} [{}]: {}", prompt.title, persona, prompt.content),
            None => println!("{}: {}", prompt.title, prompt.content),
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| e.to_string())
}

pub async fn run(cli: Cli, state: AppState) -> Result<(), String> {
    let store = state.store().clone();

    match cli.command {
        Commands::List => {
            for conversation in store.get_all().await.map_err(|e| e.to_string())? {
                print_summary(&conversation);
            }
        }
        Commands::Show { id } => {
            let conversation = store
                .get(&id)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("Conversation {id} not found"))?;
            println!("# {}", conversation.name);
            for message in &conversation.messages {
                println!("[{}] {}", message.role, message.content);
                if let Some(url) = &message.image_url {
                    println!("  (image: {url})");
                }
            }
        }
        Commands::New { name } => {
            let conversation = store.create(&name).await.map_err(|e| e.to_string())?;
            println!("{}", conversation.id);
        }
        Commands::Rename { id, name } => {
            if !store.rename(&id, &name).await.map_err(|e| e.to_string())? {
                return Err(format!("Conversation {id} not found"));
            }
        }
        Commands::Delete { id } => {
            if !store.delete(&id).await.map_err(|e| e.to_string())? {
                return Err(format!("Conversation {id} not found"));
            }
        }
        Commands::Search { query } => {
            for conversation in store.search(&query).await.map_err(|e| e.to_string())? {
                print_summary(&conversation);
            }
        }
        Commands::Export { id, output } => {
            let json = store
                .export(&id)
                .await
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("Conversation {id} not found"))?;
            match output {
                Some(path) => std::fs::write(&path, json)
                    .map_err(|e| format!("Failed to write {}: {e}", path.display()))?,
                None => println!("{json}"),
            }
        }
        Commands::Import { path } => {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
            match store.import(&raw).await.map_err(|e| e.to_string())? {
                ImportOutcome::Imported(conversation) => println!("{}", conversation.id),
                ImportOutcome::Rejected { reason } => {
                    return Err(format!("Import rejected: {reason}"));
                }
            }
        }
        Commands::Send(args) => send(&state, args).await?,
        Commands::Models => {
            for model in state.session.models() {
                println!("{:<40} {:<22} {}", model.id, model.name, model.description);
            }
        }
        Commands::Key { action } => match action {
            KeyAction::Set { key } => {
                state
                    .settings
                    .save_credential(&key)
                    .await
                    .map_err(|e| e.to_string())?;
                state.session.set_credential(&key);
                println!("API key saved");
            }
            KeyAction::Clear => {
                state
                    .settings
                    .clear_credential()
                    .await
                    .map_err(|e| e.to_string())?;
                state.session.set_credential("");
                println!("API key removed");
            }
            KeyAction::Status => {
                if state.session.is_configured() {
                    println!("configured");
                } else {
                    println!("not configured");
                }
            }
        },
        Commands::Config => println!("{}", to_json(&state.public_config())?),
        Commands::Settings(args) => {
            let mut settings = state
                .settings
                .load_advanced()
                .await
                .map_err(|e| e.to_string())?;
            let changed = args.model.is_some()
                || args.temperature.is_some()
                || args.system_prompt.is_some()
                || args.persona.is_some();
            if let Some(model) = args.model {
                if ai::find_model(&model).is_none() {
                    log::warn!("{} is not in the model list", model);
                }
                settings.selected_model = model;
            }
            if let Some(temperature) = args.temperature {
                settings.temperature = temperature;
            }
            if let Some(system_prompt) = args.system_prompt {
                settings.system_prompt = system_prompt;
            }
            if let Some(persona) = args.persona {
                settings.persona = persona;
            }
            if changed {
                state
                    .settings
                    .save_advanced(&settings)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            println!("{}", to_json(&settings)?);
        }
        Commands::Prompts { action } => {
            let prompts = match action {
                PromptAction::List => state.settings.load_prompts().await,
                PromptAction::Add {
                    title,
                    content,
                    persona,
                } => {
                    let mut prompt = SavedPrompt::new(title, content);
                    prompt.persona = persona;
                    state.settings.add_prompt(prompt).await
                }
                PromptAction::Search { query } => state.settings.search_prompts(&query).await,
            }
            .map_err(|e| e.to_string())?;
            print_prompts(&prompts);
        }
        Commands::Benchmark { prompt } => {
            let api = state.session.api().as_ref();
            match prompt {
                Some(prompt) => {
                    let results = ai::test_all_models(api, &prompt)
                        .await
                        .map_err(|e| e.to_string())?;
                    println!("{}", to_json(&results)?);
                }
                None => {
                    let report = ai::benchmark_models(api).await.map_err(|e| e.to_string())?;
                    for (idx, ranking) in report.rankings.iter().enumerate() {
                        println!(
                            "{}. {:<22} score {:.2}  avg {:.0} ms  avg {:.0} chars  {} errors",
                            idx + 1,
                            ranking.name,
                            ranking.score,
                            ranking.avg_response_time_ms,
                            ranking.avg_length,
                            ranking.error_count
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

async fn send(state: &AppState, args: SendArgs) -> Result<(), String> {
    let mut options = state.chat_options().await.map_err(|e| e.to_string())?;
    if let Some(model) = args.model {
        options.model = model;
    }
    if let Some(temperature) = args.temperature {
        options.temperature = temperature;
    }
    if let Some(max_tokens) = args.max_tokens {
        options.max_tokens = max_tokens;
    }

    let mut input = UserInput::new(args.message);
    if let Some(image) = args.image {
        input = input.with_image(image);
    }

    if !args.stream {
        let result = state
            .session
            .send_message(&args.id, input, &options)
            .await
            .map_err(|e| e.message().to_string())?;
        println!("{}", result.content);
        log::info!(
            "{} replied in {} ms{}",
            result.model,
            result.response_time_ms,
            result
                .tokens
                .map(|t| format!(", {t} tokens"))
                .unwrap_or_default()
        );
        return Ok(());
    }

    let mut stream = state
        .session
        .stream_message(&args.id, input, &options)
        .await
        .map_err(|e| e.message().to_string())?;
    let mut text = String::new();
    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| e.message().to_string())?;
        if chunk.is_complete {
            break;
        }
        text.push_str(&chunk.text);
        let _ = write!(stdout, "{}", chunk.text);
        let _ = stdout.flush();
    }
    println!();
    stream
        .finish(&text)
        .await
        .map_err(|e| e.message().to_string())?;
    Ok(())
}
