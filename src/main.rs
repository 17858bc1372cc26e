use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use chat_relay::auth::{TokenClientOptions, TokenManager};
use chat_relay::config::Config;
use chat_relay::delivery::DeliveryCoordinator;
use chat_relay::session::{ChatSession, SendOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("Chat Relay starting...");

    let tokens = match &config.token {
        Some(token_config) => {
            tracing::info!(
                "Token authentication enabled (issuer: {})",
                token_config.issuer
            );
            let options = TokenClientOptions {
                request_timeout: std::time::Duration::from_secs(config.http_request_timeout),
                connect_timeout: std::time::Duration::from_secs(config.http_connect_timeout),
            };
            Some(TokenManager::with_options(token_config.clone(), options)?)
        }
        None => None,
    };

    let coordinator = DeliveryCoordinator::new(
        config.webhook_url.clone(),
        tokens,
        config.http_connect_timeout,
        config.http_request_timeout,
    )?;
    let session = Arc::new(ChatSession::new(coordinator, config.session_options()));

    if session.initialize().await.is_err() {
        tracing::warn!("Continuing without a token; sends will retry acquisition");
    }

    print_startup_banner(&config, session.id());
    run(session.clone()).await?;

    session.shutdown();
    tracing::info!("Chat Relay shutdown complete");

    Ok(())
}

/// Read messages from stdin until EOF, `/quit` or Ctrl+C at the prompt
async fn run(session: Arc<ChatSession>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C signal, shutting down...");
                None
            }
        };
        let Some(line) = line else {
            break;
        };

        let text = line.trim();
        match text {
            "" => continue,
            "/quit" => break,
            "/clear" => {
                session.clear_history();
                println!("(history cleared)");
                continue;
            }
            _ => {}
        }

        let mut pending = tokio::spawn({
            let session = session.clone();
            let text = text.to_string();
            async move { session.send(&text).await }
        });

        // Ctrl+C cancels the send in flight rather than exiting
        let outcome = tokio::select! {
            outcome = &mut pending => outcome?,
            _ = tokio::signal::ctrl_c() => {
                session.cancel();
                pending.await?
            }
        };

        match outcome {
            SendOutcome::Replied(reply) => println!("< {}", reply.text),
            SendOutcome::Cancelled => println!("(cancelled)"),
            SendOutcome::Failed { error, notice } => {
                tracing::debug!("Send failed: {}", error);
                println!("! {}", notice);
            }
        }
    }

    Ok(())
}

/// Print startup banner
fn print_startup_banner(config: &Config, session_id: &str) {
    println!();
    println!("  Chat Relay {}", env!("CARGO_PKG_VERSION"));
    println!("  Webhook:     {}", config.webhook_url);
    println!(
        "  Auth:        {}",
        config
            .token
            .as_ref()
            .map(|t| format!("bearer token from {}", t.token_endpoint))
            .unwrap_or_else(|| "none".to_string())
    );
    println!("  Session:     {}", session_id);
    println!("  Log Level:   {}", config.log_level);
    println!();
    println!("  Type a message and press Enter. Ctrl+C cancels, /clear, /quit.");
    println!();
}
