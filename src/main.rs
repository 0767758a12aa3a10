//! Promotion agent terminal client
//!
//! Reads prompts from stdin and renders conversation progress to stdout.
//! Logs go to stderr.

use promo_agent::config::ClientConfig;
use promo_agent::conversation::Step;
use promo_agent::runtime::{Coordinator, CoordinatorUpdate};
use promo_agent::transport::{ConversationTransport, HttpTransport, LoggingTransport};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// A line of user input
#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Send(&'a str),
    Force(&'a str),
    Reset,
    Status,
    Quit,
    Empty,
}

fn parse_command(line: &str) -> Command<'_> {
    let line = line.trim();
    match line {
        "" => Command::Empty,
        "/reset" => Command::Reset,
        "/status" => Command::Status,
        "/quit" | "/exit" => Command::Quit,
        _ => match line.strip_prefix("/force") {
            Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => {
                Command::Force(rest.trim())
            }
            _ => Command::Send(line),
        },
    }
}

fn render_step(step: &Step) -> String {
    let text = step
        .output
        .as_deref()
        .filter(|output| !output.is_empty())
        .unwrap_or_else(|| step.kind.description());
    format!("[{}] {text}", step.kind.label())
}

async fn render_updates(mut updates: broadcast::Receiver<CoordinatorUpdate>) {
    loop {
        match updates.recv().await {
            Ok(CoordinatorUpdate::StepsObserved { steps, .. }) => {
                for step in &steps {
                    println!("{}", render_step(step));
                }
            }
            Ok(CoordinatorUpdate::TurnCompleted { turn }) => {
                println!();
                println!("{}", turn.assistant_response.as_deref().unwrap_or("(no response)"));
                println!();
            }
            Ok(CoordinatorUpdate::Error { message }) => println!("! {message}"),
            Ok(CoordinatorUpdate::StateChange(_)) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Renderer fell behind coordinator updates");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_status<T: ConversationTransport + 'static>(coordinator: &Coordinator<T>) {
    let snapshot = coordinator.snapshot();
    println!(
        "status: {} | conversation: {} | turns: {}",
        snapshot.status.as_str(),
        snapshot.conversation_id.as_deref().unwrap_or("-"),
        snapshot.turns.len()
    );
    if let Some(secs) = snapshot.time_since_last_request {
        println!("last request: {secs}s ago");
    }
    if let Some(error) = &snapshot.error {
        println!("last error: {error}");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promo_agent=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = ClientConfig::from_env();
    tracing::info!(
        api_url = %config.api_url,
        basic_auth = config.username.is_some(),
        poll_interval = ?config.poll_interval,
        "Starting promotion agent client"
    );

    let transport = HttpTransport::new(&config.api_url, config.auth_mode(), config.http_timeout)?;
    let coordinator = Coordinator::new(LoggingTransport::new(transport), config.coordinator_config());
    let renderer = tokio::spawn(render_updates(coordinator.subscribe()));

    match coordinator.resume_active_conversation().await {
        Ok(true) => print_status(&coordinator),
        Ok(false) => println!("No active conversation. Type a message to start one."),
        Err(e) => tracing::warn!(error = %e, "Could not resume active conversation"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        // Failures are reported to the renderer as coordinator updates
        let outcome = match parse_command(&line) {
            Command::Empty => continue,
            Command::Quit => break,
            Command::Status => {
                print_status(&coordinator);
                continue;
            }
            Command::Reset => {
                coordinator.reset_conversation();
                println!("Conversation reset.");
                continue;
            }
            Command::Force("") => {
                println!("Usage: /force <message>");
                continue;
            }
            Command::Force(text) => coordinator.add_turn(text, true).await,
            Command::Send(_) if !coordinator.can_send_message() => {
                println!("The agent is still working. Wait, or use /force <message>.");
                continue;
            }
            Command::Send(text) if coordinator.snapshot().conversation_id.is_none() => {
                coordinator.start_conversation(&config.context_path, text).await
            }
            Command::Send(text) => coordinator.add_turn(text, false).await,
        };
        if let Err(e) = outcome {
            tracing::debug!(error = %e, "Request not sent");
        }
    }

    coordinator.shutdown();
    renderer.abort();
    Ok(())
}
