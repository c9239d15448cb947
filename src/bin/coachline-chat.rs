//! Interactive chat application for talking to a fitness coach.
//!
//! This binary provides a streaming REPL interface over a coachline chat
//! server, saving every conversation so it can be picked up later.
//!
//! # Usage
//!
//! ```bash
//! # Talk to a server on localhost:4000
//! coachline-chat
//!
//! # Point at another server speaking the plain-text wire format
//! coachline-chat --base-url http://coach.internal:8080/ --wire-format plain-text
//!
//! # Keep nothing on disk
//! coachline-chat --ephemeral
//!
//! # Log retries and stream lifecycle to stderr
//! RUST_LOG=coachline=debug coachline-chat
//! ```
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/help` - Show available commands
//! - `/new` - Save this conversation and start another
//! - `/sessions` - List saved sessions
//! - `/load <id>` - Continue a saved session
//! - `/quit` - Exit the application

use std::sync::{Arc, Mutex, PoisonError};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use coachline::chat::{
    ChatArgs, ChatCommand, ChatConfig, ChatSession, PlainTextRenderer, Renderer, help_text,
    parse_command,
};
use coachline::{KeyValueStorage, Role};

type Session = ChatSession<Arc<dyn KeyValueStorage>>;

/// Main entry point for the coachline-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let (args, _) = ChatArgs::from_command_line_relaxed("coachline-chat [OPTIONS]");
    let config = ChatConfig::try_from(args)?;
    let use_color = config.use_color;

    let mut session = ChatSession::from_config(&config)?;
    let mut renderer = PlainTextRenderer::with_color(use_color);
    let mut rl = DefaultEditor::new()?;

    // Token for the reply currently streaming; replaced before each send.
    let current = Arc::new(Mutex::new(CancellationToken::new()));
    let current_clone = Arc::clone(&current);
    ctrlc::set_handler(move || {
        current_clone
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    })?;

    println!("Coachline (server: {})", config.client.base_url);
    println!("Type /help for commands, /quit to exit\n");
    if let Some(greeting) = &config.greeting {
        renderer.start_response();
        renderer.print_text(greeting);
        renderer.finish_response();
    }

    loop {
        let readline = rl.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                // Check for slash commands
                if let Some(cmd) = parse_command(line) {
                    if cmd == ChatCommand::Quit {
                        session.manager_mut().save_conversation();
                        println!("Goodbye!");
                        break;
                    }
                    handle_command(&mut session, &mut renderer, cmd);
                    continue;
                }

                let cancel = CancellationToken::new();
                *current.lock().unwrap_or_else(PoisonError::into_inner) = cancel.clone();

                // Errors are already shown inline by the session.
                let _ = session.send_streaming(line, &mut renderer, &cancel).await;
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                session.manager_mut().save_conversation();
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    Ok(())
}

fn handle_command(session: &mut Session, renderer: &mut PlainTextRenderer, cmd: ChatCommand) {
    let manager = session.manager_mut();
    match cmd {
        ChatCommand::New => {
            let count = manager.reset_conversation();
            manager.start_new_conversation();
            renderer.print_info(&format!("New conversation started ({count} saved)."));
        }
        ChatCommand::Save => match manager.save_conversation() {
            Some(id) => renderer.print_info(&format!("Saved as session {id}.")),
            None => renderer.print_info("Nothing to save yet."),
        },
        ChatCommand::Sessions => print_sessions(session),
        ChatCommand::History => print_history(session),
        ChatCommand::Load(id) => {
            manager.save_conversation();
            if manager.load_session(id) {
                renderer.print_info(&format!("Loaded session {id}."));
                print_history(session);
            } else {
                renderer.print_error(&format!("No session with id {id}."));
            }
        }
        ChatCommand::Delete(id) => {
            if manager.session(id).is_none() {
                renderer.print_error(&format!("No session with id {id}."));
                return;
            }
            let was_active = manager.active_session_id() == Some(id);
            match manager.delete_session(id) {
                Ok(()) => renderer.print_info(&format!("Deleted session {id}.")),
                Err(err) => renderer.print_error(&format!("Failed to delete session: {err}")),
            }
            if was_active {
                manager.start_new_conversation();
            }
        }
        ChatCommand::Title(id, title) => {
            if manager.session(id).is_none() {
                renderer.print_error(&format!("No session with id {id}."));
                return;
            }
            match manager.update_session_title(id, &title) {
                Ok(()) => renderer.print_info(&format!("Renamed session {id} to {title:?}.")),
                Err(err) => renderer.print_error(&format!("Failed to rename session: {err}")),
            }
        }
        ChatCommand::ClearAll => {
            match manager.clear_all_sessions() {
                Ok(()) => renderer.print_info("All sessions deleted."),
                Err(err) => renderer.print_error(&format!("Failed to clear sessions: {err}")),
            }
            manager.start_new_conversation();
        }
        ChatCommand::Help => {
            for line in help_text().lines() {
                println!("    {}", line);
            }
        }
        ChatCommand::Quit => {}
        ChatCommand::Invalid(message) => {
            renderer.print_error(&message);
        }
    }
}

fn print_sessions(session: &Session) {
    let manager = session.manager();
    if manager.session_count() == 0 {
        println!("    No saved sessions.");
        return;
    }
    println!("    Saved sessions:");
    for saved in manager.sessions() {
        let marker = if manager.active_session_id() == Some(saved.id) {
            "*"
        } else {
            " "
        };
        println!(
            "    {marker} {}  {}  ({} messages)",
            saved.id,
            saved.display_title(),
            saved.messages.len()
        );
    }
}

fn print_history(session: &Session) {
    for message in session.manager().messages() {
        let label = match message.role {
            Role::User => "You",
            Role::Assistant => "Coach",
        };
        println!("    {label}: {}", message.text);
    }
}
