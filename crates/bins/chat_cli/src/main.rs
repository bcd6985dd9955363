use chat::{ChatSession, ClientConfig, LinkState, Packet};
use clap::Parser;
use log::{debug, info};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Instant;

// =================================================================================================
//                                     COMMAND LINE ARGUMENTS
// =================================================================================================

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML client configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server address as host:port. Overrides the configuration file.
    #[arg(long)]
    server: Option<String>,

    /// Display name to register with. Overrides the configuration file.
    #[arg(long)]
    name: Option<String>,
}

enum Input {
    Line(String),
    Closed,
}

// =================================================================================================
//                                          ENTRYPOINT
// =================================================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => chat::config::load::<ClientConfig>(path)?,
        None => ClientConfig::default(),
    };
    if let Some(server) = args.server {
        config.server_addr = server;
    }
    if let Some(name) = args.name {
        config.display_name = name;
    }

    println!("Connecting to chat server at {} as {}", config.server_addr, config.display_name);
    let mut session = ChatSession::connect(&config)?;
    let input = spawn_reader();
    let mut announced = false;

    loop {
        for packet in session.poll(Instant::now())? {
            print_chat(&packet);
        }

        match session.link_state() {
            LinkState::Connected if !announced => {
                announced = true;
                println!(
                    "Connected as {}. Type /help for commands, /quit to leave.",
                    session.display_name()
                );
            }
            LinkState::Disconnected => {
                if announced {
                    println!("[Disconnected from server]");
                } else {
                    println!("[Could not reach {}]", config.server_addr);
                }
                break;
            }
            _ => {}
        }

        match input.try_recv() {
            Ok(Input::Line(line)) => {
                if !handle_line(&mut session, &line) {
                    break;
                }
            }
            Ok(Input::Closed) | Err(TryRecvError::Disconnected) => {
                println!("Exiting.");
                break;
            }
            Err(TryRecvError::Empty) => std::thread::sleep(config.tick()),
        }
    }

    Ok(())
}

// =================================================================================================
//                                          USER INPUT
// =================================================================================================

/// Reads lines on a dedicated thread so polling never waits on the terminal.
///
/// The thread only forwards terminal input; all session work stays in the single polling loop.
fn spawn_reader() -> Receiver<Input> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(err) => {
                println!("[CLI Error: {:?}]", err);
                let _ = tx.send(Input::Closed);
                return;
            }
        };
        loop {
            match rl.readline(">> ") {
                Ok(line) => {
                    let _ = rl.add_history_entry(line.as_str());
                    if tx.send(Input::Line(line)).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    let _ = tx.send(Input::Closed);
                    break;
                }
                Err(err) => {
                    println!("[CLI Error: {:?}]", err);
                    let _ = tx.send(Input::Closed);
                    break;
                }
            }
        }
    });
    rx
}

/// Returns `false` when the user asked to leave.
fn handle_line<T: chat::ClientTransport>(session: &mut ChatSession<T>, line: &str) -> bool {
    let text = line.trim_end();
    if text.trim().is_empty() {
        return true;
    }
    if text.trim() == "/quit" {
        info!("Leaving chat");
        return false;
    }
    match session.send(text) {
        Ok(()) => debug!("Queued {} bytes", text.len()),
        Err(e) => println!("[Could not send: {}]", e),
    }
    true
}

fn print_chat(packet: &Packet) {
    println!("[{}]: {}", packet.sender, packet.body);
}
