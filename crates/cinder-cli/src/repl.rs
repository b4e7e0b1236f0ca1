//! Interactive REPL.
//!
//! Uses rustyline for line editing and history. Lines are tokenized
//! (double and single quotes group words) and sent verbatim as RESP
//! arrays — the server does all validation. `quit` and `exit` close the
//! session.

use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use cinder_protocol::Frame;

use crate::connection::{ClientError, Connection};

/// Runs the REPL against the server at `addr`. Blocks the calling thread;
/// the tokio runtime lives inside because rustyline needs the main thread
/// for terminal I/O.
pub fn run(addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Runtime::new()?;

    let mut conn = rt
        .block_on(Connection::connect(addr))
        .map_err(|e| format!("could not connect to {addr}: {e}"))?;
    println!("connected to cinder at {addr}");

    let mut rl = DefaultEditor::new()?;
    let prompt = format!("{addr}> ");

    loop {
        match rl.readline(&prompt) {
            Ok(line) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(trimmed);

                if matches!(trimmed.to_ascii_lowercase().as_str(), "quit" | "exit") {
                    break;
                }

                let tokens = match tokenize(trimmed) {
                    Ok(tokens) => tokens,
                    Err(e) => {
                        eprintln!("{}", format!("parse error: {e}").red());
                        continue;
                    }
                };
                if tokens.is_empty() {
                    continue;
                }

                match rt.block_on(conn.send_command(&tokens)) {
                    Ok(frame) => println!("{}", format_response(&frame, 0)),
                    Err(ClientError::Disconnected) => {
                        return Err("server disconnected".into());
                    }
                    Err(e) => eprintln!("{}", format!("error: {e}").red()),
                }
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

/// Splits a command line into tokens, honoring single and double quotes.
fn tokenize(input: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                } else if c == '\\' && q == '"' {
                    match chars.next() {
                        Some(escaped) => current.push(escaped),
                        None => return Err("trailing backslash".into()),
                    }
                } else {
                    current.push(c);
                }
            }
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    in_token = true;
                }
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                c => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }

    if quote.is_some() {
        return Err("unterminated quote".into());
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Renders a reply frame the way redis-cli does: quoted bulks, numbered
/// array entries, dimmed nils.
fn format_response(frame: &Frame, indent: usize) -> String {
    let pad = "  ".repeat(indent);
    match frame {
        Frame::Simple(s) => format!("{pad}{}", s.green()),
        Frame::Error(msg) => format!("{pad}{}", msg.red()),
        Frame::Integer(n) => format!("{pad}(integer) {n}"),
        Frame::Bulk(Some(data)) => {
            format!("{pad}\"{}\"", String::from_utf8_lossy(data))
        }
        Frame::Bulk(None) => format!("{pad}{}", "(nil)".dimmed()),
        Frame::Array(None) => format!("{pad}{}", "(nil)".dimmed()),
        Frame::Array(Some(items)) if items.is_empty() => {
            format!("{pad}{}", "(empty array)".dimmed())
        }
        Frame::Array(Some(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                format!("{pad}{}) {}", i + 1, format_response(item, 0).trim_start())
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
