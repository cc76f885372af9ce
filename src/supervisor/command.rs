use crate::errors::{AppError, AppResult};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

pub const INTERFACE_PLACEHOLDER: &str = "{interface}";

// Single quotes are literal; double quotes honour \" and \\.
pub fn split_command(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => return Err("unterminated single quote".to_string()),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\')) => current.push(escaped),
                            Some(other) => {
                                current.push('\\');
                                current.push(other);
                            }
                            None => return Err("unterminated double quote".to_string()),
                        },
                        Some(inner) => current.push(inner),
                        None => return Err("unterminated double quote".to_string()),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => return Err("trailing backslash".to_string()),
                }
            }
            ch if ch.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

pub fn render_command(template: &str, interface: &str) -> String {
    template.replace(INTERFACE_PLACEHOLDER, interface)
}

pub fn spawn_worker(parser: &str, line: &str) -> AppResult<Child> {
    let words = split_command(line).map_err(|reason| AppError::launch(parser, reason))?;
    let Some((program, args)) = words.split_first() else {
        return Err(AppError::launch(parser, "no command configured"));
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command
        .spawn()
        .map_err(|error| AppError::launch(parser, format!("{}: {}", program, error)))?;

    if let Some(stdout) = child.stdout.take() {
        forward_output(parser, "stdout", stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        forward_output(parser, "stderr", stderr);
    }
    Ok(child)
}

fn forward_output<R>(parser: &str, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let parser = parser.to_string();
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(parser = %parser, stream, "{}", line);
        }
    });
}
