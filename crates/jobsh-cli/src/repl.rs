//! Interactive read-eval loop.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use jobsh::{ControlFlow, Shell};

use crate::print_captured;

const CONTINUATION_PROMPT: &str = "> ";

/// Run the REPL until `exit` or end of input. Returns the exit status.
pub async fn run(mut shell: Shell) -> Result<i32> {
    let mut editor = DefaultEditor::new().context("Failed to initialize line editor")?;
    for entry in shell.history().entries() {
        let _ = editor.add_history_entry(entry.command.as_str());
    }

    // Once a handler is installed SIGINT no longer terminates the shell;
    // foreground children still receive it from the terminal.
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&interrupted);
    let watcher = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            flag.store(true, Ordering::SeqCst);
        }
    });

    let mut status = 0;
    let mut pending = String::new();
    loop {
        for notice in shell.reap_jobs().await {
            eprintln!("{}", notice);
        }

        let ps = if pending.is_empty() {
            prompt(&shell)
        } else {
            CONTINUATION_PROMPT.to_string()
        };
        let (returned, read) = tokio::task::spawn_blocking(move || {
            let line = editor.readline(&ps);
            (editor, line)
        })
        .await
        .context("Line editor task failed")?;
        editor = returned;

        let line = match read {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                pending.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("jobsh: {}", e);
                break;
            }
        };

        // Trailing backslash continues the line
        if let Some(head) = line.strip_suffix('\\') {
            pending.push_str(head);
            continue;
        }
        pending.push_str(&line);
        let input = std::mem::take(&mut pending);

        let (expanded, result) = shell.exec_line(&input).await;
        if expanded.trim().is_empty() {
            continue;
        }
        if expanded != input {
            eprintln!("{}", expanded);
        }
        let _ = editor.add_history_entry(expanded.as_str());

        match result {
            Ok(result) => {
                print_captured(&result);
                status = result.exit_code;
                if result.control == ControlFlow::Exit {
                    break;
                }
            }
            Err(e) => {
                eprintln!("jobsh: {}", e);
                status = if e.is_parse_error() { 2 } else { 1 };
            }
        }

        if interrupted.swap(false, Ordering::SeqCst) {
            match shell.run_trap("INT").await {
                Ok(Some(trap)) => print_captured(&trap),
                Ok(None) => eprintln!(),
                Err(e) => eprintln!("jobsh: INT trap: {}", e),
            }
        }
    }

    watcher.abort();
    match shell.finish().await {
        Ok(Some(trap)) => print_captured(&trap),
        Ok(None) => {}
        Err(e) => eprintln!("jobsh: EXIT trap: {}", e),
    }
    Ok(status)
}

fn prompt(shell: &Shell) -> String {
    shell
        .context()
        .get("PS1")
        .filter(|ps1| !ps1.is_empty())
        .unwrap_or_else(|| "$ ".to_string())
}
