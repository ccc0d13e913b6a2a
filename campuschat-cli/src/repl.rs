use std::io::Write;

use anyhow::Context;
use campuschat_appcore::{AppService, user_facing_error};
use campuschat_core::types::{Role, SessionId};
use campuschat_engine::{ChatPhase, SendOutcome, VoiceStage};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use crate::render;

pub type Input = Lines<BufReader<Stdin>>;

pub fn stdin_lines() -> Input {
    BufReader::new(tokio::io::stdin()).lines()
}

pub async fn prompt(input: &mut Input, label: &str) -> anyhow::Result<Option<String>> {
    print!("{label}");
    std::io::stdout().flush().ok();
    input.next_line().await.context("read stdin")
}

/// Sends one message and prints the reply as it streams in.
pub async fn ask(svc: &AppService, text: &str) -> anyhow::Result<SendOutcome> {
    let mut rx = svc.chat().subscribe();
    rx.borrow_and_update();

    let worker = svc.clone();
    let message = text.to_string();
    let mut send = tokio::spawn(async move { worker.send_message(&message).await });

    let mut printed = String::new();
    let mut out = std::io::stdout();
    let result = loop {
        tokio::select! {
            res = &mut send => break res.context("send task failed")?,
            changed = rx.changed() => {
                if changed.is_err() {
                    break send.await.context("send task failed")?;
                }
                let partial = rx.borrow_and_update().partial_text.clone();
                if let Some(delta) = render::stream_delta(&printed, &partial) {
                    if printed.is_empty() {
                        print!("assistant> ");
                    }
                    print!("{delta}");
                    out.flush().ok();
                    printed = partial;
                }
            }
        }
    };

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            if !printed.is_empty() {
                println!();
            }
            return Err(e);
        }
    };

    let view = svc.chat().snapshot();
    match outcome {
        SendOutcome::Streamed | SendOutcome::FellBack => {
            let reply = view
                .messages
                .iter()
                .rev()
                .find(|m| m.role == Role::Assistant)
                .map(|m| m.content.as_str())
                .unwrap_or("");
            let (fresh_line, tail) = render::final_tail(&printed, reply);
            if printed.is_empty() {
                print!("assistant> ");
            } else if fresh_line {
                print!("\nassistant> ");
            }
            println!("{tail}");
        }
        SendOutcome::Failed => {
            if !printed.is_empty() {
                println!();
            }
            println!("assistant> {}", campuschat_engine::accumulator::APOLOGY_MESSAGE);
        }
        SendOutcome::Unauthorized => {
            if !printed.is_empty() {
                println!();
            }
            eprintln!("Your session has expired. Run `campuschat login` again.");
        }
    }
    if view.phase == ChatPhase::Error {
        if let Some(err) = view.last_error {
            log::warn!("last turn failed: {err}");
        }
    }
    Ok(outcome)
}

const HELP: &str = "commands: /new  /list  /switch <id>  /history  /help  /quit";

pub async fn chat(svc: &AppService, start_new: bool) -> anyhow::Result<()> {
    let mut input = stdin_lines();

    if start_new {
        svc.new_conversation()?;
    } else if let Some(id) = svc.resume_last_conversation().await? {
        println!("resumed conversation {id}");
        print_transcript(svc);
    }
    println!("{HELP}");

    while let Some(line) = prompt(&mut input, "you> ").await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let handled = match line.split_once(' ').unwrap_or((line, "")) {
            ("/quit" | "/exit", _) => break,
            ("/help", _) => {
                println!("{HELP}");
                Ok(())
            }
            ("/new", _) => svc.new_conversation().map(|_| println!("started a new conversation")),
            ("/list", _) => list_conversations(svc).await,
            ("/switch", id) if !id.trim().is_empty() => {
                match svc.switch_conversation(SessionId::new(id.trim())).await {
                    Ok(()) => {
                        print_transcript(svc);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            ("/history", _) => {
                print_transcript(svc);
                Ok(())
            }
            (cmd, _) if cmd.starts_with('/') => {
                println!("unknown command; {HELP}");
                Ok(())
            }
            _ => ask(svc, line).await.map(|outcome| {
                if outcome == SendOutcome::Unauthorized {
                    log::info!("stopping chat after sign-out");
                }
            }),
        };

        if let Err(e) = handled {
            log::debug!("command failed: {e:#}");
            eprintln!("error: {}", user_facing_error(&e));
        }
        if !svc.auth_state().is_signed_in() {
            eprintln!("Signed out. Run `campuschat login` to continue.");
            break;
        }
    }
    Ok(())
}

async fn list_conversations(svc: &AppService) -> anyhow::Result<()> {
    let list = svc.list_conversations().await?;
    if list.is_empty() {
        println!("no conversations yet");
    }
    let active = svc.chat().session_id();
    for c in list {
        let marker = if active.as_ref() == Some(&c.session_id) { '*' } else { ' ' };
        println!(
            "{marker} {}  {:>3} msgs  {}",
            c.session_id,
            c.message_count,
            c.title.or(c.last_message).unwrap_or_default()
        );
    }
    Ok(())
}

fn print_transcript(svc: &AppService) {
    for m in svc.chat().snapshot().messages {
        println!("{}", render::transcript_line(&m));
    }
}

/// Push-to-talk loop: Enter starts recording, Enter again sends it.
pub async fn talk(svc: &AppService) -> anyhow::Result<()> {
    let voice = svc.voice_session();
    let mut input = stdin_lines();
    println!("Press Enter to speak, Enter again to send. Type q to quit.");

    loop {
        let Some(line) = prompt(&mut input, "").await? else {
            break;
        };
        if line.trim().eq_ignore_ascii_case("q") {
            break;
        }

        if let Err(e) = voice.start_recording().await {
            eprintln!("error: {}", user_facing_error(&anyhow::Error::new(e)));
            continue;
        }

        // Meter on stderr while the user speaks.
        let mut rx = voice.subscribe();
        let meter = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let view = rx.borrow_and_update().clone();
                if view.stage != VoiceStage::Recording {
                    break;
                }
                eprint!(
                    "\r{} {} ",
                    render::elapsed(view.elapsed_ms),
                    render::waveform(&view.waveform)
                );
            }
            eprintln!();
        });

        let stopped = tokio::select! {
            line = input.next_line() => line.context("read stdin")?.is_some(),
            _ = tokio::signal::ctrl_c() => false,
        };
        if !stopped {
            voice.cleanup();
            meter.abort();
            break;
        }
        if let Err(e) = voice.stop_recording() {
            // Auto-stop may have beaten the keypress.
            log::debug!("stop recording: {e}");
        }
        let _ = meter.await;

        wait_for_idle(&voice).await;
    }

    voice.close();
    Ok(())
}

async fn wait_for_idle(voice: &campuschat_engine::VoiceSession) {
    let mut rx = voice.subscribe();
    let mut last = None;
    loop {
        let view = rx.borrow_and_update().clone();
        if last != Some(view.stage) {
            if view.stage != VoiceStage::Idle {
                eprintln!("{}", render::stage_hint(view.stage));
            }
            last = Some(view.stage);
        }
        if view.stage == VoiceStage::Idle {
            if let Some(err) = view.error {
                eprintln!("error: {err}");
            }
            return;
        }

        tokio::select! {
            changed = rx.changed() => if changed.is_err() { return; },
            _ = tokio::signal::ctrl_c() => {
                voice.stop_playing();
                return;
            }
        }
    }
}
