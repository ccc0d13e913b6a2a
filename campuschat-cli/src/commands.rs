//! One-shot commands for the account and admin surfaces.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use campuschat_appcore::AppService;
use campuschat_core::types::SessionId;
use campuschat_runtime::{AuthState, SignOutReason};
use clap::Subcommand;

use crate::render;
use crate::repl::{prompt, stdin_lines};

#[derive(Debug, Subcommand)]
pub enum ConversationCmd {
    /// Your conversations.
    List {
        /// Every conversation on the server, not just yours.
        #[arg(long)]
        all: bool,
    },
    Show { id: String },
    New {
        #[arg(long)]
        title: Option<String>,
    },
    Delete { id: String },
    /// Delete all of your conversations.
    DeleteAll,
}

#[derive(Debug, Subcommand)]
pub enum DocsCmd {
    List,
    Get { id: String },
    Delete { id: String },
    Upload {
        path: PathBuf,
        /// Return as soon as the server accepts the file.
        #[arg(long)]
        no_wait: bool,
    },
    /// Recent upload sessions and their status.
    Uploads,
}

pub fn require_sign_in(svc: &AppService) -> anyhow::Result<()> {
    match svc.auth_state() {
        AuthState::SignedIn { .. } => Ok(()),
        AuthState::SignedOut(SignOutReason::Expired | SignOutReason::Invalidated) => {
            anyhow::bail!("your session has expired; run `campuschat login --email <you>`")
        }
        AuthState::SignedOut(SignOutReason::User) => {
            anyhow::bail!("not signed in; run `campuschat login --email <you>`")
        }
    }
}

pub async fn login(svc: &AppService, email: &str, password: Option<String>) -> anyhow::Result<()> {
    let password = match password {
        Some(p) => p,
        None => {
            let mut input = stdin_lines();
            prompt(&mut input, "password: ")
                .await?
                .context("no password given")?
        }
    };
    match svc.login(email, &password).await? {
        AuthState::SignedIn { email } => {
            println!("signed in as {}", email.unwrap_or_else(|| "<unknown>".into()));
        }
        other => log::warn!("login returned without a session: {other:?}"),
    }
    Ok(())
}

pub fn whoami(svc: &AppService) -> anyhow::Result<()> {
    match svc.auth_state() {
        AuthState::SignedIn { email } => {
            println!("{}", email.unwrap_or_else(|| "signed in".into()))
        }
        AuthState::SignedOut(reason) => println!("signed out ({reason:?})"),
    }
    Ok(())
}

pub async fn conversations(svc: &AppService, cmd: ConversationCmd) -> anyhow::Result<()> {
    require_sign_in(svc)?;
    match cmd {
        ConversationCmd::List { all } => {
            let list = if all {
                svc.list_all_conversations().await?
            } else {
                svc.list_conversations().await?
            };
            for c in list {
                println!(
                    "{}  {:>3} msgs  {}  {}",
                    c.session_id,
                    c.message_count,
                    c.updated_at.or(c.created_at).unwrap_or_default(),
                    c.title.or(c.last_message).unwrap_or_default()
                );
            }
        }
        ConversationCmd::Show { id } => {
            svc.switch_conversation(SessionId::new(id)).await?;
            for m in svc.chat().snapshot().messages {
                println!("{}", render::transcript_line(&m));
            }
        }
        ConversationCmd::New { title } => {
            let created = svc.create_conversation(title).await?;
            svc.switch_conversation(created.session_id.clone()).await?;
            println!("created {}", created.session_id);
        }
        ConversationCmd::Delete { id } => {
            svc.delete_conversation(&SessionId::new(id.clone())).await?;
            println!("deleted {id}");
        }
        ConversationCmd::DeleteAll => {
            svc.delete_my_conversations().await?;
            println!("deleted all conversations");
        }
    }
    Ok(())
}

pub async fn history(svc: &AppService, clear: bool) -> anyhow::Result<()> {
    require_sign_in(svc)?;
    if clear {
        svc.clear_chat_history().await?;
        println!("history cleared");
        return Ok(());
    }
    for m in svc.chat_history().await? {
        println!("{}", render::transcript_line(&m));
    }
    Ok(())
}

pub async fn docs(svc: &AppService, cmd: DocsCmd) -> anyhow::Result<()> {
    require_sign_in(svc)?;
    match cmd {
        DocsCmd::List => {
            for d in svc.list_documents().await? {
                println!(
                    "{}  {}  {}  {} chunks",
                    d.id,
                    d.filename,
                    d.status.unwrap_or_default(),
                    d.chunk_count.map(|c| c.to_string()).unwrap_or_else(|| "?".into())
                );
            }
        }
        DocsCmd::Get { id } => {
            let d = svc.get_document(&id).await?;
            println!("id:       {}", d.id);
            println!("file:     {}", d.filename);
            if let Some(size) = d.file_size {
                println!("size:     {size} bytes");
            }
            if let Some(status) = d.status {
                println!("status:   {status}");
            }
            if let Some(chunks) = d.chunk_count {
                println!("chunks:   {chunks}");
            }
            if let Some(at) = d.uploaded_at {
                println!("uploaded: {at}");
            }
        }
        DocsCmd::Delete { id } => {
            svc.delete_document(&id).await?;
            println!("deleted {id}");
        }
        DocsCmd::Upload { path, no_wait } => {
            let accepted = svc.upload_document(&path).await?;
            println!("accepted as {}", accepted.upload_id);
            if !no_wait {
                let done = svc
                    .wait_for_upload(&accepted.upload_id, Duration::from_secs(1), |p| {
                        eprint!("\r{:>5.1}% {}", p.progress, p.status);
                    })
                    .await;
                eprintln!();
                let done = done?;
                match done.chunk_count {
                    Some(n) => println!("processed into {n} chunks"),
                    None => println!("processed"),
                }
            }
        }
        DocsCmd::Uploads => {
            for u in svc.upload_sessions().await? {
                println!(
                    "{}  {}  {}  {}",
                    u.upload_id,
                    u.filename.unwrap_or_default(),
                    u.status.unwrap_or_default(),
                    u.progress.map(|p| format!("{p:.0}%")).unwrap_or_default()
                );
            }
        }
    }
    Ok(())
}

pub async fn stats(svc: &AppService) -> anyhow::Result<()> {
    let s = svc.stats().await?;
    let show = |label: &str, v: Option<u64>| {
        if let Some(v) = v {
            println!("{label:<15} {v}");
        }
    };
    show("documents", s.total_documents);
    show("chunks", s.total_chunks);
    show("conversations", s.total_conversations);
    for (k, v) in s.extra {
        println!("{k:<15} {v}");
    }
    Ok(())
}

pub async fn health(svc: &AppService) -> anyhow::Result<()> {
    let h = svc.health().await?;
    println!("{}", h.status);
    if !h.is_healthy() {
        anyhow::bail!("backend reports status {}", h.status);
    }
    Ok(())
}

pub async fn voices(svc: &AppService) -> anyhow::Result<()> {
    for v in svc.voices().await? {
        let detail: Vec<String> = [v.language, v.gender].into_iter().flatten().collect();
        println!(
            "{}  {}  {}",
            v.id,
            v.name.unwrap_or_default(),
            detail.join(", ")
        );
    }
    Ok(())
}

pub async fn say(
    svc: &AppService,
    text: &str,
    voice: Option<String>,
    out: Option<PathBuf>,
) -> anyhow::Result<()> {
    let blob = svc.text_to_speech(text, voice).await?;
    let out = out.unwrap_or_else(|| PathBuf::from(format!("speech.{}", extension_for(&blob.mime_type))));
    tokio::fs::write(&out, &blob.bytes)
        .await
        .with_context(|| format!("write {}", out.display()))?;
    println!("saved {} bytes to {}", blob.bytes.len(), out.display());
    Ok(())
}

pub fn config(svc: &AppService, save: bool) -> anyhow::Result<()> {
    let cfg = svc.config();
    println!("file:            {}", svc.config_path().display());
    println!("base_url:        {}", cfg.base_url);
    println!("use_memory:      {}", cfg.use_memory);
    println!("history_limit:   {}", cfg.history_limit);
    println!(
        "stream timeout:  {}",
        cfg.stream_idle_timeout()
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "none".into())
    );
    println!(
        "microphone:      {}",
        cfg.voice.microphone_device.as_deref().unwrap_or("(default)")
    );
    if save {
        svc.save_config(cfg)?;
        println!("saved");
    }
    Ok(())
}

fn extension_for(mime: &str) -> &'static str {
    let base = mime.split(';').next().unwrap_or("").trim();
    match base {
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/ogg" => "ogg",
        "audio/webm" => "webm",
        "audio/flac" => "flac",
        _ => "mp3",
    }
}
