use std::path::Path;
use std::sync::Arc;
use anyhow::Context;
use docport::utils::format_bytes;
use docport::{AuthGate, Config, FilePayload, HttpTransport, MemoryTokenStore, UploadManager, UploadStatus};
use tracing_subscriber::EnvFilter;

fn guess_mime(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("pdf") => "application/pdf",
        Some("docx") => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().context("usage: docport <config.toml> <file>...")?;
    let config = Config::from_file(&config_path)
        .with_context(|| format!("failed to load {}", config_path))?;

    let transport = Arc::new(HttpTransport::new(&config)?);
    let tokens = Arc::new(MemoryTokenStore::new());
    let gate = AuthGate::new(&config, transport, tokens);

    if let Some(credentials) = &config.credentials {
        gate.login(&credentials.email, &credentials.password)
            .await
            .context("login failed")?;
    }

    let mut files = Vec::new();
    for arg in args {
        let path = Path::new(&arg);
        let content = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", arg))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(arg.as_str())
            .to_string();
        files.push(FilePayload::new(filename, guess_mime(path), content));
    }
    anyhow::ensure!(!files.is_empty(), "no files given");

    let handle = UploadManager::new(&config, gate);
    let manager = handle.manager.clone();
    let mut snapshots = manager.subscribe().await?;
    manager.submit(files).await?;

    while let Some(snapshot) = snapshots.recv().await {
        for task in snapshot.iter() {
            println!(
                "{:<40} {:>10} {:>10} {:>3}%  {}",
                task.payload.filename,
                format_bytes(task.payload.size),
                format!("{:?}", task.status),
                task.progress,
                task.error.as_deref().unwrap_or("")
            );
        }
        println!();

        if !snapshot.is_empty() && snapshot.iter().all(|t| t.status.is_terminal()) {
            let completed = snapshot.iter().filter(|t| t.status == UploadStatus::Completed).count();
            println!("{} of {} uploads completed", completed, snapshot.len());
            break;
        }
    }

    drop(snapshots);
    drop(manager);
    handle.shutdown().await?;
    Ok(())
}
