pub mod chat;
pub mod picker;
pub mod render;

use anyhow::{Context, Result};
use nova_chat::session::SessionCache;
use nova_chat::{ApiClient, ChatConfig, Company, FileSessionCache, ResolvedModality, resolve_modalities};
use std::path::Path;
use tracing::{debug, info};

use crate::config::NovaConfig;

/// Company document plus the modalities it offers.
pub struct Loaded {
    pub chat: ChatConfig,
    pub api: ApiClient,
    pub company: Company,
    pub modalities: Vec<ResolvedModality>,
}

/// Read config, check the company id, fetch the company document.
pub async fn load_company(config: &NovaConfig) -> Result<Loaded> {
    let chat = config.chat_config()?;
    chat.validate().with_context(|| {
        format!(
            "Set company_id in {:?} or NOVA_COMPANY_ID",
            config.config_toml_path()
        )
    })?;

    let api = ApiClient::new(&chat);
    let company = api
        .fetch_company(chat.company_id())
        .await
        .context("Failed to load company")?;
    let modalities = resolve_modalities(&company, &chat.language_code);
    debug!(company = %company.name, modalities = modalities.len(), "Company loaded");

    Ok(Loaded {
        chat,
        api,
        company,
        modalities,
    })
}

/// `nova modalities`
pub async fn modalities_command(config: &NovaConfig, json: bool) -> Result<()> {
    let loaded = load_company(config).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&loaded.modalities)?);
        return Ok(());
    }

    let width = loaded
        .modalities
        .iter()
        .map(|m| m.key.len())
        .max()
        .unwrap_or(0);
    for modality in &loaded.modalities {
        match &modality.description {
            Some(desc) => println!(
                "{:width$}  {}  ({})",
                modality.key, modality.display_label, desc
            ),
            None => println!("{:width$}  {}", modality.key, modality.display_label),
        }
    }
    Ok(())
}

/// `nova transcribe <file>`
pub async fn transcribe_command(config: &NovaConfig, file: &Path, duration: f64) -> Result<()> {
    let chat = config.chat_config()?;
    let api = ApiClient::new(&chat);
    let text = transcribe_file(&api, file, duration).await?;
    println!("{}", text);
    Ok(())
}

pub async fn transcribe_file(api: &ApiClient, file: &Path, duration: f64) -> Result<String> {
    let audio = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {:?}", file))?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("recording.webm");
    info!(file_name, bytes = audio.len(), "Transcribing");
    Ok(api.transcribe(audio, file_name, duration).await?)
}

/// `nova sessions clear`
pub fn sessions_clear_command(config: &NovaConfig) -> Result<()> {
    let cache = FileSessionCache::new(&config.sessions_dir)?;
    let removed = cache.clear()?;
    println!("Removed {} cached session(s)", removed);
    Ok(())
}

/// `nova config`
pub fn config_command(config: &NovaConfig) -> Result<()> {
    let chat = config.chat_config()?;
    println!("# data dir: {}", config.data_dir.display());
    print!("{}", toml::to_string_pretty(&chat)?);
    Ok(())
}
