use super::error::{self, InvalidInput};
use super::output::{self, ConsoleNotifier, FetchSummary};
use super::{Commands, ConfigAction};
use crate::app::config::Config;
use crate::download::queue::DownloadQueue;
use crate::download::task::DownloadRequest;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

/// Arguments of the `fetch` command
#[derive(Debug, Default)]
pub struct FetchOptions {
    pub urls: Vec<String>,
    pub output: Option<PathBuf>,
    pub jobs: Option<usize>,
    pub headers: Vec<String>,
    pub name: Option<String>,
    pub json: bool,
}

/// Handle a CLI command and return exit code
pub async fn handle_command(command: Commands, config: Result<Config>) -> i32 {
    let result = match command {
        Commands::Fetch {
            urls,
            output,
            jobs,
            headers,
            name,
            json,
        } => {
            let options = FetchOptions {
                urls,
                output,
                jobs,
                headers,
                name,
                json,
            };
            match config {
                Ok(config) => handle_fetch(options, &config).await,
                Err(e) => Err(e),
            }
        }
        Commands::Config { action } => handle_config(action, config),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if e.downcast_ref::<InvalidInput>().is_some() {
                error::INVALID_INPUT
            } else {
                error::ERROR
            }
        }
    }
}

/// Download every url, wait for the queue to drain, print a summary
pub async fn handle_fetch(options: FetchOptions, config: &Config) -> Result<i32> {
    let requests = build_requests(&options)?;

    let mut download = config.download.clone();
    if let Some(dir) = options.output {
        download.directory = dir;
    }
    if let Some(jobs) = options.jobs {
        if jobs == 0 {
            return Err(InvalidInput("--jobs must be at least 1".to_string()).into());
        }
        download.max_concurrent = jobs;
    }

    tracing::info!(
        "Fetching {} url(s) into {:?} with {} slot(s)",
        requests.len(),
        download.directory,
        download.max_concurrent
    );

    let notifier = Arc::new(ConsoleNotifier::new(!options.json));
    let queue = DownloadQueue::from_config(&download, notifier.clone())
        .context("Failed to set up HTTP client")?;

    queue.add(requests);

    let mut cancelled = 0;
    tokio::select! {
        _ = queue.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            cancelled = queue.cancel_all();
            tracing::warn!("Interrupted, cancelled {} download(s)", cancelled);
        }
    }

    let summary = FetchSummary::collect(&notifier.notices(), &queue.snapshot(), cancelled);
    println!("{}", output::format_summary(&summary, options.json)?);

    Ok(if summary.is_success() {
        error::SUCCESS
    } else {
        error::ERROR
    })
}

/// Validate urls and options into queue requests
pub fn build_requests(options: &FetchOptions) -> Result<Vec<DownloadRequest>, InvalidInput> {
    if options.urls.is_empty() {
        return Err(InvalidInput("no urls given".to_string()));
    }
    if options.name.is_some() && options.urls.len() > 1 {
        return Err(InvalidInput("--name can only be used with a single url".to_string()));
    }

    let headers = options
        .headers
        .iter()
        .map(|raw| parse_header(raw))
        .collect::<Result<Vec<_>, _>>()?;

    options
        .urls
        .iter()
        .map(|raw| {
            let parsed = url::Url::parse(raw)
                .map_err(|e| InvalidInput(format!("invalid url '{}': {}", raw, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(InvalidInput(format!(
                    "unsupported scheme '{}' in '{}'",
                    parsed.scheme(),
                    raw
                )));
            }

            let mut request = DownloadRequest::new(raw.as_str());
            if let Some(name) = &options.name {
                request = request.with_filename(name.as_str());
            }
            for (name, value) in &headers {
                request = request.with_header(name.as_str(), value.as_str());
            }
            Ok(request)
        })
        .collect()
}

/// Parse `Name: value`
fn parse_header(raw: &str) -> Result<(String, String), InvalidInput> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| InvalidInput(format!("header '{}' is not 'Name: value'", raw)))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(InvalidInput(format!("header '{}' has no name", raw)));
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Handle config subcommands
fn handle_config(action: ConfigAction, config: Result<Config>) -> Result<i32> {
    match action {
        ConfigAction::Show { json } => {
            let config = config?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
            Ok(error::SUCCESS)
        }
        ConfigAction::Path => {
            let path = crate::util::paths::get_app_config_path()?;
            println!("{}", path.display());
            Ok(error::SUCCESS)
        }
        ConfigAction::Init { force } => {
            let path = crate::util::paths::get_app_config_path()?;
            if path.exists() && !force {
                return Err(InvalidInput(format!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                ))
                .into());
            }
            Config::default().save_to(&path)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(error::SUCCESS)
        }
    }
}
