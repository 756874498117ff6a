use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use autoplay_guard::{
    EngineConfig, EngineController, FlagStore, MemoryFlagStore, Page, SqliteFlagStore,
    ToggleCoordinator,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

const USAGE: &str = "usage: autoplay-guard <status|enable|disable|toggle|sanitize <file> [--url <page-url>]>";

fn main() -> Result<()> {
    let subscriber_result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
    if subscriber_result.is_err() {
        // tracing was already initialised; continue silently
    }

    let config_path = std::env::var("AUTOPLAY_GUARD_CONFIG")
        .ok()
        .map(PathBuf::from);
    let config = EngineConfig::load(config_path).context("failed to load engine config")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        None | Some("status") => {
            let store = open_store()?;
            let enabled = store.load(&config.flag_key)?.unwrap_or(false);
            println!("{}", if enabled { "on" } else { "off" });
        }
        Some(command @ ("enable" | "disable")) => {
            let store = open_store()?;
            store.store(&config.flag_key, command == "enable")?;
            println!("{}", if command == "enable" { "on" } else { "off" });
        }
        Some("toggle") => {
            let store: Rc<dyn FlagStore> = Rc::new(open_store()?);
            let coordinator = ToggleCoordinator::new(store, config.flag_key.clone());
            let enabled = coordinator.toggle()?;
            println!("{}", if enabled { "on" } else { "off" });
        }
        Some("sanitize") => sanitize(&args[1..], config)?,
        Some(other) => bail!("unknown command '{other}'\n{USAGE}"),
    }
    Ok(())
}

fn open_store() -> Result<SqliteFlagStore> {
    SqliteFlagStore::new().context("failed to open flag storage")
}

fn sanitize(args: &[String], config: EngineConfig) -> Result<()> {
    let mut path = None;
    let mut page_url = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--url" => {
                let raw = iter.next().ok_or_else(|| anyhow!("--url needs a value"))?;
                page_url = Some(Url::parse(raw).with_context(|| format!("invalid URL '{raw}'"))?);
            }
            other if path.is_none() => path = Some(PathBuf::from(other)),
            other => bail!("unexpected argument '{other}'\n{USAGE}"),
        }
    }
    let path = path.ok_or_else(|| anyhow!("missing HTML file\n{USAGE}"))?;
    let html = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let location = match page_url {
        Some(url) => url,
        None => file_url(&path)?,
    };

    let settle = Duration::from_millis(
        config
            .navigation
            .load_check_delay_ms
            .max(config.navigation.settle_delay_ms)
            + 1,
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build runtime")?;

    let output = runtime.block_on(async move {
        let page = Page::from_html(location, &html);
        let flags: Rc<dyn FlagStore> = Rc::new(MemoryFlagStore::with_value(&config.flag_key, true));
        let engine = EngineController::install(&page, config, flags);
        page.event_loop.advance(settle).await;

        info!(
            wired = engine.registry().live_count(),
            suppressed = engine.policy().suppression_count(),
            "sanitized document"
        );
        page.document.to_html()
    });

    println!("{output}");
    Ok(())
}

fn file_url(path: &Path) -> Result<Url> {
    let absolute = fs::canonicalize(path)
        .with_context(|| format!("failed to resolve {}", path.display()))?;
    Url::from_file_path(&absolute).map_err(|_| anyhow!("cannot turn {} into a URL", absolute.display()))
}
