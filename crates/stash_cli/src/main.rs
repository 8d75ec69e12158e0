mod output;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use miette::Result;
use stash_core::{
    Category, ContentFilter, RefreshableAllowList, StaticCatalog, StreamStash, config,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "stash-cli")]
#[command(about = "Browse a content catalog through the stream stash")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Request a category and page its clusters forward
    Browse {
        /// JSON catalog used as the content source
        #[arg(long)]
        catalog: PathBuf,

        /// Category to request
        category: String,

        /// Page-forward calls per cluster after the first request
        #[arg(short = 'p', long, default_value_t = 1)]
        pages: usize,

        /// One uncoloured line per cluster
        #[arg(long)]
        plain: bool,
    },
    /// Write a default configuration file
    InitConfig {
        /// Where to write it (defaults to the standard location)
        path: Option<PathBuf>,
    },
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stream-stash")
        .join("stash.toml")
}

fn init_tracing(debug: bool) {
    use tracing_subscriber::{
        EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt,
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("stash_core=debug,stash_cli=debug,info")
        } else {
            EnvFilter::new("stash_core=info,stash_cli=info,warn")
        }
    });

    let terminal_layer = if debug {
        fmt::layer()
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .pretty()
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .boxed()
    };

    tracing_subscriber::registry()
        .with(terminal_layer.with_filter(env_filter))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .with_cause_chain()
                .context_lines(3)
                .build(),
        )
    }))?;
    miette::set_panic_hook();
    let cli = Cli::parse();

    init_tracing(cli.debug);

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Browse {
            catalog,
            category,
            pages,
            plain,
        } => {
            info!("Loading config from: {:?}", config_path);
            let config = config::load_config_or_default(Some(&config_path)).await?;
            let catalog = StaticCatalog::from_json_file(&catalog).await?;
            // a configured cache means a previously fetched allow-list may be on disk
            let filter: Arc<dyn ContentFilter> = if config.allow_list.cache_path.is_some() {
                Arc::new(RefreshableAllowList::load(&config.allow_list, None).await)
            } else {
                Arc::new(config.allow_list.builtin())
            };
            let stash = StreamStash::new(Arc::new(catalog), filter, &config)?;

            browse(&stash, &Category::new(category), pages, plain).await?;
        }
        Commands::InitConfig { path } => {
            let path = path.unwrap_or(config_path);
            config::save_config(&config::StashConfig::default(), &path).await?;
            output::success(&format!("Wrote default config to {}", path.display()));
        }
    }

    Ok(())
}

async fn browse(
    stash: &StreamStash,
    category: &Category,
    pages: usize,
    plain: bool,
) -> Result<()> {
    let snapshot = stash.request(category).await?;
    let Some(bundle) = snapshot.get(category) else {
        output::warning(&format!("Nothing to show for '{category}'"));
        return Ok(());
    };

    let clusters: Vec<_> = bundle.clusters().map(|c| c.id()).collect();
    let mut latest = snapshot.clone();
    for cluster in clusters {
        for _ in 0..pages {
            match stash.page_forward(category, cluster).await {
                Ok(snapshot) => latest = snapshot,
                Err(e) => {
                    // keep what we have; a failed page never touches the cache
                    output::warning(&format!("{e}"));
                    break;
                }
            }
            let exhausted = latest
                .get(category)
                .and_then(|bundle| bundle.cluster(cluster))
                .map_or(true, |cluster| !cluster.has_more());
            if exhausted {
                break;
            }
        }
    }

    match latest.get(category) {
        Some(bundle) if plain => {
            for cluster in bundle.clusters() {
                println!("{}", output::cluster_summary(cluster));
            }
        }
        Some(bundle) => output::print_bundle(category, bundle),
        None => {}
    }
    Ok(())
}
