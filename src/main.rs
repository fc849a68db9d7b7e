//! Spaceporter - content space migration engine.
//!
//! Command-line front end over the library: fetch and persist trees,
//! replicate structure, carry over bodies and attachments, download
//! exports.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spaceporter::{
    config::{default_staging_dir, AppConfig, InstanceConfig},
    gateway::{rest::RestGateway, ContentGateway, ExportFormat},
    migrate::{ProgressReporter, Replicator, DEFAULT_AUTOMATION_LABEL},
    tree::{ContentTree, TreeFilter},
};

/// Content space migration tool.
#[derive(Parser)]
#[command(name = "spaceporter", about = "Migrates a page hierarchy between content instances")]
struct Cli {
    /// Path to the YAML run configuration.
    #[arg(long, default_value = "config.yaml", env = "SPACEPORTER_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum InstancePick {
    Source,
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportArg {
    Pdf,
    Word,
}

impl From<ExportArg> for ExportFormat {
    fn from(arg: ExportArg) -> Self {
        match arg {
            ExportArg::Pdf => Self::Pdf,
            ExportArg::Word => Self::Word,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build one instance's tree and print it.
    Fetch {
        /// Which configured instance to walk.
        #[arg(long, value_enum, default_value_t = InstancePick::Source)]
        instance: InstancePick,
    },

    /// Build one instance's tree and persist the listing and snapshot.
    SaveTree {
        #[arg(long, value_enum, default_value_t = InstancePick::Source)]
        instance: InstancePick,

        /// Directory for the tree files.
        #[arg(long, default_value = ".")]
        dest: PathBuf,
    },

    /// Replicate the source hierarchy under the target root page.
    Replicate {
        /// Also copy attachments while replicating.
        #[arg(long)]
        with_attachments: bool,

        /// Label stamped on every replicated page.
        #[arg(long, default_value = DEFAULT_AUTOMATION_LABEL)]
        label: String,
    },

    /// Carry page bodies over REST into the aligned target pages.
    CopyContent,

    /// Copy attachments between the aligned trees, standalone.
    CopyAttachments,

    /// Download every attachment of the source tree to disk.
    DownloadAttachments {
        /// Destination directory; defaults to the staging directory.
        #[arg(long)]
        dest: Option<PathBuf>,
    },

    /// Download rendered exports of every source page.
    Export {
        #[arg(long, value_enum)]
        format: ExportArg,

        /// Destination directory; defaults to the staging directory.
        #[arg(long)]
        dest: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spaceporter=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Fetch { instance } => {
            let tree = load_tree(pick(&config, instance)).await?;
            print!("{}", tree.render_listing());
            println!("Total nodes: {}", tree.total_nodes());
        }

        Commands::SaveTree { instance, dest } => {
            let instance = pick(&config, instance);
            let tree = load_tree(instance).await?;
            std::fs::create_dir_all(&dest)?;
            let listing = dest.join(ContentTree::artifact_name(
                &instance.name,
                instance.root_page_id,
                "txt",
            ));
            let snapshot = dest.join(ContentTree::artifact_name(
                &instance.name,
                instance.root_page_id,
                "json",
            ));
            tree.save_listing(&listing)?;
            tree.save_snapshot(&snapshot)?;
            println!("Saved {} and {}", listing.display(), snapshot.display());
        }

        Commands::Replicate {
            with_attachments,
            label,
        } => {
            let source = gateway(&config.source)?;
            let target = gateway(&config.target)?;
            let replicator = Replicator::connect(
                source.clone(),
                target.clone(),
                &config.target.space_key,
                &label,
                default_staging_dir(),
                with_attachments,
            )
            .await?;

            watch_for_interrupt(&replicator);
            let reporter = ProgressReporter::spawn(source, target, Duration::from_secs(2));
            let report = replicator
                .replicate(
                    config.source.root_page_id,
                    Some(config.target.root_page_id),
                )
                .await?;
            reporter.stop();

            println!("Replication finished");
            println!("Pages:               {}", report.pages);
            println!("Attachments:         {}", report.attachments);
            println!("Failed attachments:  {}", report.failed_attachments);
            println!("Failed subtrees:     {}", report.failed_subtrees);
        }

        Commands::CopyContent => {
            let (replicator, source_tree, target_tree) = aligned_pair(&config).await?;
            watch_for_interrupt(&replicator);
            let report = replicator.copy_bodies(&source_tree, &target_tree).await;
            println!(
                "Bodies copied: {} (skipped {}, failed {})",
                report.copied, report.skipped, report.failed
            );
        }

        Commands::CopyAttachments => {
            let (replicator, source_tree, target_tree) = aligned_pair(&config).await?;
            watch_for_interrupt(&replicator);
            let report = replicator.copy_attachments(&source_tree, &target_tree).await;
            println!(
                "Attachments copied: {} (failed {})",
                report.attachments, report.failed_attachments
            );
        }

        Commands::DownloadAttachments { dest } => {
            let source = gateway(&config.source)?;
            let target = gateway(&config.target)?;
            let replicator = Replicator::connect(
                source.clone(),
                target,
                &config.target.space_key,
                DEFAULT_AUTOMATION_LABEL,
                default_staging_dir(),
                false,
            )
            .await?;
            let tree = build_tree(source, &config.source).await?;
            let dest = dest.unwrap_or_else(default_staging_dir);
            let report = replicator.download_attachments(&tree, &dest).await?;
            println!(
                "Attachments downloaded to {}: {} (failed {})",
                dest.display(),
                report.attachments,
                report.failed_attachments
            );
        }

        Commands::Export { format, dest } => {
            let source = gateway(&config.source)?;
            let target = gateway(&config.target)?;
            let replicator = Replicator::connect(
                source.clone(),
                target,
                &config.target.space_key,
                DEFAULT_AUTOMATION_LABEL,
                default_staging_dir(),
                false,
            )
            .await?;
            let tree = build_tree(source, &config.source).await?;
            let dest = dest.unwrap_or_else(default_staging_dir);
            let saved = replicator
                .download_exports(&tree, ExportFormat::from(format), &dest)
                .await?;
            println!("Exports saved to {}: {}", dest.display(), saved);
        }
    }

    Ok(())
}

fn pick(config: &AppConfig, instance: InstancePick) -> &InstanceConfig {
    match instance {
        InstancePick::Source => &config.source,
        InstancePick::Target => &config.target,
    }
}

fn gateway(instance: &InstanceConfig) -> Result<Arc<dyn ContentGateway>> {
    Ok(Arc::new(RestGateway::new(instance.clone())?))
}

async fn build_tree(
    gateway: Arc<dyn ContentGateway>,
    instance: &InstanceConfig,
) -> Result<ContentTree> {
    let filter = TreeFilter::new(&instance.label, &instance.exclude_ids);
    Ok(ContentTree::build(gateway, instance.kind, instance.root_page_id, &filter).await?)
}

async fn load_tree(instance: &InstanceConfig) -> Result<ContentTree> {
    build_tree(gateway(instance)?, instance).await
}

/// Build both trees and align the target against the source, ready for
/// paired traversal.
async fn aligned_pair(config: &AppConfig) -> Result<(Replicator, ContentTree, ContentTree)> {
    let source = gateway(&config.source)?;
    let target = gateway(&config.target)?;

    let source_tree = build_tree(source.clone(), &config.source).await?;
    let mut target_tree = build_tree(target.clone(), &config.target).await?;
    target_tree.align_with(source_tree.root());

    let replicator = Replicator::connect(
        source,
        target,
        &config.target.space_key,
        DEFAULT_AUTOMATION_LABEL,
        default_staging_dir(),
        true,
    )
    .await?;

    Ok((replicator, source_tree, target_tree))
}

/// First Ctrl-C sets the cooperative stop flag; descent stops after the
/// node in flight.
fn watch_for_interrupt(replicator: &Replicator) {
    let cancel = replicator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, finishing current node");
            cancel.store(true, Ordering::Relaxed);
        }
    });
}
