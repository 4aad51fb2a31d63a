use {
    anyhow::{Result, bail},
    clap::{Subcommand, ValueEnum},
    courier_config::{CourierConfig, StorageBackend},
    courier_forward::migrate::migrate_store,
};

use crate::store;

#[derive(Subcommand)]
pub enum DbAction {
    /// Copy rules, backup tasks and stats from one backend into another.
    Migrate {
        #[arg(long, value_enum)]
        from: Backend,
        #[arg(long, value_enum)]
        to: Backend,
    },
}

/// Persistent backends; the in-memory one has nothing to migrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    File,
    Sqlite,
}

impl From<Backend> for StorageBackend {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::File => Self::File,
            Backend::Sqlite => Self::Sqlite,
        }
    }
}

pub async fn handle_db(config: &CourierConfig, action: DbAction) -> Result<()> {
    match action {
        DbAction::Migrate { from, to } => migrate(config, from, to).await,
    }
}

async fn migrate(config: &CourierConfig, from: Backend, to: Backend) -> Result<()> {
    if from == to {
        bail!("source and destination backends are the same");
    }
    let source = store::open_store(config, from.into()).await?;
    let destination = store::open_store(config, to.into()).await?;

    let report = migrate_store(source.as_ref(), destination.as_ref()).await?;
    println!(
        "Migrated {} rule(s), {} backup task(s), {} stats record(s) from {} to {}.",
        report.rules,
        report.tasks,
        report.stats,
        StorageBackend::from(from),
        StorageBackend::from(to)
    );
    if config.storage.backend != StorageBackend::from(to) {
        println!(
            "Set storage.backend = \"{}\" in your config to use it.",
            StorageBackend::from(to)
        );
    }
    Ok(())
}
