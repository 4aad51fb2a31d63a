use std::sync::Arc;

use {
    anyhow::Result,
    clap::Subcommand,
    courier_config::CourierConfig,
    courier_forward::{
        backup::{BackupCallbacks, BackupManager, TaskFn},
        store::ForwardStore,
        types::{BackupCreate, BackupTask, ChatId},
    },
    tracing::warn,
};

use crate::store;

#[derive(Subcommand)]
pub enum BackupAction {
    /// Copy the recorded history of one chat into another.
    Start {
        #[arg(allow_negative_numbers = true)]
        source: ChatId,
        #[arg(allow_negative_numbers = true)]
        target: ChatId,
        /// Relay without notifications.
        #[arg(long)]
        silent: bool,
    },
    /// Continue an interrupted or failed task from its checkpoint.
    Resume { id: String },
    /// Show one task.
    Status { id: String },
    /// List all tasks.
    List,
}

pub async fn handle_backup(config: &CourierConfig, action: BackupAction) -> Result<()> {
    let store = store::open_configured(config).await?;

    match action {
        BackupAction::Start {
            source,
            target,
            silent,
        } => {
            let manager = job_manager(config, store).await?;
            let task = manager
                .start_backup(BackupCreate {
                    source_id: source,
                    target_id: target,
                    silent,
                })
                .await?;
            run_job(&manager, task).await
        },
        BackupAction::Resume { id } => {
            let manager = job_manager(config, store).await?;
            let task = manager.status(&id).await?;
            run_job(&manager, task).await
        },
        BackupAction::Status { id } => {
            let task = store
                .get_task(&id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("backup task not found: {id}"))?;
            print_task(&task);
            Ok(())
        },
        BackupAction::List => {
            let tasks = store.list_tasks().await?;
            if tasks.is_empty() {
                println!("No backup tasks.");
            }
            for task in &tasks {
                print_task(task);
            }
            Ok(())
        },
    }
}

async fn job_manager(
    config: &CourierConfig,
    store: Arc<dyn ForwardStore>,
) -> Result<BackupManager> {
    let client = store::telegram_client(config).await?;
    let progress: TaskFn = Arc::new(|task: &BackupTask| {
        eprintln!(
            "  {}/{} processed, {} failed",
            task.processed_messages, task.total_messages, task.failed_messages
        );
    });
    Ok(BackupManager::new(
        store,
        client,
        config.backup.clone(),
        config.rate_limit.clone(),
    )
    .with_max_flood_retries(config.forward.max_flood_retries)
    .with_callbacks(BackupCallbacks {
        on_progress: Some(progress),
        on_complete: None,
    }))
}

/// Run in the foreground until done or Ctrl-C. An interrupted task keeps
/// its checkpoint.
async fn run_job(manager: &BackupManager, task: BackupTask) -> Result<()> {
    eprintln!(
        "Running backup {} ({} -> {})",
        task.id, task.source_id, task.target_id
    );
    let id = task.id.clone();
    tokio::select! {
        result = manager.execute_backup(task) => print_task(&result?),
        _ = tokio::signal::ctrl_c() => {
            warn!(id = %id, "backup interrupted");
            eprintln!("Interrupted. Continue with `courier backup resume {id}`.");
        },
    }
    Ok(())
}

fn print_task(task: &BackupTask) {
    println!(
        "{}  {} -> {}  {}  {}/{} processed, {} failed",
        task.id,
        task.source_id,
        task.target_id,
        task.status,
        task.processed_messages,
        task.total_messages,
        task.failed_messages
    );
    if let Some(error) = &task.error {
        println!("    error: {error}");
    }
}
