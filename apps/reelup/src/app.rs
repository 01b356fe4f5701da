//! Command handlers.

use std::path::Path;

use anyhow::Context as _;
use reelup_accounts::{Accounts, JsonFileStore, RecordStore};
use reelup_graph::Client;
use reelup_protocol::FinishResult;
use reelup_transfer::{UploadError, UploadEvent, UploadTransport, Uploader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::{Cli, Commands, UploadArgs};
use crate::config::Config;

/// Runs one command to completion.
pub async fn run(cli: Cli, config: Config) -> anyhow::Result<()> {
    let accounts = open_accounts(&config)?;

    match cli.command {
        Commands::Upload(args) => {
            let client = Client::new(&config.client_config())?;
            let cancel = CancellationToken::new();
            let watcher = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));
            let result = upload(&client, &accounts, &config, args, cancel).await;
            watcher.abort();
            let finish = result?;
            println!("{}", serde_json::to_string_pretty(&finish)?);
        }
        Commands::Register { user, referral } => {
            let reg = accounts.register(&user, referral.as_deref())?;
            if reg.created {
                println!("Registered {user}.");
            } else {
                println!("{user} is already registered.");
            }
            if let Some(referrer) = &reg.referrer {
                println!("Referred by {referrer}.");
            }
            print_status(&accounts, &reg.record.ref_code, reg.record.is_premium);
        }
        Commands::Referral { user } => {
            let info = accounts.referral_info(&user)?;
            println!("Referral code: {}", info.ref_code);
            println!(
                "Referrals: {} of {} for premium",
                info.referrals, info.referrals_for_premium
            );
            if info.is_premium {
                println!("Premium: yes");
            }
        }
        Commands::Redeem { user, key } => {
            accounts.redeem_key(&user, &key)?;
            println!("Premium activated for {user}.");
        }
        Commands::GrantPremium { actor, user } => {
            accounts.grant_premium(&actor, &user)?;
            println!("{user} is now premium.");
        }
        Commands::GenerateKey { actor } => {
            let key = accounts.generate_key(&actor)?;
            println!("{key}");
        }
    }

    Ok(())
}

fn open_accounts(config: &Config) -> anyhow::Result<Accounts<JsonFileStore>> {
    let path = config.store_path()?;
    let store = JsonFileStore::open(&path)
        .with_context(|| format!("opening account store {}", path.display()))?;
    let mut accounts = Accounts::new(store, config.features).with_policy(config.quota_policy());
    if let Some(admin) = &config.admin_id {
        accounts = accounts.with_admin(admin.clone());
    }
    Ok(accounts)
}

fn print_status<S: RecordStore>(accounts: &Accounts<S>, ref_code: &str, is_premium: bool) {
    if is_premium {
        println!("Premium user, no size limit.");
    } else if accounts.features().quota {
        println!(
            "Free user, max {} MiB per video.",
            accounts.policy().free_max_bytes / (1024 * 1024)
        );
    }
    if accounts.features().referrals {
        println!("Your referral code: {ref_code}");
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupt received, cancelling upload");
        cancel.cancel();
    }
}

/// Checks quota, uploads, records the upload and optionally removes the file.
///
/// The file is only removed after the server confirmed the finish call.
pub async fn upload<S: RecordStore>(
    transport: &dyn UploadTransport,
    accounts: &Accounts<S>,
    config: &Config,
    args: UploadArgs,
    cancel: CancellationToken,
) -> anyhow::Result<FinishResult> {
    let target = config.upload_target()?;
    let size = tokio::fs::metadata(&args.file)
        .await
        .with_context(|| format!("reading {}", args.file.display()))?
        .len();

    if let Some(user) = &args.user {
        accounts.check_upload(user, size)?;
    }

    let caption = args
        .caption
        .clone()
        .unwrap_or_else(|| config.default_caption.clone());

    println!("Uploading {} ({size} bytes)...", args.file.display());

    let (events_tx, events_rx) = mpsc::channel(64);
    let reporter = tokio::spawn(report_events(events_rx));

    let uploader = Uploader::new(transport)
        .with_retry(config.retry())
        .with_stall_limit(config.stall_limit)
        .with_cancel(cancel)
        .with_events(events_tx);
    let result = uploader
        .upload_file(&args.file, size, &caption, &target)
        .await;
    // Closes the event channel so the reporter drains and exits.
    drop(uploader);
    if let Err(e) = reporter.await {
        debug!("event reporter ended abnormally: {e}");
    }

    let finish = match result {
        Ok(finish) => finish,
        Err(e) => {
            if let UploadError::SessionFinish(_) = &e {
                warn!(
                    file = %args.file.display(),
                    "finish outcome unknown, the video may still be published; keeping the file"
                );
            }
            if let Some(raw) = e.raw_response() {
                eprintln!("Server response: {raw}");
            }
            return Err(e).context("upload failed");
        }
    };

    if let Some(user) = &args.user {
        let uploads = accounts.record_upload(user)?;
        debug!(user = %user, uploads, "upload recorded");
    }

    if args.delete_after {
        if finish.success() == Some(false) {
            warn!(file = %args.file.display(), "server did not report success; keeping the file");
        } else {
            remove_uploaded(&args.file).await?;
        }
    }

    Ok(finish)
}

async fn remove_uploaded(path: &Path) -> anyhow::Result<()> {
    tokio::fs::remove_file(path)
        .await
        .with_context(|| format!("removing {}", path.display()))?;
    info!(file = %path.display(), "removed uploaded file");
    Ok(())
}

async fn report_events(mut events_rx: mpsc::Receiver<UploadEvent>) {
    while let Some(event) = events_rx.recv().await {
        match &event {
            UploadEvent::Started {
                session_id,
                total_size,
                ..
            } => info!(session = %session_id, total_size, "upload session started"),
            UploadEvent::ChunkAcknowledged { next, .. } => {
                let percent = event.progress().unwrap_or_default() * 100.0;
                info!(next = %next, "{percent:.0}% acknowledged");
            }
            UploadEvent::Retrying {
                window,
                attempt,
                delay,
                error,
            } => warn!(window = %window, attempt, ?delay, "retrying chunk: {error}"),
            UploadEvent::Finishing { session_id } => {
                info!(session = %session_id, "finishing upload")
            }
            UploadEvent::Completed {
                session_id,
                resource_id,
            } => info!(session = %session_id, resource = ?resource_id, "upload completed"),
            UploadEvent::Failed { error } => warn!("upload failed: {error}"),
        }
    }
}
