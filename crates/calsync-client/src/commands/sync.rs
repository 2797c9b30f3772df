//! `calsync sync`.

use calsync_core::ProviderKind;
use calsync_engine::{SyncReply, SyncRequest, SyncService};
use chrono::{DateTime, Utc};

use crate::error::{ClientError, ClientResult};

pub struct SyncArgs {
    pub provider: Option<ProviderKind>,
    pub calendar: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub json: bool,
}

pub async fn run(service: &SyncService, args: SyncArgs) -> ClientResult<()> {
    let replies = match args.provider {
        Some(provider) => {
            let reply = service
                .sync(provider, args.calendar, args.from, args.to)
                .await;
            vec![(provider, reply)]
        }
        None => {
            if args.from.is_some() || args.to.is_some() {
                let mut replies = Vec::new();
                for status in service.status()? {
                    let request = SyncRequest::new(status.provider).with_window(args.from, args.to);
                    let result = service.run_sync(request).await;
                    replies.push((status.provider, SyncReply::from(&result)));
                }
                replies
            } else {
                service.sync_all(None).await?.replies()
            }
        }
    };

    if replies.is_empty() {
        println!("No calendar connected. Run `calsync connect <provider>` first.");
        return Ok(());
    }

    if args.json {
        let mut object = serde_json::Map::new();
        for (provider, reply) in &replies {
            object.insert(provider.to_string(), serde_json::to_value(reply)?);
        }
        println!("{}", serde_json::to_string_pretty(&object)?);
    } else {
        for (provider, reply) in &replies {
            println!("{}", render(*provider, reply));
        }
    }

    let failed: Vec<String> = replies
        .iter()
        .filter_map(|(provider, reply)| match reply {
            SyncReply::Failed { error } => Some(format!("{provider}: {error}")),
            SyncReply::Completed { .. } => None,
        })
        .collect();
    if failed.is_empty() {
        Ok(())
    } else {
        Err(ClientError::SyncFailed(failed.join("; ")))
    }
}

fn render(provider: ProviderKind, reply: &SyncReply) -> String {
    match reply {
        SyncReply::Completed {
            pulled,
            pushed,
            conflicts,
            ..
        } => format!("{provider}: pulled {pulled}, pushed {pushed}, conflicts {conflicts}"),
        SyncReply::Failed { error } => format!("{provider}: {error}"),
    }
}
