//! `connect`, `disconnect`, `status` and `calendars`.

use calsync_core::ProviderKind;
use calsync_engine::{AccountStatus, SyncService};
use chrono::{DateTime, Utc};

use crate::error::ClientResult;

/// Exchanges `code` when given; otherwise prints the consent URL.
pub async fn connect(
    service: &SyncService,
    provider: ProviderKind,
    code: Option<String>,
    redirect_uri: &str,
) -> ClientResult<()> {
    let Some(code) = code else {
        let state = uuid::Uuid::new_v4().to_string();
        let url = service.authorization_url(provider, redirect_uri, Some(&state))?;
        println!("Open this URL to grant calendar access:");
        println!();
        println!("  {url}");
        println!();
        println!("Then run: calsync connect {provider} --code <CODE> --redirect-uri {redirect_uri}");
        return Ok(());
    };

    let record = service
        .connect_with_code(provider, code.trim(), redirect_uri)
        .await?;
    match record.account_email {
        Some(email) => println!("Connected {provider} as {email}."),
        None => println!("Connected {provider}."),
    }
    Ok(())
}

pub fn disconnect(service: &SyncService, provider: ProviderKind) -> ClientResult<()> {
    let report = service.disconnect(provider)?;
    if report.credential_removed {
        println!(
            "Disconnected {provider}; removed {} sync link(s).",
            report.links_removed
        );
    } else {
        println!("{provider} was not connected.");
    }
    Ok(())
}

pub fn status(service: &SyncService, json: bool) -> ClientResult<()> {
    let accounts = service.status()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&accounts)?);
        return Ok(());
    }
    if accounts.is_empty() {
        println!("No calendar connected.");
        return Ok(());
    }
    for account in &accounts {
        println!("{}", render_status(account, Utc::now()));
    }
    Ok(())
}

pub async fn calendars(service: &SyncService, provider: ProviderKind) -> ClientResult<()> {
    for calendar in service.calendars(provider).await? {
        let mut flags = Vec::new();
        if calendar.is_primary {
            flags.push("primary");
        }
        if !calendar.can_edit {
            flags.push("read-only");
        }
        if flags.is_empty() {
            println!("{}\t{}", calendar.id, calendar.name);
        } else {
            println!("{}\t{} ({})", calendar.id, calendar.name, flags.join(", "));
        }
    }
    Ok(())
}

fn render_status(account: &AccountStatus, now: DateTime<Utc>) -> String {
    let mut lines = vec![format!(
        "{}: {}",
        account.provider,
        account.account_email.as_deref().unwrap_or("(unknown account)")
    )];

    let token = match (account.expires_at, account.expired) {
        (_, true) if account.can_refresh => "access token expired, will refresh".to_string(),
        (_, true) => "expired, reconnect required".to_string(),
        (Some(at), false) => format!("valid for {} min", (at - now).num_minutes().max(0)),
        (None, false) => "valid".to_string(),
    };
    lines.push(format!("  token:  {token}"));
    lines.push(format!("  links:  {}", account.link_count));

    match &account.last_run {
        Some(run) => lines.push(format!(
            "  last:   {} on {} (pulled {}, pushed {}, conflicts {}, failures {}{})",
            run.last_sync_at.format("%Y-%m-%d %H:%M UTC"),
            run.calendar_id,
            run.pulled,
            run.pushed,
            run.conflicts,
            run.failures,
            if run.partial { ", partial" } else { "" }
        )),
        None => lines.push("  last:   never synced".to_string()),
    }
    lines.join("\n")
}
