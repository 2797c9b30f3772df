//! Command-line interface definition.

use std::path::PathBuf;

use calsync_core::ProviderKind;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::{Parser, Subcommand};

/// Used when neither the command line nor the provider section sets one.
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8765/callback";

/// calsync - keep a local calendar in step with Google and Outlook
#[derive(Debug, Parser)]
#[command(name = "calsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "CALSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reconcile with one provider, or every connected one
    Sync {
        /// Provider to sync (google, microsoft)
        #[arg(long, short)]
        provider: Option<ProviderKind>,

        /// Provider calendar id; defaults to the configured or primary calendar
        #[arg(long, requires = "provider")]
        calendar: Option<String>,

        /// Window start (YYYY-MM-DD or RFC 3339); defaults to today
        #[arg(long, value_parser = parse_instant)]
        from: Option<DateTime<Utc>>,

        /// Window end (YYYY-MM-DD or RFC 3339); defaults to one year after start
        #[arg(long, value_parser = parse_instant)]
        to: Option<DateTime<Utc>>,

        /// Print the reply as JSON
        #[arg(long)]
        json: bool,
    },

    /// Connect a provider account
    ///
    /// Without --code, prints the consent URL to open in a browser.
    Connect {
        provider: ProviderKind,

        /// Authorization code returned to the redirect URI
        #[arg(long)]
        code: Option<String>,

        /// Redirect URI registered with the OAuth client
        #[arg(long)]
        redirect_uri: Option<String>,
    },

    /// Forget a provider's tokens and sync links
    Disconnect { provider: ProviderKind },

    /// Show connected accounts and their last sync
    Status {
        #[arg(long)]
        json: bool,
    },

    /// List the calendars of a connected account
    Calendars { provider: ProviderKind },

    /// Sync periodically in the foreground until interrupted
    Daemon,

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration file path
    Path,
}

/// Parses `YYYY-MM-DD` (midnight UTC) or a full RFC 3339 timestamp.
pub fn parse_instant(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| format!("`{value}` is neither YYYY-MM-DD nor an RFC 3339 timestamp"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_dates_and_timestamps() {
        assert_eq!(
            parse_instant("2024-03-15").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(
            parse_instant("2024-03-15T10:30:00+02:00").unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 15, 8, 30, 0).unwrap()
        );
        assert!(parse_instant("next tuesday").is_err());
    }

    #[test]
    fn sync_arguments() {
        let cli = Cli::parse_from([
            "calsync", "-vv", "sync", "--provider", "outlook", "--calendar", "work", "--from",
            "2024-03-01", "--json",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Sync {
                provider,
                calendar,
                from,
                to,
                json,
            } => {
                assert_eq!(provider, Some(ProviderKind::Microsoft));
                assert_eq!(calendar.as_deref(), Some("work"));
                assert!(from.is_some());
                assert!(to.is_none());
                assert!(json);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn calendar_requires_provider() {
        assert!(Cli::try_parse_from(["calsync", "sync", "--calendar", "work"]).is_err());
        assert!(Cli::try_parse_from(["calsync", "connect", "yahoo"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
