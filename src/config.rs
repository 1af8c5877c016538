use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use url::Url;

use crate::feeds::espn::DEFAULT_ESPN_URL;
use crate::feeds::SignalKind;

/// Consensus, calibration and outcome tracking for sporting matchups
#[derive(Parser, Debug, Clone)]
#[command(name = "matchup-consensus", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub config: Config,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "consensus.db")]
    pub database_path: String,

    /// Timeout for each provider or feed request, in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value = "8")]
    pub fetch_timeout_secs: u64,

    /// How long a built reliability curve is served before rebuilding
    #[arg(long, env = "CALIBRATION_TTL_SECS", default_value = "3600")]
    pub calibration_ttl_secs: u64,

    /// Most recent resolved outcomes used for calibration
    #[arg(long, env = "CALIBRATION_HISTORY_LIMIT", default_value = "1000")]
    pub calibration_history_limit: i64,

    /// Samples a confidence bin needs before it shapes the curve
    #[arg(long, env = "MIN_BIN_SAMPLES", default_value = "5")]
    pub min_bin_samples: u64,

    /// Fractional Kelly multiplier (0.0–1.0)
    #[arg(long, env = "KELLY_FRACTION", default_value = "1.0")]
    pub kelly_fraction: f64,

    /// Ceiling on any single stake as a bankroll fraction
    #[arg(long, env = "KELLY_CAP", default_value = "0.25")]
    pub kelly_cap: f64,

    /// Days after the scheduled start a PENDING prediction is still reconciled
    #[arg(long, env = "LOOKBACK_DAYS", default_value = "7")]
    pub lookback_days: i64,

    /// Analysis provider as NAME=URL (repeatable)
    #[arg(
        long = "analysis-provider",
        env = "ANALYSIS_PROVIDERS",
        value_delimiter = ','
    )]
    pub analysis_providers: Vec<String>,

    /// Situational feed as KIND=URL, KIND one of injuries|weather|lineups|news
    #[arg(
        long = "situational-feed",
        env = "SITUATIONAL_FEEDS",
        value_delimiter = ','
    )]
    pub situational_feeds: Vec<String>,

    /// Scoreboard API used to resolve outcomes
    #[arg(long, env = "RESULT_FEED_URL", default_value = DEFAULT_ESPN_URL)]
    pub result_feed_url: String,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Serve the JSON API and reconcile outcomes on a timer
    Serve {
        #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
        listen_addr: String,

        #[arg(long, env = "RECONCILE_INTERVAL_SECS", default_value = "3600")]
        reconcile_interval_secs: u64,
    },
    /// Compute a recommendation for a game context read from a JSON file
    Recommend {
        #[arg(long)]
        context: PathBuf,

        /// Persist the result as a PENDING prediction
        #[arg(long)]
        track: bool,
    },
    /// Persist a previously computed recommendation (JSON file)
    Track {
        #[arg(long)]
        recommendation: PathBuf,
    },
    /// Resolve PENDING predictions against the result feed
    Reconcile {
        #[arg(long)]
        lookback_days: Option<i64>,
    },
    /// Calibration statistics, prediction counts and windowed performance
    Stats {
        /// Performance window in days
        #[arg(long, default_value = "30")]
        days: i64,
    },
    /// List tracked predictions
    List {
        /// PENDING, WIN, LOSS, PUSH or NO_RESULT
        #[arg(long)]
        status: Option<String>,

        #[arg(long, default_value = "50")]
        limit: i64,
    },
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.kelly_fraction) {
            anyhow::bail!("kelly_fraction must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.kelly_cap) || self.kelly_cap == 0.0 {
            anyhow::bail!("kelly_cap must be in (0.0, 1.0]");
        }
        if self.fetch_timeout_secs == 0 {
            anyhow::bail!("fetch_timeout_secs must be positive");
        }
        if self.calibration_ttl_secs == 0 {
            anyhow::bail!("calibration_ttl_secs must be positive");
        }
        if self.calibration_history_limit <= 0 {
            anyhow::bail!("calibration_history_limit must be positive");
        }
        if self.lookback_days < 0 {
            anyhow::bail!("lookback_days must not be negative");
        }
        Url::parse(&self.result_feed_url).context("result_feed_url is not a valid URL")?;
        self.providers()?;
        self.feeds()?;
        Ok(())
    }

    /// Configured analysis providers as (name, url).
    pub fn providers(&self) -> anyhow::Result<Vec<(String, String)>> {
        self.analysis_providers
            .iter()
            .map(|raw| parse_pair(raw, "analysis provider"))
            .collect()
    }

    /// Configured situational feeds as (kind, url).
    pub fn feeds(&self) -> anyhow::Result<Vec<(SignalKind, String)>> {
        self.situational_feeds
            .iter()
            .map(|raw| {
                let (kind, url) = parse_pair(raw, "situational feed")?;
                Ok((kind.parse::<SignalKind>()?, url))
            })
            .collect()
    }
}

fn parse_pair(raw: &str, what: &str) -> anyhow::Result<(String, String)> {
    let Some((name, url)) = raw.split_once('=') else {
        anyhow::bail!("{} '{}' must be NAME=URL", what, raw);
    };
    let name = name.trim();
    let url = url.trim();
    if name.is_empty() {
        anyhow::bail!("{} '{}' has an empty name", what, raw);
    }
    Url::parse(url).with_context(|| format!("{} '{}' has an invalid URL", what, name))?;
    Ok((name.to_string(), url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["matchup-consensus"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn parses_repeated_providers_and_feeds() {
        let cli = parse(&[
            "--analysis-provider",
            "alpha=http://localhost:9001/analyze",
            "--analysis-provider",
            "beta=http://localhost:9002/analyze",
            "--situational-feed",
            "injuries=http://localhost:9100/injuries",
            "stats",
        ]);
        cli.config.validate().unwrap();
        let providers = cli.config.providers().unwrap();
        assert_eq!(providers.len(), 2);
        assert_eq!(providers[1].0, "beta");
        let feeds = cli.config.feeds().unwrap();
        assert_eq!(feeds[0].0, SignalKind::Injuries);
        assert!(matches!(cli.command, Command::Stats { days: 30 }));
    }

    #[test]
    fn rejects_bad_values() {
        let cli = parse(&["--kelly-fraction", "1.5", "stats"]);
        assert!(cli.config.validate().is_err());

        let cli = parse(&["--analysis-provider", "no-url-here", "stats"]);
        assert!(cli.config.validate().is_err());

        let cli = parse(&["--situational-feed", "odds=http://localhost/odds", "stats"]);
        assert!(cli.config.validate().is_err());

        let cli = parse(&["--fetch-timeout-secs", "0", "stats"]);
        assert!(cli.config.validate().is_err());
    }

    #[test]
    fn parses_subcommands() {
        let cli = parse(&["recommend", "--context", "game.json", "--track"]);
        match cli.command {
            Command::Recommend { context, track } => {
                assert_eq!(context, PathBuf::from("game.json"));
                assert!(track);
            }
            other => panic!("unexpected {:?}", other),
        }

        let cli = parse(&["list", "--status", "win"]);
        match cli.command {
            Command::List { status, limit } => {
                assert_eq!(status.as_deref(), Some("win"));
                assert_eq!(limit, 50);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
