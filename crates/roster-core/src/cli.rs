use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        let key = k.trim();
        if key.is_empty() {
            return Err(anyhow!("empty key in: {s}"));
        }
        Ok(Self {
            key: key.to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "roster",
    version,
    about = "Roster: filtered, paginated admin lists with optimistic status toggles",
    disable_help_subcommand = true
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count, global = true)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append,
        global = true
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "config", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List the configured resources.
    Resources,

    /// Fetch one page of a resource.
    List {
        resource: String,

        #[arg(long, default_value_t = 1)]
        page: u32,

        /// FIELD=VALUE; date fields take `start..end`.
        #[arg(
            long = "filter",
            value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
            action = ArgAction::Append
        )]
        filters: Vec<KeyVal>,
    },

    /// Toggle the status of one row on a page.
    Toggle {
        resource: String,

        id: String,

        #[arg(long, default_value_t = 1)]
        page: u32,

        #[arg(
            long = "filter",
            value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
            action = ArgAction::Append
        )]
        filters: Vec<KeyVal>,
    },
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pulls positional `rc.KEY=VALUE` (or `rc.KEY:VALUE`) overrides out of the
/// argument list before clap sees it.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = rest.split_once('=').or_else(|| rest.split_once(':'));
            if let Some((k, v)) = parsed {
                if k.is_empty() {
                    return Err(anyhow!("empty key in rc override: {s}"));
                }
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((format!("rc.{k}"), v.to_string()));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use clap::Parser;

    use super::{Command, GlobalCli, KeyVal, preprocess_args};

    fn args(raw: &[&str]) -> Vec<OsString> {
        raw.iter().map(OsString::from).collect()
    }

    #[test]
    fn positional_rc_overrides_are_split_out() {
        let pre = preprocess_args(&args(&[
            "roster",
            "rc.calendar=jalali",
            "list",
            "rc.timezone:Asia/Tehran",
            "blog",
        ]))
        .expect("preprocess");

        assert_eq!(pre.cleaned_args, args(&["roster", "list", "blog"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.calendar".to_string(), "jalali".to_string()),
                ("rc.timezone".to_string(), "Asia/Tehran".to_string()),
            ]
        );
    }

    #[test]
    fn list_command_collects_filters() {
        let cli = GlobalCli::parse_from(args(&[
            "roster",
            "-vv",
            "list",
            "blog",
            "--page",
            "3",
            "--filter",
            "status=active",
            "--filter",
            "created=2024-01-01..2024-01-31",
        ]));

        assert_eq!(cli.verbose, 2);
        let Command::List {
            resource,
            page,
            filters,
        } = cli.command
        else {
            panic!("expected list command");
        };
        assert_eq!(resource, "blog");
        assert_eq!(page, 3);
        assert_eq!(
            filters[1],
            KeyVal {
                key: "created".to_string(),
                value: "2024-01-01..2024-01-31".to_string()
            }
        );
    }

    #[test]
    fn key_val_requires_equals() {
        assert!("status".parse::<KeyVal>().is_err());
        assert!("=active".parse::<KeyVal>().is_err());
    }
}
