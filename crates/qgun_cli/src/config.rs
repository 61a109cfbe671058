//! Turns parsed arguments into a validated run plan.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use qgun_core::{DataSource, OutputFormat, Query, RowLimit, RunOptions, Schedule};
use tracing::warn;

use crate::args::Args;
use crate::duration::parse_duration;

/// Everything `main` needs to start a run.
#[derive(Debug)]
pub struct RunPlan {
    pub sources: Vec<DataSource>,
    pub query: Query,
    pub options: RunOptions,
    pub format: OutputFormat,
}

pub struct Config;

impl Config {
    /// Validate `args` before any source is contacted.
    pub fn from_args(args: &Args) -> Result<RunPlan> {
        let sources = DataSource::from_descriptors(split_conn_strings(
            args.conn_strings.as_deref().unwrap_or(""),
        ));
        if sources.is_empty() {
            bail!("no connection strings given (use -c or DB_CONN_STRINGS)");
        }

        let text = load_query(args.query.as_deref(), args.file.as_deref())?;
        let timeout: Duration = parse_duration(&args.timeout)
            .with_context(|| format!("Bad query timeout: {}", args.timeout))?;

        Ok(RunPlan {
            sources,
            query: Query::new(text, args.params.clone()),
            options: RunOptions {
                limit: RowLimit(args.max_rows),
                timeout,
                schedule: Schedule::from_parallel(args.parallel),
            },
            format: args.output,
        })
    }
}

/// Split on `,`, trim, and drop empty entries.
pub fn split_conn_strings(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn load_query(query: Option<&str>, file: Option<&str>) -> Result<String> {
    let text = match (query, file) {
        (Some(q), Some(path)) => {
            warn!("Both -q and -f given; using -q and ignoring {}", path);
            q.to_string()
        }
        (Some(q), None) => q.to_string(),
        (None, Some(path)) => {
            std::fs::read_to_string(path).with_context(|| format!("Cannot read file: {}", path))?
        }
        (None, None) => bail!("no query given (use -q or -f)"),
    };
    if text.trim().is_empty() {
        bail!("query is empty");
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use qgun_core::SourceId;

    fn parse(argv: &[&str]) -> Args {
        let mut full = vec!["qgun"];
        full.extend_from_slice(argv);
        Args::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_split_conn_strings() {
        assert_eq!(
            split_conn_strings(" a , ,b,, c "),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(split_conn_strings(" , ").is_empty());
    }

    #[test]
    fn test_plan_from_flags() {
        let plan = Config::from_args(&parse(&[
            "-c", "host=a,,host=b", "-q", "SELECT $1", "-t", "1m", "-l", "10", "-p", "-o", "csv",
            "v1",
        ]))
        .unwrap();
        assert_eq!(plan.sources.len(), 2);
        assert_eq!(plan.sources[1].id, SourceId(1));
        assert_eq!(plan.sources[1].descriptor, "host=b");
        assert_eq!(plan.query.text(), "SELECT $1");
        assert_eq!(plan.query.args(), ["v1".to_string()]);
        assert_eq!(plan.options.timeout, Duration::from_secs(60));
        assert_eq!(plan.options.limit, RowLimit(10));
        assert_eq!(plan.options.schedule, Schedule::Concurrent);
        assert_eq!(plan.format, OutputFormat::Csv);
    }

    #[test]
    fn test_missing_connection_strings() {
        let err = Config::from_args(&parse(&["-c", " , ", "-q", "SELECT 1"])).unwrap_err();
        assert!(err.to_string().contains("connection strings"));
    }

    #[test]
    fn test_missing_query() {
        assert!(Config::from_args(&parse(&["-c", "a"])).is_err());
        assert!(Config::from_args(&parse(&["-c", "a", "-q", "  "])).is_err());
    }

    #[test]
    fn test_query_wins_over_file() {
        let plan = Config::from_args(&parse(&[
            "-c", "a", "-q", "SELECT 1", "-f", "/nonexistent/query.sql",
        ]))
        .unwrap();
        assert_eq!(plan.query.text(), "SELECT 1");
    }

    #[test]
    fn test_query_from_file() {
        let path = std::env::temp_dir().join(format!("qgun-config-{}.sql", std::process::id()));
        std::fs::write(&path, "SELECT now()\n").unwrap();
        let plan =
            Config::from_args(&parse(&["-c", "a", "-f", path.to_str().unwrap()])).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(plan.query.text(), "SELECT now()\n");
    }

    #[test]
    fn test_unreadable_file_and_bad_timeout() {
        assert!(Config::from_args(&parse(&["-c", "a", "-f", "/nonexistent/query.sql"])).is_err());
        assert!(Config::from_args(&parse(&["-c", "a", "-q", "SELECT 1", "-t", "soon"])).is_err());
    }
}
