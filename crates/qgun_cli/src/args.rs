use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use qgun_core::OutputFormat;

/// qgun: run one SQL query against many databases and merge the rows
#[derive(Debug, Parser)]
#[command(
    name = "qgun",
    about = "Run one SQL query against many PostgreSQL databases and merge the results",
    version
)]
pub struct Args {
    /// Comma-separated list of connection strings
    #[arg(short = 'c', long = "conn", env = "DB_CONN_STRINGS", value_name = "CONN_STRINGS")]
    pub conn_strings: Option<String>,

    /// Read the query from a file
    #[arg(short = 'f', long = "file", env = "SQL_FILE")]
    pub file: Option<String>,

    /// Query text (takes precedence over -f)
    #[arg(short = 'q', long = "query", env = "SQL_QUERY")]
    pub query: Option<String>,

    /// Per-source deadline for running the query and fetching rows (e.g. 5s, 1m30s, 250ms)
    #[arg(short = 't', long = "timeout", env = "QUERY_TIMEOUT", default_value = "5s")]
    pub timeout: String,

    /// Per-source row limit; 0 means unbounded
    #[arg(short = 'l', long = "limit", env = "MAX_ROWS", default_value_t = 200)]
    pub max_rows: usize,

    /// Output format: table or csv
    #[arg(short = 'o', long = "output", env = "OUTPUT_FORMAT", default_value = "table")]
    pub output: OutputFormat,

    /// Query all sources concurrently instead of one after another
    #[arg(
        short = 'p',
        long = "parallel",
        env = "PARALLEL_MODE",
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub parallel: bool,

    /// Debug logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// Positional query parameters ($1, $2, ...)
    #[arg(value_name = "ARGS")]
    pub params: Vec<String>,
}

impl Args {
    /// Parse the process arguments. On a usage error, print it and exit with
    /// status 1; `--help` and `--version` exit 0.
    pub fn parse_or_exit() -> Self {
        match Self::try_parse() {
            Ok(args) => args,
            Err(e) => {
                let _ = e.print();
                std::process::exit(exit_code(&e));
            }
        }
    }

    /// Log filter for the tracing subscriber when RUST_LOG is unset.
    pub fn default_log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

/// Exit status for a clap error: 0 for help/version output, 1 otherwise.
pub fn exit_code(err: &clap::Error) -> i32 {
    if err.use_stderr() {
        1
    } else {
        0
    }
}
