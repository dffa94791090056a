//! CLI argument definitions using clap derive macros.
//!
//! Options that can also come from the config file are `Option`s here so
//! that an explicit command-line value can be told apart from "not given".

use std::path::PathBuf;

use clap::Parser;

/// Segmented HTTP range downloader.
///
/// Downloads each URL with several concurrent range requests into a staging
/// directory, then moves finished files to the output directory once the
/// downstream cache has room.
#[derive(Parser, Debug)]
#[command(name = "segfetch")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to download (read from stdin, one per line, when omitted)
    pub urls: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Config file (default: $XDG_CONFIG_HOME/segfetch/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory files are written to while downloading [default: .]
    #[arg(long, value_name = "DIR")]
    pub staging_dir: Option<PathBuf>,

    /// Directory finished files are moved to [default: keep in staging dir]
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrent downloads (1-100) [default: 4]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Concurrent range requests per file (1-64, 1 disables segmenting) [default: 4]
    #[arg(short = 't', long, value_parser = clap::value_parser!(u8).range(1..=64))]
    pub threads: Option<u8>,

    /// Per-stream rate limit in bytes per second (0 disables) [default: 52428800]
    #[arg(short = 'l', long, value_name = "BYTES_PER_SEC")]
    pub rate_limit: Option<u64>,

    /// Retry rounds for failed downloads (0-10) [default: 3]
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Relocate without checking the downstream cache
    #[arg(long)]
    pub no_backpressure: bool,

    /// Cache statistics endpoint [default: http://127.0.0.1:5572/vfs/stats]
    #[arg(long, value_name = "URL")]
    pub cache_endpoint: Option<String>,

    /// Cache usage in GiB above which relocation pauses [default: 18]
    #[arg(long, value_name = "GIB")]
    pub pause_threshold_gib: Option<u64>,

    /// Cache usage in GiB below which paused relocation resumes [default: 15]
    #[arg(long, value_name = "GIB")]
    pub resume_threshold_gib: Option<u64>,

    /// Seconds between cache samples while paused (1-3600) [default: 10]
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub poll_interval_secs: Option<u64>,

    /// Connect timeout in seconds (1-3600) [default: 30]
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout_secs: Option<u64>,

    /// Abort a single download after this many seconds [default: no limit]
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub task_timeout_secs: Option<u64>,

    /// Extra request header sent with every request ("Name: value")
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["segfetch"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(args.urls.is_empty());
        assert!(args.concurrency.is_none());
        assert!(args.threads.is_none());
        assert!(!args.no_backpressure);
    }

    #[test]
    fn test_cli_positional_urls() {
        let args =
            Args::try_parse_from(["segfetch", "https://a.example/x", "https://b.example/y"])
                .unwrap();
        assert_eq!(args.urls.len(), 2);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["segfetch", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["segfetch", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["segfetch", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["segfetch", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_cli_concurrency_bounds() {
        assert_eq!(
            Args::try_parse_from(["segfetch", "-c", "1"]).unwrap().concurrency,
            Some(1)
        );
        assert_eq!(
            Args::try_parse_from(["segfetch", "--concurrency", "100"])
                .unwrap()
                .concurrency,
            Some(100)
        );
        for bad in ["0", "101"] {
            let err = Args::try_parse_from(["segfetch", "-c", bad]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_threads_bounds() {
        assert_eq!(
            Args::try_parse_from(["segfetch", "-t", "64"]).unwrap().threads,
            Some(64)
        );
        let err = Args::try_parse_from(["segfetch", "-t", "65"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        let err = Args::try_parse_from(["segfetch", "-t", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_max_retries_bounds() {
        assert_eq!(
            Args::try_parse_from(["segfetch", "-r", "0"]).unwrap().max_retries,
            Some(0)
        );
        let err = Args::try_parse_from(["segfetch", "-r", "11"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_rate_limit_zero_disables() {
        let args = Args::try_parse_from(["segfetch", "-l", "0"]).unwrap();
        assert_eq!(args.rate_limit, Some(0));
    }

    #[test]
    fn test_cli_backpressure_options() {
        let args = Args::try_parse_from([
            "segfetch",
            "--cache-endpoint",
            "http://127.0.0.1:9999/vfs/stats",
            "--pause-threshold-gib",
            "40",
            "--resume-threshold-gib",
            "30",
            "--poll-interval-secs",
            "5",
        ])
        .unwrap();
        assert_eq!(
            args.cache_endpoint.as_deref(),
            Some("http://127.0.0.1:9999/vfs/stats")
        );
        assert_eq!(args.pause_threshold_gib, Some(40));
        assert_eq!(args.resume_threshold_gib, Some(30));
        assert_eq!(args.poll_interval_secs, Some(5));
    }

    #[test]
    fn test_cli_repeated_headers() {
        let args = Args::try_parse_from([
            "segfetch",
            "-H",
            "Authorization: Bearer t",
            "--header",
            "X-Trace: 1",
        ])
        .unwrap();
        assert_eq!(args.headers, vec!["Authorization: Bearer t", "X-Trace: 1"]);
    }

    #[test]
    fn test_cli_directories() {
        let args = Args::try_parse_from([
            "segfetch",
            "--staging-dir",
            "/tmp/stage",
            "-o",
            "/mnt/remote",
        ])
        .unwrap();
        assert_eq!(args.staging_dir, Some(PathBuf::from("/tmp/stage")));
        assert_eq!(args.output_dir, Some(PathBuf::from("/mnt/remote")));
    }
}
