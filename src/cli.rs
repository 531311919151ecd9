//! CLI argument definitions using clap derive macros.

use std::time::Duration;

use clap::Parser;

use export_tally_core::tally::{DEFAULT_CATEGORY_FIELD, DEFAULT_ENTITY_FIELD, FieldNames};
use export_tally_core::transport::{
    CONNECT_TIMEOUT_SECS, DISCOVERY_TIMEOUT_SECS, HttpTimeouts, READ_TIMEOUT_SECS,
};
use export_tally_core::{DEFAULT_CONCURRENCY, MAX_CONCURRENCY};

/// Export IDs the API serves.
pub const EXPORT_IDS: [&str; 3] = ["demo", "small", "large"];

/// Count events per patient and category across every download of an export.
///
/// Prints a JSON report with per-patient counts and category totals.
#[derive(Parser, Debug)]
#[command(name = "export-tally")]
#[command(author, version, about)]
pub struct Args {
    /// Export to tally
    #[arg(value_parser = EXPORT_IDS)]
    pub export_id: String,

    /// Base URL of the export API
    #[arg(long, env = "EXPORT_TALLY_BASE_URL", default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Downloads processed at once (1-16)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=MAX_CONCURRENCY as i64))]
    pub concurrency: u8,

    /// Connection timeout in seconds
    #[arg(long, default_value_t = CONNECT_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    pub connect_timeout: u64,

    /// Timeout for listing downloads, in seconds
    #[arg(long, default_value_t = DISCOVERY_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..))]
    pub discovery_timeout: u64,

    /// Idle timeout between stream reads in seconds (0 to disable)
    #[arg(long, default_value_t = READ_TIMEOUT_SECS)]
    pub read_timeout: u64,

    /// Column holding the entity (patient) identifier
    #[arg(long, default_value = DEFAULT_ENTITY_FIELD)]
    pub entity_field: String,

    /// Column holding the event category
    #[arg(long, default_value = DEFAULT_CATEGORY_FIELD)]
    pub category_field: String,

    /// Print the report on a single line
    #[arg(long)]
    pub compact: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// HTTP timeouts from the timeout flags.
    pub fn timeouts(&self) -> HttpTimeouts {
        HttpTimeouts {
            connect: Duration::from_secs(self.connect_timeout),
            discovery: Duration::from_secs(self.discovery_timeout),
            read: (self.read_timeout > 0).then(|| Duration::from_secs(self.read_timeout)),
        }
    }

    /// Column names to count by.
    pub fn field_names(&self) -> FieldNames {
        FieldNames::new(&self.entity_field, &self.category_field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["export-tally", "demo"]).unwrap();
        assert_eq!(args.export_id, "demo");
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(!args.compact);
        assert_eq!(args.concurrency, 1);
        assert_eq!(args.entity_field, "patient_id");
        assert_eq!(args.category_field, "event_type");
    }

    #[test]
    fn test_cli_default_timeouts_match_library_defaults() {
        let args = Args::try_parse_from(["export-tally", "demo"]).unwrap();
        assert_eq!(args.timeouts(), HttpTimeouts::default());
    }

    #[test]
    fn test_cli_missing_export_id_rejected() {
        let err = Args::try_parse_from(["export-tally"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_cli_unknown_export_id_rejected() {
        let err = Args::try_parse_from(["export-tally", "huge"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn test_cli_extra_positional_rejected() {
        let err = Args::try_parse_from(["export-tally", "demo", "small"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    #[test]
    fn test_cli_every_export_id_accepted() {
        for export_id in EXPORT_IDS {
            let args = Args::try_parse_from(["export-tally", export_id]).unwrap();
            assert_eq!(args.export_id, export_id);
        }
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["export-tally", "demo", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["export-tally", "demo", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["export-tally", "-q", "demo"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        // --help causes early exit, so we check it returns an error with Help kind
        let err = Args::try_parse_from(["export-tally", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["export-tally", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_concurrency_bounds() {
        let args = Args::try_parse_from(["export-tally", "demo", "-c", "16"]).unwrap();
        assert_eq!(args.concurrency, 16);

        for value in ["0", "17"] {
            let err = Args::try_parse_from(["export-tally", "demo", "-c", value]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_read_timeout_zero_disables() {
        let args = Args::try_parse_from(["export-tally", "demo", "--read-timeout", "0"]).unwrap();
        assert_eq!(args.timeouts().read, None);
    }

    #[test]
    fn test_cli_timeout_flags() {
        let args = Args::try_parse_from([
            "export-tally",
            "demo",
            "--connect-timeout",
            "3",
            "--discovery-timeout",
            "7",
            "--read-timeout",
            "60",
        ])
        .unwrap();
        let timeouts = args.timeouts();
        assert_eq!(timeouts.connect, Duration::from_secs(3));
        assert_eq!(timeouts.discovery, Duration::from_secs(7));
        assert_eq!(timeouts.read, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_cli_zero_connect_timeout_rejected() {
        let err = Args::try_parse_from(["export-tally", "demo", "--connect-timeout", "0"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_field_overrides() {
        let args = Args::try_parse_from([
            "export-tally",
            "small",
            "--entity-field",
            "device",
            "--category-field",
            "kind",
        ])
        .unwrap();
        assert_eq!(args.field_names(), FieldNames::new("device", "kind"));
    }

    #[test]
    fn test_cli_base_url_flag() {
        let args =
            Args::try_parse_from(["export-tally", "demo", "--base-url", "http://10.0.0.5:9000"])
                .unwrap();
        assert_eq!(args.base_url, "http://10.0.0.5:9000");
    }
}
