use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "project-transfer")]
#[command(about = "Transfer pending service requests into the LIMS")]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "transfer-config.toml")]
    pub config: String,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit JSON logs (for scheduled runs)
    #[arg(long)]
    pub json_logs: bool,

    /// Validate pending requests without touching the LIMS or the ledger
    #[arg(long)]
    pub dry_run: bool,

    /// Override runtime.concurrency from the config file
    #[arg(long)]
    pub concurrency: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = CliArgs::parse_from([
            "project-transfer",
            "--config",
            "prod.toml",
            "--dry-run",
            "--concurrency",
            "8",
        ]);
        assert_eq!(args.config, "prod.toml");
        assert!(args.dry_run);
        assert!(!args.verbose);
        assert_eq!(args.concurrency, Some(8));
    }
}
