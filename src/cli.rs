use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use mrn_extract::config::{DEFAULT_CZK_PER_USD, DEFAULT_MODEL, DEFAULT_TIMEOUT_SECONDS};
use mrn_extract::document::TextBackend;
use mrn_extract::event_log::DEFAULT_LOG_FILE;

#[derive(Parser, Debug)]
#[command(
    name = "mrn-extract",
    version,
    about = "Extract shipment records and MRN pages from customs PDFs"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full pipeline over one PDF or every PDF in a directory.
    Extract(ExtractArgs),
    /// Print heuristic page types without calling the model.
    Classify(ClassifyArgs),
    /// Print recent entries of the extraction log.
    History(HistoryArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    #[arg(long, conflicts_with = "input", required_unless_present = "input")]
    pub input_dir: Option<PathBuf>,

    #[arg(long)]
    pub input: Option<PathBuf>,

    #[arg(long, default_value = "output")]
    pub output_dir: PathBuf,

    #[arg(long, env = "AI_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[arg(long, env = "GEMINI_API_BASE")]
    pub api_base: Option<String>,

    #[arg(long)]
    pub prompt_file: Option<PathBuf>,

    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECONDS)]
    pub timeout_seconds: u64,

    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,

    #[arg(long, default_value_t = false)]
    pub no_log_file: bool,

    #[arg(long, value_enum, default_value_t = TextBackend::Auto)]
    pub text_backend: TextBackend,

    #[arg(long, default_value_t = false)]
    pub no_heuristic_fallback: bool,

    #[arg(long, default_value_t = DEFAULT_CZK_PER_USD)]
    pub czk_per_usd: f64,

    #[arg(long)]
    pub summary_json: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ClassifyArgs {
    #[arg(long)]
    pub input: PathBuf,

    #[arg(long, value_enum, default_value_t = TextBackend::Auto)]
    pub text_backend: TextBackend,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,

    #[arg(long)]
    pub limit: Option<usize>,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_requires_exactly_one_input_source() {
        assert!(Cli::try_parse_from(["mrn-extract", "extract"]).is_err());
        assert!(
            Cli::try_parse_from([
                "mrn-extract",
                "extract",
                "--input",
                "a.pdf",
                "--input-dir",
                "pdfs"
            ])
            .is_err()
        );

        let cli = Cli::try_parse_from(["mrn-extract", "extract", "--input-dir", "pdfs"])
            .expect("directory input parses");
        let Commands::Extract(args) = cli.command else {
            panic!("expected extract command");
        };
        assert_eq!(args.input_dir, Some(PathBuf::from("pdfs")));
        assert_eq!(args.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(args.text_backend, TextBackend::Auto);
    }

    #[test]
    fn history_defaults_to_standard_log_file() {
        let cli = Cli::try_parse_from(["mrn-extract", "history", "--limit", "5"])
            .expect("history parses");
        let Commands::History(args) = cli.command else {
            panic!("expected history command");
        };
        assert_eq!(args.log_file, PathBuf::from(DEFAULT_LOG_FILE));
        assert_eq!(args.limit, Some(5));
    }
}
