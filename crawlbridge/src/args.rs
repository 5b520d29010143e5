//! Command-line parameters.

use clap::Parser;
use std::path::PathBuf;

/// External file crawler agent: walks a file tree and synchronizes
/// metadata, access rights, and content with the indexing platform.
#[derive(Debug, Parser)]
#[command(name = "crawlbridge", version, about)]
pub struct Args {
    /// Platform endpoint, e.g. https://demo.example.com/api
    #[arg(long)]
    pub server: String,

    /// Organisation id
    #[arg(long)]
    pub org: String,

    /// Knowledge-base id
    #[arg(long)]
    pub kb: String,

    /// Security id
    #[arg(long)]
    pub sid: String,

    /// System key (UUID) for message encryption and credential unwrap
    #[arg(long)]
    pub aes: Option<String>,

    /// Numeric source id (1..=65535)
    #[arg(long)]
    pub source: i32,

    /// Source type; must match the platform's source definition
    #[arg(long, default_value = "file")]
    pub crawler: String,

    /// Encrypt request and response bodies
    #[arg(long)]
    pub encryption: bool,

    /// Exit after one completed run instead of waiting for the schedule
    #[arg(long)]
    pub exit_when_done: bool,

    /// Disable the on-disk change cache (every run re-sends everything)
    #[arg(long)]
    pub disable_cache: bool,

    /// Walk root; overrides the source's sharePath setting
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Location of the change-cache database
    #[arg(long, default_value = "crawler_cache.db")]
    pub cache_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_invocation_parses() {
        let args = Args::parse_from([
            "crawlbridge",
            "--server",
            "https://demo.example.com/api",
            "--org",
            "org-1",
            "--kb",
            "kb-1",
            "--sid",
            "sid-1",
            "--source",
            "7",
        ]);
        assert_eq!(args.source, 7);
        assert_eq!(args.crawler, "file");
        assert!(!args.encryption);
        assert!(!args.disable_cache);
        assert_eq!(args.cache_path, PathBuf::from("crawler_cache.db"));
    }

    #[test]
    fn flags_and_overrides_parse() {
        let args = Args::parse_from([
            "crawlbridge",
            "--server",
            "https://demo.example.com/api",
            "--org",
            "o",
            "--kb",
            "k",
            "--sid",
            "s",
            "--source",
            "12",
            "--aes",
            "345251e3-c7ef-4d71-8afd-84b89345f148",
            "--encryption",
            "--exit-when-done",
            "--root",
            "/srv/share",
        ]);
        assert!(args.encryption);
        assert!(args.exit_when_done);
        assert_eq!(args.root, Some(PathBuf::from("/srv/share")));
    }
}
