use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_SERVER_ADDRESS: &str = "localhost:8080";
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_COOKIE_NAME: &str = "url-shortener";
/// Upper bound for `TOKEN_EXP_HOURS`: one year.
pub const MAX_TOKEN_EXP_HOURS: u64 = 24 * 365;

/// Command-line flags, each with an environment-variable fallback.
#[derive(Debug, Clone, Parser)]
#[command(name = "shortener", about = "URL shortening service")]
pub struct Cli {
    /// HTTP server address
    #[arg(short = 'a', long, env = "SERVER_ADDRESS", default_value = DEFAULT_SERVER_ADDRESS)]
    pub server_address: String,

    /// Public base URL prepended to short IDs
    #[arg(short = 'b', long, env = "BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// File storage path; empty disables file storage
    #[arg(short = 'f', long, env = "FILE_STORAGE_PATH", default_value = "")]
    pub file_storage_path: String,

    /// Database DSN; empty disables the database
    #[arg(short = 'd', long, env = "DATABASE_DSN", default_value = "")]
    pub database_dsn: String,

    /// Key used to sign user tokens
    #[arg(long, env = "SECRET_KEY", default_value = "supersecret")]
    pub secret_key: String,

    /// Name of the cookie carrying the user token
    #[arg(long, env = "COOKIE_NAME", default_value = DEFAULT_COOKIE_NAME)]
    pub cookie_name: String,

    /// Lifetime of a user token, in hours
    #[arg(long, env = "TOKEN_EXP_HOURS", default_value_t = 3)]
    pub token_exp_hours: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Address to bind the HTTP server to, e.g. "localhost:8080"
    pub server_address: String,

    /// Public base URL used when generating short links, e.g. "https://go.example.com"
    /// Never has a trailing slash.
    pub base_url: String,

    /// JSON-lines storage file, if enabled
    pub file_storage_path: Option<PathBuf>,

    /// SQLite connection string, e.g. "sqlite:./data/urls.db", if enabled
    pub database_dsn: Option<String>,

    pub secret_key: String,

    pub cookie_name: String,

    pub token_exp_hours: u64,
}

impl AppConfig {
    /// Load configuration from the command line and the environment
    /// (populated by dotenvy before this is called).
    pub fn load() -> Result<Self> {
        let cli = Cli::try_parse().context("invalid command line")?;
        Self::from_cli(cli)
    }

    pub fn from_cli(cli: Cli) -> Result<Self> {
        if cli.secret_key.trim().is_empty() {
            anyhow::bail!("SECRET_KEY must not be empty");
        }
        if cli.cookie_name.trim().is_empty() {
            anyhow::bail!("COOKIE_NAME must not be empty");
        }

        if !(1..=MAX_TOKEN_EXP_HOURS).contains(&cli.token_exp_hours) {
            anyhow::bail!(
                "TOKEN_EXP_HOURS must be between 1 and {}, got {}",
                MAX_TOKEN_EXP_HOURS,
                cli.token_exp_hours
            );
        }

        let base_url = cli.base_url.trim().trim_end_matches('/').to_owned();
        if base_url.is_empty() {
            anyhow::bail!("BASE_URL must not be empty");
        }

        Ok(Self {
            server_address: cli.server_address,
            base_url,
            file_storage_path: non_empty(cli.file_storage_path).map(PathBuf::from),
            database_dsn: non_empty(cli.database_dsn),
            secret_key: cli.secret_key,
            cookie_name: cli.cookie_name,
            token_exp_hours: cli.token_exp_hours,
        })
    }

    /// Full short URL for `short_id`.
    pub fn short_url(&self, short_id: &str) -> String {
        format!("{}/{}", self.base_url, short_id)
    }

    /// Recover the short ID from a short URL built by [`AppConfig::short_url`].
    pub fn short_id<'a>(&self, short_url: &'a str) -> &'a str {
        short_url
            .strip_prefix(self.base_url.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(short_url)
    }
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<AppConfig> {
        let cli = Cli::try_parse_from(std::iter::once("shortener").chain(args.iter().copied()))?;
        AppConfig::from_cli(cli)
    }

    #[test]
    fn short_flags() {
        let config = parse(&[
            "-a",
            "0.0.0.0:9000",
            "-b",
            "https://go.example.com/",
            "-f",
            "./data/file-storage.txt",
            "-d",
            "sqlite:./data/urls.db",
        ])
        .unwrap();

        assert_eq!(config.server_address, "0.0.0.0:9000");
        assert_eq!(config.base_url, "https://go.example.com");
        assert_eq!(
            config.file_storage_path,
            Some(PathBuf::from("./data/file-storage.txt"))
        );
        assert_eq!(config.database_dsn.as_deref(), Some("sqlite:./data/urls.db"));
    }

    #[test]
    fn empty_paths_disable_backends() {
        let config = parse(&["-f", "", "-d", "  "]).unwrap();
        assert_eq!(config.file_storage_path, None);
        assert_eq!(config.database_dsn, None);
    }

    #[test]
    fn empty_secret_is_rejected() {
        assert!(parse(&["--secret-key", " "]).is_err());
    }

    #[test]
    fn token_lifetime_is_bounded() {
        assert!(parse(&["--token-exp-hours", "0"]).is_err());
        assert!(parse(&["--token-exp-hours", "18446744073709551615"]).is_err());
        assert_eq!(
            parse(&["--token-exp-hours", "8760"]).unwrap().token_exp_hours,
            MAX_TOKEN_EXP_HOURS
        );
    }

    #[test]
    fn short_url_helpers() {
        let config = parse(&["-b", "http://localhost:8080"]).unwrap();

        let url = config.short_url("F870F1E9");
        assert_eq!(url, "http://localhost:8080/F870F1E9");
        assert_eq!(config.short_id(&url), "F870F1E9");
        assert_eq!(config.short_id("F870F1E9"), "F870F1E9");
    }
}
