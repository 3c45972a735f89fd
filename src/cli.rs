//! Command-line interface for liewave
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Truthful/deceptive speech classification for stored recordings
#[derive(Parser, Debug)]
#[command(
    name = "liewave",
    version,
    about = "Truthful/deceptive speech classification for stored recordings"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse a decoder timeout.
///
/// Accepts bare seconds (`45`) and anything `humantime` understands (`30s`, `2m`, `1m30s`).
fn parse_timeout(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let duration = match s.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(s).map_err(|e| e.to_string())?,
    };
    if duration.as_millis() == 0 {
        return Err("timeout must be at least one millisecond".to_string());
    }
    Ok(duration)
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load the model and serve predictions on a Unix socket (foreground)
    Serve {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/liewave.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,

        /// Decoder timeout override. Examples: 30s, 2m
        #[arg(long, value_name = "DURATION", value_parser = parse_timeout)]
        decode_timeout: Option<Duration>,
    },

    /// Ask a running daemon to classify a stored recording
    Predict {
        /// Object path of the recording (e.g., users/42/clip1.aac)
        path: String,

        /// User the prediction is recorded for
        #[arg(long, short = 'u', value_name = "ID")]
        user: String,

        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/liewave.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Classify a recording in-process without a daemon
    Run {
        /// Object path of the recording
        path: String,

        /// User the prediction is recorded for
        #[arg(long, short = 'u', value_name = "ID")]
        user: String,

        /// Read recordings from this directory instead of the configured backend
        #[arg(long, value_name = "DIR")]
        local_root: Option<PathBuf>,

        /// Decoder timeout override. Examples: 30s, 2m
        #[arg(long, value_name = "DURATION", value_parser = parse_timeout)]
        decode_timeout: Option<Duration>,
    },

    /// Get daemon status via IPC
    Status {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/liewave.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Stop a running daemon via IPC
    Shutdown {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/liewave.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Check the decoder, the model artifact and the configuration
    Check,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigAction {
    /// Print the effective configuration (file, defaults and environment)
    Show,
    /// Print the configuration file path in use
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_serve_defaults() {
        let cli = Cli::try_parse_from(["liewave", "serve"]).unwrap();
        match cli.command {
            Commands::Serve {
                socket,
                decode_timeout,
            } => {
                assert!(socket.is_none());
                assert!(decode_timeout.is_none());
            }
            other => panic!("Expected Serve, got {:?}", other),
        }
        assert_eq!(cli.verbose, 0);
        assert!(!cli.quiet);
    }

    #[test]
    fn test_parse_serve_with_socket_and_timeout() {
        let cli = Cli::try_parse_from([
            "liewave",
            "serve",
            "--socket",
            "/tmp/lw.sock",
            "--decode-timeout",
            "1m30s",
        ])
        .unwrap();
        match cli.command {
            Commands::Serve {
                socket,
                decode_timeout,
            } => {
                assert_eq!(socket, Some(PathBuf::from("/tmp/lw.sock")));
                assert_eq!(decode_timeout, Some(Duration::from_secs(90)));
            }
            other => panic!("Expected Serve, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_predict() {
        let cli =
            Cli::try_parse_from(["liewave", "predict", "users/42/clip1.aac", "--user", "42"])
                .unwrap();
        match cli.command {
            Commands::Predict { path, user, socket } => {
                assert_eq!(path, "users/42/clip1.aac");
                assert_eq!(user, "42");
                assert!(socket.is_none());
            }
            other => panic!("Expected Predict, got {:?}", other),
        }
    }

    #[test]
    fn test_predict_requires_user() {
        assert!(Cli::try_parse_from(["liewave", "predict", "a.aac"]).is_err());
    }

    #[test]
    fn test_parse_run_with_local_root() {
        let cli = Cli::try_parse_from([
            "liewave",
            "run",
            "clip.aac",
            "-u",
            "7",
            "--local-root",
            "/data/audio",
            "--decode-timeout",
            "45",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                path,
                user,
                local_root,
                decode_timeout,
            } => {
                assert_eq!(path, "clip.aac");
                assert_eq!(user, "7");
                assert_eq!(local_root, Some(PathBuf::from("/data/audio")));
                assert_eq!(decode_timeout, Some(Duration::from_secs(45)));
            }
            other => panic!("Expected Run, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_timeout_rejected() {
        assert!(parse_timeout("0").is_err());
        assert!(parse_timeout("0s").is_err());
        assert!(parse_timeout("soon").is_err());
        assert_eq!(parse_timeout(" 2m ").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_timeout("1500ms").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "liewave", "status", "-vv", "--config", "/etc/liewave.toml",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Status { .. }));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("/etc/liewave.toml")));
    }

    #[test]
    fn test_parse_config_actions() {
        let cli = Cli::try_parse_from(["liewave", "config", "show"]).unwrap();
        match cli.command {
            Commands::Config { action } => assert_eq!(action, ConfigAction::Show),
            other => panic!("Expected Config, got {:?}", other),
        }
        let cli = Cli::try_parse_from(["liewave", "config", "path"]).unwrap();
        match cli.command {
            Commands::Config { action } => assert_eq!(action, ConfigAction::Path),
            other => panic!("Expected Config, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_completions() {
        let cli = Cli::try_parse_from(["liewave", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Bash }
        ));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["liewave"]).is_err());
    }
}
