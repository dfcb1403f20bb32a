/// Configuration management
use crate::change_feed::DEFAULT_FEED_CAPACITY;
use crate::error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const DEFAULT_API_PORT: u16 = 5000;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Chat API port (HTTP + SSE)
    pub api_port: u16,

    /// Data directory for the sled stores
    pub data_dir: PathBuf,

    /// Broadcast capacity of the change feed
    pub feed_capacity: usize,

    /// Populate demo users and a listing, logging their bearer tokens
    pub seed_demo: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_port: DEFAULT_API_PORT,
            data_dir: PathBuf::from(".quadmart"),
            feed_capacity: DEFAULT_FEED_CAPACITY,
            seed_demo: false,
        }
    }
}

impl Config {
    /// Create config from command line arguments
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 2 {
            return Err(ChatError::Config(format!(
                "Usage: {} <port> [--data-dir <path>] [--feed-capacity <n>] [--seed-demo]",
                args.first().unwrap_or(&"quadmart".to_string())
            )));
        }

        let api_port = args[1]
            .parse::<u16>()
            .map_err(|_| ChatError::Config("Port must be a valid number (0-65535)".to_string()))?;

        let mut data_dir: Option<PathBuf> = None;
        let mut feed_capacity: Option<usize> = None;
        let mut seed_demo = false;

        let mut i = 2;
        while i < args.len() {
            match args[i].as_str() {
                "--data-dir" => {
                    let path = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--data-dir requires a path argument".to_string())
                    })?;
                    data_dir = Some(PathBuf::from(path));
                    i += 2;
                }
                "--feed-capacity" => {
                    let n = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--feed-capacity requires a number".to_string())
                    })?;
                    feed_capacity = Some(n.parse::<usize>().map_err(|_| {
                        ChatError::Config("--feed-capacity must be a positive number".to_string())
                    })?);
                    i += 2;
                }
                "--seed-demo" => {
                    seed_demo = true;
                    i += 1;
                }
                other => {
                    return Err(ChatError::Config(format!("Unknown argument: {}", other)));
                }
            }
        }

        // Env overrides (nice for scripts)
        if let Ok(dir) = std::env::var("QUADMART_DATA_DIR") {
            data_dir = Some(PathBuf::from(dir));
        }
        if let Some(n) = std::env::var("QUADMART_FEED_CAPACITY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            feed_capacity = Some(n);
        }

        Ok(Self {
            api_port,
            data_dir: data_dir.unwrap_or_else(|| PathBuf::from(".quadmart")),
            feed_capacity: feed_capacity.unwrap_or(DEFAULT_FEED_CAPACITY),
            seed_demo,
        })
    }
}
