//! Config command implementation.

use anyhow::{Context, Result};

use chunkup_core::config::{parse_duration, Config};

use super::{ConfigAction, ConfigArgs};

/// Keys accepted by `config get` and `config set`.
const KEYS: &[&str] = &[
    "server.port",
    "server.localhost_only",
    "server.max_chunk_size",
    "storage.root",
    "storage.session_max_age",
    "client.server_url",
    "client.chunk_size",
    "client.send_checksum",
    "client.request_timeout",
];

/// Run the config command.
pub async fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Get { key } => {
            let config = super::load_config();
            match get_config_value(&config, &key) {
                Some(v) => println!("{}: {}", key, v),
                None => print_unknown_key(&key),
            }
        }

        ConfigAction::Set { key, value } => {
            let mut config = Config::load().context("Failed to load configuration")?;
            if set_config_value(&mut config, &key, &value)? {
                config
                    .validate()
                    .with_context(|| format!("Refusing to set {}", key))?;
                config.save().context("Failed to save configuration")?;
                println!("Set {} = {}", key, value);
            } else {
                print_unknown_key(&key);
            }
        }

        ConfigAction::Show => {
            let config = super::load_config();
            println!();
            println!("Chunkup Configuration");
            println!("{}", "─".repeat(50));
            println!("  file: {}", Config::config_path().display());
            println!();
            let mut section = "";
            for &key in KEYS {
                let (prefix, name) = key.split_once('.').unwrap_or(("", key));
                if prefix != section {
                    if !section.is_empty() {
                        println!();
                    }
                    println!("[{}]", prefix);
                    section = prefix;
                }
                if let Some(value) = get_config_value(&config, key) {
                    println!("  {} = {}", name, value);
                }
            }
            println!();
        }

        ConfigAction::Reset => {
            Config::default()
                .save()
                .context("Failed to save configuration")?;
            println!("Configuration reset to defaults.");
        }
    }

    Ok(())
}

fn print_unknown_key(key: &str) {
    println!("Unknown configuration key: {}", key);
    println!("Known keys: {}", KEYS.join(", "));
}

fn get_config_value(config: &Config, key: &str) -> Option<String> {
    match key {
        "server.port" => Some(config.server.port.to_string()),
        "server.localhost_only" => Some(config.server.localhost_only.to_string()),
        "server.max_chunk_size" => Some(config.server.max_chunk_size.to_string()),
        "storage.root" => Some(config.storage.root.display().to_string()),
        "storage.session_max_age" => {
            Some(format!("{}s", config.storage.session_max_age.as_secs()))
        }
        "client.server_url" => Some(config.client.server_url.clone()),
        "client.chunk_size" => Some(config.client.chunk_size.to_string()),
        "client.send_checksum" => Some(config.client.send_checksum.to_string()),
        "client.request_timeout" => {
            Some(format!("{}s", config.client.request_timeout.as_secs()))
        }
        _ => None,
    }
}

fn set_config_value(config: &mut Config, key: &str, value: &str) -> Result<bool> {
    match key {
        "server.port" => config.server.port = value.parse()?,
        "server.localhost_only" => config.server.localhost_only = value.parse()?,
        "server.max_chunk_size" => config.server.max_chunk_size = value.parse()?,
        "storage.root" => config.storage.root = value.into(),
        "storage.session_max_age" => config.storage.session_max_age = parse_duration(value)?,
        "client.server_url" => config.client.server_url = value.to_string(),
        "client.chunk_size" => config.client.chunk_size = value.parse()?,
        "client.send_checksum" => config.client.send_checksum = value.parse()?,
        "client.request_timeout" => config.client.request_timeout = parse_duration(value)?,
        _ => return Ok(false),
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_every_key_readable() {
        let config = Config::default();
        for key in KEYS {
            assert!(get_config_value(&config, key).is_some(), "{key}");
        }
        assert!(get_config_value(&config, "nope").is_none());
    }

    #[test]
    fn test_set_values() {
        let mut config = Config::default();

        assert!(set_config_value(&mut config, "server.port", "9001").unwrap());
        assert!(set_config_value(&mut config, "client.request_timeout", "2m").unwrap());
        assert!(set_config_value(&mut config, "client.send_checksum", "false").unwrap());
        assert!(!set_config_value(&mut config, "bogus", "1").unwrap());

        assert_eq!(config.server.port, 9001);
        assert_eq!(config.client.request_timeout, Duration::from_secs(120));
        assert!(!config.client.send_checksum);
    }

    #[test]
    fn test_set_rejects_bad_values() {
        let mut config = Config::default();
        assert!(set_config_value(&mut config, "server.port", "not-a-port").is_err());
        assert!(set_config_value(&mut config, "storage.session_max_age", "soon").is_err());
    }
}
