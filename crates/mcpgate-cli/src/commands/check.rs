//! Offline validation of settings and the servers file.

use serde::Serialize;

use mcpgate_core::Config;
use mcpgate_mcp::{detect_mode, ConfigLoader, ConfigurationModel};

use crate::commands::print_json;
use crate::OutputOptions;

#[derive(Debug, Serialize)]
struct CheckReport {
    settings_warnings: Vec<String>,
    servers_file: String,
    servers_file_found: bool,
    mode: String,
    servers: Vec<ServerLine>,
}

#[derive(Debug, Serialize)]
struct ServerLine {
    name: String,
    transport: String,
    target: String,
    priority: u32,
    critical: bool,
    enabled: bool,
    domains: Vec<String>,
}

fn server_lines(model: &ConfigurationModel) -> Vec<ServerLine> {
    let mut servers: Vec<ServerLine> = model
        .servers
        .iter()
        .map(|server| ServerLine {
            name: server.name.clone(),
            transport: server.transport.to_string(),
            target: server
                .url
                .clone()
                .or_else(|| server.command.clone())
                .unwrap_or_default(),
            priority: server.priority,
            critical: server.critical,
            enabled: server.enabled,
            domains: server.domains.iter().cloned().collect(),
        })
        .collect();
    servers.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
    servers
}

pub fn run(config: &Config, output: OutputOptions) -> anyhow::Result<()> {
    let path = &config.adapter.servers_config;
    let found = path.exists();
    let mode = detect_mode(config.adapter.mode, path);

    let servers = if found {
        let model = ConfigLoader::new(config.adapter.strict_env)
            .load(path)
            .map_err(mcpgate_core::Error::from)?;
        server_lines(&model)
    } else {
        Vec::new()
    };

    let report = CheckReport {
        settings_warnings: config
            .validate()
            .warnings()
            .iter()
            .map(ToString::to_string)
            .collect(),
        servers_file: path.display().to_string(),
        servers_file_found: found,
        mode: mode.to_string(),
        servers,
    };

    if output.json {
        return print_json(&report);
    }

    println!("Settings: ✓ valid");
    for warning in &report.settings_warnings {
        println!("  ! {}", warning);
    }

    if report.servers_file_found {
        println!("\nServers file: {} ✓", report.servers_file);
    } else {
        println!("\nServers file: {} (not found)", report.servers_file);
    }
    println!("Mode: {}", report.mode);

    if report.servers.is_empty() {
        println!(
            "\nSingle server: {} ({})",
            config.single_server.name, config.single_server.transport
        );
    } else {
        println!("\nServers ({}):", report.servers.len());
        for server in &report.servers {
            let mut flags = Vec::new();
            if server.critical {
                flags.push("critical".to_string());
            }
            if !server.enabled {
                flags.push("disabled".to_string());
            }
            if !server.domains.is_empty() {
                flags.push(format!("domains: {}", server.domains.join(", ")));
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join("; "))
            };
            println!(
                "  {:>3}  {} ({}) {}{}",
                server.priority, server.name, server.transport, server.target, flags
            );
        }
    }

    if let Ok(settings) = config.to_toml() {
        println!("\nEffective settings:\n{}", settings);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcpgate_mcp::ServerConfig;

    #[test]
    fn test_server_lines_sorted_by_priority() {
        let model = ConfigurationModel::with_servers(vec![
            ServerConfig::stdio("zeta", "mcp-zeta").with_priority(5),
            ServerConfig::sse("alpha", "http://localhost:8000/sse")
                .with_priority(20)
                .with_critical(true),
            ServerConfig::stdio("beta", "mcp-beta").with_priority(5),
        ]);

        let lines = server_lines(&model);
        let names: Vec<&str> = lines.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["beta", "zeta", "alpha"]);
        assert_eq!(lines[2].target, "http://localhost:8000/sse");
        assert!(lines[2].critical);
    }

    #[test]
    fn test_invalid_servers_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp-servers.json");
        std::fs::write(&path, r#"{"servers": [{"name": "db", "transport": "carrier-pigeon"}]}"#)
            .unwrap();

        let mut config = Config::default();
        config.adapter.servers_config = path;
        let err = run(&config, OutputOptions { json: true }).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<mcpgate_core::Error>(),
            Some(mcpgate_core::Error::InvalidServers(_))
        ));
    }
}
