//! Health and statistics output.

use crate::commands::print_json;
use crate::{GatewayContext, OutputOptions};

pub async fn health(ctx: &GatewayContext, output: OutputOptions) -> anyhow::Result<()> {
    let health = ctx.adapter.health_check().await;
    if output.json {
        print_json(&health)?;
    } else {
        let mode = health
            .mode
            .map(|m| m.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "Gateway: {} (state: {}, mode: {})",
            if health.healthy { "✓ healthy" } else { "✗ unhealthy" },
            health.state,
            mode
        );
        for server in &health.servers {
            match (&server.latency_ms, &server.error) {
                (Some(latency), _) => println!("  ✓ {} ({:.1} ms)", server.name, latency),
                (None, Some(error)) => println!("  ✗ {}: {}", server.name, error),
                (None, None) => println!("  ✗ {}", server.name),
            }
        }
    }

    if !health.healthy {
        anyhow::bail!("no MCP server is answering");
    }
    Ok(())
}

pub fn stats(ctx: &GatewayContext, output: OutputOptions) -> anyhow::Result<()> {
    let stats = ctx.adapter.get_stats();
    if output.json {
        return print_json(&stats);
    }

    let mode = stats
        .mode
        .map(|m| m.to_string())
        .unwrap_or_else(|| "-".to_string());
    println!("State:             {}", stats.state);
    println!("Mode:              {}", mode);
    println!("Servers connected: {}", stats.servers_connected);
    println!("Tools:             {}", stats.tools);
    println!("Resources:         {}", stats.resources);
    println!("Requests:          {}", stats.requests);
    println!("Errors:            {}", stats.errors);
    println!("Avg latency:       {:.1} ms", stats.avg_latency_ms);

    if !stats.servers.is_empty() {
        println!("\nServers:");
        for server in &stats.servers {
            println!("  {}", server);
        }
    }
    if let Some(reason) = &stats.fallback_reason {
        println!("\nFell back to single server: {}", reason);
    }
    if !stats.servers_skipped.is_empty() {
        println!("\nSkipped servers:");
        for skipped in &stats.servers_skipped {
            let tag = if skipped.critical { " (critical)" } else { "" };
            println!("  ✗ {}{}: {}", skipped.name, tag, skipped.reason);
        }
    }
    Ok(())
}
