//! Tool and resource listings.

use crate::commands::print_json;
use crate::{GatewayContext, OutputOptions};

pub async fn tools(ctx: &GatewayContext, output: OutputOptions) -> anyhow::Result<()> {
    let tools = ctx.adapter.list_tools().await?;
    if output.json {
        return print_json(&tools);
    }

    if tools.is_empty() {
        println!("No tools available.");
        return Ok(());
    }

    println!("Tools ({}):", tools.len());
    for tool in &tools {
        match &tool.description {
            Some(description) => println!("  {} - {}", tool.name, first_line(description)),
            None => println!("  {}", tool.name),
        }
    }
    Ok(())
}

pub async fn resources(ctx: &GatewayContext, output: OutputOptions) -> anyhow::Result<()> {
    let resources = ctx.adapter.list_resources().await?;
    if output.json {
        return print_json(&resources);
    }

    if resources.is_empty() {
        println!("No resources available.");
        return Ok(());
    }

    println!("Resources ({}):", resources.len());
    for resource in &resources {
        let mime = resource.mime_type.as_deref().unwrap_or("-");
        println!("  {} ({}) [{}]", resource.uri, resource.name, mime);
    }
    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}
