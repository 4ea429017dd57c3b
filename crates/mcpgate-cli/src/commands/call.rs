//! Tool calls and resource reads.

use anyhow::Context;
use serde_json::Value;

use crate::commands::print_json;
use crate::{GatewayContext, OutputOptions};

/// Parse the optional JSON argument object.
fn parse_arguments(raw: Option<&str>) -> anyhow::Result<Option<Value>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: Value = serde_json::from_str(raw).context("tool arguments are not valid JSON")?;
    if !value.is_object() {
        anyhow::bail!("tool arguments must be a JSON object");
    }
    Ok(Some(value))
}

pub async fn tool(
    ctx: &GatewayContext,
    name: &str,
    arguments: Option<&str>,
    output: OutputOptions,
) -> anyhow::Result<()> {
    let arguments = parse_arguments(arguments)?;
    let result = ctx.adapter.execute_tool(name, arguments).await?;

    if output.json {
        print_json(&result)?;
    } else {
        println!("{}", result.text());
    }

    if result.is_error {
        anyhow::bail!("tool '{}' reported an error", name);
    }
    Ok(())
}

pub async fn resource(ctx: &GatewayContext, uri: &str, output: OutputOptions) -> anyhow::Result<()> {
    let result = ctx.adapter.get_resource(uri).await?;
    if output.json {
        return print_json(&result);
    }

    if result.contents.is_empty() {
        println!("Resource '{}' returned no contents.", uri);
    }
    for contents in &result.contents {
        match (&contents.text, &contents.blob) {
            (Some(text), _) => println!("{}", text),
            (None, Some(blob)) => println!(
                "{}: {} bytes of base64 ({})",
                contents.uri,
                blob.len(),
                contents.mime_type.as_deref().unwrap_or("application/octet-stream")
            ),
            (None, None) => println!("{}: empty", contents.uri),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arguments() {
        assert_eq!(parse_arguments(None).unwrap(), None);
        assert_eq!(
            parse_arguments(Some(r#"{"query": "shoes"}"#)).unwrap(),
            Some(json!({"query": "shoes"}))
        );
        assert!(parse_arguments(Some("[1, 2]")).is_err());
        assert!(parse_arguments(Some("{not json")).is_err());
    }
}
