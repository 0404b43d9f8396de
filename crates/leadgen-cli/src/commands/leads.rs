//! Lead commands. These pass through to the backend; scoring and message
//! content are produced server-side.

use super::{describe, Context};
use crate::output::{self, OutputFormat};
use anyhow::{Context as _, Result};
use serde_json::{json, Value};
use std::path::Path;

/// List leads.
pub async fn leads_list(ctx: &Context, format: &OutputFormat) -> Result<()> {
    ctx.require_login()?;
    let body = ctx
        .client
        .get_json(&ctx.config.endpoints.leads)
        .await
        .map_err(describe)?;

    match format {
        OutputFormat::Text => print_lead_table(&body),
        OutputFormat::Json => output::print_json(&body),
    }
    Ok(())
}

/// Show a single lead.
pub async fn leads_show(ctx: &Context, id: &str, format: &OutputFormat) -> Result<()> {
    ctx.require_login()?;
    let lead = ctx
        .client
        .get_json(&ctx.config.endpoints.lead(id))
        .await
        .map_err(describe)?;

    match format {
        OutputFormat::Text => {
            output::print_heading("Lead Details");
            for key in ["id", "name", "company", "email", "industry", "status", "score"] {
                output::print_row(key, &output::cell(&lead, key));
            }
            if let Some(messages) = lead.get("messages").and_then(Value::as_array) {
                output::print_heading("Messages");
                for message in messages {
                    match message.as_str() {
                        Some(text) => println!("{}", text),
                        None => println!("{}", message),
                    }
                }
            }
        }
        OutputFormat::Json => output::print_json(&lead),
    }
    Ok(())
}

/// Upload a lead file for import.
pub async fn leads_import(ctx: &Context, file: &Path, format: &OutputFormat) -> Result<()> {
    ctx.require_login()?;
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("leads.csv")
        .to_string();

    let body = ctx
        .client
        .post_file(&ctx.config.endpoints.import_leads, "file", &file_name, bytes)
        .await
        .map_err(describe)?;
    report(&body, "Import submitted", format);
    Ok(())
}

/// Run lead processing, optionally filtered by status and industry.
pub async fn leads_process(
    ctx: &Context,
    status: Option<&str>,
    industry: Option<&str>,
    format: &OutputFormat,
) -> Result<()> {
    ctx.require_login()?;
    let query: Vec<(&str, &str)> = [("status", status), ("industry", industry)]
        .into_iter()
        .filter_map(|(key, value)| value.filter(|v| !v.is_empty()).map(|v| (key, v)))
        .collect();

    let body = ctx
        .client
        .post_empty(&ctx.config.endpoints.process_leads, &query)
        .await
        .map_err(describe)?;
    report(&body, "Processing started", format);
    Ok(())
}

/// Ask the backend to draft outreach messages for a lead.
pub async fn leads_generate_messages(ctx: &Context, id: &str, format: &OutputFormat) -> Result<()> {
    ctx.require_login()?;
    let body = ctx
        .client
        .post_empty(&ctx.config.endpoints.generate_messages(id), &[])
        .await
        .map_err(describe)?;
    report(&body, "Messages generated", format);
    Ok(())
}

/// Send a test message for a lead.
pub async fn leads_test_message(ctx: &Context, lead_id: &str, format: &OutputFormat) -> Result<()> {
    ctx.require_login()?;
    let body = ctx
        .client
        .post_json(&ctx.config.endpoints.test_message, json!({ "lead_id": lead_id }))
        .await
        .map_err(describe)?;
    report(&body, "Test message sent", format);
    Ok(())
}

/// Print the backend's own message when it has one.
fn report(body: &Value, fallback: &str, format: &OutputFormat) {
    match format {
        OutputFormat::Text => {
            let message = ["message", "detail", "status"]
                .into_iter()
                .find_map(|key| body.get(key).and_then(Value::as_str))
                .unwrap_or(fallback);
            println!("{}", message);
        }
        OutputFormat::Json => output::print_json(body),
    }
}

/// Paginated responses carry the rows under `results`.
fn lead_rows(body: &Value) -> Option<&Vec<Value>> {
    body.as_array()
        .or_else(|| body.get("results").and_then(Value::as_array))
}

fn print_lead_table(body: &Value) {
    let Some(leads) = lead_rows(body) else {
        output::print_json(body);
        return;
    };
    if leads.is_empty() {
        println!("No leads found");
        return;
    }

    println!(
        "{:<8} {:<24} {:<24} {:<12} {}",
        "ID", "Name", "Company", "Status", "Score"
    );
    println!("{}", "-".repeat(80));
    for lead in leads {
        println!(
            "{:<8} {:<24} {:<24} {:<12} {}",
            output::cell(lead, "id"),
            output::cell(lead, "name"),
            output::cell(lead, "company"),
            output::cell(lead, "status"),
            output::cell(lead, "score"),
        );
    }
}
