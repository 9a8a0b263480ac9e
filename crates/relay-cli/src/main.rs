// ============================================================================
// relay — operator tool for the dialer → CRM relay
// ============================================================================
// Usage:
//   relay normalize-phone "+1 (415) 555-0100"   Show the phone match key
//   relay decode [FILE]                         Decode a webhook body (stdin if no FILE)
//   relay classify --talk-seconds 0 --status-name "No Answer"
//   relay token [--force]                       Probe the CRM token endpoint
// ============================================================================

use std::io::Read;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use relay_core::classifier::{self, Signals};
use relay_core::payload::{decode_body, normalize, InboundShape};
use relay_core::{phone, RelayConfig, TokenManager};
use serde_json::{json, Value};
use tracing::debug;

/// Dialer → CRM relay operator tool
#[derive(Parser)]
#[command(name = "relay", version, about = "Inspect relay payloads, outcomes and CRM tokens")]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the digit key and E.164 form of a phone number
    NormalizePhone {
        /// Raw phone number as the dialer or CRM sends it
        raw: String,
    },

    /// Decode a webhook body into its canonical event
    Decode {
        /// File with the raw body (JSON or form-encoded); stdin when omitted
        file: Option<PathBuf>,
    },

    /// Classify outcome signals into a CRM disposition
    Classify {
        #[arg(long, default_value = "0")]
        talk_seconds: u64,

        #[arg(long)]
        term_reason: Option<String>,

        #[arg(long)]
        status_name: Option<String>,

        #[arg(long)]
        disposition: Option<String>,

        #[arg(long)]
        call_result: Option<String>,
    },

    /// Acquire a CRM access token using the configured credentials
    Token {
        /// Refresh even if a cached token is still fresh
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = dotenvy::dotenv();
    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::new(level))
        .init();

    match cli.command {
        Commands::NormalizePhone { raw } => print_json(&normalize_phone_report(&raw)),
        Commands::Decode { file } => cmd_decode(file),
        Commands::Classify {
            talk_seconds,
            term_reason,
            status_name,
            disposition,
            call_result,
        } => print_json(&classify_report(&Signals {
            talk_seconds,
            term_reason: term_reason.as_deref(),
            status_name: status_name.as_deref(),
            disposition: disposition.as_deref(),
            call_result: call_result.as_deref(),
        })),
        Commands::Token { force } => cmd_token(force).await,
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn normalize_phone_report(raw: &str) -> Value {
    let digits = phone::normalize(raw);
    json!({
        "input": raw,
        "digits": digits,
        "e164": phone::to_e164(&digits),
    })
}

fn cmd_decode(file: Option<PathBuf>) -> Result<()> {
    let bytes = match file {
        Some(path) => std::fs::read(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read webhook body from stdin")?;
            buf
        }
    };
    debug!("Decoding {} byte body", bytes.len());
    print_json(&decode_report(&bytes)?)
}

fn decode_report(bytes: &[u8]) -> Result<Value> {
    let body = decode_body(bytes);
    let shape = InboundShape::sniff(&body);
    let event = normalize(&body);
    Ok(json!({
        "shape": shape.input_shape(),
        "record": shape.record(),
        "event": serde_json::to_value(&event)?,
        "has_phone": event.has_phone(),
    }))
}

fn classify_report(signals: &Signals<'_>) -> Value {
    let rule = classifier::matching_rule(signals);
    json!({
        "rule": rule.name,
        "outcome": classifier::classify(signals),
    })
}

async fn cmd_token(force: bool) -> Result<()> {
    let config = RelayConfig::from_env().context("failed to load relay configuration")?;
    let tokens = TokenManager::from_config(&config, reqwest::Client::new());

    if !tokens.can_refresh() {
        println!("No CRM_CLIENT_ID / CRM_CLIENT_SECRET configured.");
        match config.crm_access_token.as_deref() {
            Some(token) => println!("Static token in use: {}", mask_token(token)),
            None => println!(
                "No static CRM_ACCESS_TOKEN either - CRM calls will be unauthenticated."
            ),
        }
        return Ok(());
    }

    let token = if force {
        tokens.refresh_now().await
    } else {
        tokens.acquire().await
    }
    .context("CRM token request failed")?;

    println!("Token:      {}", mask_token(&token));
    println!("State:      {:?}", tokens.state());
    match tokens.expires_at() {
        Some(at) => println!("Expires at: {}", at.to_rfc3339()),
        None => println!("Expires at: (unknown)"),
    }
    Ok(())
}

/// First and last four characters only
fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone_report() {
        let report = normalize_phone_report("+1 (415) 555-0100");
        assert_eq!(report["digits"], "4155550100");
        assert_eq!(report["e164"], "+14155550100");
    }

    #[test]
    fn test_decode_report_form_body() {
        let report = decode_report(b"phone_number=4155550100&call_type=INBOUND").unwrap();
        assert_eq!(report["shape"], "object");
        assert_eq!(report["has_phone"], true);
        assert_eq!(report["event"]["call_type"], "INBOUND");
    }

    #[test]
    fn test_classify_report_names_rule() {
        let report = classify_report(&Signals {
            status_name: Some("BUSY"),
            ..Default::default()
        });
        assert_eq!(report["rule"], "busy");
        assert_eq!(report["outcome"]["result_label"], "Busy");
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("short"), "*****");
        assert_eq!(mask_token("abcd1234wxyz"), "abcd…wxyz");
    }

    #[test]
    fn test_cli_parses_classify() {
        let cli = Cli::parse_from([
            "relay",
            "classify",
            "--talk-seconds",
            "12",
            "--term-reason",
            "AGENT",
        ]);
        match cli.command {
            Commands::Classify {
                talk_seconds,
                term_reason,
                ..
            } => {
                assert_eq!(talk_seconds, 12);
                assert_eq!(term_reason.as_deref(), Some("AGENT"));
            }
            _ => panic!("expected classify"),
        }
    }
}
