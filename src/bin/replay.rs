use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use launchpad_sniper::config::PUMP_FUN_PROGRAM_ID;
use launchpad_sniper::ingest::{EventNormalizer, SignatureCache};
use launchpad_sniper::{EventKind, Pubkey};
use serde_json::{json, Value};

/// Run a saved webhook delivery through the event normalizer.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to a JSON file holding one webhook body (an array of records)
    file: String,
    /// Launchpad program id (defaults to PUMP_FUN_PROGRAM_ID or pump.fun)
    #[arg(long)]
    program: Option<String>,
    /// Print the full event instead of a one-line summary
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();

    let program = args
        .program
        .or_else(|| std::env::var("PUMP_FUN_PROGRAM_ID").ok())
        .unwrap_or_else(|| PUMP_FUN_PROGRAM_ID.to_string());
    let program: Pubkey = program
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid program id {}: {}", program, e))?;

    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file))?;
    let payload: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", args.file))?;

    let normalizer = EventNormalizer::new(
        program,
        SignatureCache::new(10_000, chrono::Duration::hours(24)),
    );
    let events = normalizer.normalize(&payload);

    let records = payload.as_array().map(|a| a.len()).unwrap_or(0);
    println!("records: {}", records);
    println!("events: {}", events.len());

    for event in &events {
        if args.json {
            println!("{}", serde_json::to_string_pretty(&event_json(&event.kind))?);
            continue;
        }
        let slot = event.slot.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
        match &event.kind {
            EventKind::AssetCreated(d) => println!(
                "  [{}] {} create mint={} curve={} creator={}",
                slot, event.signature, d.mint, d.bonding_curve, d.creator
            ),
            EventKind::TradeOccurred(t) => println!(
                "  [{}] {} {:?} mint={} trader={} tokens={} sol_limit={}",
                slot, event.signature, t.side, t.mint, t.trader, t.token_amount, t.sol_limit
            ),
            EventKind::Unrecognized => println!("  [{}] {} unrecognized", slot, event.signature),
        }
    }

    Ok(())
}

// Keys in base58, the way explorers and the webhook payload show them
fn event_json(kind: &EventKind) -> Value {
    match kind {
        EventKind::AssetCreated(d) => json!({
            "kind": "AssetCreated",
            "mint": d.mint.to_string(),
            "bonding_curve": d.bonding_curve.to_string(),
            "creator": d.creator.to_string(),
        }),
        EventKind::TradeOccurred(t) => json!({
            "kind": "TradeOccurred",
            "side": t.side,
            "mint": t.mint.to_string(),
            "bonding_curve": t.bonding_curve.to_string(),
            "trader": t.trader.to_string(),
            "token_amount": t.token_amount,
            "sol_limit": t.sol_limit,
        }),
        EventKind::Unrecognized => json!({ "kind": "Unrecognized" }),
    }
}
