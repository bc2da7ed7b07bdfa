//! recon-runner: headless reconciliation demo runner.
//!
//! Seeds a deterministic synthetic ledger, uploads one batch with a
//! controlled mix of exact matches, tolerated variances, mismatches,
//! and duplicates, then reconciles it and prints the outcome.
//!
//! Usage:
//!   recon-runner --seed 12345 --system 200 --db recon.db
//!   recon-runner --seed 12345 --json

use anyhow::Result;
use chrono::{Duration, TimeZone, Utc};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use std::env;
use txnrecon_core::{MatchRules, ReconEngine, RecordStore, TxnRecord};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let system_count = parse_arg(&args, "--system", 50usize);
    let json_output = args.iter().any(|a| a == "--json");
    let db = args
        .windows(2)
        .find(|w| w[0] == "--db")
        .map(|w| w[1].as_str())
        .unwrap_or(":memory:");

    if !json_output {
        println!("recon-runner");
        println!("  seed:    {seed}");
        println!("  system:  {system_count}");
        println!("  db:      {db}");
        println!();
    }

    let store = if db == ":memory:" {
        RecordStore::in_memory()?
    } else {
        RecordStore::open(db)?
    };
    store.migrate()?;

    let batch_ref = format!("batch-{seed}");
    seed_records(&store, seed, system_count, &batch_ref)?;
    log::info!("seeded {system_count} system records and batch {batch_ref}");

    let engine = ReconEngine::new(store, MatchRules::default());
    let result = engine.reconcile(&batch_ref, "recon-runner")?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let s = &result.summary;
    println!("batch {batch_ref} reconciled in {} ms", result.processing_time_ms);
    println!("  total records:      {}", s.total_records);
    println!("  matched:            {}", s.matched);
    println!("  partially matched:  {}", s.partially_matched);
    println!("  unmatched:          {}", s.unmatched);
    println!("  duplicate groups:   {}", s.duplicates);
    println!("  duplicate records:  {}", s.duplicate_records);
    println!("  accuracy:           {:.0}%", s.accuracy_percentage);
    println!();
    println!("  audit events:       {}", engine.store.audit_event_count()?);
    Ok(())
}

/// One system partition plus one upload batch derived from it:
/// roughly half the uploads mirror a system record exactly, a quarter
/// carry a small amount variance, the rest reference nothing, and two
/// extra rows share a transaction id to form a duplicate pair.
fn seed_records(store: &RecordStore, seed: u64, system_count: usize, batch_ref: &str) -> Result<()> {
    let mut rng = Pcg64::seed_from_u64(seed);
    let base = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();

    let mut system = Vec::with_capacity(system_count);
    for i in 0..system_count {
        let amount = rng.gen_range(10.0..5_000.0_f64).round();
        let date = base + Duration::minutes(rng.gen_range(0..10_000));
        system.push(TxnRecord::system(
            format!("sys-{i:04}"),
            format!("TXN-{i:06}"),
            format!("REF-{i:06}"),
            amount,
            date,
        ));
    }
    for r in &system {
        store.insert_record(r)?;
    }

    for (i, sys) in system.iter().enumerate() {
        let mut upl = TxnRecord::uploaded(
            format!("upl-{i:04}"),
            batch_ref,
            sys.transaction_id.clone(),
            sys.reference_number.clone(),
            sys.amount,
            sys.date,
        );
        match i % 4 {
            // exact mirror
            0 | 1 => {}
            // tolerated variance, lands in partial territory
            2 => upl.amount = (sys.amount * 1.01).round(),
            // unrecognizable: nothing in the system partition matches
            _ => {
                upl.transaction_id = format!("TXN-UNKNOWN-{i:06}");
                upl.reference_number = format!("REF-UNKNOWN-{i:06}");
                upl.date = sys.date + Duration::days(45);
            }
        }
        store.insert_record(&upl)?;
    }

    // Duplicate pair sharing one transaction id.
    for suffix in ["a", "b"] {
        store.insert_record(&TxnRecord::uploaded(
            format!("upl-dup-{suffix}"),
            batch_ref,
            "TXN-DUP-000001",
            "REF-DUP-000001",
            123.45,
            base,
        ))?;
    }

    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
