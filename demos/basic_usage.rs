// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic campaign-sync usage example.
//!
//! Demonstrates:
//! 1. Starting the engine with a SQLite fallback layer
//! 2. Editing campaigns and budgets (debounced commits)
//! 3. Forcing a save and reading the save beacon
//! 4. Exporting a backup file
//! 5. Displaying captured metrics
//! 6. Clean shutdown
//!
//! Everything lives in the system temp directory; no services are needed.
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use std::time::{Duration, Instant};

use campaign_sync::model::{Budget, Campaign, IN_ACCOUNT_EVENTS};
use campaign_sync::{PlannerEngine, SyncConfig, SyncEvent};
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt().with_target(false).compact().init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           campaign-sync: Basic Usage Example                  ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and start the engine
    // ─────────────────────────────────────────────────────────────────────────
    let workdir = std::env::temp_dir().join("campaign-sync-demo");
    std::fs::create_dir_all(&workdir)?;
    let db_path = workdir.join("planner.db");

    let config = SyncConfig {
        secondary_db_url: Some(format!("sqlite:{}", db_path.display())),
        download_dir: Some(workdir.clone()),
        debounce_ms: 200,
        ..Default::default()
    };

    let engine = PlannerEngine::new(config);
    let mut events = engine.subscribe();
    println!("🚀 Starting engine...");
    engine.start().await?;
    println!("   ✅ State: {} | layers: {:?}", engine.state(), engine.persistence().layer_names());
    println!(
        "   └─ Loaded {} campaigns, {} budgets",
        engine.campaigns().len(),
        engine.budgets().len()
    );

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Edit records
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Planning campaigns...");
    engine.campaigns().update(|campaigns| {
        campaigns.push(Campaign::new("Webinars", 100.0, 10_000.0));
        campaigns.push(Campaign::new(IN_ACCOUNT_EVENTS, 0.0, 5_000.0));
    });
    engine.budgets().update(|budgets| budgets.push(Budget::new("emea", Some(50_000.0))));

    for campaign in engine.campaigns().records().iter().rev().take(2) {
        let m = campaign.derived();
        println!(
            "   └─ {} {}: mql={} sql={} opps={} pipeline={:.0}",
            campaign.id(),
            campaign.campaign_type(),
            m.mql,
            m.sql,
            m.opportunities,
            m.pipeline_forecast
        );
    }
    println!("   ⏳ Commit pending: {}", engine.campaigns().has_pending_commit());

    // Let the debounce window close
    tokio::time::sleep(Duration::from_millis(400)).await;
    println!("   ✅ Debounced commit done, pending: {}", engine.campaigns().has_pending_commit());

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Explicit save
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n💾 Forcing a save...");
    let started = Instant::now();
    let outcome = engine.campaigns().force_save().await;
    println!("   └─ Saved locally: {} ({:?})", outcome.saved_locally(), started.elapsed());
    for layer in &outcome.local.layers {
        println!("      └─ {}: {}", layer.layer, if layer.result.is_ok() { "ok" } else { "failed" });
    }
    let status = engine.campaigns().save_status();
    println!("   └─ Last saved: {:?}", status.last_saved);

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Backup export
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📦 Exporting backup...");
    let path = engine.export_campaigns()?;
    println!("   └─ Written: {}", path.display());

    let usage = engine.storage_usage();
    println!("\n📊 Storage: {} bytes ({:.2}%)", usage.bytes_used, usage.percent_of_cap);

    println!("\n📨 Events seen:");
    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::Saved(beacon) => println!("   └─ saved {} at {}", beacon.key, beacon.timestamp),
            SyncEvent::Advisory(advisory) => println!("   └─ advisory [{}] {}", advisory.level.as_str(), advisory.message),
            SyncEvent::DivergenceChanged { key, state } => println!("   └─ {} is {}", key, state),
            other => println!("   └─ {:?}", other),
        }
    }

    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    engine.shutdown().await;
    println!("   ✅ State: {}", engine.state());

    println!("\n💡 Data remains in {}", db_path.display());
    println!("   └─ sqlite3 {} 'SELECT key, length(value) FROM kv_store;'", db_path.display());
    Ok(())
}

fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let (_, key) = composite_key.into_parts();
            let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
            let rendered = match value {
                DebugValue::Counter(v) => format!("{}", v),
                DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
                DebugValue::Histogram(samples) => {
                    let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                    format!("count={} sum={:.4}", samples.len(), sum)
                }
            };
            format!("{}{} = {}", key.name(), label_str, rendered)
        })
        .collect();
    lines.sort();

    if lines.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
    for line in lines {
        println!("   └─ {}", line);
    }
}
