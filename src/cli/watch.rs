use super::ui;
use crate::core::bar::{DateRange, normalize_tickers};
use crate::core::config::Portfolio;
use crate::pipeline::Pipeline;
use anyhow::Result;
use chrono::Utc;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

/// Periodically syncs the portfolio's tickers and reprints its value whenever
/// new bars land, until `shutdown` resolves. Returns the number of recomputes.
pub async fn run(
    pipeline: &Pipeline,
    portfolio: &Portfolio,
    days: u32,
    interval: Duration,
    shutdown: impl Future<Output = ()>,
) -> Result<usize> {
    let tickers = normalize_tickers(&portfolio.tickers());
    let (tx, mut updates) = mpsc::unbounded_channel::<String>();
    let notifier = pipeline.notifier("watch");
    let channel = notifier.subscribe(&tickers, move |ticker| {
        let _ = tx.send(ticker.to_string());
    });
    info!("Watching {} on {}", portfolio.name, channel);
    println!(
        "Watching {} every {}s. Press Ctrl-C to stop.",
        ui::style_text(&portfolio.name, ui::StyleType::Title),
        interval.as_secs()
    );

    let mut recomputes = 0;
    let mut timer = tokio::time::interval(interval);
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = timer.tick() => {
                let range = DateRange::lookback(Utc::now().date_naive(), days);
                pipeline.sync_job().run(&tickers, &range, &|| {}).await;
            }
            Some(first) = updates.recv() => {
                let mut changed = vec![first];
                while let Ok(ticker) = updates.try_recv() {
                    changed.push(ticker);
                }
                changed.sort();
                changed.dedup();
                print_latest_value(pipeline, portfolio, days, &changed).await;
                recomputes += 1;
            }
        }
    }

    notifier.unsubscribe();
    Ok(recomputes)
}

async fn print_latest_value(pipeline: &Pipeline, portfolio: &Portfolio, days: u32, changed: &[String]) {
    let range = DateRange::lookback(Utc::now().date_naive(), days);
    let series = pipeline
        .returns()
        .build(&portfolio.allocations, &range)
        .await;
    let stamp = Utc::now().format("%H:%M:%S").to_string();
    let updated = ui::style_text(&format!("updated {}", changed.join(", ")), ui::StyleType::Subtle);

    match (series.values.last(), series.total_return()) {
        (Some(value), Some(total)) => println!(
            "[{stamp}] {} {} ({:+.2}%) {updated}",
            ui::style_text("Value:", ui::StyleType::TotalLabel),
            ui::style_text(&format!("{value:.2}"), ui::StyleType::TotalValue),
            total * 100.0
        ),
        _ => println!(
            "[{stamp}] {} {updated}",
            ui::style_text("No overlapping data yet", ui::StyleType::Error)
        ),
    }
}
