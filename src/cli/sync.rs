use super::ui;
use crate::core::bar::DateRange;
use crate::pipeline::{Pipeline, SyncReport};
use anyhow::Result;
use chrono::Utc;
use comfy_table::Cell;

pub async fn run(pipeline: &Pipeline, tickers: &[String], days: u32) -> Result<()> {
    let range = DateRange::lookback(Utc::now().date_naive(), days);
    let pb = ui::new_progress_bar(tickers.len() as u64, true);
    pb.set_message(format!("Syncing {range}"));

    let report = pipeline
        .sync_job()
        .run(tickers, &range, &|| pb.inc(1))
        .await;
    pb.finish_and_clear();

    println!("{}", render_report(&report));
    println!(
        "{} {}",
        ui::style_text("Rows written:", ui::StyleType::TotalLabel),
        ui::style_text(&report.written().to_string(), ui::StyleType::TotalValue)
    );
    Ok(())
}

fn render_report(report: &SyncReport) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Ticker"),
        ui::header_cell("Fetched"),
        ui::header_cell("Written"),
        ui::header_cell("Status"),
    ]);
    for outcome in &report.outcomes {
        let status = match &outcome.error {
            Some(e) => Cell::new(ui::style_text(e, ui::StyleType::Error)),
            None => Cell::new("ok"),
        };
        table.add_row(vec![
            Cell::new(&outcome.ticker),
            Cell::new(outcome.fetched),
            Cell::new(outcome.written),
            status,
        ]);
    }
    table.to_string()
}
