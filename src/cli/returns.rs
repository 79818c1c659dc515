use super::ui;
use crate::core::bar::{DateRange, PortfolioReturnSeries};
use crate::core::config::Portfolio;
use crate::pipeline::Pipeline;
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use comfy_table::{Attribute, Cell};
use tracing::info;

/// Rows shown in the table; the summary always covers the whole series.
const MAX_ROWS: usize = 15;

pub async fn run(pipeline: &Pipeline, portfolio: &Portfolio, days: u32) -> Result<()> {
    let range = DateRange::lookback(Utc::now().date_naive(), days);
    run_for_range(pipeline, portfolio, &range).await
}

pub async fn run_for_range(
    pipeline: &Pipeline,
    portfolio: &Portfolio,
    range: &DateRange,
) -> Result<()> {
    info!("Building return series for {} over {}", portfolio.name, range);
    let series = pipeline
        .returns()
        .build(&portfolio.allocations, range)
        .await;

    println!(
        "\nPortfolio: {}",
        ui::style_text(&portfolio.name, ui::StyleType::Title)
    );
    if series.is_empty() {
        println!(
            "{}",
            ui::style_text(
                "No dates with returns for every holding in this range.",
                ui::StyleType::Error
            )
        );
        return Ok(());
    }
    println!("{}", render_table(&series));
    Ok(())
}

fn render_table(series: &PortfolioReturnSeries) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Date"),
        ui::header_cell("Return"),
        ui::header_cell("Value"),
    ]);

    let rows: Vec<(&NaiveDate, &f64, &f64)> = series
        .dates
        .iter()
        .zip(&series.returns)
        .zip(&series.values[1..])
        .map(|((d, r), v)| (d, r, v))
        .collect();
    let skipped = rows.len().saturating_sub(MAX_ROWS);
    if skipped > 0 {
        table.add_row(vec![
            Cell::new(ui::style_text(
                &format!("… {skipped} earlier days"),
                ui::StyleType::Subtle,
            )),
            Cell::new(""),
            Cell::new(""),
        ]);
    }
    for (date, r, value) in &rows[skipped..] {
        table.add_row(vec![
            Cell::new(date.to_string()),
            ui::change_cell(**r * 100.0),
            ui::number_cell(**value, 2),
        ]);
    }

    let total = series.total_return().map(|t| t * 100.0);
    table.add_row(vec![
        Cell::new("Total").add_attribute(Attribute::Bold),
        total.map_or(ui::na_cell(false), ui::change_cell),
        ui::number_cell(*series.values.last().unwrap_or(&0.0), 2),
    ]);
    table.to_string()
}
