use super::ui;
use crate::core::bar::Quote;
use crate::pipeline::Pipeline;
use anyhow::Result;
use comfy_table::Cell;
use std::collections::HashMap;

pub async fn run(pipeline: &Pipeline, tickers: &[String]) -> Result<()> {
    let quotes = pipeline.quotes().get_quotes(tickers).await;
    println!("{}", render_quotes(tickers, &quotes));
    Ok(())
}

fn render_quotes(tickers: &[String], quotes: &HashMap<String, Quote>) -> String {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Ticker"),
        ui::header_cell("Price"),
        ui::header_cell("Change"),
        ui::header_cell("Change (%)"),
        ui::header_cell("As of"),
    ]);

    for ticker in tickers {
        let row = match quotes.get(ticker) {
            Some(quote) => {
                let currency = quote.currency.as_deref().unwrap_or("");
                vec![
                    Cell::new(ticker),
                    Cell::new(format!("{:.2} {}", quote.price, currency)),
                    ui::format_optional_cell(quote.change, |c| format!("{c:+.2}")),
                    quote
                        .change_percent
                        .map_or(ui::na_cell(false), ui::change_cell),
                    Cell::new(quote.timestamp.format("%Y-%m-%d %H:%M").to_string()),
                ]
            }
            None => vec![
                Cell::new(ticker),
                ui::na_cell(true),
                ui::na_cell(true),
                ui::na_cell(true),
                ui::na_cell(true),
            ],
        };
        table.add_row(row);
    }
    table.to_string()
}
