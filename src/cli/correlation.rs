use super::ui;
use crate::core::bar::CorrelationMatrix;
use crate::pipeline::Pipeline;
use anyhow::Result;
use comfy_table::{Attribute, Cell};

pub async fn run(pipeline: &Pipeline, tickers: &[String]) -> Result<()> {
    let matrix = pipeline.correlations().matrix(tickers).await;
    println!(
        "\n{} ({} trading days)",
        ui::style_text("Correlation", ui::StyleType::Title),
        pipeline.correlations().period_days()
    );
    println!("{}", render_matrix(&matrix));
    Ok(())
}

fn render_matrix(matrix: &CorrelationMatrix) -> String {
    let mut table = ui::new_styled_table();
    let mut header = vec![ui::header_cell("")];
    header.extend(matrix.tickers.iter().map(|t| ui::header_cell(t)));
    table.set_header(header);

    for (ticker, row) in matrix.tickers.iter().zip(&matrix.values) {
        let mut cells = vec![Cell::new(ticker).add_attribute(Attribute::Bold)];
        cells.extend(row.iter().map(|v| ui::correlation_cell(*v)));
        table.add_row(cells);
    }
    table.to_string()
}
