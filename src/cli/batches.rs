use super::run::{require_config, Services};
use crate::batch::BatchSummary;
use std::fmt::Write;
use std::path::PathBuf;

pub async fn list(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = require_config(config_path)?;
    let services = Services::open(&config).await?;
    let summaries = services.assigner.summaries().await?;
    print!(
        "{}",
        render_table(&summaries, config.assignment.users_per_group)
    );
    Ok(())
}

/// Plain-text listing of batches, one per line, with a totals footer.
pub fn render_table(summaries: &[BatchSummary], users_per_group: usize) -> String {
    let mut out = String::new();
    if summaries.is_empty() {
        out.push_str("No batches registered yet\n");
        return out;
    }

    let width = summaries
        .iter()
        .map(|s| s.name.len())
        .max()
        .unwrap_or(0)
        .max("BATCH".len());
    let _ = writeln!(out, "{:<width$}  {:>6}  {:>9}", "BATCH", "IMAGES", "RATERS");
    for summary in summaries {
        let _ = writeln!(
            out,
            "{:<width$}  {:>6}  {:>5}/{:<3}{}",
            summary.name,
            summary.images,
            summary.occupancy,
            users_per_group,
            if summary.full { " full" } else { "" },
        );
    }
    let open = summaries.iter().filter(|s| !s.full).count();
    let _ = writeln!(out, "{} batches, {} open", summaries.len(), open);
    out
}
