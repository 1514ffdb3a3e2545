use std::fmt::Write;

use crate::pipeline::{BatchReport, TallerReport};

fn write_taller(output: &mut String, taller: &TallerReport) {
    let _ = writeln!(output, "## Taller {}", taller.taller_id);
    let _ = writeln!(output, "{} SKUs classified", taller.skus);
    for (segment, count) in &taller.segments {
        let _ = writeln!(output, "- {segment}: {count}");
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "### Models");
    if taller.trained.is_empty() {
        let _ = writeln!(output, "No segment was trained in this run.");
    } else {
        for segment in &taller.trained {
            let _ = writeln!(
                output,
                "- {}: {} SKUs, {} validation folds, test MAE {:.2}, RMSE {:.2}",
                segment.segment, segment.skus, segment.folds, segment.test_mae, segment.test_rmse
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "### Writes");
    let _ = writeln!(
        output,
        "- rotation: {} written, {} failed",
        taller.rotation.written, taller.rotation.failed
    );
    let _ = writeln!(
        output,
        "- forecasts: {} written, {} failed",
        taller.forecasts.written, taller.forecasts.failed
    );
    let _ = writeln!(
        output,
        "- alerts: {} created, {} resolved, {} still open",
        taller.alerts.created, taller.alerts.resolved, taller.alerts.kept
    );

    if !taller.warnings.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "### Warnings");
        for warning in &taller.warnings {
            let _ = writeln!(output, "- {warning}");
        }
    }
    let _ = writeln!(output);
}

pub fn build_report(batch: &BatchReport) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Demand Forecast Report");
    let _ = writeln!(
        output,
        "Run {} for the week of {} ({} ok, {} failed)",
        batch.run_id,
        batch.anchor,
        batch.ok.len(),
        batch.errors.len()
    );
    let _ = writeln!(output);

    if batch.ok.is_empty() {
        let _ = writeln!(output, "No taller completed in this run.");
        let _ = writeln!(output);
    }
    for taller in &batch.ok {
        write_taller(&mut output, taller);
    }

    let _ = writeln!(output, "## Errors");
    if batch.errors.is_empty() {
        let _ = writeln!(output, "No errors.");
    } else {
        for failure in &batch.errors {
            let _ = writeln!(
                output,
                "- taller {} ({}): {}",
                failure.taller_id,
                failure.kind.as_str(),
                failure.message
            );
        }
    }

    output
}
