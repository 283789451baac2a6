//! Plain text output

use crate::client::BenchResult;
use crate::stats::{Outcome, bytes_to_human};

pub fn output_plain(result: &BenchResult) -> String {
    let mut output = String::new();

    output.push_str("─".repeat(60).as_str());
    output.push('\n');
    output.push_str("  quicbench Results\n");
    output.push_str("─".repeat(60).as_str());
    output.push('\n');
    output.push('\n');

    if let Some(remote) = result.remote {
        output.push_str(&format!("  Server:      {}\n", remote));
    }
    output.push_str(&format!(
        "  Upload:      {} x {} ({} ok, {} failed)\n",
        result.streams,
        bytes_to_human(result.data_size as u64),
        result.upload.completed,
        result.upload.failed
    ));
    output.push_str(&format!(
        "  Download:    {} ok, {} failed\n",
        result.download.completed(),
        result.download.failed()
    ));
    output.push('\n');

    let failed: Vec<String> = result
        .download
        .slots
        .iter()
        .filter(|s| s.is_failed())
        .map(|s| s.index.to_string())
        .collect();
    if !failed.is_empty() {
        output.push_str(&format!("  No stream for slots: {}\n\n", failed.join(", ")));
    }

    output.push_str(&summary_line(&result.outcome));
    output.push('\n');
    output.push_str("─".repeat(60).as_str());
    output.push('\n');

    output
}

/// Final result line(s), or the no-data message
pub fn summary_line(outcome: &Outcome) -> String {
    match outcome {
        Outcome::NoData => "  No data received.\n".to_string(),
        Outcome::Completed(report) => format!(
            "  Received total: {} bytes across {} streams\n  Download Speed (avg): {:.3} Mbps\n",
            report.total_bytes, report.streams, report.throughput_mbps
        ),
    }
}
