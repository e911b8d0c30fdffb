use anyhow::Result;
use beespeed::{PhaseResult, ServerEndpoints, Speedtest, TestConfiguration, WorkerKind};
use std::io::{self, Write};

const BAR_WIDTH: usize = 24;

/// Line-oriented run for pipes and logs: one live progress line per phase,
/// replaced by the final figure when the phase ends.
pub async fn run(
    server_label: &str,
    endpoints: ServerEndpoints,
    config: TestConfiguration,
) -> Result<()> {
    println!("\n\tBENCHBEE SPEEDTEST (Unofficial)\n");
    println!("\t  Server: {}", server_label);
    println!("\t     ISP: {}", endpoints.isp_label());

    let mut speedtest = Speedtest::new(endpoints, config)?;

    let latency = speedtest.test_ping().await?;
    println!(
        "\t Latency: {:7.2} ms   ({:.2} ms jitter)",
        latency.mean_latency_ms, latency.jitter_ms
    );

    for kind in [WorkerKind::Download, WorkerKind::Upload] {
        let duration = match kind {
            WorkerKind::Download => speedtest.config().download_duration,
            WorkerKind::Upload => speedtest.config().upload_duration,
        };
        let label = label(kind);
        print_over(&progress_line(label, 0.0, 0.0));
        let result = speedtest
            .test_speed(kind, move |sample| {
                let ratio = sample.elapsed.as_secs_f64() / duration.as_secs_f64();
                print_over(&progress_line(label, sample.mbps(), ratio));
            })
            .await?;
        print_over(&result_line(label, &result));
        println!();
    }
    println!();
    Ok(())
}

fn label(kind: WorkerKind) -> &'static str {
    match kind {
        WorkerKind::Download => "Download",
        WorkerKind::Upload => "  Upload",
    }
}

fn print_over(line: &str) {
    let mut stdout = io::stdout().lock();
    // Trailing spaces clear whatever a longer progress line left behind.
    let _ = write!(stdout, "\r{:<60}", line);
    let _ = stdout.flush();
}

fn progress_line(label: &str, mbps: f64, ratio: f64) -> String {
    let ratio = ratio.clamp(0.0, 1.0);
    let filled = (ratio * BAR_WIDTH as f64).round() as usize;
    format!(
        "\t{}: {:7.2} Mbps [{}{}] {:>3.0} %",
        label,
        mbps,
        "=".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        ratio * 100.0
    )
}

fn result_line(label: &str, result: &PhaseResult) -> String {
    format!(
        "\t{}: {:7.2} Mbps (data used: {})",
        label,
        result.mbps(),
        result.data_used()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn progress_bar_tracks_elapsed_share() {
        let line = progress_line("Download", 94.5, 0.5);
        assert_eq!(
            line,
            "\tDownload:   94.50 Mbps [============------------]  50 %"
        );
        assert!(progress_line("Download", 0.0, 3.0).contains("100 %"));
    }

    #[test]
    fn final_line_reports_data_used() {
        let result = PhaseResult {
            bytes_total: 75_000_000,
            elapsed: Duration::from_secs(6),
        };
        assert_eq!(
            result_line(label(WorkerKind::Upload), &result),
            "\t  Upload:  100.00 Mbps (data used: 75 MB)"
        );
    }
}
