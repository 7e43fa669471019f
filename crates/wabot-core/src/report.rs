//! Operator-facing text for the `disk` command (WhatsApp-style plain text).

use crate::archive::{
    disk::DiskUsage,
    memory::{KindStats, MemoryStats},
    store::{ClearAllReport, MaintenanceReport},
};

const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

/// Human-readable size with binary multiples: `0 Bytes`, `1.5 KB`, `5 GB`.
pub fn format_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let fixed = format!("{value:.2}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}

/// Percentage of `quota` in use, two decimals. A zero quota reads as `0.00`.
pub fn usage_percent(used: u64, quota: u64) -> String {
    if quota == 0 {
        return "0.00".to_string();
    }
    format!("{:.2}", used as f64 / quota as f64 * 100.0)
}

fn disk_lines(usage: &DiskUsage, quota: u64, bullet: &str) -> Vec<String> {
    vec![
        format!(
            "{bullet}Media: {} ({} files)",
            format_bytes(usage.media_bytes),
            usage.media_files
        ),
        format!(
            "{bullet}Text: {} ({} messages)",
            format_bytes(usage.text_bytes),
            usage.text_records
        ),
        format!(
            "{bullet}Total: {} of {} ({}% used)",
            format_bytes(usage.total_bytes()),
            format_bytes(quota),
            usage_percent(usage.total_bytes(), quota)
        ),
    ]
}

fn ram_line(label: &str, stats: KindStats, noun: &str, bullet: &str) -> String {
    format!(
        "{bullet}{label}: {} ({} {noun})",
        format_bytes(stats.approx_bytes as u64),
        stats.count
    )
}

fn boxed(title: &str, lines: &[String]) -> String {
    let mut out = vec![title.to_string(), "┌───────────────".to_string()];
    out.extend(lines.iter().map(|l| format!("│ {l}")));
    out.push("└───────────────".to_string());
    out.join("\n")
}

/// Full status: disk usage, memory usage and the available subcommands.
pub fn render_disk_status(usage: &DiskUsage, quota: u64, ram: &MemoryStats, prefix: &str) -> String {
    let ram_lines = vec![
        ram_line("Media", ram.media, "items", "• "),
        ram_line("Text", ram.text, "messages", "• "),
        format!("• Total: {}", format_bytes(ram.total().approx_bytes as u64)),
    ];
    let commands = vec![
        format!("• {prefix}disk → Show storage & memory info"),
        format!("• {prefix}disk cleanup → Remove old files"),
        format!("• {prefix}disk clearall → Delete all saved messages"),
    ];

    [
        "💾 *Storage & Memory Status*".to_string(),
        boxed("📊 *Disk Usage*", &disk_lines(usage, quota, "• ")),
        boxed("🧠 *RAM Usage (Stored Messages)*", &ram_lines),
        boxed("🛠️ *Available Commands*", &commands),
    ]
    .join("\n\n")
}

/// Result of a manual maintenance pass, followed by the usage it left behind.
pub fn render_cleanup(
    report: &MaintenanceReport,
    usage: &DiskUsage,
    quota: u64,
    ram: &MemoryStats,
) -> String {
    let purge = &report.janitor.purge;
    let trimmed = report.janitor.trim.map(|t| t.removed).unwrap_or(0);
    let freed = purge.media_bytes_freed + report.janitor.trim.map(|t| t.bytes_freed).unwrap_or(0);

    let mut out = vec![
        "✅ Cleanup completed!".to_string(),
        String::new(),
        format!(
            "🧹 Removed {} files, freed {}; dropped {} text records; evicted {} cached entries",
            purge.media_removed + trimmed,
            format_bytes(freed),
            purge.text_dropped,
            report.sweep.total_removed() + report.purged_from_memory
        ),
        String::new(),
        "💾 Disk Usage (After Cleanup):".to_string(),
    ];
    out.extend(disk_lines(usage, quota, ""));
    out.push(String::new());
    out.push("🧠 RAM Usage (Stored Messages):".to_string());
    out.push(ram_line("Media", ram.media, "items", "• "));
    out.push(ram_line("Text", ram.text, "messages", "• "));
    out.push(format!("• Total: {}", format_bytes(ram.total().approx_bytes as u64)));
    out.join("\n")
}

pub fn render_clear(report: &ClearAllReport, ram: &MemoryStats) -> String {
    let freed = report.disk.media_bytes_freed + report.disk.text_bytes_freed;
    [
        "✅ All messages cleared successfully!".to_string(),
        String::new(),
        format!(
            "🧹 Storage has been reset ({} files, {} freed; {} cached entries dropped)",
            report.disk.media_removed,
            format_bytes(freed),
            report.memory_entries
        ),
        "🧠 RAM Usage After Clear:".to_string(),
        ram_line("Media", ram.media, "items", "• "),
        ram_line("Text", ram.text, "messages", "• "),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{
        disk::{ClearReport, PurgeReport, TrimReport},
        janitor::JanitorReport,
    };

    #[test]
    fn formats_bytes_like_the_chat_command() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(1000), "1000 Bytes");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5 GB");
        assert_eq!(format_bytes(1_234_567), "1.18 MB");
    }

    #[test]
    fn usage_percent_handles_zero_quota() {
        assert_eq!(usage_percent(512, 1024), "50.00");
        assert_eq!(usage_percent(1, 0), "0.00");
    }

    #[test]
    fn status_lists_disk_ram_and_commands() {
        let usage = DiskUsage {
            media_bytes: 2048,
            media_files: 2,
            text_bytes: 100,
            text_records: 3,
        };
        let ram = MemoryStats {
            media: KindStats {
                count: 1,
                approx_bytes: 1024,
            },
            text: KindStats::default(),
        };
        let text = render_disk_status(&usage, 1024 * 1024, &ram, ".");
        assert!(text.contains("│ • Media: 2 KB (2 files)"));
        assert!(text.contains("│ • Text: 100 Bytes (3 messages)"));
        assert!(text.contains("(0.20% used)"));
        assert!(text.contains("│ • Media: 1 KB (1 items)"));
        assert!(text.contains("│ • .disk clearall → Delete all saved messages"));
    }

    #[test]
    fn cleanup_counts_purged_and_trimmed_files() {
        let report = MaintenanceReport {
            janitor: JanitorReport {
                purge: PurgeReport {
                    media_removed: 2,
                    media_bytes_freed: 1024,
                    text_dropped: 4,
                    ..PurgeReport::default()
                },
                size_after_purge: 0,
                trim: Some(TrimReport {
                    removed: 1,
                    bytes_freed: 512,
                    remaining_bytes: 0,
                }),
            },
            purged_from_memory: 1,
            sweep: Default::default(),
        };
        let text = render_cleanup(&report, &DiskUsage::default(), 1024, &MemoryStats::default());
        assert!(text.contains(
            "Removed 3 files, freed 1.5 KB; dropped 4 text records; evicted 1 cached entries"
        ));
        assert!(text.contains("Media: 0 Bytes (0 files)"));
    }

    #[test]
    fn clear_reports_freed_bytes() {
        let report = ClearAllReport {
            memory_entries: 5,
            disk: ClearReport {
                media_removed: 3,
                media_bytes_freed: 2048,
                text_bytes_freed: 1024,
            },
        };
        let text = render_clear(&report, &MemoryStats::default());
        assert!(text.contains("(3 files, 3 KB freed; 5 cached entries dropped)"));
        assert!(text.contains("• Text: 0 Bytes (0 messages)"));
    }
}
