//! Plain-text transfer reports

use std::fmt::Write as _;

use crate::sftp::{BatchResult, TaskStatus, TransferTask};

const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Human-readable size: whole bytes below 1 KB, one decimal above
pub fn format_bytes(size: u64) -> String {
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", size, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

fn progress_cell(task: &TransferTask) -> String {
    match task.status {
        TaskStatus::Completed => "100%".to_string(),
        TaskStatus::Failed => "Failed".to_string(),
        TaskStatus::Downloading => format!("{}%", task.percentage()),
        TaskStatus::Pending => String::new(),
    }
}

/// Per-task table with server, file, size, status and progress columns
pub fn summary_table(result: &BatchResult) -> String {
    let header = ["Server", "File", "Size", "Status", "Progress"];
    let rows: Vec<[String; 5]> = result
        .tasks
        .iter()
        .map(|t| {
            [
                t.host_name.clone(),
                t.file_name().to_string(),
                format_bytes(t.size),
                t.status.to_string(),
                progress_cell(t),
            ]
        })
        .collect();

    let mut widths = header.map(|h| h.chars().count());
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let line = |out: &mut String, cells: [&str; 5]| {
        let mut parts = Vec::with_capacity(5);
        for (i, cell) in cells.iter().enumerate() {
            // Size and progress are right-aligned
            if i == 2 || i == 4 {
                parts.push(format!("{:>w$}", cell, w = widths[i]));
            } else {
                parts.push(format!("{:<w$}", cell, w = widths[i]));
            }
        }
        let _ = writeln!(out, "{}", parts.join("  ").trim_end());
    };

    line(&mut out, header);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    let _ = writeln!(out, "{}", rule.join("  "));
    for row in &rows {
        line(
            &mut out,
            [
                row[0].as_str(),
                row[1].as_str(),
                row[2].as_str(),
                row[3].as_str(),
                row[4].as_str(),
            ],
        );
    }
    out
}

/// Full report: title, task table, totals and error list
pub fn render_result(result: &BatchResult) -> String {
    let mut out = String::from("Transfer Summary\n\n");
    if !result.tasks.is_empty() {
        out.push_str(&summary_table(result));
        out.push('\n');
    }

    let _ = writeln!(
        out,
        "Completed: {}  Failed: {}  Files: {}",
        result.completed, result.failed, result.total_files
    );
    let _ = writeln!(
        out,
        "Transferred: {} of {}",
        format_bytes(result.total_transferred),
        format_bytes(result.total_size)
    );

    if !result.errors.is_empty() {
        out.push_str("\nErrors:\n");
        for err in &result.errors {
            let _ = writeln!(out, "  - {}", err);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn task(id: &str, host: &str, path: &str, size: u64, status: TaskStatus) -> TransferTask {
        TransferTask {
            id: id.to_string(),
            host_name: host.to_string(),
            remote_path: path.to_string(),
            local_path: PathBuf::from("/tmp/x"),
            size,
            status,
            transferred: if status == TaskStatus::Completed { size } else { 0 },
            error: (status == TaskStatus::Failed).then(|| "Connection failed: reset".to_string()),
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(50 * 1024 * 1024), "50.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
        assert_eq!(format_bytes(5 * 1024u64.pow(5)), "5120.0 TB");
    }

    #[test]
    fn test_summary_table_rows() {
        let result = BatchResult {
            success: false,
            completed: 1,
            failed: 1,
            total_files: 2,
            total_size: 3072,
            total_transferred: 1024,
            errors: vec!["db: /var/log/db.log: Connection failed: reset".to_string()],
            tasks: vec![
                task("task_1", "web", "/var/log/app.log", 1024, TaskStatus::Completed),
                task("task_2", "db", "/var/log/db.log", 2048, TaskStatus::Failed),
            ],
        };

        let table = summary_table(&result);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Server"));
        assert!(lines[2].contains("app.log") && lines[2].contains("1.0 KB") && lines[2].ends_with("100%"));
        assert!(lines[3].contains("failed") && lines[3].ends_with("Failed"));

        let report = render_result(&result);
        assert!(report.contains("Completed: 1  Failed: 1  Files: 2"));
        assert!(report.contains("Transferred: 1.0 KB of 3.0 KB"));
        assert!(report.contains("  - db: /var/log/db.log"));
    }
}
