use colored::Colorize;

/// Format a byte count with a binary unit: 1.5 MB
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

/// A ruled heading for one phase of a run.
pub fn step_banner(title: &str) -> String {
    let rule = "=".repeat(60);
    format!("\n{rule}\n  {}\n{rule}", title.bold())
}

/// Show at most `limit` names, with an ellipsis when more exist.
pub fn preview(names: &[String], limit: usize) -> String {
    let shown = names.iter().take(limit).cloned().collect::<Vec<_>>().join(", ");
    if names.len() > limit {
        format!("{shown}, ...")
    } else {
        shown
    }
}
