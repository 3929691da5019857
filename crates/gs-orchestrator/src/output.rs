//! Terminal output for the controller CLI

use tabled::{settings::Style, Table, Tabled};

use gs_core::traits::{NodeInfo, RemoteEntry, VersionInfo};
use gs_core::types::Workload;

/// Format workloads as a table
pub fn format_workloads(workloads: &[Workload]) -> String {
    if workloads.is_empty() {
        return "No workloads".to_string();
    }

    #[derive(Tabled)]
    struct WorkloadRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "TYPE")]
        flavor: String,
        #[tabled(rename = "VERSION")]
        version: String,
        #[tabled(rename = "CT")]
        container_id: u32,
        #[tabled(rename = "NODE")]
        node: String,
        #[tabled(rename = "ADDRESS")]
        address: String,
        #[tabled(rename = "STATUS")]
        status: String,
    }

    let rows: Vec<WorkloadRow> = workloads
        .iter()
        .map(|w| WorkloadRow {
            id: w.id.to_string(),
            name: w.name.clone(),
            flavor: w.flavor.to_string(),
            version: w.game_version.clone(),
            container_id: w.container_id,
            node: w.node.clone(),
            address: format!("{}:{}", w.address, w.port),
            status: w.status.to_string(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format a single workload as key/value lines
pub fn format_workload(workload: &Workload) -> String {
    let mut lines = vec![
        format!("ID:        {}", workload.id),
        format!("Name:      {}", workload.name),
        format!("Type:      {}", workload.flavor.display_name()),
        format!("Version:   {}", workload.game_version),
        format!("Container: {} on {}", workload.container_id, workload.node),
        format!("Hostname:  {}", workload.hostname),
        format!("Address:   {}", workload.address),
        format!("Ports:     {}", join_ports(&workload.ports())),
        format!(
            "Resources: {} cores, {} MB, {} GB disk",
            workload.resources.cores, workload.resources.memory_mb, workload.resources.disk_gb
        ),
        format!("Status:    {}", workload.status),
    ];
    for (key, value) in &workload.settings {
        lines.push(format!("  {}={}", key, value));
    }
    lines.join("\n")
}

fn join_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn format_nodes(nodes: &[NodeInfo]) -> String {
    if nodes.is_empty() {
        return "No nodes".to_string();
    }

    #[derive(Tabled)]
    struct NodeRow {
        #[tabled(rename = "NODE")]
        name: String,
        #[tabled(rename = "STATUS")]
        status: &'static str,
    }

    let rows: Vec<NodeRow> = nodes
        .iter()
        .map(|n| NodeRow {
            name: n.name.clone(),
            status: if n.online { "online" } else { "offline" },
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn format_versions(versions: &[VersionInfo]) -> String {
    versions
        .iter()
        .map(|v| format!("{:<16} {}", v.id, v.kind))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format a directory listing, directories marked with a trailing slash
pub fn format_entries(entries: &[RemoteEntry]) -> String {
    if entries.is_empty() {
        return "(empty)".to_string();
    }

    #[derive(Tabled)]
    struct EntryRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "SIZE")]
        size: String,
    }

    let rows: Vec<EntryRow> = entries
        .iter()
        .map(|e| EntryRow {
            name: if e.is_dir {
                format!("{}/", e.name)
            } else {
                e.name.clone()
            },
            size: if e.is_dir {
                "-".to_string()
            } else {
                human_size(e.size)
            },
        })
        .collect();
    Table::new(rows).with(Style::rounded()).to_string()
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

/// Print a success message in green
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 B");
        assert_eq!(human_size(2048), "2.0 KB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_empty_listings() {
        assert_eq!(format_workloads(&[]), "No workloads");
        assert_eq!(format_entries(&[]), "(empty)");
    }

    #[test]
    fn test_entries_mark_directories() {
        let out = format_entries(&[
            RemoteEntry {
                name: "world".to_string(),
                path: "/PGSM/world".to_string(),
                is_dir: true,
                size: 4096,
            },
            RemoteEntry {
                name: "server.properties".to_string(),
                path: "/PGSM/server.properties".to_string(),
                is_dir: false,
                size: 300,
            },
        ]);
        assert!(out.contains("world/"));
        assert!(out.contains("300 B"));
    }
}
