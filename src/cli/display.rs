//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use std::io::{self, Write};

use super::commands::{ContextEntry, LookupInfo, PlanSummary};
use crate::config::{ValidationResult, ValidationSeverity};

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    // Calculate column widths
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    // Header
    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        output.push_str(&format!(
            "{:width$}",
            header.to_uppercase(),
            width = widths[i]
        ));
    }
    output.push('\n');

    // Rows
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            if i < widths.len() {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(cell);
            }
        }
        output.push('\n');
    }

    output
}

// ============================================================================
// Context display
// ============================================================================

/// Format stored context values; unknown keys are marked with `?`
pub fn format_context_list(entries: &[ContextEntry]) -> String {
    let headers = &["", "KEY", "VALUE"];
    let rows: Vec<Vec<String>> = entries
        .iter()
        .map(|entry| {
            vec![
                if entry.known { " " } else { "?" }.to_string(),
                entry.key.clone(),
                entry.value.clone(),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format cached lookups
pub fn format_lookup_list(lookups: &[LookupInfo]) -> String {
    let headers = &["KEY", "VPC", "AZS", "PUBLIC", "PRIVATE"];
    let rows: Vec<Vec<String>> = lookups
        .iter()
        .map(|l| {
            vec![
                l.key.clone(),
                l.vpc_id.clone(),
                l.azs.to_string(),
                l.public_subnets.to_string(),
                l.private_subnets.to_string(),
            ]
        })
        .collect();

    format_table(headers, rows)
}

// ============================================================================
// Plan display
// ============================================================================

pub fn format_plan(summary: &PlanSummary) -> String {
    let mut output = String::new();

    output.push_str(&format!("Stack:       {}\n", summary.stack_name));
    output.push_str(&format!("Environment: {}\n", summary.environment));
    output.push_str(&format!("Network:     {}\n", summary.network));
    output.push_str(&format!("Kubernetes:  {}\n", summary.kubernetes_version));
    output.push_str(&format!("Strategy:    {}\n", summary.strategy));
    output.push_str(&format!("Capacity:    {}\n", summary.capacity));
    output.push_str(&format!(
        "Parameters:  {}   Outputs: {}\n\n",
        summary.parameters, summary.outputs
    ));

    let rows: Vec<Vec<String>> = summary
        .resources
        .iter()
        .map(|(resource_type, count)| vec![resource_type.clone(), count.to_string()])
        .collect();
    output.push_str(&format_table(&["TYPE", "COUNT"], rows));

    output
}

// ============================================================================
// Validation display
// ============================================================================

/// Format validation result for display
pub fn format_validation_result(result: &ValidationResult, stack_name: &str) -> String {
    let mut output = String::new();

    if result.passed {
        output.push_str(&format!("✓ {} is valid\n", stack_name));
    } else {
        output.push_str(&format!("✗ {} is invalid\n", stack_name));
    }

    if !result.messages.is_empty() {
        output.push('\n');
    }
    for msg in &result.messages {
        let level = match msg.severity {
            ValidationSeverity::Info => "info",
            ValidationSeverity::Warning => "warning",
            ValidationSeverity::Error => "error",
        };
        output.push_str(&format!("  [{}] {}: {}\n", msg.code, level, msg.message));
        if let Some(ref suggestion) = msg.suggestion {
            output.push_str(&format!("         {}\n", suggestion));
        }
    }

    output
}

// ============================================================================
// Output
// ============================================================================

/// Write command output. A closed reader (e.g. `| head`) ends output
/// quietly instead of failing the command.
pub fn write_output<W: Write>(out: &mut W, text: &str) -> io::Result<()> {
    match out.write_all(text.as_bytes()).and_then(|_| out.flush()) {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "no space left"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_output() {
        let mut buf = Vec::new();
        write_output(&mut buf, "{}\n").unwrap();
        assert_eq!(buf, b"{}\n");
    }

    #[test]
    fn test_write_output_closed_pipe_is_clean() {
        assert!(write_output(&mut ClosedPipe, "AWSTemplateFormatVersion").is_ok());
    }

    #[test]
    fn test_write_output_other_errors_propagate() {
        let result = write_output(&mut FullDisk, "x");
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::Other);
    }

    #[test]
    fn test_format_table() {
        let headers = &["NAME", "AGE"];
        let rows = vec![
            vec!["Alice".to_string(), "30".to_string()],
            vec!["Bob".to_string(), "25".to_string()],
        ];

        let output = format_table(headers, rows);
        assert!(output.contains("NAME"));
        assert!(output.contains("Alice"));
        assert!(output.contains("Bob"));
    }

    #[test]
    fn test_format_table_empty() {
        let headers = &["NAME"];
        let rows: Vec<Vec<String>> = vec![];

        let output = format_table(headers, rows);
        assert!(output.contains("No resources found"));
    }

    #[test]
    fn test_format_context_list() {
        let entries = vec![
            ContextEntry {
                key: "spot_only".to_string(),
                value: "1".to_string(),
                known: true,
            },
            ContextEntry {
                key: "typo_key".to_string(),
                value: "x".to_string(),
                known: false,
            },
        ];

        let output = format_context_list(&entries);
        assert!(output.contains("spot_only"));
        assert!(output.contains("?")); // Unknown marker
    }

    #[test]
    fn test_format_plan() {
        let mut resources = BTreeMap::new();
        resources.insert("AWS::EC2::LaunchTemplate".to_string(), 1);
        let summary = PlanSummary {
            stack_name: "demo".to_string(),
            environment: "aws://unknown-account/unknown-region".to_string(),
            network: "new VPC".to_string(),
            kubernetes_version: "1.18".to_string(),
            strategy: "spot-autoscaling-group".to_string(),
            capacity: "3..3 x m5.large spot".to_string(),
            resources,
            parameters: 2,
            outputs: 4,
        };

        let output = format_plan(&summary);
        assert!(output.contains("Strategy:    spot-autoscaling-group"));
        assert!(output.contains("AWS::EC2::LaunchTemplate"));
    }

    #[test]
    fn test_format_validation_valid() {
        let result = ValidationResult::new().info("CAP002", "no worker nodes");

        let output = format_validation_result(&result, "demo");
        assert!(output.contains("✓"));
        assert!(output.contains("[CAP002] info"));
    }

    #[test]
    fn test_format_validation_invalid() {
        let result = ValidationResult::new().error("ENV002", "No cached lookup", Some("Record one"));

        let output = format_validation_result(&result, "demo");
        assert!(output.contains("✗"));
        assert!(output.contains("invalid"));
        assert!(output.contains("Record one"));
    }
}
