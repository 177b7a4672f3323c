// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Plain-text rendering for operator commands.

use chrono::SecondsFormat;
use weft_server_secrets::{ProjectName, RotationReport, SecretInfo};

const HEADERS: [&str; 4] = ["NAME", "DIGEST", "NAMESPACE", "DATE"];

/// Render secrets as an aligned `NAME | DIGEST | NAMESPACE | DATE` table.
pub fn render_secret_table(project: &ProjectName, secrets: &[SecretInfo]) -> String {
	if secrets.is_empty() {
		return format!("No secrets were found in {project} project.\n");
	}

	let rows: Vec<[String; 4]> = secrets
		.iter()
		.map(|s| {
			[
				s.name.clone(),
				s.digest.clone(),
				s.namespace_label().to_string(),
				s.updated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
			]
		})
		.collect();

	let mut widths = HEADERS.map(str::len);
	for row in &rows {
		for (width, cell) in widths.iter_mut().zip(row.iter()) {
			*width = (*width).max(cell.len());
		}
	}

	let mut out = format!("Secrets for project: {project}\n");
	push_row(&mut out, &widths, HEADERS.iter().copied());
	let rule = widths.map(|w| "-".repeat(w));
	push_row(&mut out, &widths, rule.iter().map(String::as_str));
	for row in &rows {
		push_row(&mut out, &widths, row.iter().map(String::as_str));
	}
	out
}

fn push_row<'a>(out: &mut String, widths: &[usize; 4], cells: impl Iterator<Item = &'a str>) {
	let line = cells
		.zip(widths.iter())
		.map(|(cell, width)| format!("{cell:<width$}"))
		.collect::<Vec<_>>()
		.join(" | ");
	out.push_str(line.trim_end());
	out.push('\n');
}

pub fn render_rotation_reports(reports: &[RotationReport]) -> String {
	if reports.is_empty() {
		return "No projects hold secrets; nothing to rotate.\n".to_string();
	}
	reports.iter().map(|r| format!("{r}\n")).collect()
}
