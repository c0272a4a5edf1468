//! Output formatting for the demo harness. Deliberately small next to
//! the full `agentroot-cli` formatter set -- this crate has one result
//! shape to render, not five.

use propmatch_core::domain::{ExplanationRecord, RankedListing};

use crate::app::OutputFormat;

pub fn format_search_results(results: &[RankedListing], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(results).unwrap_or_else(|_| "[]".to_string()) + "\n"
        }
        OutputFormat::Cli => {
            if results.is_empty() {
                return "no matching listings\n".to_string();
            }
            let mut out = String::new();
            for r in results {
                out.push_str(&format!(
                    "{:>5.1} [{}] {} -- {} | R{} | {} bed\n",
                    r.score,
                    r.diagnostics.method_label,
                    r.listing.listing_key,
                    r.listing.title,
                    r.listing.price,
                    r.listing.bedrooms,
                ));
            }
            out
        }
    }
}

pub fn format_explanation(record: &ExplanationRecord, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(record).unwrap_or_else(|_| "{}".to_string()) + "\n",
        OutputFormat::Cli => {
            let mut out = format!(
                "{} (#{}) -- match score {:.1}{}\n",
                record.property_title,
                record.listing_key,
                record.match_score,
                if record.cached { " [cached]" } else { "" },
            );
            for p in &record.positive_points {
                out.push_str(&format!("  + {}: {}\n", p.headline, p.detail));
            }
            for p in &record.negative_points {
                out.push_str(&format!("  - {}: {}\n", p.headline, p.detail));
            }
            out.push_str(&format!("\n{}\n", record.summary));
            out
        }
    }
}
