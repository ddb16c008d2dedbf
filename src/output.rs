use std::io::{self, Write};

use serde::Serialize;

use crate::app::{GroupResult, SummaryResult, TaxonomyResult, ValidationResult};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    /// Short human summary on stdout.
    Interactive,
    /// Pretty JSON of the command result on stdout.
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_group(result: &GroupResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_validation(result: &ValidationResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_taxonomy(result: &TaxonomyResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_summary(result: &SummaryResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_group(result: &GroupResult) {
        println!(
            "{} genomes, {} components, {} reference groups (threshold {}, min size {}, {})",
            result.genomes,
            result.components.len(),
            result.components.iter().filter(|c| c.qualifies).count(),
            result.threshold,
            result.min_group_size,
            result.order,
        );
        for component in result.components.iter().filter(|c| c.qualifies) {
            if let Some(group) = component.group {
                println!("  group {group}: {} genomes", component.size);
            }
        }
        println!("  unassigned: {}", result.unassigned);
        if let Some(report) = &result.materialized {
            println!("  staged {} genomes under {}", report.copied, report.layout_root);
            for failure in &report.failures {
                println!("  ! {}: {}", failure.genome, failure.reason);
            }
        }
    }

    pub fn print_validation(result: &ValidationResult) {
        println!(
            "{}: {} trials against {} groups, {} skipped (seed {})",
            result.mode, result.trials, result.groups, result.skipped, result.seed
        );
        println!("  verdicts: {}", result.output);
        println!("  trials:   {}", result.trials_file);
    }

    pub fn print_taxonomy(result: &TaxonomyResult) {
        println!(
            "{} of {} genomes classified",
            result.classified, result.genomes
        );
        for gap in &result.gaps {
            println!("  ? {}: {}", gap.genome, gap.reason);
        }
        println!("  records: {}", result.output);
        if !result.gaps.is_empty() {
            println!("  unclassified copies: {}", result.unclassified_dir);
        }
    }

    pub fn print_summary(result: &SummaryResult) {
        println!(
            "{} rows over {} reference groups ({} without an oracle call)",
            result.rows, result.groups, result.oracle_unknown
        );
        println!("  table: {}", result.output);
    }
}
