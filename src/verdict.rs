//! Reading the species-delimitation oracle's text report.
//!
//! The report is a flat list of lines. A positive header switches collection
//! on, a negative header switches it off; no line counts or section order are
//! assumed.

use std::collections::BTreeSet;

use serde::Serialize;

pub const MEMBERS_HEADER: &str = "The following strains are members of the species:";
pub const NON_MEMBERS_HEADER: &str =
    "The following strains were determined to NOT be a member of the species:";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OracleReport {
    pub members: BTreeSet<String>,
    pub non_members: BTreeSet<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Members,
    NonMembers,
}

impl OracleReport {
    pub fn parse(text: &str) -> Self {
        let mut report = OracleReport::default();
        let mut section = Section::Preamble;
        for line in text.lines() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line == MEMBERS_HEADER {
                section = Section::Members;
                continue;
            }
            if line == NON_MEMBERS_HEADER {
                section = Section::NonMembers;
                continue;
            }
            if line.is_empty() {
                continue;
            }
            match section {
                Section::Members => {
                    report.members.insert(line.to_string());
                }
                Section::NonMembers => {
                    report.non_members.insert(line.to_string());
                }
                Section::Preamble => {}
            }
        }
        report
    }

    /// Absence from the member list is a negative verdict.
    pub fn is_member(&self, strain: &str) -> bool {
        self.members.contains(strain)
    }
}

/// Same-species verdict for `probe` in `text`.
pub fn parse_verdict(text: &str, probe: &str) -> bool {
    OracleReport::parse(text).is_member(probe)
}
