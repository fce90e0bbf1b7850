use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::validate::ValidationReport;

/// Category of a tally form within a form set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FormCategory {
    Constituency,
    PartyList,
}

/// Header fields printed at the top of each tally sheet.
///
/// Every field is optional because continuation pages usually repeat only
/// the table, not the header.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct HeaderFields {
    /// Polling location (district / subdistrict).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    /// Election date as written on the form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Polling station identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub station: Option<String>,
}

/// Ballot statistics block for one form.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct BallotStats {
    /// Ballots allocated to the station.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allocated: Option<i64>,
    /// Ballots used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used: Option<i64>,
    /// Valid ballots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid: Option<i64>,
    /// Void (spoiled) ballots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub void: Option<i64>,
    /// "No vote" ballots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_vote: Option<i64>,
}

/// One candidate row of the vote-count table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct VoteRow {
    /// Candidate number as printed on the ballot.
    pub candidate_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_name: Option<String>,
    /// Vote count in digits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    /// Vote count written out in words, as it appears on the sheet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_text: Option<String>,
}

/// Raw extraction result for a single page image.
///
/// Produced by the page extractor adapter, consumed only by the
/// consolidator. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct PageRecord {
    /// Zero-based index of the page within the form set.
    pub page_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<FormCategory>,
    #[serde(default)]
    pub header: HeaderFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ballots: Option<BallotStats>,
    /// Vote rows in the order they appear on the page.
    #[serde(default)]
    pub votes: Vec<VoteRow>,
}

/// Merged result for one logical form.
///
/// Created once per extraction request, mutated only during consolidation,
/// then read-only for validation and evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConsolidatedForm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<FormCategory>,
    #[serde(default)]
    pub header: HeaderFields,
    #[serde(default)]
    pub ballots: BallotStats,
    /// Vote rows keyed by unique candidate number, in first-appearance order.
    #[serde(default)]
    pub votes: Vec<VoteRow>,
    /// Number of pages merged into this form.
    pub page_count: usize,
    /// Attached after validation; never mutated afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
}

impl ConsolidatedForm {
    /// Total of the non-null vote-row counts; `None` when the sum would
    /// overflow.
    pub fn vote_total(&self) -> Option<i64> {
        self.votes
            .iter()
            .filter_map(|row| row.count)
            .try_fold(0i64, |total, count| total.checked_add(count))
    }

    /// Look up a vote row by candidate number.
    pub fn vote_row(&self, candidate_number: u32) -> Option<&VoteRow> {
        self.votes
            .iter()
            .find(|row| row.candidate_number == candidate_number)
    }
}
