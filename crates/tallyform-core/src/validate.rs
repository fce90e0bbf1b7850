use serde::{Deserialize, Serialize};

use crate::form::{ConsolidatedForm, FormCategory};

/// Name of the composite entry appended to every report.
pub const ALL_CHECKS: &str = "all_checks";

const CHECK_COMPLETENESS: &str = "completeness";
const CHECK_BALLOT_ARITHMETIC: &str = "ballot_arithmetic";
const CHECK_VOTE_SUM: &str = "vote_sum";
const CHECK_NON_NEGATIVITY: &str = "non_negativity";

/// Outcome of one named validation check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckEntry {
    pub name: String,
    pub passed: bool,
    pub reason: String,
    /// Score in [0,1]; individual checks are 0 or 1, the composite entry
    /// carries checks_passed / total_checks.
    pub score: f64,
}

/// Ordered validation report for one consolidated form.
///
/// Every check declared for the form category appears exactly once, even
/// when it fails; failure is data, not silence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationReport {
    pub category: FormCategory,
    pub checks: Vec<CheckEntry>,
}

impl ValidationReport {
    /// True when the composite check passed.
    pub fn passed(&self) -> bool {
        self.check(ALL_CHECKS).is_some_and(|entry| entry.passed)
    }

    /// Composite score (checks_passed / total_checks).
    pub fn composite_score(&self) -> f64 {
        self.check(ALL_CHECKS).map(|entry| entry.score).unwrap_or(0.0)
    }

    /// Look up a check entry by name.
    pub fn check(&self, name: &str) -> Option<&CheckEntry> {
        self.checks.iter().find(|entry| entry.name == name)
    }
}

/// Run the fixed, category-dependent check set on a consolidated form.
///
/// Never fails: a field missing for a check is that check failing with a
/// descriptive reason, not an error.
pub fn validate(form: &ConsolidatedForm, category: FormCategory) -> ValidationReport {
    let mut checks = vec![
        check_completeness(form, category),
        check_ballot_arithmetic(form),
        check_vote_sum(form),
        check_non_negativity(form),
    ];

    let passed = checks.iter().filter(|entry| entry.passed).count();
    let total = checks.len();
    let score = passed as f64 / total as f64;
    checks.push(CheckEntry {
        name: ALL_CHECKS.to_string(),
        passed: passed == total,
        reason: format!("{passed}/{total} checks passed"),
        score,
    });

    ValidationReport { category, checks }
}

fn required_header_fields(category: FormCategory) -> &'static [&'static str] {
    // Party-list continuation sets inherit the date from the constituency
    // cover sheet, so only the constituency form requires it.
    match category {
        FormCategory::Constituency => &["location", "date", "station"],
        FormCategory::PartyList => &["location", "station"],
    }
}

fn check_completeness(form: &ConsolidatedForm, category: FormCategory) -> CheckEntry {
    let mut missing = Vec::new();
    for &field in required_header_fields(category) {
        let present = match field {
            "location" => form.header.location.is_some(),
            "date" => form.header.date.is_some(),
            "station" => form.header.station.is_some(),
            _ => true,
        };
        if !present {
            missing.push(field);
        }
    }

    if missing.is_empty() {
        passing(CHECK_COMPLETENESS, "all required header fields present")
    } else {
        failing(
            CHECK_COMPLETENESS,
            format!("missing required field(s): {}", missing.join(", ")),
        )
    }
}

fn check_ballot_arithmetic(form: &ConsolidatedForm) -> CheckEntry {
    let stats = &form.ballots;
    let mut missing = Vec::new();
    if stats.used.is_none() {
        missing.push("used");
    }
    if stats.valid.is_none() {
        missing.push("valid");
    }
    if stats.void.is_none() {
        missing.push("void");
    }
    if stats.no_vote.is_none() {
        missing.push("no_vote");
    }
    if !missing.is_empty() {
        return failing(
            CHECK_BALLOT_ARITHMETIC,
            format!("cannot verify: missing {}", missing.join(", ")),
        );
    }

    // Hand-counted totals must match exactly; no tolerance. Checked
    // arithmetic: an overflowing sum is a failing check, not a panic.
    let used = stats.used.unwrap_or(0);
    let accounted = stats
        .valid
        .unwrap_or(0)
        .checked_add(stats.void.unwrap_or(0))
        .and_then(|sum| sum.checked_add(stats.no_vote.unwrap_or(0)));
    let Some(accounted) = accounted else {
        return failing(
            CHECK_BALLOT_ARITHMETIC,
            "valid + void + no_vote overflows the count range",
        );
    };
    let Some(delta) = used.checked_sub(accounted) else {
        return failing(
            CHECK_BALLOT_ARITHMETIC,
            "used - (valid + void + no_vote) overflows the count range",
        );
    };
    if delta == 0 {
        passing(CHECK_BALLOT_ARITHMETIC, "used == valid + void + no_vote")
    } else {
        failing(
            CHECK_BALLOT_ARITHMETIC,
            format!("used differs from valid + void + no_vote by {delta}"),
        )
    }
}

fn check_vote_sum(form: &ConsolidatedForm) -> CheckEntry {
    let Some(valid) = form.ballots.valid else {
        return failing(CHECK_VOTE_SUM, "cannot verify: missing valid");
    };

    // Upper bound only: strike-through and rounding cases legitimately
    // leave the sum below the valid count.
    let Some(total) = form.vote_total() else {
        return failing(CHECK_VOTE_SUM, "vote total overflows the count range");
    };
    if total <= valid {
        passing(
            CHECK_VOTE_SUM,
            format!("vote total {total} within valid ballots {valid}"),
        )
    } else {
        failing(
            CHECK_VOTE_SUM,
            format!("vote total {total} exceeds valid ballots {valid}"),
        )
    }
}

fn check_non_negativity(form: &ConsolidatedForm) -> CheckEntry {
    let stats = &form.ballots;
    let mut negative = Vec::new();

    for (name, value) in [
        ("allocated", stats.allocated),
        ("used", stats.used),
        ("valid", stats.valid),
        ("void", stats.void),
        ("no_vote", stats.no_vote),
    ] {
        if value.is_some_and(|v| v < 0) {
            negative.push(name.to_string());
        }
    }

    for row in &form.votes {
        if row.count.is_some_and(|v| v < 0) {
            negative.push(format!("votes[{}].count", row.candidate_number));
        }
    }

    if negative.is_empty() {
        passing(CHECK_NON_NEGATIVITY, "all numeric fields are non-negative")
    } else {
        failing(
            CHECK_NON_NEGATIVITY,
            format!("negative value(s) in: {}", negative.join(", ")),
        )
    }
}

fn passing(name: &str, reason: impl Into<String>) -> CheckEntry {
    CheckEntry {
        name: name.to_string(),
        passed: true,
        reason: reason.into(),
        score: 1.0,
    }
}

fn failing(name: &str, reason: impl Into<String>) -> CheckEntry {
    CheckEntry {
        name: name.to_string(),
        passed: false,
        reason: reason.into(),
        score: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::{BallotStats, HeaderFields, VoteRow};

    fn complete_form() -> ConsolidatedForm {
        ConsolidatedForm {
            category: Some(FormCategory::Constituency),
            header: HeaderFields {
                location: Some("District 4".to_string()),
                date: Some("2023-05-14".to_string()),
                station: Some("Station 12".to_string()),
            },
            ballots: BallotStats {
                allocated: Some(600),
                used: Some(500),
                valid: Some(480),
                void: Some(15),
                no_vote: Some(5),
            },
            votes: vec![
                VoteRow {
                    candidate_number: 1,
                    candidate_name: Some("A".to_string()),
                    count: Some(300),
                    count_text: None,
                },
                VoteRow {
                    candidate_number: 2,
                    candidate_name: Some("B".to_string()),
                    count: Some(180),
                    count_text: None,
                },
            ],
            page_count: 3,
            validation: None,
        }
    }

    #[test]
    fn consistent_form_passes_every_check() {
        let report = validate(&complete_form(), FormCategory::Constituency);
        assert!(report.passed());
        assert_eq!(report.composite_score(), 1.0);
        // One entry per declared check plus the composite.
        assert_eq!(report.checks.len(), 5);
    }

    #[test]
    fn off_by_one_arithmetic_reports_the_delta() {
        let mut form = complete_form();
        form.ballots.used = Some(501);

        let report = validate(&form, FormCategory::Constituency);
        let entry = report.check("ballot_arithmetic").unwrap();
        assert!(!entry.passed);
        assert!(entry.reason.contains("by 1"), "reason: {}", entry.reason);
        assert!(!report.passed());
    }

    #[test]
    fn vote_sum_may_fall_short_but_not_exceed_valid() {
        let mut form = complete_form();
        form.votes[0].count = Some(100);
        let report = validate(&form, FormCategory::Constituency);
        assert!(report.check("vote_sum").unwrap().passed);

        form.votes[0].count = Some(400);
        let report = validate(&form, FormCategory::Constituency);
        assert!(!report.check("vote_sum").unwrap().passed);
    }

    #[test]
    fn missing_numeric_field_fails_that_check_without_panicking() {
        let mut form = complete_form();
        form.ballots.no_vote = None;

        let report = validate(&form, FormCategory::Constituency);
        let entry = report.check("ballot_arithmetic").unwrap();
        assert!(!entry.passed);
        assert!(entry.reason.contains("no_vote"));
        // The remaining checks still appear.
        assert_eq!(report.checks.len(), 5);
    }

    #[test]
    fn missing_header_fields_are_named() {
        let mut form = complete_form();
        form.header.date = None;
        form.header.station = None;

        let report = validate(&form, FormCategory::Constituency);
        let entry = report.check("completeness").unwrap();
        assert!(!entry.passed);
        assert!(entry.reason.contains("date"));
        assert!(entry.reason.contains("station"));
    }

    #[test]
    fn party_list_does_not_require_a_date() {
        let mut form = complete_form();
        form.header.date = None;

        let report = validate(&form, FormCategory::PartyList);
        assert!(report.check("completeness").unwrap().passed);
    }

    #[test]
    fn negative_counts_are_flagged() {
        let mut form = complete_form();
        form.votes[1].count = Some(-4);

        let report = validate(&form, FormCategory::Constituency);
        let entry = report.check("non_negativity").unwrap();
        assert!(!entry.passed);
        assert!(entry.reason.contains("votes[2].count"));
    }

    #[test]
    fn extreme_counts_fail_their_checks_instead_of_panicking() {
        let mut form = complete_form();
        form.ballots.valid = Some(i64::MAX);
        form.ballots.void = Some(i64::MAX);

        let report = validate(&form, FormCategory::Constituency);
        let entry = report.check("ballot_arithmetic").unwrap();
        assert!(!entry.passed);
        assert!(entry.reason.contains("overflow"), "reason: {}", entry.reason);

        // The overflowing vote table fails vote_sum the same way.
        form.votes[0].count = Some(i64::MAX);
        form.votes[1].count = Some(i64::MAX);
        let report = validate(&form, FormCategory::Constituency);
        let entry = report.check("vote_sum").unwrap();
        assert!(!entry.passed);
        assert!(entry.reason.contains("overflow"), "reason: {}", entry.reason);
        // Every declared check is still present.
        assert_eq!(report.checks.len(), 5);
    }

    #[test]
    fn composite_score_counts_passed_checks() {
        let mut form = complete_form();
        form.ballots.used = Some(501);
        form.header.date = None;

        let report = validate(&form, FormCategory::Constituency);
        // completeness and ballot_arithmetic fail, two checks pass.
        assert_eq!(report.composite_score(), 0.5);
    }
}
