use std::collections::HashMap;

use crate::form::{BallotStats, ConsolidatedForm, FormCategory, PageRecord, VoteRow};

/// Merge an ordered sequence of page records into one logical form.
///
/// Pages are processed in the given order; header and statistics fields are
/// first-seen-wins, so the order is significant. Vote rows are merged by
/// candidate number: later pages may fill sub-fields an earlier page left
/// null, but non-null values are never overwritten and counts are never
/// summed, since each page repeats the same cumulative table.
///
/// An empty page list yields an all-null form with an empty vote table;
/// the validator flags the incompleteness.
pub fn consolidate(pages: &[PageRecord]) -> ConsolidatedForm {
    let mut form = ConsolidatedForm::default();
    let mut row_index: HashMap<u32, usize> = HashMap::new();

    for page in pages {
        if form.category.is_none() {
            form.category = page.category;
        }

        fill_header(&mut form, page);
        if let Some(stats) = &page.ballots {
            fill_ballots(&mut form.ballots, stats);
        }

        for row in &page.votes {
            match row_index.get(&row.candidate_number) {
                Some(&idx) => fill_vote_row(&mut form.votes[idx], row),
                None => {
                    row_index.insert(row.candidate_number, form.votes.len());
                    form.votes.push(row.clone());
                }
            }
        }

        form.page_count += 1;
    }

    form
}

/// Split a form set into its logical forms and consolidate each.
///
/// Pages are grouped by category in order of first appearance; pages with
/// no category are folded into the most recent group, matching how
/// continuation sheets omit the category header. A set whose pages are all
/// uncategorized produces a single form.
pub fn consolidate_form_set(pages: &[PageRecord]) -> Vec<ConsolidatedForm> {
    if pages.is_empty() {
        return Vec::new();
    }

    let mut groups: Vec<(Option<FormCategory>, Vec<PageRecord>)> = Vec::new();

    for page in pages {
        let target = match page.category {
            Some(category) => groups
                .iter()
                .position(|(group, _)| *group == Some(category)),
            None => groups.len().checked_sub(1),
        };

        match target {
            Some(idx) => groups[idx].1.push(page.clone()),
            None => groups.push((page.category, vec![page.clone()])),
        }
    }

    groups
        .into_iter()
        .map(|(_, group)| consolidate(&group))
        .collect()
}

fn fill_header(form: &mut ConsolidatedForm, page: &PageRecord) {
    let header = &mut form.header;
    if header.location.is_none() {
        header.location = page.header.location.clone();
    }
    if header.date.is_none() {
        header.date = page.header.date.clone();
    }
    if header.station.is_none() {
        header.station = page.header.station.clone();
    }
}

fn fill_ballots(target: &mut BallotStats, source: &BallotStats) {
    target.allocated = target.allocated.or(source.allocated);
    target.used = target.used.or(source.used);
    target.valid = target.valid.or(source.valid);
    target.void = target.void.or(source.void);
    target.no_vote = target.no_vote.or(source.no_vote);
}

fn fill_vote_row(target: &mut VoteRow, source: &VoteRow) {
    if target.candidate_name.is_none() {
        target.candidate_name = source.candidate_name.clone();
    }
    target.count = target.count.or(source.count);
    if target.count_text.is_none() {
        target.count_text = source.count_text.clone();
    }
}
