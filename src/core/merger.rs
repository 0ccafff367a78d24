use std::collections::HashMap;

use thiserror::Error;

use crate::core::matcher::MatchResult;
use crate::models::PersonRecord;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("person {0} appears more than once in the person table")]
    DuplicatePerson(u64),

    #[error("person {0} was matched in more than one scope")]
    DuplicateAgent(u64),

    #[error("match result names unknown person {0}")]
    UnknownAgent(u64),
}

/// Write scope results back onto the person table
///
/// Records are keyed by person id, never by position. Persons that no scope
/// mentions keep `school_id = None`. The output preserves the order of
/// `records`.
pub fn merge_assignments(
    mut records: Vec<PersonRecord>,
    results: &[MatchResult],
) -> Result<Vec<PersonRecord>, MergeError> {
    let mut index: HashMap<u64, usize> = HashMap::with_capacity(records.len());
    for (position, record) in records.iter().enumerate() {
        if index.insert(record.id, position).is_some() {
            return Err(MergeError::DuplicatePerson(record.id));
        }
    }

    let mut merged = vec![false; records.len()];
    for assignment in results.iter().flat_map(|result| &result.assignments) {
        let position = *index
            .get(&assignment.student_id)
            .ok_or(MergeError::UnknownAgent(assignment.student_id))?;

        if std::mem::replace(&mut merged[position], true) {
            return Err(MergeError::DuplicateAgent(assignment.student_id));
        }
        records[position].school_id = assignment.school_id.clone();
    }

    let written = merged.iter().filter(|&&m| m).count();
    tracing::debug!("Merged {} assignments onto {} persons", written, records.len());

    Ok(records)
}
