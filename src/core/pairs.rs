use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use crate::core::distance::{
    calculate_bounding_box, distance_between, is_within_bounding_box, PreparedLocations,
};
use crate::models::{Location, School, Student};

/// One school reachable from a student
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub school: usize,
    pub distance: f64,
}

/// Student/school combination annotated with distance in miles
///
/// Indices refer to positions in the slices the set was built from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidatePair {
    pub student: usize,
    pub school: usize,
    pub distance: f64,
}

impl CandidatePair {
    /// Stream order: ascending distance, then student position, then school
    /// position.
    fn stream_cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.student.cmp(&other.student))
            .then_with(|| self.school.cmp(&other.school))
    }
}

impl Eq for CandidatePair {}

impl PartialOrd for CandidatePair {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CandidatePair {
    fn cmp(&self, other: &Self) -> Ordering {
        self.stream_cmp(other)
    }
}

/// Complete candidate set for one scope
///
/// Holds, per student, every school of the scope (or every school within the
/// cutoff) sorted by ascending distance, ties broken by school position. The
/// global distance-ordered pair sequence is produced lazily by [`stream`].
///
/// [`stream`]: CandidateSet::stream
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    rows: Vec<Vec<Candidate>>,
}

impl CandidateSet {
    /// Build the candidate rows for `students` against `schools`
    ///
    /// # Arguments
    /// * `students` - Students of the scope, in traversal order
    /// * `schools` - Schools of the scope
    /// * `cutoff_miles` - Optional maximum distance; `None` keeps every pair
    pub fn build(students: &[Student], schools: &[School], cutoff_miles: Option<f64>) -> Self {
        let locations: Vec<Location> = schools.iter().map(|school| school.location).collect();
        let prepared = PreparedLocations::new(&locations);
        let mut distances = Vec::with_capacity(locations.len());

        let rows = students
            .iter()
            .map(|student| {
                let mut row: Vec<Candidate> = match cutoff_miles {
                    None => {
                        prepared.distances_from(&student.location, &mut distances);
                        distances
                            .iter()
                            .enumerate()
                            .map(|(school, &distance)| Candidate { school, distance })
                            .collect()
                    }
                    Some(cutoff) => within_cutoff(&student.location, &locations, cutoff),
                };

                row.sort_by(|a, b| {
                    a.distance
                        .total_cmp(&b.distance)
                        .then_with(|| a.school.cmp(&b.school))
                });
                row
            })
            .collect();

        Self { rows }
    }

    /// Number of students in the set
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Total number of candidate pairs
    pub fn pair_count(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }

    /// Candidates of one student, nearest first
    pub fn candidates(&self, student: usize) -> &[Candidate] {
        self.rows.get(student).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every pair of the scope in ascending distance order
    pub fn stream(&self) -> PairStream<'_> {
        let heap = self
            .rows
            .iter()
            .enumerate()
            .filter_map(|(student, row)| {
                row.first().map(|head| {
                    Reverse(CandidatePair {
                        student,
                        school: head.school,
                        distance: head.distance,
                    })
                })
            })
            .collect();

        PairStream {
            set: self,
            cursors: vec![0; self.rows.len()],
            heap,
        }
    }
}

fn within_cutoff(origin: &Location, schools: &[Location], cutoff: f64) -> Vec<Candidate> {
    let bbox = calculate_bounding_box(origin.lat, origin.lon, cutoff);

    schools
        .iter()
        .enumerate()
        .filter(|(_, location)| is_within_bounding_box(location.lat, location.lon, &bbox))
        .map(|(school, location)| Candidate {
            school,
            distance: distance_between(origin, location),
        })
        .filter(|candidate| candidate.distance <= cutoff)
        .collect()
}

/// Lazy k-way merge over the per-student candidate rows
pub struct PairStream<'a> {
    set: &'a CandidateSet,
    cursors: Vec<usize>,
    heap: BinaryHeap<Reverse<CandidatePair>>,
}

impl Iterator for PairStream<'_> {
    type Item = CandidatePair;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse(pair) = self.heap.pop()?;

        let cursor = &mut self.cursors[pair.student];
        *cursor += 1;
        if let Some(next) = self.set.rows[pair.student].get(*cursor) {
            self.heap.push(Reverse(CandidatePair {
                student: pair.student,
                school: next.school,
                distance: next.distance,
            }));
        }

        Some(pair)
    }
}
