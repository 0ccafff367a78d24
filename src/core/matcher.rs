use serde::{Deserialize, Serialize};

use crate::core::grade::GradeRange;
use crate::core::pairs::CandidateSet;
use crate::models::{School, Student};

/// How the reconciliation pass treats capacity
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ReconcilePolicy {
    /// Bind to the nearest eligible school regardless of enrollment
    IgnoreCapacity,
    /// Scale every capacity by `students / total_capacity + headroom` and
    /// skip schools that are full under the scaled capacity
    ScaledCapacity { headroom: f64 },
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        ReconcilePolicy::IgnoreCapacity
    }
}

/// Matching configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchSettings {
    /// Multiplier on declared capacity during the primary pass
    pub capacity_slack: f64,
    pub reconcile: ReconcilePolicy,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self {
            capacity_slack: 1.0,
            reconcile: ReconcilePolicy::IgnoreCapacity,
        }
    }
}

/// Why a student ended a run without a school
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnassignedReason {
    /// No candidate school offers the student's grade
    NoEligibleFacility,
    /// Eligible schools exist but were full under the reconciliation policy
    CapacityExhausted,
}

/// Outcome for one student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    #[serde(rename = "studentId")]
    pub student_id: u64,
    #[serde(rename = "schoolId")]
    pub school_id: Option<String>,
    #[serde(rename = "distanceMiles")]
    pub distance_miles: Option<f64>,
    #[serde(rename = "unassignedReason", skip_serializing_if = "Option::is_none", default)]
    pub unassigned_reason: Option<UnassignedReason>,
}

/// Final enrollment of one school
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchoolTally {
    #[serde(rename = "schoolId")]
    pub school_id: String,
    pub capacity: f64,
    pub enrolled: u32,
}

impl SchoolTally {
    pub fn is_over_capacity(&self) -> bool {
        f64::from(self.enrolled) > self.capacity
    }
}

/// Counters describing one matching run (or a sum of runs)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStats {
    pub students: usize,
    pub schools: usize,
    pub pairs: usize,
    /// Bound during the primary pass
    pub primary: usize,
    /// Bound during the reconciliation pass
    pub reconciled: usize,
    pub unassigned: usize,
    #[serde(rename = "noEligibleFacility")]
    pub no_eligible_facility: usize,
    #[serde(rename = "capacityExhausted")]
    pub capacity_exhausted: usize,
    #[serde(rename = "overCapacitySchools")]
    pub over_capacity_schools: usize,
}

impl std::ops::AddAssign for MatchStats {
    fn add_assign(&mut self, other: Self) {
        self.students += other.students;
        self.schools += other.schools;
        self.pairs += other.pairs;
        self.primary += other.primary;
        self.reconciled += other.reconciled;
        self.unassigned += other.unassigned;
        self.no_eligible_facility += other.no_eligible_facility;
        self.capacity_exhausted += other.capacity_exhausted;
        self.over_capacity_schools += other.over_capacity_schools;
    }
}

/// Result of the matching process
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// One entry per student, in student order
    pub assignments: Vec<Assignment>,
    /// One entry per school, in school order
    pub tallies: Vec<SchoolTally>,
    pub stats: MatchStats,
}

/// State of a single matching run
///
/// Created by [`Matcher::assign`], threaded through both passes and dropped
/// when the run returns.
struct MatchingContext<'a> {
    schools: &'a [School],
    eligible: Vec<GradeRange>,
    enrolled: Vec<u32>,
    bindings: Vec<Option<(usize, f64)>>,
    unbound: usize,
}

impl<'a> MatchingContext<'a> {
    fn new(students: usize, schools: &'a [School]) -> Self {
        Self {
            schools,
            eligible: schools.iter().map(|school| school.grades).collect(),
            enrolled: vec![0; schools.len()],
            bindings: vec![None; students],
            unbound: students,
        }
    }

    #[inline]
    fn is_bound(&self, student: usize) -> bool {
        self.bindings[student].is_some()
    }

    /// Room is checked before admission, so the admission that takes a
    /// fractional capacity over its limit is still accepted.
    #[inline]
    fn has_room(&self, school: usize, factor: f64) -> bool {
        f64::from(self.enrolled[school]) < self.schools[school].capacity * factor
    }

    #[inline]
    fn bind(&mut self, student: usize, school: usize, distance: f64) {
        self.bindings[student] = Some((school, distance));
        self.enrolled[school] += 1;
        self.unbound -= 1;
    }
}

/// Capacity-constrained nearest-first assignment engine
///
/// # Passes
/// 1. Primary: walk every candidate pair in ascending distance and admit a
///    student to a school when the school still has room (capacity times
///    slack), the student is unbound and the school offers the grade.
/// 2. Reconciliation: every student still unbound takes the nearest eligible
///    school from its own candidates, under the configured capacity policy.
#[derive(Debug, Clone, Default)]
pub struct Matcher {
    settings: MatchSettings,
}

impl Matcher {
    pub fn new(settings: MatchSettings) -> Self {
        Self { settings }
    }

    pub fn with_default_settings() -> Self {
        Self::default()
    }

    pub fn settings(&self) -> &MatchSettings {
        &self.settings
    }

    /// Assign students to schools
    ///
    /// # Arguments
    /// * `students` - Students of the scope
    /// * `schools` - Schools of the scope
    /// * `candidates` - Candidate set built from the same two slices
    pub fn assign(&self, students: &[Student], schools: &[School], candidates: &CandidateSet) -> MatchResult {
        debug_assert_eq!(candidates.len(), students.len());

        let mut ctx = MatchingContext::new(students.len(), schools);
        let mut stats = MatchStats {
            students: students.len(),
            schools: schools.len(),
            pairs: candidates.pair_count(),
            ..MatchStats::default()
        };

        stats.primary = self.primary_pass(students, candidates, &mut ctx);

        let reasons = self.reconcile(students, candidates, &mut ctx);
        stats.reconciled = students.len() - stats.primary - ctx.unbound;

        let assignments: Vec<Assignment> = students
            .iter()
            .zip(&ctx.bindings)
            .zip(reasons)
            .map(|((student, binding), reason)| Assignment {
                student_id: student.id,
                school_id: binding.map(|(school, _)| schools[school].id.clone()),
                distance_miles: binding.map(|(_, distance)| distance),
                unassigned_reason: reason,
            })
            .collect();

        let tallies: Vec<SchoolTally> = schools
            .iter()
            .zip(&ctx.enrolled)
            .map(|(school, &enrolled)| SchoolTally {
                school_id: school.id.clone(),
                capacity: school.capacity,
                enrolled,
            })
            .collect();

        stats.unassigned = ctx.unbound;
        for reason in assignments.iter().filter_map(|a| a.unassigned_reason) {
            match reason {
                UnassignedReason::NoEligibleFacility => stats.no_eligible_facility += 1,
                UnassignedReason::CapacityExhausted => stats.capacity_exhausted += 1,
            }
        }
        stats.over_capacity_schools = tallies.iter().filter(|t| t.is_over_capacity()).count();

        tracing::debug!(
            "Matched {} students to {} schools: {} primary, {} reconciled, {} unassigned",
            stats.students,
            stats.schools,
            stats.primary,
            stats.reconciled,
            stats.unassigned
        );

        MatchResult {
            assignments,
            tallies,
            stats,
        }
    }

    /// Greedy nearest-first pass; returns the number of students bound
    fn primary_pass(&self, students: &[Student], candidates: &CandidateSet, ctx: &mut MatchingContext<'_>) -> usize {
        let mut admitted = 0;

        for pair in candidates.stream() {
            if ctx.unbound == 0 {
                break;
            }

            // Skip if school is at capacity
            if !ctx.has_room(pair.school, self.settings.capacity_slack) {
                continue;
            }

            // Skip if a closer pair already bound the student
            if ctx.is_bound(pair.student) {
                continue;
            }

            // Skip if the school does not offer the student's grade
            if !ctx.eligible[pair.school].contains(students[pair.student].grade) {
                continue;
            }

            ctx.bind(pair.student, pair.school, pair.distance);
            admitted += 1;
        }

        admitted
    }

    /// Fallback pass for students the primary pass left unbound
    ///
    /// Returns, per student, the reason it is still unassigned (if it is).
    fn reconcile(
        &self,
        students: &[Student],
        candidates: &CandidateSet,
        ctx: &mut MatchingContext<'_>,
    ) -> Vec<Option<UnassignedReason>> {
        let mut reasons = vec![None; students.len()];
        if ctx.unbound == 0 {
            return reasons;
        }

        let factor = self.reconcile_factor(students.len(), ctx.schools);

        for (idx, student) in students.iter().enumerate() {
            if ctx.is_bound(idx) {
                continue;
            }

            let mut saw_eligible = false;
            let choice = candidates.candidates(idx).iter().find(|candidate| {
                if !ctx.eligible[candidate.school].contains(student.grade) {
                    return false;
                }
                saw_eligible = true;
                factor.map_or(true, |factor| ctx.has_room(candidate.school, factor))
            });

            match choice {
                Some(candidate) => ctx.bind(idx, candidate.school, candidate.distance),
                None if saw_eligible => reasons[idx] = Some(UnassignedReason::CapacityExhausted),
                None => reasons[idx] = Some(UnassignedReason::NoEligibleFacility),
            }
        }

        reasons
    }

    /// Capacity multiplier for the reconciliation pass, `None` when capacity
    /// is ignored
    fn reconcile_factor(&self, students: usize, schools: &[School]) -> Option<f64> {
        match self.settings.reconcile {
            ReconcilePolicy::IgnoreCapacity => None,
            ReconcilePolicy::ScaledCapacity { headroom } => {
                let total: f64 = schools.iter().map(|school| school.capacity).sum();
                if total > 0.0 {
                    Some(students as f64 / total + headroom)
                } else {
                    tracing::warn!("Scope has no declared capacity, reconciling without capacity limits");
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::grade::Grade;
    use crate::models::Location;

    fn create_student(id: u64, grade: Grade, lat: f64, lon: f64) -> Student {
        Student {
            id,
            grade,
            location: Location::new(lat, lon),
            jurisdiction: "56021".to_string(),
        }
    }

    fn create_school(id: &str, lower: Grade, upper: Grade, capacity: f64, lat: f64, lon: f64) -> School {
        School {
            id: id.to_string(),
            jurisdiction: "56021".to_string(),
            location: Location::new(lat, lon),
            grades: GradeRange::new(lower, upper).unwrap(),
            capacity,
        }
    }

    fn run(matcher: &Matcher, students: &[Student], schools: &[School]) -> MatchResult {
        let candidates = CandidateSet::build(students, schools, None);
        matcher.assign(students, schools, &candidates)
    }

    fn school_of(result: &MatchResult, student_id: u64) -> Option<&str> {
        result
            .assignments
            .iter()
            .find(|a| a.student_id == student_id)
            .and_then(|a| a.school_id.as_deref())
    }

    #[test]
    fn test_nearest_school_saturates_first() {
        let students = vec![
            create_student(1, Grade::First, 41.01, -105.0),
            create_student(2, Grade::First, 41.02, -105.0),
            create_student(3, Grade::First, 41.20, -105.0),
        ];
        let schools = vec![
            create_school("f1", Grade::K, Grade::Fifth, 1.0, 41.0, -105.0),
            create_school("f2", Grade::K, Grade::Fifth, 5.0, 41.5, -105.0),
        ];

        let result = run(&Matcher::with_default_settings(), &students, &schools);

        assert_eq!(school_of(&result, 1), Some("f1"));
        assert_eq!(school_of(&result, 2), Some("f2"));
        assert_eq!(school_of(&result, 3), Some("f2"));
        assert_eq!(result.stats.primary, 3);
        assert_eq!(result.stats.reconciled, 0);
        assert_eq!(result.tallies[0].enrolled, 1);
        assert_eq!(result.tallies[1].enrolled, 2);
    }

    #[test]
    fn test_ineligible_student_is_unassigned() {
        let students = vec![
            create_student(1, Grade::First, 41.01, -105.0),
            create_student(2, Grade::PreK, 41.02, -105.0),
        ];
        let schools = vec![create_school("f1", Grade::K, Grade::Fifth, 10.0, 41.0, -105.0)];

        let result = run(&Matcher::with_default_settings(), &students, &schools);

        assert_eq!(school_of(&result, 1), Some("f1"));
        assert_eq!(school_of(&result, 2), None);
        assert_eq!(result.stats.unassigned, 1);
        assert_eq!(result.stats.no_eligible_facility, 1);
        assert_eq!(result.assignments[1].unassigned_reason, Some(UnassignedReason::NoEligibleFacility));
    }

    #[test]
    fn test_reconciliation_ignores_capacity() {
        // Two seats for five students: the rest overflow into the nearest school
        let students: Vec<Student> = (0..5)
            .map(|i| create_student(i, Grade::Third, 41.0 + i as f64 * 0.01, -105.0))
            .collect();
        let schools = vec![
            create_school("near", Grade::K, Grade::Fifth, 1.0, 41.0, -105.0),
            create_school("far", Grade::K, Grade::Fifth, 1.0, 42.0, -105.0),
        ];

        let result = run(&Matcher::with_default_settings(), &students, &schools);

        assert_eq!(result.stats.unassigned, 0);
        assert_eq!(result.stats.primary, 2);
        assert_eq!(result.stats.reconciled, 3);
        assert_eq!(result.tallies[0].enrolled, 4);
        assert_eq!(result.tallies[1].enrolled, 1);
        assert_eq!(result.stats.over_capacity_schools, 1);
    }

    #[test]
    fn test_scaled_reconciliation_can_exhaust_capacity() {
        let students: Vec<Student> = (0..5)
            .map(|i| create_student(i, Grade::First, 41.0 + i as f64 * 0.01, -105.0))
            .collect();
        let schools = vec![
            create_school("elementary", Grade::K, Grade::Fifth, 1.0, 41.0, -105.0),
            create_school("high", Grade::Ninth, Grade::Twelfth, 9.0, 41.1, -105.0),
        ];

        let scaled = Matcher::new(MatchSettings {
            capacity_slack: 1.0,
            reconcile: ReconcilePolicy::ScaledCapacity { headroom: 0.1 },
        });
        let result = run(&scaled, &students, &schools);

        // Scale is 5 / 10 + 0.1, so the elementary school holds 0.6 seats
        assert_eq!(result.stats.primary, 1);
        assert_eq!(result.stats.reconciled, 0);
        assert_eq!(result.stats.capacity_exhausted, 4);
        assert!(result
            .assignments
            .iter()
            .skip(1)
            .all(|a| a.unassigned_reason == Some(UnassignedReason::CapacityExhausted)));

        let ignoring = run(&Matcher::with_default_settings(), &students, &schools);
        assert_eq!(ignoring.stats.unassigned, 0);
        assert_eq!(ignoring.tallies[0].enrolled, 5);
    }

    #[test]
    fn test_scaled_reconciliation_with_room() {
        let students: Vec<Student> = (0..6)
            .map(|i| create_student(i, Grade::Fourth, 41.0 + i as f64 * 0.01, -105.0))
            .collect();
        let schools = vec![
            create_school("a", Grade::K, Grade::Fifth, 2.0, 41.0, -105.0),
            create_school("b", Grade::K, Grade::Fifth, 2.0, 41.3, -105.0),
        ];

        let matcher = Matcher::new(MatchSettings {
            capacity_slack: 1.0,
            reconcile: ReconcilePolicy::ScaledCapacity { headroom: 0.1 },
        });
        let result = run(&matcher, &students, &schools);

        // Scaled capacity is 2 * (6 / 4 + 0.1) = 3.2 per school
        assert_eq!(result.stats.primary, 4);
        assert_eq!(result.stats.reconciled, 2);
        assert_eq!(result.stats.unassigned, 0);
        assert_eq!(result.tallies[0].enrolled, 4);
        assert_eq!(result.tallies[1].enrolled, 2);
    }

    #[test]
    fn test_fractional_capacity_allows_soft_overflow() {
        let students: Vec<Student> = (0..5)
            .map(|i| create_student(i, Grade::Second, 41.0 + i as f64 * 0.01, -105.0))
            .collect();
        let schools = vec![
            create_school("small", Grade::K, Grade::Fifth, 2.5, 41.0, -105.0),
            create_school("big", Grade::K, Grade::Fifth, 10.0, 41.5, -105.0),
        ];

        let result = run(&Matcher::with_default_settings(), &students, &schools);

        // Admitted at 0, 1 and 2 enrolled, refused at 3
        assert_eq!(result.tallies[0].enrolled, 3);
        assert!(result.tallies[0].is_over_capacity());
        assert_eq!(result.tallies[1].enrolled, 2);
        assert_eq!(result.stats.reconciled, 0);
    }

    #[test]
    fn test_capacity_slack() {
        let students: Vec<Student> = (0..4)
            .map(|i| create_student(i, Grade::Second, 41.0 + i as f64 * 0.01, -105.0))
            .collect();
        let schools = vec![
            create_school("near", Grade::K, Grade::Fifth, 2.0, 41.0, -105.0),
            create_school("far", Grade::K, Grade::Fifth, 10.0, 41.5, -105.0),
        ];

        let strict = run(&Matcher::with_default_settings(), &students, &schools);
        assert_eq!(strict.tallies[0].enrolled, 2);

        let slack = Matcher::new(MatchSettings {
            capacity_slack: 1.5,
            ..MatchSettings::default()
        });
        let relaxed = run(&slack, &students, &schools);
        assert_eq!(relaxed.tallies[0].enrolled, 3);
    }

    #[test]
    fn test_zero_capacity_school_only_used_in_reconciliation() {
        let students = vec![create_student(1, Grade::Eighth, 41.0, -105.0)];
        let schools = vec![create_school("closed", Grade::Sixth, Grade::Eighth, 0.0, 41.0, -105.0)];

        let result = run(&Matcher::with_default_settings(), &students, &schools);
        assert_eq!(result.stats.primary, 0);
        assert_eq!(result.stats.reconciled, 1);
        assert_eq!(school_of(&result, 1), Some("closed"));
    }

    #[test]
    fn test_eligibility_skips_nearer_school() {
        let students = vec![create_student(1, Grade::Tenth, 41.0, -105.0)];
        let schools = vec![
            create_school("elementary", Grade::K, Grade::Fifth, 100.0, 41.0, -105.0),
            create_school("high", Grade::Ninth, Grade::Twelfth, 100.0, 41.4, -105.0),
        ];

        let result = run(&Matcher::with_default_settings(), &students, &schools);
        assert_eq!(school_of(&result, 1), Some("high"));
        let distance = result.assignments[0].distance_miles.unwrap();
        assert!((distance - 27.6).abs() < 0.5, "got {}", distance);
    }

    #[test]
    fn test_student_without_candidates() {
        let students = vec![create_student(1, Grade::Tenth, 41.0, -105.0)];
        let schools = vec![create_school("far", Grade::Ninth, Grade::Twelfth, 100.0, 44.8, -106.9)];

        let candidates = CandidateSet::build(&students, &schools, Some(25.0));
        let result = Matcher::with_default_settings().assign(&students, &schools, &candidates);

        assert_eq!(result.stats.pairs, 0);
        assert_eq!(result.assignments[0].unassigned_reason, Some(UnassignedReason::NoEligibleFacility));
    }

    #[test]
    fn test_empty_scope() {
        let result = run(&Matcher::with_default_settings(), &[], &[]);
        assert!(result.assignments.is_empty());
        assert!(result.tallies.is_empty());
        assert_eq!(result.stats, MatchStats::default());
    }

    #[test]
    fn test_stats_add_assign() {
        let mut total = MatchStats::default();
        total += MatchStats { students: 3, primary: 2, unassigned: 1, ..MatchStats::default() };
        total += MatchStats { students: 4, primary: 4, ..MatchStats::default() };

        assert_eq!(total.students, 7);
        assert_eq!(total.primary, 6);
        assert_eq!(total.unassigned, 1);
    }

    #[test]
    fn test_reconcile_policy_serde() {
        let policy: ReconcilePolicy = serde_json::from_str(r#"{"policy":"scaled_capacity","headroom":0.25}"#).unwrap();
        assert_eq!(policy, ReconcilePolicy::ScaledCapacity { headroom: 0.25 });

        let policy: ReconcilePolicy = serde_json::from_str(r#"{"policy":"ignore_capacity"}"#).unwrap();
        assert_eq!(policy, ReconcilePolicy::IgnoreCapacity);
    }
}
