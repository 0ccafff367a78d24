use std::collections::{BTreeSet, HashMap, HashSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::filters::{matches_enrollment, placeable_students, school_in_scope, student_in_scope};
use crate::core::matcher::{Assignment, MatchResult, MatchSettings, MatchStats, Matcher, SchoolTally};
use crate::core::merger::{merge_assignments, MergeError};
use crate::core::pairs::CandidateSet;
use crate::core::sampler::{
    CategoricalSampler, EmploymentSubject, EmploymentTable, EnrollmentSubject, EnrollmentTable,
    SamplerSettings, SamplingError,
};
use crate::models::{
    normalize_schools, EmploymentProbabilities, Enrollment, EnrollmentProbabilities, Household, Person,
    PersonRecord, RawSchool, School, Student,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("person {person} references unknown household {household}")]
    UnknownHousehold { person: u64, household: String },

    #[error("household {household} has invalid location ({lat}, {lon})")]
    InvalidHouseholdLocation { household: String, lat: f64, lon: f64 },

    #[error("student {0} appears more than once")]
    DuplicateStudent(u64),

    #[error(transparent)]
    Sampling(#[from] SamplingError),

    #[error(transparent)]
    Merge(#[from] MergeError),
}

/// Enumerates the jurisdictions matched independently of one another
pub trait ScopeSource {
    /// Jurisdictions in task order
    fn scopes(&self) -> Vec<String>;
}

/// Distinct household jurisdictions, sorted
pub struct HouseholdScopes<'a>(pub &'a [Household]);

impl ScopeSource for HouseholdScopes<'_> {
    fn scopes(&self) -> Vec<String> {
        distinct(self.0.iter().map(|household| household.jurisdiction.as_str()))
    }
}

/// Distinct student jurisdictions, sorted
pub struct StudentScopes<'a>(pub &'a [Student]);

impl ScopeSource for StudentScopes<'_> {
    fn scopes(&self) -> Vec<String> {
        distinct(self.0.iter().map(|student| student.jurisdiction.as_str()))
    }
}

/// Explicit scope list
impl ScopeSource for Vec<String> {
    fn scopes(&self) -> Vec<String> {
        self.clone()
    }
}

fn distinct<'a>(jurisdictions: impl Iterator<Item = &'a str>) -> Vec<String> {
    jurisdictions
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// How one school class is partitioned into matching tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeStrategy {
    /// One task per jurisdiction; students only reach schools of their own
    Jurisdiction,
    /// One task over every student and school
    Region,
}

#[derive(Debug, Clone)]
pub struct SynthesisSettings {
    pub sampling: SamplerSettings,
    pub matching: MatchSettings,
    /// Maximum student-to-school distance in miles, `None` for unbounded
    pub distance_cutoff_miles: Option<f64>,
    pub public_scope: ScopeStrategy,
    pub private_scope: ScopeStrategy,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            sampling: SamplerSettings::default(),
            matching: MatchSettings::default(),
            distance_cutoff_miles: None,
            public_scope: ScopeStrategy::Jurisdiction,
            private_scope: ScopeStrategy::Region,
        }
    }
}

/// Validated in-memory inputs of one run
#[derive(Debug, Clone, Default)]
pub struct SynthesisInput {
    pub persons: Vec<Person>,
    pub households: Vec<Household>,
    pub public_schools: Vec<RawSchool>,
    pub private_schools: Vec<RawSchool>,
    pub enrollment: Vec<EnrollmentProbabilities>,
    pub employment: Vec<EmploymentProbabilities>,
}

/// Match statistics of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeReport {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub class: Option<Enrollment>,
    /// `None` for a region-wide task
    pub scope: Option<String>,
    pub stats: MatchStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisReport {
    pub persons: usize,
    pub school_aged: usize,
    pub public: usize,
    pub private: usize,
    pub not_enrolled: usize,
    pub employed: usize,
    pub dropped_public_schools: usize,
    pub dropped_private_schools: usize,
    pub scopes: Vec<ScopeReport>,
    pub totals: MatchStats,
}

#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    /// One record per input person, in input order
    pub persons: Vec<PersonRecord>,
    pub report: SynthesisReport,
}

/// Engine-only assignment of externally supplied students
#[derive(Debug, Clone)]
pub struct AssignmentOutput {
    /// One entry per student, in input order
    pub assignments: Vec<Assignment>,
    pub tallies: Vec<SchoolTally>,
    pub scopes: Vec<ScopeReport>,
    pub totals: MatchStats,
    pub dropped_schools: usize,
    /// Students left out for an invalid location
    pub dropped_students: usize,
}

struct ScopeTask {
    scope: Option<String>,
    students: Vec<Student>,
    schools: Vec<School>,
}

/// Runs the full synthesis: grades, sampling, per-scope matching, merge
#[derive(Debug, Clone, Default)]
pub struct Synthesizer {
    settings: SynthesisSettings,
    matcher: Matcher,
}

impl Synthesizer {
    pub fn new(settings: SynthesisSettings) -> Self {
        let matcher = Matcher::new(settings.matching);
        Self { settings, matcher }
    }

    /// Same settings with a different sampling seed
    pub fn with_seed(&self, seed: u64) -> Self {
        let mut settings = self.settings.clone();
        settings.sampling.seed = seed;
        Self::new(settings)
    }

    pub fn settings(&self) -> &SynthesisSettings {
        &self.settings
    }

    /// Run with one public task per household jurisdiction
    pub fn run(&self, input: SynthesisInput) -> Result<SynthesisOutput, PipelineError> {
        let scopes = HouseholdScopes(&input.households).scopes();
        self.run_with_scopes(input, &scopes)
    }

    pub fn run_with_scopes<S: ScopeSource + ?Sized>(
        &self,
        input: SynthesisInput,
        scopes: &S,
    ) -> Result<SynthesisOutput, PipelineError> {
        let SynthesisInput {
            persons,
            households,
            public_schools,
            private_schools,
            enrollment,
            employment,
        } = input;

        let (public_schools, dropped_public_schools) = normalize_schools(public_schools);
        let (private_schools, dropped_private_schools) = normalize_schools(private_schools);

        let homes = join_households(&persons, &households)?;
        let mut records: Vec<PersonRecord> = persons.iter().map(PersonRecord::from).collect();

        self.sample(&persons, &homes, &mut records, enrollment, employment)?;

        let mut report = SynthesisReport {
            persons: records.len(),
            school_aged: records.iter().filter(|r| r.grade.is_some()).count(),
            employed: records.iter().filter(|r| r.employed).count(),
            dropped_public_schools,
            dropped_private_schools,
            ..SynthesisReport::default()
        };
        for enrollment in records.iter().filter_map(|r| r.enrollment) {
            match enrollment {
                Enrollment::Public => report.public += 1,
                Enrollment::Private => report.private += 1,
                Enrollment::NotEnrolled => report.not_enrolled += 1,
            }
        }

        tracing::info!(
            "Sampled {} school-aged persons: {} public, {} private, {} not enrolled",
            report.school_aged,
            report.public,
            report.private,
            report.not_enrolled
        );

        let scope_list = scopes.scopes();
        let mut classes = Vec::new();
        let mut tasks = Vec::new();
        for (class, schools, strategy) in [
            (Enrollment::Public, &public_schools, self.settings.public_scope),
            (Enrollment::Private, &private_schools, self.settings.private_scope),
        ] {
            let students = students_of(&records, &homes, class);
            let class_tasks = build_tasks(strategy, &scope_list, &students, schools);
            classes.extend(std::iter::repeat(class).take(class_tasks.len()));
            tasks.extend(class_tasks);
        }

        let (scope_reports, results) = self.run_tasks(tasks);
        for (scope_report, class) in scope_reports.into_iter().zip(classes) {
            report.totals += scope_report.stats;
            report.scopes.push(ScopeReport {
                class: Some(class),
                ..scope_report
            });
        }

        let persons = merge_assignments(records, &results)?;

        tracing::info!(
            "Synthesis complete: {} tasks, {} assigned, {} unassigned",
            report.scopes.len(),
            report.totals.primary + report.totals.reconciled,
            report.totals.unassigned
        );

        Ok(SynthesisOutput { persons, report })
    }

    /// Assign already-enrolled students without any sampling
    ///
    /// With the jurisdiction strategy every distinct student jurisdiction
    /// becomes its own task. Students with an invalid location are dropped
    /// and counted; a repeated student id fails the whole call.
    pub fn assign_schools(
        &self,
        students: Vec<Student>,
        schools: Vec<RawSchool>,
        strategy: ScopeStrategy,
    ) -> Result<AssignmentOutput, PipelineError> {
        let mut seen = HashSet::with_capacity(students.len());
        for student in &students {
            if !seen.insert(student.id) {
                return Err(PipelineError::DuplicateStudent(student.id));
            }
        }

        let total = students.len();
        let students: Vec<Student> = students
            .into_iter()
            .filter(|student| {
                let valid = student.location.is_valid();
                if !valid {
                    tracing::warn!(
                        "Dropping student {}: invalid location ({}, {})",
                        student.id,
                        student.location.lat,
                        student.location.lon
                    );
                }
                valid
            })
            .collect();
        let dropped_students = total - students.len();

        let (schools, dropped_schools) = normalize_schools(schools);
        let scope_list = StudentScopes(&students).scopes();
        let tasks = build_tasks(strategy, &scope_list, &students, &schools);

        let (scopes, results) = self.run_tasks(tasks);

        let mut totals = MatchStats::default();
        for scope in &scopes {
            totals += scope.stats;
        }

        let position: HashMap<u64, usize> = students
            .iter()
            .enumerate()
            .map(|(idx, student)| (student.id, idx))
            .collect();

        let mut assignments = Vec::with_capacity(students.len());
        let mut tallies = Vec::with_capacity(schools.len());
        for result in results {
            assignments.extend(result.assignments);
            tallies.extend(result.tallies);
        }
        assignments.sort_by_key(|a| position.get(&a.student_id).copied().unwrap_or(usize::MAX));

        Ok(AssignmentOutput {
            assignments,
            tallies,
            scopes,
            totals,
            dropped_schools,
            dropped_students,
        })
    }

    /// Grade-based enrollment draws, then employment draws, from one stream
    fn sample(
        &self,
        persons: &[Person],
        homes: &[&Household],
        records: &mut [PersonRecord],
        enrollment: Vec<EnrollmentProbabilities>,
        employment: Vec<EmploymentProbabilities>,
    ) -> Result<(), PipelineError> {
        let mut sampler = CategoricalSampler::new(self.settings.sampling.clone());

        let school_aged: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, record)| record.grade.is_some())
            .map(|(idx, _)| idx)
            .collect();

        let subjects: Vec<EnrollmentSubject<'_>> = school_aged
            .iter()
            .filter_map(|&idx| {
                records[idx].grade.map(|grade| EnrollmentSubject {
                    household_id: &persons[idx].household_id,
                    jurisdiction: &homes[idx].jurisdiction,
                    grade,
                })
            })
            .collect();

        let enrollments = sampler.sample_enrollment(&subjects, &EnrollmentTable::new(enrollment))?;
        for (&idx, enrollment) in school_aged.iter().zip(enrollments) {
            records[idx].enrollment = Some(enrollment);
        }

        let subjects: Vec<EmploymentSubject<'_>> = persons
            .iter()
            .zip(homes)
            .map(|(person, home)| EmploymentSubject {
                jurisdiction: &home.jurisdiction,
                sex: person.sex,
                age: person.age,
            })
            .collect();

        let employed = sampler.sample_employment(&subjects, &EmploymentTable::new(employment))?;
        for (record, employed) in records.iter_mut().zip(employed) {
            record.employed = employed;
        }

        Ok(())
    }

    /// Match every task in parallel; results come back in task order
    fn run_tasks(&self, tasks: Vec<ScopeTask>) -> (Vec<ScopeReport>, Vec<MatchResult>) {
        let cutoff = self.settings.distance_cutoff_miles;

        tasks
            .into_par_iter()
            .map(|task| {
                let placeable = placeable_students(&task.students, &task.schools).count();
                if placeable < task.students.len() {
                    tracing::warn!(
                        "Scope {}: {} of {} students have no school offering their grade",
                        task.scope.as_deref().unwrap_or("region"),
                        task.students.len() - placeable,
                        task.students.len()
                    );
                }

                let candidates = CandidateSet::build(&task.students, &task.schools, cutoff);
                let result = self.matcher.assign(&task.students, &task.schools, &candidates);

                tracing::debug!(
                    "Scope {}: {} students, {} schools, {} pairs",
                    task.scope.as_deref().unwrap_or("region"),
                    result.stats.students,
                    result.stats.schools,
                    result.stats.pairs
                );

                let report = ScopeReport {
                    class: None,
                    scope: task.scope,
                    stats: result.stats,
                };
                (report, result)
            })
            .unzip()
    }
}

/// Household of every person, by position
fn join_households<'a>(persons: &[Person], households: &'a [Household]) -> Result<Vec<&'a Household>, PipelineError> {
    let mut by_id: HashMap<&str, &Household> = HashMap::with_capacity(households.len());
    for household in households {
        if !household.location.is_valid() {
            return Err(PipelineError::InvalidHouseholdLocation {
                household: household.id.clone(),
                lat: household.location.lat,
                lon: household.location.lon,
            });
        }
        if by_id.insert(household.id.as_str(), household).is_some() {
            tracing::warn!("Duplicate household {}, keeping the last row", household.id);
        }
    }

    persons
        .iter()
        .map(|person| {
            by_id
                .get(person.household_id.as_str())
                .copied()
                .ok_or_else(|| PipelineError::UnknownHousehold {
                    person: person.id,
                    household: person.household_id.clone(),
                })
        })
        .collect()
}

/// Engine view of every record sampled into `class`
fn students_of(records: &[PersonRecord], homes: &[&Household], class: Enrollment) -> Vec<Student> {
    records
        .iter()
        .zip(homes)
        .filter(|(record, _)| matches_enrollment(record, class))
        .filter_map(|(record, home)| {
            record.grade.map(|grade| Student {
                id: record.id,
                grade,
                location: home.location,
                jurisdiction: home.jurisdiction.clone(),
            })
        })
        .collect()
}

fn build_tasks(strategy: ScopeStrategy, scopes: &[String], students: &[Student], schools: &[School]) -> Vec<ScopeTask> {
    match strategy {
        ScopeStrategy::Region if students.is_empty() => Vec::new(),
        ScopeStrategy::Region => vec![ScopeTask {
            scope: None,
            students: students.to_vec(),
            schools: schools.to_vec(),
        }],
        ScopeStrategy::Jurisdiction => scopes
            .iter()
            .map(|scope| ScopeTask {
                scope: Some(scope.clone()),
                students: students
                    .iter()
                    .filter(|student| student_in_scope(student, Some(scope)))
                    .cloned()
                    .collect(),
                schools: schools
                    .iter()
                    .filter(|school| school_in_scope(school, Some(scope)))
                    .cloned()
                    .collect(),
            })
            .filter(|task| !task.students.is_empty())
            .collect(),
    }
}
