use std::collections::{HashMap, HashSet};

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::grade::Grade;
use crate::models::{AgeBucket, EmploymentProbabilities, Enrollment, EnrollmentProbabilities, Sex};

/// Errors that make a jurisdiction unsampleable
#[derive(Debug, Error, PartialEq)]
pub enum SamplingError {
    #[error("no {table} probabilities for jurisdiction {jurisdiction}")]
    MissingProbabilities {
        table: &'static str,
        jurisdiction: String,
    },

    #[error("invalid {table} probabilities for jurisdiction {jurisdiction}: {reason}")]
    InvalidProbabilities {
        table: &'static str,
        jurisdiction: String,
        reason: String,
    },
}

/// Whether enrollment is drawn per person or shared by a household
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingUnit {
    #[default]
    Person,
    Household,
}

#[derive(Debug, Clone)]
pub struct SamplerSettings {
    pub seed: u64,
    pub unit: SamplingUnit,
    /// Divide ill-formed rows by their sum instead of failing
    pub renormalize: bool,
    /// Use a uniform distribution for jurisdictions missing from a table
    pub uniform_fallback: bool,
    /// Accepted distance of a row's sum from 1
    pub tolerance: f64,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            seed: 123,
            unit: SamplingUnit::Person,
            renormalize: false,
            uniform_fallback: false,
            tolerance: 1e-6,
        }
    }
}

const ENROLLMENT_TABLE: &str = "enrollment";
const PREK_ENROLLMENT_TABLE: &str = "pre-k enrollment";
const EMPLOYMENT_TABLE: &str = "employment";

/// Enrollment probabilities keyed by jurisdiction
#[derive(Debug, Clone, Default)]
pub struct EnrollmentTable {
    rows: HashMap<String, EnrollmentProbabilities>,
}

impl EnrollmentTable {
    /// Index rows by jurisdiction; the first row of a duplicated jurisdiction wins
    pub fn new(rows: Vec<EnrollmentProbabilities>) -> Self {
        let mut indexed = HashMap::with_capacity(rows.len());
        for row in rows {
            if indexed.contains_key(&row.jurisdiction) {
                tracing::warn!("Ignoring duplicate enrollment row for {}", row.jurisdiction);
                continue;
            }
            indexed.insert(row.jurisdiction.clone(), row);
        }
        Self { rows: indexed }
    }

    pub fn get(&self, jurisdiction: &str) -> Option<&EnrollmentProbabilities> {
        self.rows.get(jurisdiction)
    }
}

/// Employment rates keyed by jurisdiction and sex
#[derive(Debug, Clone, Default)]
pub struct EmploymentTable {
    rows: HashMap<(String, Sex), HashMap<AgeBucket, f64>>,
}

impl EmploymentTable {
    pub fn new(rows: Vec<EmploymentProbabilities>) -> Self {
        let mut indexed = HashMap::with_capacity(rows.len());
        for row in rows {
            let key = (row.jurisdiction, row.sex);
            if indexed.contains_key(&key) {
                tracing::warn!("Ignoring duplicate employment row for {} ({:?})", key.0, key.1);
                continue;
            }
            indexed.insert(key, row.rates);
        }
        Self { rows: indexed }
    }

    pub fn rate(&self, jurisdiction: &str, sex: Sex, bucket: AgeBucket) -> Option<Option<f64>> {
        self.rows
            .get(&(jurisdiction.to_string(), sex))
            .map(|rates| rates.get(&bucket).copied())
    }
}

/// School-aged person awaiting an enrollment draw
#[derive(Debug, Clone, Copy)]
pub struct EnrollmentSubject<'a> {
    pub household_id: &'a str,
    pub jurisdiction: &'a str,
    pub grade: Grade,
}

/// Person awaiting an employment draw
#[derive(Debug, Clone, Copy)]
pub struct EmploymentSubject<'a> {
    pub jurisdiction: &'a str,
    pub sex: Sex,
    pub age: u8,
}

/// Seeded categorical sampler
///
/// One pseudo-random stream per run, advanced in the order subjects are
/// given. Identical inputs and seed always produce identical draws.
pub struct CategoricalSampler {
    rng: StdRng,
    settings: SamplerSettings,
    fallback_warned: HashSet<String>,
}

impl CategoricalSampler {
    pub fn new(settings: SamplerSettings) -> Self {
        Self {
            rng: StdRng::seed_from_u64(settings.seed),
            settings,
            fallback_warned: HashSet::new(),
        }
    }

    pub fn settings(&self) -> &SamplerSettings {
        &self.settings
    }

    /// Draw an enrollment class for every subject, in subject order
    ///
    /// PreK subjects draw from the jurisdiction's pre-k columns. In household
    /// mode every household (in order of first appearance) draws once for its
    /// K-12 members and once for its PreK members, and members inherit the
    /// draw for their group.
    pub fn sample_enrollment(
        &mut self,
        subjects: &[EnrollmentSubject<'_>],
        table: &EnrollmentTable,
    ) -> Result<Vec<Enrollment>, SamplingError> {
        let mut distributions: HashMap<(&str, bool), WeightedIndex<f64>> = HashMap::new();

        match self.settings.unit {
            SamplingUnit::Person => subjects
                .iter()
                .map(|subject| {
                    let prek = subject.grade == Grade::PreK;
                    self.draw_enrollment(&mut distributions, table, subject.jurisdiction, prek)
                })
                .collect(),
            SamplingUnit::Household => {
                let mut households: Vec<&str> = Vec::new();
                let mut groups: HashMap<&str, (bool, bool, &str)> = HashMap::new();

                for subject in subjects {
                    let entry = groups.entry(subject.household_id).or_insert_with(|| {
                        households.push(subject.household_id);
                        (false, false, subject.jurisdiction)
                    });
                    if subject.grade == Grade::PreK {
                        entry.1 = true;
                    } else {
                        entry.0 = true;
                    }
                }

                let mut draws: HashMap<(&str, bool), Enrollment> = HashMap::with_capacity(households.len());
                for household in households {
                    let (has_k12, has_prek, jurisdiction) = groups[household];
                    for (prek, present) in [(false, has_k12), (true, has_prek)] {
                        if present {
                            let enrollment =
                                self.draw_enrollment(&mut distributions, table, jurisdiction, prek)?;
                            draws.insert((household, prek), enrollment);
                        }
                    }
                }

                Ok(subjects
                    .iter()
                    .map(|subject| draws[&(subject.household_id, subject.grade == Grade::PreK)])
                    .collect())
            }
        }
    }

    fn draw_enrollment<'a>(
        &mut self,
        distributions: &mut HashMap<(&'a str, bool), WeightedIndex<f64>>,
        table: &EnrollmentTable,
        jurisdiction: &'a str,
        prek: bool,
    ) -> Result<Enrollment, SamplingError> {
        if !distributions.contains_key(&(jurisdiction, prek)) {
            let distribution = self.enrollment_distribution(table, jurisdiction, prek)?;
            distributions.insert((jurisdiction, prek), distribution);
        }

        let idx = distributions[&(jurisdiction, prek)].sample(&mut self.rng);
        Ok(Enrollment::ALL[idx])
    }

    fn enrollment_distribution(
        &mut self,
        table: &EnrollmentTable,
        jurisdiction: &str,
        prek: bool,
    ) -> Result<WeightedIndex<f64>, SamplingError> {
        let name = if prek { PREK_ENROLLMENT_TABLE } else { ENROLLMENT_TABLE };

        let weights = match table.get(jurisdiction) {
            Some(row) => {
                let grade = if prek { Grade::PreK } else { Grade::K };
                let weights = row.weights(grade);
                validate_distribution(&weights, &self.settings, name, jurisdiction)?;
                weights
            }
            None if self.settings.uniform_fallback => {
                self.warn_fallback(name, jurisdiction);
                [1.0; 3]
            }
            None => {
                return Err(SamplingError::MissingProbabilities {
                    table: name,
                    jurisdiction: jurisdiction.to_string(),
                })
            }
        };

        WeightedIndex::new(weights).map_err(|e| SamplingError::InvalidProbabilities {
            table: name,
            jurisdiction: jurisdiction.to_string(),
            reason: e.to_string(),
        })
    }

    /// Draw an employment status for every subject, in subject order
    ///
    /// Subjects under 16 are never employed and consume no draw.
    pub fn sample_employment(
        &mut self,
        subjects: &[EmploymentSubject<'_>],
        table: &EmploymentTable,
    ) -> Result<Vec<bool>, SamplingError> {
        subjects
            .iter()
            .map(|subject| {
                let Some(bucket) = AgeBucket::for_age(subject.age) else {
                    return Ok(false);
                };

                let p = self.employment_rate(table, subject, bucket)?;
                Ok(self.rng.gen::<f64>() < p)
            })
            .collect()
    }

    fn employment_rate(
        &mut self,
        table: &EmploymentTable,
        subject: &EmploymentSubject<'_>,
        bucket: AgeBucket,
    ) -> Result<f64, SamplingError> {
        match table.rate(subject.jurisdiction, subject.sex, bucket) {
            Some(Some(p)) if p.is_finite() && (0.0..=1.0).contains(&p) => Ok(p),
            Some(Some(p)) => Err(SamplingError::InvalidProbabilities {
                table: EMPLOYMENT_TABLE,
                jurisdiction: subject.jurisdiction.to_string(),
                reason: format!("rate {} for {:?} is outside [0, 1]", p, bucket),
            }),
            Some(None) => Err(SamplingError::InvalidProbabilities {
                table: EMPLOYMENT_TABLE,
                jurisdiction: subject.jurisdiction.to_string(),
                reason: format!("no rate for {:?} {:?}", subject.sex, bucket),
            }),
            None if self.settings.uniform_fallback => {
                self.warn_fallback(EMPLOYMENT_TABLE, subject.jurisdiction);
                Ok(0.5)
            }
            None => Err(SamplingError::MissingProbabilities {
                table: EMPLOYMENT_TABLE,
                jurisdiction: subject.jurisdiction.to_string(),
            }),
        }
    }

    fn warn_fallback(&mut self, table: &str, jurisdiction: &str) {
        if self.fallback_warned.insert(format!("{}:{}", table, jurisdiction)) {
            tracing::warn!(
                "No {} probabilities for jurisdiction {}, falling back to uniform",
                table,
                jurisdiction
            );
        }
    }
}

/// Check a row of outcome probabilities
///
/// Values must be finite and nonnegative. Unless renormalization is
/// enabled, they must also sum to 1 within the configured tolerance.
pub fn validate_distribution(
    weights: &[f64],
    settings: &SamplerSettings,
    table: &'static str,
    jurisdiction: &str,
) -> Result<(), SamplingError> {
    let invalid = |reason: String| SamplingError::InvalidProbabilities {
        table,
        jurisdiction: jurisdiction.to_string(),
        reason,
    };

    if let Some(bad) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
        return Err(invalid(format!("probability {} is not a finite nonnegative number", bad)));
    }

    let sum: f64 = weights.iter().sum();
    if sum <= 0.0 {
        return Err(invalid("probabilities sum to zero".to_string()));
    }
    if !settings.renormalize && (sum - 1.0).abs() > settings.tolerance {
        return Err(invalid(format!("probabilities sum to {}", sum)));
    }

    Ok(())
}
