use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::grade::{Grade, GradeRange};

/// Geographic position in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Finite and within the valid latitude/longitude ranges
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

/// School enrollment status drawn by the sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Enrollment {
    Public,
    Private,
    NotEnrolled,
}

impl Enrollment {
    /// Outcome order used by every enrollment probability table
    pub const ALL: [Enrollment; 3] = [Enrollment::Public, Enrollment::Private, Enrollment::NotEnrolled];
}

/// Simulated resident
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: u64,
    #[serde(rename = "householdId")]
    pub household_id: String,
    pub age: u8,
    pub sex: Sex,
}

/// Household with the position and jurisdiction its members inherit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Household {
    pub id: String,
    pub jurisdiction: String,
    #[serde(flatten)]
    pub location: Location,
}

/// Enrolled, school-aged person as seen by the assignment engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: u64,
    pub grade: Grade,
    #[serde(flatten)]
    pub location: Location,
    #[serde(default)]
    pub jurisdiction: String,
}

/// Grade bound as it appears in a school registry: a textual name in the
/// public registry, a numeric code in the private one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawGrade {
    Code(i64),
    Text(String),
}

impl RawGrade {
    pub fn to_grade(&self) -> Option<Grade> {
        match self {
            RawGrade::Code(code) => Grade::from_code(*code),
            RawGrade::Text(text) => match text.trim().parse::<i64>() {
                Ok(code) => Grade::from_code(code),
                Err(_) => Grade::from_name(text),
            },
        }
    }
}

impl std::fmt::Display for RawGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawGrade::Code(code) => write!(f, "{}", code),
            RawGrade::Text(text) => write!(f, "{}", text),
        }
    }
}

/// Enrollment total as reported by a registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawCapacity {
    Number(f64),
    Text(String),
}

impl RawCapacity {
    pub fn to_capacity(&self) -> Option<f64> {
        let value = match self {
            RawCapacity::Number(n) => *n,
            RawCapacity::Text(text) => text.trim().parse::<f64>().ok()?,
        };

        (value.is_finite() && value >= 0.0).then_some(value)
    }
}

/// School row before normalization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSchool {
    pub id: String,
    pub jurisdiction: String,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(rename = "lowestGrade", default)]
    pub lowest_grade: Option<RawGrade>,
    #[serde(rename = "highestGrade", default)]
    pub highest_grade: Option<RawGrade>,
    #[serde(rename = "enrollmentTotal", default)]
    pub enrollment_total: Option<RawCapacity>,
}

/// Reasons a raw record is dropped during normalization
#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("unrecognized grade: {0}")]
    UnknownGrade(String),

    #[error("lowest grade {lower:?} is above highest grade {upper:?}")]
    InvertedGradeRange { lower: Grade, upper: Grade },

    #[error("invalid capacity: {0:?}")]
    InvalidCapacity(RawCapacity),

    #[error("invalid location: ({lat}, {lon})")]
    InvalidLocation { lat: f64, lon: f64 },
}

impl RawSchool {
    /// Map registry encodings onto the domain types, rejecting the row
    /// instead of substituting defaults.
    pub fn normalize(self) -> Result<School, RecordError> {
        let lat = self.lat.ok_or(RecordError::MissingField("lat"))?;
        let lon = self.lon.ok_or(RecordError::MissingField("lon"))?;
        let location = Location::new(lat, lon);
        if !location.is_valid() {
            return Err(RecordError::InvalidLocation { lat, lon });
        }

        let lower = parse_grade(self.lowest_grade.as_ref(), "lowestGrade")?;
        let upper = parse_grade(self.highest_grade.as_ref(), "highestGrade")?;
        let grades = GradeRange::new(lower, upper)
            .ok_or(RecordError::InvertedGradeRange { lower, upper })?;

        let raw_capacity = self
            .enrollment_total
            .ok_or(RecordError::MissingField("enrollmentTotal"))?;
        let capacity = raw_capacity
            .to_capacity()
            .ok_or_else(|| RecordError::InvalidCapacity(raw_capacity.clone()))?;

        Ok(School {
            id: self.id,
            jurisdiction: self.jurisdiction,
            location,
            grades,
            capacity,
        })
    }
}

fn parse_grade(raw: Option<&RawGrade>, field: &'static str) -> Result<Grade, RecordError> {
    let raw = raw.ok_or(RecordError::MissingField(field))?;
    raw.to_grade()
        .ok_or_else(|| RecordError::UnknownGrade(raw.to_string()))
}

/// Normalize a registry, dropping and logging malformed rows.
///
/// Returns the surviving schools in input order and the number dropped.
pub fn normalize_schools(raw: Vec<RawSchool>) -> (Vec<School>, usize) {
    let mut dropped = 0;
    let schools = raw
        .into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            match row.normalize() {
                Ok(school) => Some(school),
                Err(e) => {
                    tracing::warn!("Dropping school {}: {}", id, e);
                    dropped += 1;
                    None
                }
            }
        })
        .collect();

    (schools, dropped)
}

/// Normalized school, read-only to the assignment engine
#[derive(Debug, Clone, Serialize)]
pub struct School {
    pub id: String,
    pub jurisdiction: String,
    #[serde(flatten)]
    pub location: Location,
    pub grades: GradeRange,
    pub capacity: f64,
}

/// Age buckets of the employment tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgeBucket {
    #[serde(rename = "16-19")]
    From16To19,
    #[serde(rename = "20-21")]
    From20To21,
    #[serde(rename = "22-24")]
    From22To24,
    #[serde(rename = "25-29")]
    From25To29,
    #[serde(rename = "30-34")]
    From30To34,
    #[serde(rename = "35-44")]
    From35To44,
    #[serde(rename = "45-54")]
    From45To54,
    #[serde(rename = "55-59")]
    From55To59,
    #[serde(rename = "60-61")]
    From60To61,
    #[serde(rename = "62-64")]
    From62To64,
    #[serde(rename = "65-69")]
    From65To69,
    #[serde(rename = "70-74")]
    From70To74,
    #[serde(rename = "75+")]
    From75,
}

impl AgeBucket {
    pub const ALL: [AgeBucket; 13] = [
        AgeBucket::From16To19,
        AgeBucket::From20To21,
        AgeBucket::From22To24,
        AgeBucket::From25To29,
        AgeBucket::From30To34,
        AgeBucket::From35To44,
        AgeBucket::From45To54,
        AgeBucket::From55To59,
        AgeBucket::From60To61,
        AgeBucket::From62To64,
        AgeBucket::From65To69,
        AgeBucket::From70To74,
        AgeBucket::From75,
    ];

    /// Bucket for a working-age person, `None` under 16
    pub fn for_age(age: u8) -> Option<AgeBucket> {
        let bucket = match age {
            0..=15 => return None,
            16..=19 => AgeBucket::From16To19,
            20..=21 => AgeBucket::From20To21,
            22..=24 => AgeBucket::From22To24,
            25..=29 => AgeBucket::From25To29,
            30..=34 => AgeBucket::From30To34,
            35..=44 => AgeBucket::From35To44,
            45..=54 => AgeBucket::From45To54,
            55..=59 => AgeBucket::From55To59,
            60..=61 => AgeBucket::From60To61,
            62..=64 => AgeBucket::From62To64,
            65..=69 => AgeBucket::From65To69,
            70..=74 => AgeBucket::From70To74,
            _ => AgeBucket::From75,
        };
        Some(bucket)
    }
}

/// Enrollment outcome probabilities for one jurisdiction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentProbabilities {
    pub jurisdiction: String,
    pub public: f64,
    pub private: f64,
    #[serde(rename = "notEnrolled")]
    pub not_enrolled: f64,
    #[serde(rename = "publicPrek")]
    pub public_prek: f64,
    #[serde(rename = "privatePrek")]
    pub private_prek: f64,
    #[serde(rename = "notEnrolledPrek")]
    pub not_enrolled_prek: f64,
}

impl EnrollmentProbabilities {
    /// Weights in `Enrollment::ALL` order
    pub fn weights(&self, grade: Grade) -> [f64; 3] {
        if grade == Grade::PreK {
            [self.public_prek, self.private_prek, self.not_enrolled_prek]
        } else {
            [self.public, self.private, self.not_enrolled]
        }
    }
}

/// Employment rates for one jurisdiction and sex
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmploymentProbabilities {
    pub jurisdiction: String,
    pub sex: Sex,
    pub rates: HashMap<AgeBucket, f64>,
}

/// Reasons a count table cannot be turned into proportions
#[derive(Debug, Error, PartialEq)]
pub enum ProportionError {
    #[error("{table} counts for {jurisdiction} sum to zero")]
    ZeroTotal { jurisdiction: String, table: &'static str },

    #[error("invalid {table} count {value} for {jurisdiction}")]
    InvalidCount { jurisdiction: String, table: &'static str, value: f64 },

    #[error("no employed count for bucket {bucket:?} in {jurisdiction}")]
    MissingBucket { jurisdiction: String, bucket: AgeBucket },

    #[error("{employed} employed exceeds {total} total for bucket {bucket:?} in {jurisdiction}")]
    EmployedExceedsTotal { jurisdiction: String, bucket: AgeBucket, employed: f64, total: f64 },
}

/// Head counts per enrollment class for one jurisdiction, K-12 and PreK
/// tallied separately
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentCounts {
    pub jurisdiction: String,
    pub public: f64,
    pub private: f64,
    #[serde(rename = "notEnrolled")]
    pub not_enrolled: f64,
    #[serde(rename = "publicPrek")]
    pub public_prek: f64,
    #[serde(rename = "privatePrek")]
    pub private_prek: f64,
    #[serde(rename = "notEnrolledPrek")]
    pub not_enrolled_prek: f64,
}

impl EnrollmentProbabilities {
    /// Divide each class count by the total of its group
    pub fn from_totals(counts: &EnrollmentCounts) -> Result<Self, ProportionError> {
        let jurisdiction = &counts.jurisdiction;
        let k12 = shares(jurisdiction, "enrollment", [counts.public, counts.private, counts.not_enrolled])?;
        let prek = shares(
            jurisdiction,
            "prek enrollment",
            [counts.public_prek, counts.private_prek, counts.not_enrolled_prek],
        )?;

        Ok(Self {
            jurisdiction: jurisdiction.clone(),
            public: k12[0],
            private: k12[1],
            not_enrolled: k12[2],
            public_prek: prek[0],
            private_prek: prek[1],
            not_enrolled_prek: prek[2],
        })
    }
}

fn shares(jurisdiction: &str, table: &'static str, counts: [f64; 3]) -> Result<[f64; 3], ProportionError> {
    for value in counts {
        check_count(jurisdiction, table, value)?;
    }

    let total: f64 = counts.iter().sum();
    if total <= 0.0 {
        return Err(ProportionError::ZeroTotal {
            jurisdiction: jurisdiction.to_string(),
            table,
        });
    }

    Ok(counts.map(|count| count / total))
}

fn check_count(jurisdiction: &str, table: &'static str, value: f64) -> Result<(), ProportionError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ProportionError::InvalidCount {
            jurisdiction: jurisdiction.to_string(),
            table,
            value,
        })
    }
}

/// Employed and total head counts per age bucket for one jurisdiction and sex
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmploymentCounts {
    pub jurisdiction: String,
    pub sex: Sex,
    pub employed: HashMap<AgeBucket, f64>,
    pub total: HashMap<AgeBucket, f64>,
}

impl EmploymentProbabilities {
    /// Employed over total for every bucket with a total count
    pub fn from_counts(counts: &EmploymentCounts) -> Result<Self, ProportionError> {
        let jurisdiction = &counts.jurisdiction;
        let mut rates = HashMap::with_capacity(counts.total.len());

        for (&bucket, &total) in &counts.total {
            let employed = *counts
                .employed
                .get(&bucket)
                .ok_or_else(|| ProportionError::MissingBucket {
                    jurisdiction: jurisdiction.clone(),
                    bucket,
                })?;
            check_count(jurisdiction, "employment", total)?;
            check_count(jurisdiction, "employment", employed)?;

            if total <= 0.0 {
                return Err(ProportionError::ZeroTotal {
                    jurisdiction: jurisdiction.clone(),
                    table: "employment",
                });
            }
            if employed > total {
                return Err(ProportionError::EmployedExceedsTotal {
                    jurisdiction: jurisdiction.clone(),
                    bucket,
                    employed,
                    total,
                });
            }

            rates.insert(bucket, employed / total);
        }

        Ok(Self {
            jurisdiction: jurisdiction.clone(),
            sex: counts.sex,
            rates,
        })
    }
}

/// Person row after synthesis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonRecord {
    pub id: u64,
    #[serde(rename = "householdId")]
    pub household_id: String,
    pub age: u8,
    pub sex: Sex,
    pub grade: Option<Grade>,
    pub enrollment: Option<Enrollment>,
    pub employed: bool,
    #[serde(rename = "schoolId")]
    pub school_id: Option<String>,
}

impl From<&Person> for PersonRecord {
    fn from(person: &Person) -> Self {
        Self {
            id: person.id,
            household_id: person.household_id.clone(),
            age: person.age,
            sex: person.sex,
            grade: Grade::for_age(person.age),
            enrollment: None,
            employed: false,
            school_id: None,
        }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_school(lowest: RawGrade, highest: RawGrade, total: RawCapacity) -> RawSchool {
        RawSchool {
            id: "560000100001".to_string(),
            jurisdiction: "56001".to_string(),
            lat: Some(41.31),
            lon: Some(-105.59),
            lowest_grade: Some(lowest),
            highest_grade: Some(highest),
            enrollment_total: Some(total),
        }
    }

    #[test]
    fn test_normalize_public_registry_row() {
        let school = raw_school(
            RawGrade::Text("Kindergarten".to_string()),
            RawGrade::Text("5th Grade".to_string()),
            RawCapacity::Text("312".to_string()),
        )
        .normalize()
        .unwrap();

        assert_eq!(school.grades.lower(), Grade::K);
        assert_eq!(school.grades.upper(), Grade::Fifth);
        assert_eq!(school.capacity, 312.0);
    }

    #[test]
    fn test_normalize_private_registry_row() {
        let school = raw_school(RawGrade::Code(2), RawGrade::Code(10), RawCapacity::Number(45.0))
            .normalize()
            .unwrap();

        assert_eq!(school.grades.lower(), Grade::PreK);
        assert_eq!(school.grades.upper(), Grade::Fifth);
    }

    #[test]
    fn test_unknown_grade_is_rejected() {
        let err = raw_school(
            RawGrade::Text("Ungraded".to_string()),
            RawGrade::Text("12th Grade".to_string()),
            RawCapacity::Number(100.0),
        )
        .normalize()
        .unwrap_err();

        assert_eq!(err, RecordError::UnknownGrade("Ungraded".to_string()));
    }

    #[test]
    fn test_non_numeric_capacity_is_rejected() {
        let err = raw_school(
            RawGrade::Code(3),
            RawGrade::Code(8),
            RawCapacity::Text("–".to_string()),
        )
        .normalize()
        .unwrap_err();

        assert!(matches!(err, RecordError::InvalidCapacity(_)));
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let err = raw_school(RawGrade::Code(17), RawGrade::Code(3), RawCapacity::Number(10.0))
            .normalize()
            .unwrap_err();

        assert_eq!(
            err,
            RecordError::InvertedGradeRange { lower: Grade::Twelfth, upper: Grade::K }
        );
    }

    #[test]
    fn test_normalize_schools_counts_drops() {
        let mut missing_location = raw_school(RawGrade::Code(3), RawGrade::Code(8), RawCapacity::Number(10.0));
        missing_location.lat = None;

        let rows = vec![
            raw_school(RawGrade::Code(3), RawGrade::Code(8), RawCapacity::Number(10.0)),
            missing_location,
            raw_school(RawGrade::Code(3), RawGrade::Code(8), RawCapacity::Number(-4.0)),
        ];

        let (schools, dropped) = normalize_schools(rows);
        assert_eq!(schools.len(), 1);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn test_age_buckets() {
        assert_eq!(AgeBucket::for_age(15), None);
        assert_eq!(AgeBucket::for_age(16), Some(AgeBucket::From16To19));
        assert_eq!(AgeBucket::for_age(44), Some(AgeBucket::From35To44));
        assert_eq!(AgeBucket::for_age(90), Some(AgeBucket::From75));
    }

    #[test]
    fn test_raw_grade_deserialization() {
        let code: RawGrade = serde_json::from_str("7").unwrap();
        let text: RawGrade = serde_json::from_str("\"3rd Grade\"").unwrap();

        assert_eq!(code.to_grade(), Some(Grade::Second));
        assert_eq!(text.to_grade(), Some(Grade::Third));
    }

    fn enrollment_counts(k12: [f64; 3], prek: [f64; 3]) -> EnrollmentCounts {
        EnrollmentCounts {
            jurisdiction: "56021".to_string(),
            public: k12[0],
            private: k12[1],
            not_enrolled: k12[2],
            public_prek: prek[0],
            private_prek: prek[1],
            not_enrolled_prek: prek[2],
        }
    }

    #[test]
    fn test_enrollment_proportions_from_totals() {
        let row = EnrollmentProbabilities::from_totals(&enrollment_counts([850.0, 50.0, 100.0], [30.0, 20.0, 50.0]))
            .unwrap();

        assert!((row.public - 0.85).abs() < 1e-12);
        assert!((row.private - 0.05).abs() < 1e-12);
        assert!((row.not_enrolled - 0.10).abs() < 1e-12);
        assert!((row.public_prek - 0.3).abs() < 1e-12);
        assert!((row.private_prek - 0.2).abs() < 1e-12);
        assert!((row.not_enrolled_prek - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_zero_enrollment_total_is_an_error() {
        let err = EnrollmentProbabilities::from_totals(&enrollment_counts([10.0, 0.0, 0.0], [0.0, 0.0, 0.0]))
            .unwrap_err();
        assert_eq!(
            err,
            ProportionError::ZeroTotal { jurisdiction: "56021".to_string(), table: "prek enrollment" }
        );

        let err = EnrollmentProbabilities::from_totals(&enrollment_counts([-1.0, 5.0, 5.0], [1.0, 1.0, 1.0]))
            .unwrap_err();
        assert!(matches!(err, ProportionError::InvalidCount { .. }));
    }

    #[test]
    fn test_employment_rates_from_counts() {
        let counts = EmploymentCounts {
            jurisdiction: "56021".to_string(),
            sex: Sex::Female,
            employed: HashMap::from([(AgeBucket::From16To19, 30.0), (AgeBucket::From75, 0.0)]),
            total: HashMap::from([(AgeBucket::From16To19, 120.0), (AgeBucket::From75, 40.0)]),
        };

        let row = EmploymentProbabilities::from_counts(&counts).unwrap();
        assert_eq!(row.sex, Sex::Female);
        assert_eq!(row.rates.len(), 2);
        assert_eq!(row.rates[&AgeBucket::From16To19], 0.25);
        assert_eq!(row.rates[&AgeBucket::From75], 0.0);
    }

    #[test]
    fn test_employment_counts_are_checked() {
        let mut counts = EmploymentCounts {
            jurisdiction: "56021".to_string(),
            sex: Sex::Male,
            employed: HashMap::from([(AgeBucket::From25To29, 10.0)]),
            total: HashMap::from([(AgeBucket::From25To29, 0.0)]),
        };
        assert!(matches!(
            EmploymentProbabilities::from_counts(&counts),
            Err(ProportionError::ZeroTotal { .. })
        ));

        counts.total.insert(AgeBucket::From25To29, 8.0);
        assert!(matches!(
            EmploymentProbabilities::from_counts(&counts),
            Err(ProportionError::EmployedExceedsTotal { .. })
        ));

        counts.total.insert(AgeBucket::From30To34, 8.0);
        counts.total.insert(AgeBucket::From25To29, 12.0);
        assert_eq!(
            EmploymentProbabilities::from_counts(&counts).unwrap_err(),
            ProportionError::MissingBucket { jurisdiction: "56021".to_string(), bucket: AgeBucket::From30To34 }
        );
    }
}
