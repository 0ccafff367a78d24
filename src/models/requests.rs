use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::core::pipeline::{ScopeStrategy, SynthesisInput};
use crate::models::domain::{
    EmploymentCounts, EmploymentProbabilities, EnrollmentCounts, EnrollmentProbabilities, Household, Person,
    ProportionError, RawSchool, Student,
};

/// Request to synthesize school and employment attributes
///
/// Probability rows may be given directly or as head counts; count rows are
/// converted to proportions and appended after the direct rows.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_enrollment_source"))]
pub struct SynthesizeRequest {
    #[validate(length(min = 1))]
    pub persons: Vec<Person>,
    #[validate(length(min = 1), custom(function = "validate_households"))]
    pub households: Vec<Household>,
    #[serde(rename = "publicSchools", default)]
    pub public_schools: Vec<RawSchool>,
    #[serde(rename = "privateSchools", default)]
    pub private_schools: Vec<RawSchool>,
    #[serde(rename = "enrollmentProbabilities", default)]
    pub enrollment_probabilities: Vec<EnrollmentProbabilities>,
    #[serde(rename = "employmentProbabilities", default)]
    pub employment_probabilities: Vec<EmploymentProbabilities>,
    #[serde(rename = "enrollmentCounts", default)]
    pub enrollment_counts: Vec<EnrollmentCounts>,
    #[serde(rename = "employmentCounts", default)]
    pub employment_counts: Vec<EmploymentCounts>,
    /// Overrides the configured sampling seed
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SynthesizeRequest {
    pub fn into_input(self) -> Result<(SynthesisInput, Option<u64>), ProportionError> {
        let mut enrollment = self.enrollment_probabilities;
        for counts in &self.enrollment_counts {
            enrollment.push(EnrollmentProbabilities::from_totals(counts)?);
        }

        let mut employment = self.employment_probabilities;
        for counts in &self.employment_counts {
            employment.push(EmploymentProbabilities::from_counts(counts)?);
        }

        let input = SynthesisInput {
            persons: self.persons,
            households: self.households,
            public_schools: self.public_schools,
            private_schools: self.private_schools,
            enrollment,
            employment,
        };
        Ok((input, self.seed))
    }
}

/// Request to assign already-enrolled students to schools
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AssignSchoolsRequest {
    #[validate(length(min = 1), custom(function = "validate_students"))]
    pub students: Vec<Student>,
    #[validate(length(min = 1))]
    pub schools: Vec<RawSchool>,
    #[serde(default = "default_scope")]
    pub scope: ScopeStrategy,
}

fn default_scope() -> ScopeStrategy {
    ScopeStrategy::Region
}

fn validate_enrollment_source(request: &SynthesizeRequest) -> Result<(), ValidationError> {
    if request.enrollment_probabilities.is_empty() && request.enrollment_counts.is_empty() {
        Err(ValidationError::new("missing_enrollment_probabilities"))
    } else {
        Ok(())
    }
}

fn validate_households(households: &[Household]) -> Result<(), ValidationError> {
    if households.iter().all(|household| household.location.is_valid()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_household_location"))
    }
}

fn validate_students(students: &[Student]) -> Result<(), ValidationError> {
    if students.iter().all(|student| student.location.is_valid()) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_student_location"))
    }
}
