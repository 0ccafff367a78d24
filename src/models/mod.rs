// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{
    normalize_schools, AgeBucket, BoundingBox, EmploymentCounts, EmploymentProbabilities, Enrollment,
    EnrollmentCounts, EnrollmentProbabilities, Household, Location, Person, PersonRecord, ProportionError,
    RawCapacity, RawGrade, RawSchool, RecordError, School, Sex, Student,
};
pub use requests::{AssignSchoolsRequest, SynthesizeRequest};
pub use responses::{AssignSchoolsResponse, ErrorResponse, HealthResponse, SynthesizeResponse};
