use serde::{Deserialize, Serialize};

use crate::core::matcher::{Assignment, MatchStats, SchoolTally};
use crate::core::pipeline::{AssignmentOutput, ScopeReport, SynthesisReport};
use crate::models::domain::PersonRecord;

/// Response for the synthesize endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizeResponse {
    #[serde(rename = "runId")]
    pub run_id: uuid::Uuid,
    pub seed: u64,
    pub persons: Vec<PersonRecord>,
    pub report: SynthesisReport,
}

/// Response for the school assignment endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignSchoolsResponse {
    pub assignments: Vec<Assignment>,
    pub tallies: Vec<SchoolTally>,
    pub scopes: Vec<ScopeReport>,
    pub totals: MatchStats,
    #[serde(rename = "droppedSchools")]
    pub dropped_schools: usize,
    #[serde(rename = "droppedStudents", default)]
    pub dropped_students: usize,
}

impl From<AssignmentOutput> for AssignSchoolsResponse {
    fn from(output: AssignmentOutput) -> Self {
        Self {
            assignments: output.assignments,
            tallies: output.tallies,
            scopes: output.scopes,
            totals: output.totals,
            dropped_schools: output.dropped_schools,
            dropped_students: output.dropped_students,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}
