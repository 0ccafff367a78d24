//! Popsynth Assign - school and employment attributes for synthetic populations
//!
//! This library samples enrollment and employment for a simulated population
//! and assigns enrolled students to schools nearest-first under soft capacity
//! limits, one independent task per jurisdiction.

pub mod config;
pub mod core;
pub mod models;
pub mod routes;

// Re-export commonly used types
pub use core::{
    distance::{calculate_bounding_box, haversine_distance},
    CandidateSet, Grade, GradeRange, MatchSettings, Matcher, PipelineError, ReconcilePolicy, SynthesisInput,
    SynthesisOutput, SynthesisSettings, Synthesizer,
};
pub use models::{Household, Location, Person, PersonRecord, RawSchool, School, Student};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let bbox = calculate_bounding_box(41.14, -104.82, 10.0);
        assert!(bbox.min_lat < 41.14);
        assert_eq!(Grade::for_age(6), Some(Grade::First));
    }
}
