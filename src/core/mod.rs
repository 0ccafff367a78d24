// Core algorithm exports
pub mod distance;
pub mod filters;
pub mod grade;
pub mod matcher;
pub mod merger;
pub mod pairs;
pub mod pipeline;
pub mod sampler;

pub use distance::{calculate_bounding_box, haversine_distance, haversine_many, is_within_bounding_box};
pub use grade::{Grade, GradeRange};
pub use matcher::{Assignment, MatchResult, MatchSettings, MatchStats, Matcher, ReconcilePolicy, SchoolTally, UnassignedReason};
pub use merger::{merge_assignments, MergeError};
pub use pairs::{CandidatePair, CandidateSet};
pub use pipeline::{
    AssignmentOutput, HouseholdScopes, PipelineError, ScopeReport, ScopeSource, ScopeStrategy, StudentScopes,
    SynthesisInput, SynthesisOutput, SynthesisReport, SynthesisSettings, Synthesizer,
};
pub use sampler::{CategoricalSampler, SamplerSettings, SamplingError, SamplingUnit};
