use actix_web::{web, HttpResponse, Responder};
use validator::Validate;

use crate::core::merger::MergeError;
use crate::core::pipeline::{PipelineError, Synthesizer};
use crate::models::{
    AssignSchoolsRequest, AssignSchoolsResponse, ErrorResponse, HealthResponse, SynthesizeRequest,
    SynthesizeResponse,
};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub synthesizer: Synthesizer,
}

/// Configure synthesis routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/health", web::get().to(health_check))
        .route("/synthesize", web::post().to(synthesize))
        .route("/schools/assign", web::post().to(assign_schools));
}

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

/// Synthesize endpoint
///
/// POST /api/v1/synthesize
///
/// Request body:
/// ```json
/// {
///   "persons": [{"id": 1, "householdId": "h1", "age": 9, "sex": "female"}],
///   "households": [{"id": "h1", "jurisdiction": "56021", "lat": 41.14, "lon": -104.82}],
///   "publicSchools": [{"id": "s1", "jurisdiction": "56021", "lat": 41.13, "lon": -104.81,
///                      "lowestGrade": "Kindergarten", "highestGrade": "5th Grade",
///                      "enrollmentTotal": 250}],
///   "privateSchools": [],
///   "enrollmentProbabilities": [...],
///   "employmentProbabilities": [...],
///   "seed": 123
/// }
/// ```
async fn synthesize(state: web::Data<AppState>, req: web::Json<SynthesizeRequest>) -> impl Responder {
    if let Err(errors) = req.validate() {
        tracing::info!("Validation failed for synthesize request: {}", errors);
        return validation_error(errors);
    }

    let (input, seed) = match req.into_inner().into_input() {
        Ok(converted) => converted,
        Err(e) => {
            tracing::info!("Count table rejected: {}", e);
            return HttpResponse::BadRequest().json(ErrorResponse {
                error: "Invalid counts".to_string(),
                message: e.to_string(),
                status_code: 400,
            });
        }
    };
    let synthesizer = match seed {
        Some(seed) => state.synthesizer.with_seed(seed),
        None => state.synthesizer.clone(),
    };
    let seed = synthesizer.settings().sampling.seed;
    let run_id = uuid::Uuid::new_v4();

    tracing::info!(
        "Run {}: synthesizing {} persons in {} households (seed {})",
        run_id,
        input.persons.len(),
        input.households.len(),
        seed
    );

    match web::block(move || synthesizer.run(input)).await {
        Ok(Ok(output)) => HttpResponse::Ok().json(SynthesizeResponse {
            run_id,
            seed,
            persons: output.persons,
            report: output.report,
        }),
        Ok(Err(e)) => {
            tracing::error!("Run {} failed: {}", run_id, e);
            pipeline_error(e)
        }
        Err(e) => {
            tracing::error!("Run {} could not be scheduled: {}", run_id, e);
            internal_error(e.to_string())
        }
    }
}

/// School assignment endpoint
///
/// POST /api/v1/schools/assign
///
/// Request body:
/// ```json
/// {
///   "students": [{"id": 1, "grade": "third", "lat": 41.14, "lon": -104.82, "jurisdiction": "56021"}],
///   "schools": [...],
///   "scope": "region"
/// }
/// ```
async fn assign_schools(state: web::Data<AppState>, req: web::Json<AssignSchoolsRequest>) -> impl Responder {
    if let Err(errors) = req.validate() {
        tracing::info!("Validation failed for assign request: {}", errors);
        return validation_error(errors);
    }

    let AssignSchoolsRequest { students, schools, scope } = req.into_inner();
    let synthesizer = state.synthesizer.clone();

    tracing::info!("Assigning {} students to {} schools ({:?})", students.len(), schools.len(), scope);

    match web::block(move || synthesizer.assign_schools(students, schools, scope)).await {
        Ok(Ok(output)) => HttpResponse::Ok().json(AssignSchoolsResponse::from(output)),
        Ok(Err(e)) => {
            tracing::info!("Assignment rejected: {}", e);
            pipeline_error(e)
        }
        Err(e) => {
            tracing::error!("Assignment could not be scheduled: {}", e);
            internal_error(e.to_string())
        }
    }
}

fn validation_error(errors: validator::ValidationErrors) -> HttpResponse {
    HttpResponse::BadRequest().json(ErrorResponse {
        error: "Validation failed".to_string(),
        message: errors.to_string(),
        status_code: 400,
    })
}

fn internal_error(message: String) -> HttpResponse {
    HttpResponse::InternalServerError().json(ErrorResponse {
        error: "Internal error".to_string(),
        message,
        status_code: 500,
    })
}

/// Data contract violations are the caller's fault; anything else is ours
fn pipeline_error(error: PipelineError) -> HttpResponse {
    let (error_name, client_fault) = match &error {
        PipelineError::UnknownHousehold { .. } => ("Unknown household", true),
        PipelineError::InvalidHouseholdLocation { .. } => ("Invalid location", true),
        PipelineError::DuplicateStudent(_) => ("Duplicate student", true),
        PipelineError::Sampling(_) => ("Invalid probabilities", true),
        PipelineError::Merge(MergeError::DuplicatePerson(_)) => ("Duplicate person", true),
        PipelineError::Merge(_) => ("Merge failed", false),
    };

    let response = ErrorResponse {
        error: error_name.to_string(),
        message: error.to_string(),
        status_code: if client_fault { 400 } else { 500 },
    };

    if client_fault {
        HttpResponse::BadRequest().json(response)
    } else {
        HttpResponse::InternalServerError().json(response)
    }
}
