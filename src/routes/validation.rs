use actix_web::{HttpResponse, get, post, web};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use utoipa::ToSchema;

use crate::error::ServiceError;
use crate::models::{EmailValidationResult, StatusView, SubmitOutcome, UnitStatus, ValidationFlags};
use crate::orchestrator::Orchestrator;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateBatchRequest {
    pub emails: Vec<String>,
    /// Every check is on unless the flags say otherwise.
    #[serde(default)]
    pub validation_flags: ValidationFlags,
}

/// Answer to a submission: inline results, or the ids to poll.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionResponse {
    pub status: String,
    pub total_emails: usize,
    pub processed_emails: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<Object>>)]
    pub results: Option<Vec<EmailValidationResult>>,
}

impl From<SubmitOutcome> for SubmissionResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Inline { results } => Self {
                status: "completed".to_string(),
                total_emails: results.len(),
                processed_emails: results.len(),
                unit_id: None,
                request_id: None,
                unit_ids: None,
                results: Some(results),
            },
            SubmitOutcome::Unit {
                unit_id,
                total_emails,
            } => Self {
                status: "processing".to_string(),
                total_emails,
                processed_emails: 0,
                unit_id: Some(unit_id),
                request_id: None,
                unit_ids: None,
                results: None,
            },
            SubmitOutcome::Submission {
                request_id,
                unit_ids,
                total_emails,
            } => Self {
                status: "processing".to_string(),
                total_emails,
                processed_emails: 0,
                unit_id: None,
                request_id: Some(request_id),
                unit_ids: Some(unit_ids),
                results: None,
            },
        }
    }
}

/// # Batch Validation Endpoint
///
/// Submissions of up to the inline threshold are validated in the request
/// and answered with `200 OK`. Larger ones are queued and answered with
/// `202 Accepted` carrying a `unitId` (one unit) or a `requestId` plus
/// `unitIds` (split submission).
///
/// Blank entries are dropped; a submission with nothing left is rejected.
///
/// ## Example Request
/// ```json
/// {
///   "emails": ["alice@example.org", "bob@example.net"],
///   "validationFlags": { "checkSmtp": false }
/// }
/// ```
#[utoipa::path(
    post,
    path = "/api/v1/validate-batch",
    request_body = ValidateBatchRequest,
    responses(
        (status = 200, description = "Validated inline", body = SubmissionResponse),
        (status = 202, description = "Queued for asynchronous validation", body = SubmissionResponse),
        (status = 400, description = "Empty or oversized submission", body = crate::routes::ErrorResponse),
        (status = 503, description = "Queue or store unavailable, retry later", body = crate::routes::ErrorResponse)
    ),
    tag = "Email Validation"
)]
#[post("/validate-batch")]
pub async fn validate_batch(
    req: web::Json<ValidateBatchRequest>,
    orchestrator: web::Data<Orchestrator>,
) -> Result<HttpResponse, ServiceError> {
    let ValidateBatchRequest {
        emails,
        validation_flags,
    } = req.into_inner();
    let emails: Vec<String> = emails
        .into_iter()
        .map(|email| email.trim().to_string())
        .filter(|email| !email.is_empty())
        .collect();

    let outcome = orchestrator.submit(emails, validation_flags).await?;
    let response = SubmissionResponse::from(outcome);
    if response.results.is_some() {
        Ok(HttpResponse::Ok().json(response))
    } else {
        Ok(HttpResponse::Accepted().json(response))
    }
}

/// # Validation Status Endpoint
///
/// Latest snapshot of a unit, including partial results. An id that belongs
/// to a split submission answers with the aggregate until the unit reports.
/// Unknown or not-yet-started ids answer `processing` with no results, since
/// a queued unit has no snapshot until its first chunk completes.
#[utoipa::path(
    get,
    path = "/api/v1/validation-status/{id}",
    params(
        ("id" = String, Path, description = "Unit id, or the request id of a split submission")
    ),
    responses(
        (status = 200, description = "Latest known progress"),
        (status = 503, description = "Store unavailable", body = crate::routes::ErrorResponse)
    ),
    tag = "Email Validation"
)]
#[get("/validation-status/{id}")]
pub async fn validation_status(
    path: web::Path<String>,
    orchestrator: web::Data<Orchestrator>,
) -> Result<HttpResponse, ServiceError> {
    let id = path.into_inner();
    match orchestrator.get_status(&id).await? {
        StatusView::Unit(snapshot) => Ok(HttpResponse::Ok().json(snapshot)),
        StatusView::Submission(status) => Ok(HttpResponse::Ok().json(status)),
        StatusView::Pending { unit_id } => Ok(HttpResponse::Ok().json(json!({
            "unitId": unit_id,
            "status": UnitStatus::Processing,
            "processedEmails": 0,
            "results": [],
            "message": "No progress reported yet"
        }))),
    }
}

/// # Aggregated Status Endpoint
///
/// Sums the progress of every unit of a split submission and concatenates
/// their results in unit order.
#[utoipa::path(
    get,
    path = "/api/v1/multi-status/{request_id}",
    params(
        ("request_id" = String, Path, description = "Request id returned by validate-batch")
    ),
    responses(
        (status = 200, description = "Aggregated progress"),
        (status = 404, description = "Unknown or expired request id", body = crate::routes::ErrorResponse),
        (status = 503, description = "Store unavailable", body = crate::routes::ErrorResponse)
    ),
    tag = "Email Validation"
)]
#[get("/multi-status/{request_id}")]
pub async fn multi_status(
    path: web::Path<String>,
    orchestrator: web::Data<Orchestrator>,
) -> Result<HttpResponse, ServiceError> {
    let request_id = path.into_inner();
    let status = orchestrator.get_multi_status(&request_id).await?;
    info!(
        request_id = %request_id,
        progress = status.progress,
        "aggregated status served"
    );
    Ok(HttpResponse::Ok().json(status))
}

/// Configures validation routes under /api/v1
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(validate_batch)
        .service(validation_status)
        .service(multi_status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::ErrorResponse;
    use crate::routes::test_support::{TestBackend, backend};
    use actix_web::{App, test};
    use serde_json::Value;

    async fn create_test_app(
        orchestrator: Orchestrator,
    ) -> impl actix_web::dev::Service<
        actix_http::Request,
        Response = actix_web::dev::ServiceResponse,
        Error = actix_web::Error,
    > {
        test::init_service(
            App::new()
                .app_data(web::Data::new(orchestrator))
                .configure(configure_routes),
        )
        .await
    }

    fn emails(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("user{i}@nowhere.io")).collect()
    }

    #[actix_web::test]
    async fn test_small_batch_answers_inline() {
        let TestBackend { orchestrator, .. } = backend();
        let app = create_test_app(orchestrator).await;

        let req = test::TestRequest::post()
            .uri("/validate-batch")
            .set_json(json!({ "emails": ["bad-syntax", " x@nowhere.io ", ""] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 200);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["totalEmails"], 2);
        assert_eq!(body["results"][0]["status"], "undeliverable");
        assert_eq!(body["results"][0]["details"]["subStatus"], "invalid_email");
        assert_eq!(body["results"][0]["isValid"], false);
        assert_eq!(body["results"][1]["email"], "x@nowhere.io");
        assert_eq!(body["results"][1]["details"]["subStatus"], "invalid_domain");
        assert!(body["results"][1].get("sub_status").is_none());
    }

    #[actix_web::test]
    async fn test_empty_batch_is_bad_request() {
        let TestBackend { orchestrator, .. } = backend();
        let app = create_test_app(orchestrator).await;

        let req = test::TestRequest::post()
            .uri("/validate-batch")
            .set_json(json!({ "emails": ["  "] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 400);

        let body: ErrorResponse = test::read_body_json(resp).await;
        assert_eq!(body.error, "EMPTY_SUBMISSION");
    }

    #[actix_web::test]
    async fn test_large_batch_is_accepted_and_queued() {
        let TestBackend {
            queue,
            orchestrator,
            ..
        } = backend();
        let app = create_test_app(orchestrator).await;

        let req = test::TestRequest::post()
            .uri("/validate-batch")
            .set_json(json!({
                "emails": emails(250),
                "validationFlags": { "checkSmtp": false }
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 202);

        let body: SubmissionResponse = test::read_body_json(resp).await;
        assert_eq!(body.status, "processing");
        assert_eq!(body.total_emails, 250);
        let unit_ids = body.unit_ids.unwrap();
        assert_eq!(unit_ids.len(), 3);
        assert!(body.request_id.is_some());

        let queued = queue.pending_units();
        assert_eq!(queued.len(), 3);
        assert!(queued.iter().all(|unit| !unit.validation_flags.check_smtp));
        assert!(queued.iter().all(|unit| unit.validation_flags.check_mx));
    }

    #[actix_web::test]
    async fn test_status_of_unknown_unit_is_processing() {
        let TestBackend { orchestrator, .. } = backend();
        let app = create_test_app(orchestrator).await;

        let req = test::TestRequest::get()
            .uri("/validation-status/never-seen")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["unitId"], "never-seen");
        assert_eq!(body["status"], "processing");
        assert_eq!(body["results"], json!([]));
    }

    #[actix_web::test]
    async fn test_multi_status_follows_submission() {
        let TestBackend { orchestrator, .. } = backend();
        let orchestrator = web::Data::new(orchestrator);
        let app = test::init_service(
            App::new()
                .app_data(orchestrator.clone())
                .configure(configure_routes),
        )
        .await;

        let outcome = orchestrator
            .submit(emails(45), ValidationFlags::default())
            .await
            .unwrap();
        let SubmitOutcome::Submission { request_id, .. } = outcome else {
            panic!("expected a split submission, got {outcome:?}");
        };

        let req = test::TestRequest::get()
            .uri(&format!("/multi-status/{request_id}"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["requestId"], request_id.as_str());
        assert_eq!(body["totalEmails"], 45);
        assert_eq!(body["progress"], 0.0);
        assert_eq!(body["units"].as_array().map(Vec::len), Some(2));

        let req = test::TestRequest::get()
            .uri("/multi-status/unknown")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status().as_u16(), 404);
    }
}
