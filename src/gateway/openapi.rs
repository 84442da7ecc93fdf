//! OpenAPI document for the gateway.
//!
//! Swagger UI serves the generated JSON at `/docs`; the raw document
//! lives at `/api-docs/openapi.json`.

use utoipa::OpenApi;

use crate::gateway::handlers::{EventRequest, EventResponse, HealthResponse};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Refledger API",
        version = "1.0.0",
        description = "Referral incentive ledger: conversational events in, replies out. \
                       Balances, referral confirmation, and manually settled withdrawals.",
        license(
            name = "MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::post_event,
        crate::gateway::handlers::health_check,
    ),
    components(
        schemas(
            EventRequest,
            EventResponse,
            HealthResponse,
        )
    ),
    tags(
        (name = "Ledger", description = "Conversational event intake"),
        (name = "System", description = "Health checks and system info")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_both_endpoints() {
        let spec = ApiDoc::openapi();
        assert!(spec.paths.paths.contains_key("/api/v1/event"));
        assert!(spec.paths.paths.contains_key("/api/v1/health"));
    }

    #[test]
    fn test_document_serializes_with_schemas() {
        let json = ApiDoc::openapi().to_json().unwrap();
        assert!(json.contains("Refledger API"));
        assert!(json.contains("EventRequest"));
    }
}
