use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use crate::registry::{
    ApplicationEnvelope, Applications, ApplicationsEnvelope, InMemoryRegistry, InstanceEnvelope,
    RegistryError, Status,
};
use serde::Deserialize;
use tracing::{info, warn};

pub fn apps_router(registry: InMemoryRegistry) -> Router {
    Router::new()
        .route("/apps", get(list))
        .route("/apps/:app", post(register).get(app))
        .route(
            "/apps/:app/:id",
            get(app_instance).put(heartbeat).delete(deregister),
        )
        .route(
            "/apps/:app/:id/status",
            put(status_override).delete(remove_status_override),
        )
        .route("/instances/:id", get(instance))
        .with_state(registry)
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        let status = match self {
            RegistryError::AppNotFound(_) | RegistryError::InstanceNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            RegistryError::AlreadyRegistered { .. } => StatusCode::CONFLICT,
        };
        (status, self.to_string()).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub value: String,
}

pub async fn list(State(registry): State<InMemoryRegistry>) -> Json<ApplicationsEnvelope> {
    let applications = registry.snapshot().await;
    Json(ApplicationsEnvelope {
        applications: Applications { applications },
    })
}

pub async fn register(
    State(registry): State<InMemoryRegistry>,
    Path(app): Path<String>,
    Json(req): Json<InstanceEnvelope>,
) -> Result<StatusCode, RegistryError> {
    registry.register(&app, req.instance).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn app(
    State(registry): State<InMemoryRegistry>,
    Path(app): Path<String>,
) -> Result<Json<ApplicationEnvelope>, RegistryError> {
    let application = registry.app(&app).await?;
    Ok(Json(ApplicationEnvelope { application }))
}

pub async fn app_instance(
    State(registry): State<InMemoryRegistry>,
    Path((app, id)): Path<(String, String)>,
) -> Result<Json<InstanceEnvelope>, RegistryError> {
    let instance = registry.app_instance(&app, &id).await?;
    Ok(Json(InstanceEnvelope { instance }))
}

pub async fn instance(
    State(registry): State<InMemoryRegistry>,
    Path(id): Path<String>,
) -> Result<Json<InstanceEnvelope>, RegistryError> {
    let instance = registry.instance(&id).await?;
    Ok(Json(InstanceEnvelope { instance }))
}

pub async fn heartbeat(
    State(registry): State<InMemoryRegistry>,
    Path((app, id)): Path<(String, String)>,
) -> Result<StatusCode, RegistryError> {
    registry.heartbeat(&app, &id).await?;
    Ok(StatusCode::OK)
}

pub async fn deregister(
    State(registry): State<InMemoryRegistry>,
    Path((app, id)): Path<(String, String)>,
) -> Result<StatusCode, RegistryError> {
    registry.deregister(&app, &id).await?;
    Ok(StatusCode::OK)
}

pub async fn status_override(
    State(registry): State<InMemoryRegistry>,
    Path((app, id)): Path<(String, String)>,
    Query(query): Query<StatusQuery>,
) -> Response {
    let status = match query.value.parse::<Status>() {
        Ok(status) => status,
        Err(e) => {
            warn!("Rejecting status override: {}", e);
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match registry.status_override(&app, &id, status).await {
        Ok(_) => {
            info!("Overrode status of {}/{} to {}", app, id, status);
            StatusCode::OK.into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub async fn remove_status_override(
    State(registry): State<InMemoryRegistry>,
    Path((app, id)): Path<(String, String)>,
    Query(query): Query<StatusQuery>,
) -> Response {
    let fallback = match query.value.parse::<Status>() {
        Ok(status) => status,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match registry.remove_status_override(&app, &id, fallback).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}
