use axum::Json;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use common::ImageId;
use tracing::instrument;

use crate::error::{AppError, ErrorBody};
use crate::extractors::admin::AdminAuth;
use crate::extractors::json::AppJson;
use crate::models::image::*;
use crate::services::IngestOutcome;
use crate::services::enrichment::{DESCRIPTION_HEADER, ID_HEADER};
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/images",
    tag = "Images",
    operation_id = "ingestImage",
    summary = "Ingest an image by URL",
    description = "Fetches the image at `url` and stores it. Ingesting a URL that was already ingested returns the existing id without fetching again. The host is checked literally against loopback, private and link-local ranges; names are not resolved.",
    request_body = IngestRequest,
    responses(
        (status = 201, description = "Image ingested", body = IngestResponse),
        (status = 200, description = "Source URL already ingested", body = IngestResponse),
        (status = 400, description = "Rejected URL, content type or size (VALIDATION_ERROR)", body = ErrorBody),
        (status = 502, description = "Source could not be fetched (UPSTREAM_FETCH_FAILED)", body = ErrorBody),
        (status = 503, description = "Storage unavailable (STORE_UNAVAILABLE)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, payload), fields(url = %payload.url))]
pub async fn ingest_image(
    State(state): State<AppState>,
    AppJson(payload): AppJson<IngestRequest>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.ingest.ingest(&payload.url).await?;
    let status = match outcome {
        IngestOutcome::Created(_) => StatusCode::CREATED,
        IngestOutcome::Existing(_) => StatusCode::OK,
    };

    Ok((
        status,
        Json(IngestResponse {
            id: outcome.id().to_string(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/images/{id}",
    tag = "Images",
    operation_id = "getImage",
    summary = "Serve image bytes",
    description = "Returns the original bytes. `X-Image-Description` carries the description, or `pending` until one exists. The first read of an undescribed image schedules description generation in the background. Supports `If-None-Match`.",
    params(("id" = String, Path, description = "Image id (UUID v4)")),
    responses(
        (status = 200, description = "Image bytes",
            headers(
                ("X-Image-Id" = String, description = "Image id"),
                ("X-Image-Description" = String, description = "Sanitized description or `pending`"),
                ("Cache-Control" = String, description = "Long-lived once described, short with revalidation while pending"),
                ("ETag" = String, description = "SHA-256 of the bytes"),
            )
        ),
        (status = 304, description = "Not modified"),
        (status = 400, description = "Invalid id (VALIDATION_ERROR)", body = ErrorBody),
        (status = 404, description = "No blob for this id (NOT_FOUND)", body = ErrorBody),
        (status = 503, description = "Blob store unavailable (STORE_UNAVAILABLE)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, headers))]
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let id: ImageId = id.parse()?;
    let response = state.funnel.serve(id).await?;

    if let Some(etag) = response.headers.get(header::ETAG)
        && if_none_match(&headers, etag)
    {
        let mut not_modified = Response::new(Body::empty());
        *not_modified.status_mut() = StatusCode::NOT_MODIFIED;
        for name in [header::ETAG, header::CACHE_CONTROL, ID_HEADER, DESCRIPTION_HEADER] {
            if let Some(value) = response.headers.get(&name) {
                not_modified.headers_mut().insert(name, value.clone());
            }
        }
        return Ok(not_modified);
    }

    Ok(response.into_response())
}

/// Whether `If-None-Match` matches `etag`, using weak comparison.
fn if_none_match(headers: &HeaderMap, etag: &HeaderValue) -> bool {
    let Ok(etag) = etag.to_str() else {
        return false;
    };
    let etag = etag.trim_start_matches("W/");

    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == etag)
}

#[utoipa::path(
    get,
    path = "/images/{id}/metadata",
    tag = "Images",
    operation_id = "getImageMetadata",
    summary = "Get image metadata",
    description = "Returns the stored record. Reading metadata never schedules description generation.",
    params(("id" = String, Path, description = "Image id (UUID v4)")),
    responses(
        (status = 200, description = "Image metadata", body = ImageMetadataResponse),
        (status = 400, description = "Invalid id (VALIDATION_ERROR)", body = ErrorBody),
        (status = 404, description = "Image not found (NOT_FOUND)", body = ErrorBody),
        (status = 503, description = "Metadata store unavailable (STORE_UNAVAILABLE)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn get_image_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ImageMetadataResponse>, AppError> {
    let id: ImageId = id.parse()?;
    let record = state
        .images
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Image {id} not found")))?;

    Ok(Json(ImageMetadataResponse::from(record)))
}

#[utoipa::path(
    put,
    path = "/images/{id}/description",
    tag = "Images",
    operation_id = "updateImageDescription",
    summary = "Set an image description",
    description = "Stores a human-written description. The text goes through the same sanitizer as generated descriptions. Requires the admin token when one is configured.",
    params(("id" = String, Path, description = "Image id (UUID v4)")),
    request_body = UpdateDescriptionRequest,
    responses(
        (status = 200, description = "Description stored", body = DescriptionResponse),
        (status = 400, description = "Invalid id or empty description (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Image not found (NOT_FOUND)", body = ErrorBody),
        (status = 503, description = "Metadata store unavailable (STORE_UNAVAILABLE)", body = ErrorBody),
    ),
    security(("admin_token" = [])),
)]
#[instrument(skip(state, _admin, payload))]
pub async fn update_description(
    _admin: AdminAuth,
    State(state): State<AppState>,
    Path(id): Path<String>,
    AppJson(payload): AppJson<UpdateDescriptionRequest>,
) -> Result<Json<DescriptionResponse>, AppError> {
    let id: ImageId = id.parse()?;
    payload.validate()?;

    let description = state
        .funnel
        .publish_description(id, &payload.description)
        .await?;

    Ok(Json(DescriptionResponse {
        id: id.to_string(),
        description,
    }))
}
