use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::handlers::image::*;
use crate::state::AppState;

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(routes!(ingest_image))
        .routes(routes!(get_image))
        .routes(routes!(get_image_metadata))
        .routes(routes!(update_description))
}
