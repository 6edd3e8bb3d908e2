use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use validator::Validate;

use crate::{
    dto::generation_dto::{GenerateAccepted, GeneratePayload},
    error::Result,
    middleware::auth::Claims,
    AppState,
};

#[axum::debug_handler(state = AppState)]
pub async fn create_generation(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<GeneratePayload>,
) -> Result<impl IntoResponse> {
    payload.validate()?;

    let task_id = state.generation.create(&claims.user_id, payload.into())?;
    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateAccepted {
            task_id,
            message: "生成任务已创建，请通过任务ID查询进度".to_string(),
        }),
    ))
}

#[axum::debug_handler(state = AppState)]
pub async fn get_progress(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse> {
    let view = state.generation.poll(&claims.user_id, &task_id)?;
    Ok(Json(view))
}
