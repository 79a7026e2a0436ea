//! User template and invitation endpoints

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::{AppError, AppResult};
use crate::AppState;

#[derive(Deserialize)]
pub struct TemplatePayload {
    pub name: String,
    pub source_user_id: String,
    #[serde(default)]
    pub include_configuration: bool,
    #[serde(default)]
    pub default_expiration_days: i32,
}

pub async fn list(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let templates = state.templates.repository().all_templates().await?;
    Ok(Json(json!({ "templates": templates })))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<TemplatePayload>,
) -> AppResult<Json<Value>> {
    if payload.name.trim().is_empty() {
        return Err(AppError::bad_request("模板名称不能为空"));
    }
    let template = state
        .templates
        .create_template(
            payload.name.trim(),
            &payload.source_user_id,
            payload.include_configuration,
            payload.default_expiration_days,
        )
        .await?;
    Ok(Json(json!({ "template": template })))
}

pub async fn sync(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> AppResult<Json<Value>> {
    let pushed = state.templates.sync_template(id).await?;
    Ok(Json(json!({"status": "synced", "pushed": pushed})))
}

#[derive(Deserialize)]
pub struct InvitationPayload {
    pub template_id: i64,
    #[serde(default)]
    pub expiration_days: Option<i32>,
    /// How long the token stays redeemable; 0 = forever.
    #[serde(default = "default_valid_days")]
    pub valid_for_days: i64,
}

fn default_valid_days() -> i64 {
    7
}

pub async fn create_invitation(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<InvitationPayload>,
) -> AppResult<Json<Value>> {
    let invitation = state
        .templates
        .create_invitation(
            payload.template_id,
            payload.expiration_days,
            payload.valid_for_days,
        )
        .await?;
    Ok(Json(json!({ "invitation": invitation })))
}

#[derive(Deserialize)]
pub struct RedeemPayload {
    pub username: String,
}

pub async fn redeem(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(payload): Json<RedeemPayload>,
) -> AppResult<Json<Value>> {
    let username = payload.username.trim();
    if username.is_empty() {
        return Err(AppError::bad_request("用户名不能为空"));
    }
    let user_id = state.templates.redeem_invitation(&token, username).await?;
    Ok(Json(json!({"status": "redeemed", "user_id": user_id})))
}
