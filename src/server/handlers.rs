use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::Json;
use chrono::Utc;
use serde_json::Value;

use super::error::{ApiError, ApiResult};
use super::types::*;
use super::AppState;
use crate::db::consent::ConsentOrigin;
use crate::identity::{normalize_document_id, normalize_phone};
use crate::models::{
    ConsentRecord, ConsentStatus, DocumentKind, PasscodeRecord, PhoneOwner, CURRENT_CONSENT_VERSION,
};
use crate::orchestrator::{ChatRequest, ChatResponse};
use crate::otp::{is_valid_code, MSG_VERIFIED};

const STATUS_IN_PROGRESS: &str = "in_progress";
const MIN_CONSENT_TEXT_LEN: usize = 10;

fn phone_param(raw: &str) -> ApiResult<String> {
    let phone = normalize_phone(raw);
    if phone.is_empty() {
        return Err(ApiError::bad_request("phone_number is required"));
    }
    Ok(phone)
}

fn document_param(kind: DocumentKind, raw: &str) -> ApiResult<String> {
    normalize_document_id(raw).ok_or_else(|| {
        ApiError::bad_request(format!("{} number must be exactly 10 characters", kind.label()))
    })
}

fn in_progress_message(kind: DocumentKind) -> String {
    format!(
        "Your {} application is in progress. Please check back later.",
        kind.label()
    )
}

/// First hop of `X-Forwarded-For`.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(super) async fn health(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let status = state.engine.health().await.map_err(|e| {
        tracing::warn!(error = %e, "engine health check failed");
        ApiError::bad_gateway(format!("Dialogue engine health check failed: {}", e))
    })?;
    Ok(Json(status))
}

pub(super) async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> ApiResult<Json<ChatResponse>> {
    let response = state.chat.handle_turn(request).await?;
    Ok(Json(response))
}

pub(super) async fn release(
    State(state): State<AppState>,
    Json(request): Json<ReleaseRequest>,
) -> Json<ReleaseResponse> {
    let released = state.chat.release(&request.session_id);
    Json(ReleaseResponse {
        session_id: request.session_id,
        released,
    })
}

pub(super) async fn otp_generate(
    State(state): State<AppState>,
    Json(request): Json<OtpGenerateRequest>,
) -> ApiResult<Json<OtpResponse>> {
    let phone = phone_param(&request.phone_number)?;
    let issued = state.otp.issue(&state.db(), &phone)?;
    Ok(Json(
        OtpResponse::ok(issued.message, &phone).with_expiry(issued.expires_at),
    ))
}

pub(super) async fn otp_verify(
    State(state): State<AppState>,
    Json(request): Json<OtpVerifyRequest>,
) -> ApiResult<Json<OtpResponse>> {
    let phone = phone_param(&request.phone_number)?;
    let code = request.otp_code.trim();
    if !is_valid_code(code) {
        return Err(ApiError::bad_request("OTP must be a 6-digit code"));
    }
    state.otp.verify(&state.db(), &phone, code)?;
    Ok(Json(OtpResponse::ok(MSG_VERIFIED, &phone)))
}

pub(super) async fn otp_status(
    State(state): State<AppState>,
    Path(phone): Path<String>,
) -> ApiResult<Json<PasscodeRecord>> {
    let phone = phone_param(&phone)?;
    let record = state
        .otp
        .status(&state.db(), &phone)?
        .ok_or_else(|| ApiError::not_found("No OTP found for this phone number"))?;
    Ok(Json(record))
}

pub(super) async fn otp_verified(
    State(state): State<AppState>,
    Path(phone): Path<String>,
) -> ApiResult<Json<VerifiedResponse>> {
    let phone = phone_param(&phone)?;
    let verified = state.otp.is_verified(&state.db(), &phone)?;
    Ok(Json(VerifiedResponse {
        phone_number: phone,
        verified,
    }))
}

pub(super) async fn pan_status(Json(request): Json<PanStatusRequest>) -> ApiResult<Json<PanStatusResponse>> {
    let pan_number = document_param(DocumentKind::Pan, &request.pan_number)?;
    Ok(Json(PanStatusResponse {
        pan_number,
        status: STATUS_IN_PROGRESS.to_string(),
        message: in_progress_message(DocumentKind::Pan),
    }))
}

pub(super) async fn tan_status(Json(request): Json<TanStatusRequest>) -> ApiResult<Json<TanStatusResponse>> {
    let tan_number = document_param(DocumentKind::Tan, &request.tan_number)?;
    Ok(Json(TanStatusResponse {
        tan_number,
        status: STATUS_IN_PROGRESS.to_string(),
        message: in_progress_message(DocumentKind::Tan),
    }))
}

pub(super) async fn save_pan(
    State(state): State<AppState>,
    Json(request): Json<SavePanRequest>,
) -> ApiResult<Json<PhoneOwner>> {
    let phone = phone_param(&request.phone_number)?;
    let pan = document_param(DocumentKind::Pan, &request.pan_number)?;
    let owner = state
        .db()
        .record_document_id(&phone, DocumentKind::Pan, &pan, Utc::now())?;
    Ok(Json(owner))
}

pub(super) async fn save_tan(
    State(state): State<AppState>,
    Json(request): Json<SaveTanRequest>,
) -> ApiResult<Json<PhoneOwner>> {
    let phone = phone_param(&request.phone_number)?;
    let tan = document_param(DocumentKind::Tan, &request.tan_number)?;
    let owner = state
        .db()
        .record_document_id(&phone, DocumentKind::Tan, &tan, Utc::now())?;
    Ok(Json(owner))
}

pub(super) async fn ensure_phone(
    State(state): State<AppState>,
    Path(phone): Path<String>,
) -> ApiResult<Json<EnsurePhoneResponse>> {
    let phone = phone_param(&phone)?;
    let db = state.db();
    let existed = db.get_phone_owner(&phone)?.is_some();
    let owner = db.ensure_phone_owner(&phone, Utc::now())?;
    Ok(Json(EnsurePhoneResponse {
        phone_number: owner.phone_number,
        created: !existed,
    }))
}

pub(super) async fn conversations(
    State(state): State<AppState>,
    Path(phone): Path<String>,
) -> ApiResult<Json<ConversationsResponse>> {
    let phone = phone_param(&phone)?;
    let db = state.db();
    let conversations = db
        .list_conversations(&phone)?
        .into_iter()
        .map(ConversationLine::from)
        .collect();
    let transcript = db
        .get_phone_transcript(&phone)?
        .map(|t| t.history)
        .unwrap_or_default();

    Ok(Json(ConversationsResponse {
        phone_number: phone,
        conversations,
        transcript,
    }))
}

pub(super) async fn consent_grant(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ConsentGrantRequest>,
) -> ApiResult<Json<ConsentRecord>> {
    let phone = phone_param(&request.phone_number)?;
    let text = request.consent_text.trim();
    if text.chars().count() < MIN_CONSENT_TEXT_LEN {
        return Err(ApiError::bad_request(
            "Consent text must be at least 10 characters",
        ));
    }

    let origin = ConsentOrigin {
        ip_address: client_ip(&headers),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    };

    let record = state.db().record_consent(
        &phone,
        request.purpose,
        CURRENT_CONSENT_VERSION,
        request.granted,
        text,
        &origin,
        Utc::now(),
    )?;
    tracing::info!(
        phone = %phone,
        purpose = request.purpose.as_str(),
        granted = request.granted,
        "consent recorded"
    );
    Ok(Json(record))
}

pub(super) async fn consent_check(
    State(state): State<AppState>,
    Json(request): Json<ConsentCheckRequest>,
) -> ApiResult<Json<ConsentCheckResponse>> {
    let phone = phone_param(&request.phone_number)?;
    let active = state.db().active_consent(&phone, request.purpose)?;

    let response = match active {
        None => ConsentCheckResponse {
            has_consent: false,
            consent_status: ConsentStatus::Pending,
            consent_version: None,
            granted_at: None,
            requires_new_consent: true,
        },
        Some(record) => {
            let current = record.consent_version == CURRENT_CONSENT_VERSION;
            ConsentCheckResponse {
                has_consent: current,
                consent_status: if current {
                    ConsentStatus::Granted
                } else {
                    ConsentStatus::Pending
                },
                consent_version: Some(record.consent_version),
                granted_at: record.granted_at,
                requires_new_consent: !current,
            }
        }
    };
    Ok(Json(response))
}

pub(super) async fn consent_revoke(
    State(state): State<AppState>,
    Json(request): Json<ConsentRevokeRequest>,
) -> ApiResult<Json<ConsentRevokeResponse>> {
    let phone = phone_param(&request.phone_number)?;
    let revoked = state
        .db()
        .revoke_consent(&phone, request.purpose, Utc::now())?;
    if revoked == 0 {
        return Err(ApiError::not_found("No active consent found to revoke"));
    }

    tracing::info!(
        phone = %phone,
        purpose = request.purpose.as_str(),
        reason = request.reason.as_deref().unwrap_or(""),
        "consent revoked"
    );
    Ok(Json(ConsentRevokeResponse {
        message: "Consent revoked successfully".to_string(),
        revoked: true,
    }))
}

pub(super) async fn consent_history(
    State(state): State<AppState>,
    Path(phone): Path<String>,
) -> ApiResult<Json<Vec<ConsentRecord>>> {
    let phone = phone_param(&phone)?;
    Ok(Json(state.db().consent_history(&phone)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_first_hop() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers), None);

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(client_ip(&headers), Some("203.0.113.7".to_string()));
    }

    #[test]
    fn test_document_param() {
        assert_eq!(
            document_param(DocumentKind::Pan, " abcde1234f ").unwrap(),
            "ABCDE1234F"
        );
        let err = document_param(DocumentKind::Tan, "short").unwrap_err();
        assert_eq!(err.message(), "TAN number must be exactly 10 characters");
    }
}
