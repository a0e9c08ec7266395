//! WOPI file endpoints

use axum::{
    body::Bytes,
    extract::{Extension, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::debug;

use super::headers::{
    header_str, require_header, WopiOverride, X_WOPI_ITEM_VERSION, X_WOPI_LOCK, X_WOPI_OLD_LOCK,
    X_WOPI_OVERRIDE,
};
use super::WopiState;
use crate::error::{WopiError, WopiResult};
use crate::permission::PermissionContext;
use crate::version::Version;

fn version_header(version: &Version) -> WopiResult<HeaderValue> {
    HeaderValue::from_str(version.value()).map_err(|e| WopiError::Internal(e.to_string()))
}

/// CheckFileInfo
pub async fn check_file_info(
    State(state): State<WopiState>,
    Path(file_id): Path<String>,
    Extension(ctx): Extension<PermissionContext>,
) -> Result<Response, WopiError> {
    let info = state.engine.check_file_info(&file_id, &ctx).await?;
    Ok(([(header::CACHE_CONTROL, "no-store")], Json(info)).into_response())
}

/// GetFile
pub async fn get_file(
    State(state): State<WopiState>,
    Path(file_id): Path<String>,
) -> Result<Response, WopiError> {
    let file = state.engine.get_file(&file_id).await?;
    let mime = mime_guess::from_path(&file.base_file_name).first_or_octet_stream();

    let mut response = file.content.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.as_ref()).map_err(|e| WopiError::Internal(e.to_string()))?,
    );
    headers.insert(X_WOPI_ITEM_VERSION, version_header(&file.version)?);
    Ok(response)
}

/// PutFile
pub async fn put_file(
    State(state): State<WopiState>,
    Path(file_id): Path<String>,
    Extension(ctx): Extension<PermissionContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WopiError> {
    if let Some(verb) = header_str(&headers, &X_WOPI_OVERRIDE) {
        if verb.parse::<WopiOverride>()? != WopiOverride::Put {
            return Err(WopiError::InvalidRequest(format!(
                "{} is not valid on the contents endpoint",
                verb
            )));
        }
    }

    let lock = header_str(&headers, &X_WOPI_LOCK);
    let outcome = state.engine.put_file(&file_id, &body, lock, &ctx).await?;

    let mut response = Json(&outcome).into_response();
    response
        .headers_mut()
        .insert(X_WOPI_ITEM_VERSION, version_header(&outcome.version)?);
    Ok(response)
}

/// Lock, Unlock, RefreshLock, UnlockAndRelock and GetLock, selected by
/// `X-WOPI-Override`
pub async fn file_operation(
    State(state): State<WopiState>,
    Path(file_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, WopiError> {
    let verb: WopiOverride = require_header(&headers, &X_WOPI_OVERRIDE)?.parse()?;
    debug!("{:?} on {}", verb, file_id);

    let engine = &state.engine;
    match verb {
        WopiOverride::Lock => {
            let token = require_header(&headers, &X_WOPI_LOCK)?;
            // LOCK carrying an old lock is an UnlockAndRelock
            match header_str(&headers, &X_WOPI_OLD_LOCK) {
                Some(old) => engine.unlock_and_relock(&file_id, old, token).await?,
                None => engine.lock(&file_id, token).await?,
            };
        }
        WopiOverride::Unlock => {
            let token = require_header(&headers, &X_WOPI_LOCK)?;
            engine.unlock(&file_id, token).await?;
        }
        WopiOverride::RefreshLock => {
            let token = require_header(&headers, &X_WOPI_LOCK)?;
            engine.refresh_lock(&file_id, token).await?;
        }
        WopiOverride::UnlockAndRelock => {
            let token = require_header(&headers, &X_WOPI_LOCK)?;
            let old = require_header(&headers, &X_WOPI_OLD_LOCK)?;
            engine.unlock_and_relock(&file_id, old, token).await?;
        }
        WopiOverride::GetLock => {
            let current = engine.get_lock(&file_id).await?.unwrap_or_default();
            let value =
                HeaderValue::from_str(&current).map_err(|e| WopiError::Internal(e.to_string()))?;
            return Ok((StatusCode::OK, [(X_WOPI_LOCK, value)]).into_response());
        }
        WopiOverride::Put => {
            return Err(WopiError::InvalidRequest(
                "PUT must target the contents endpoint".to_string(),
            ));
        }
    }

    Ok(StatusCode::OK.into_response())
}
