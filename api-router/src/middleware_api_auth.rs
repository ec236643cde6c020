use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use common::scopes::{self, Scope};
use common::storage::types::user::User;

use crate::{api_state::ApiState, error::ApiError};

/// The authenticated caller, with the scopes effective for this request.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub id: String,
    pub scopes: Vec<Scope>,
}

impl AuthedUser {
    pub fn require(&self, scope: Scope) -> Result<(), ApiError> {
        if scopes::granted(&self.scopes, scope) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "missing required scope {scope}"
            )))
        }
    }
}

pub async fn api_auth(
    State(state): State<ApiState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let api_key = extract_api_key(&request)
        .ok_or_else(|| ApiError::Unauthorized("You have to be authenticated".to_string()))?;

    let user = User::find_by_api_key(&api_key, &state.db)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::Unauthorized("You have to be authenticated".to_string()))?;

    // API keys never carry instance scopes, whatever the user row says.
    let authed = AuthedUser {
        id: user.id.clone(),
        scopes: user.api_key_scopes(),
    };
    request.extensions_mut().insert(authed);

    Ok(next.run(request).await)
}

fn extract_api_key(request: &Request) -> Option<String> {
    request
        .headers()
        .get("X-API-Key")
        .and_then(|value| value.to_str().ok())
        .or_else(|| {
            request
                .headers()
                .get("Authorization")
                .and_then(|value| value.to_str().ok())
                .and_then(|auth| auth.strip_prefix("Bearer ").map(str::trim))
        })
        .map(String::from)
}
