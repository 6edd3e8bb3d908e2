use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawClaims")]
pub struct Claims {
    /// Job owner. `userId` wins over `sub` when a token carries both.
    #[serde(rename = "userId")]
    pub user_id: String,
    pub exp: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Id {
    Text(String),
    Number(i64),
}

impl From<Id> for String {
    fn from(id: Id) -> Self {
        match id {
            Id::Text(s) => s,
            Id::Number(n) => n.to_string(),
        }
    }
}

#[derive(Deserialize)]
struct RawClaims {
    #[serde(rename = "userId")]
    user_id: Option<Id>,
    sub: Option<Id>,
    exp: usize,
}

impl TryFrom<RawClaims> for Claims {
    type Error = String;

    fn try_from(raw: RawClaims) -> std::result::Result<Self, Self::Error> {
        let user_id = raw
            .user_id
            .map(String::from)
            .filter(|id| !id.trim().is_empty())
            .or_else(|| raw.sub.map(String::from))
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| "token carries no userId or sub".to_string())?;
        Ok(Self {
            user_id,
            exp: raw.exp,
        })
    }
}

fn unauthorized(code: &str) -> Error {
    Error::Unauthorized(code.to_string())
}

pub async fn require_bearer_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| unauthorized("missing_authorization"))?;
    let auth_str = auth_header
        .to_str()
        .map_err(|_| unauthorized("bad_authorization"))?;
    let token = auth_str
        .strip_prefix("Bearer ")
        .ok_or_else(|| unauthorized("unsupported_scheme"))?
        .to_string();

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &validation,
    )
    .map_err(|e| {
        tracing::debug!(error = %e, "bearer token rejected");
        unauthorized("invalid_token")
    })?;

    req.extensions_mut().insert(data.claims);
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::{json, Value as JsonValue};

    const SECRET: &[u8] = b"claims-secret";

    fn decode_claims(claims: JsonValue) -> jsonwebtoken::errors::Result<Claims> {
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET))?;
        decode::<Claims>(
            &token,
            &DecodingKey::from_secret(SECRET),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
    }

    fn exp() -> usize {
        (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize
    }

    #[test]
    fn user_id_wins_over_sub() {
        let claims = decode_claims(json!({"userId": "alice", "sub": "auth0|123", "exp": exp()})).unwrap();
        assert_eq!(claims.user_id, "alice");
    }

    #[test]
    fn sub_and_numeric_ids_are_accepted() {
        let claims = decode_claims(json!({"sub": "bob", "exp": exp()})).unwrap();
        assert_eq!(claims.user_id, "bob");

        let claims = decode_claims(json!({"userId": 42, "sub": "ignored", "exp": exp()})).unwrap();
        assert_eq!(claims.user_id, "42");

        let claims = decode_claims(json!({"userId": "", "sub": "carol", "exp": exp()})).unwrap();
        assert_eq!(claims.user_id, "carol");
    }

    #[test]
    fn tokens_without_an_owner_are_rejected() {
        assert!(decode_claims(json!({"exp": exp()})).is_err());
        assert!(decode_claims(json!({"userId": " ", "exp": exp()})).is_err());
    }

    #[test]
    fn claims_serialize_as_user_id() {
        let claims = Claims {
            user_id: "alice".into(),
            exp: 1,
        };
        assert_eq!(serde_json::to_value(&claims).unwrap(), json!({"userId": "alice", "exp": 1}));
    }
}
