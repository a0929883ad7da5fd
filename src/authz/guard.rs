use std::collections::HashMap;

use axum::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::{FromRequestParts, Query, RawPathParams, Request, State};
use axum::http::header;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use serde_json::Value;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::AppError;
use crate::jwt::{bearer_token, TokenKind};

use super::engine::{AccessGrant, AccessPolicy};
use super::scope::ScopeRef;

/// Everything the guard needs for one protected route: the declared
/// requirement plus where to find the scope in the request shape. Wired as a
/// constant next to the route registration.
#[derive(Debug, Clone, Copy)]
pub struct RouteAccess {
    pub policy: AccessPolicy,
    pub scope: ScopeStrategy,
}

impl RouteAccess {
    pub const fn new(policy: AccessPolicy, scope: ScopeStrategy) -> Self {
        Self { policy, scope }
    }
}

/// How the scope identifier travels in the request. Gym ids are searched in
/// priority order: explicit path parameter, the `id` parameter on
/// gym-specific routes, a JSON body field, a query field; first non-empty
/// match wins. Team and class references resolve through the owning team.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeStrategy {
    /// `gym_id` path param, else body/query `gym_id`.
    Gym,
    /// Gym-specific routes where the `id` path param names the gym.
    GymById,
    /// `team_id` or `id` path param, else body/query `team_id`.
    Team,
    /// `class_id` or `id` path param; class ids never travel in bodies here.
    Class,
}

impl ScopeStrategy {
    fn param_names(self) -> &'static [&'static str] {
        match self {
            ScopeStrategy::Gym => &["gym_id"],
            ScopeStrategy::GymById => &["gym_id", "id"],
            ScopeStrategy::Team => &["team_id", "id"],
            ScopeStrategy::Class => &["class_id", "id"],
        }
    }

    fn field_name(self) -> Option<&'static str> {
        match self {
            ScopeStrategy::Gym | ScopeStrategy::GymById => Some("gym_id"),
            ScopeStrategy::Team => Some("team_id"),
            ScopeStrategy::Class => None,
        }
    }

    fn to_ref(self, raw: &str) -> Result<ScopeRef, AppError> {
        let id = Uuid::parse_str(raw)
            .map_err(|_| AppError::bad_request(format!("{raw:?} is not a valid id")))?;

        Ok(match self {
            ScopeStrategy::Gym | ScopeStrategy::GymById => ScopeRef::Gym(id),
            ScopeStrategy::Team => ScopeRef::Team(id),
            ScopeStrategy::Class => ScopeRef::Class(id),
        })
    }
}

/// Route middleware: adapts the HTTP request to the decision engine and, on
/// success, annotates the request with the resolved `AccessGrant`.
pub async fn enforce(
    State((state, access)): State<(AppState, RouteAccess)>,
    params: RawPathParams,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if access.policy.public {
        return Ok(next.run(request).await);
    }

    if !access.policy.has_requirement() {
        tracing::debug!(
            path = %request.uri().path(),
            "route declares no access requirement; allowing by default"
        );
        return Ok(next.run(request).await);
    }

    // A present-but-invalid token fails here; an absent one is the engine's
    // Unauthenticated case.
    let caller = match bearer_token(request.headers()) {
        Some(token) => Some(state.jwt.decode(token, TokenKind::Access)?.sub),
        None => None,
    };

    let path_params: HashMap<String, String> = params
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();

    let (scope_ref, request) = locate_scope(access.scope, &path_params, request).await?;

    let grant = state.authorizer.authorize(caller, &access.policy, scope_ref).await?;

    let mut request = request;
    if let Some(grant) = grant {
        request.extensions_mut().insert(grant);
    }

    Ok(next.run(request).await)
}

async fn locate_scope(
    strategy: ScopeStrategy,
    path_params: &HashMap<String, String>,
    request: Request,
) -> Result<(Option<ScopeRef>, Request), AppError> {
    if let Some(raw) = first_param(strategy, path_params) {
        return Ok((Some(strategy.to_ref(&raw)?), request));
    }

    let Some(field) = strategy.field_name() else {
        return Ok((None, request));
    };

    let query = query_map(&request);
    let (body, request) = peek_json_body(request).await?;

    match field_from_body_then_query(field, body.as_ref(), &query) {
        Some(raw) => Ok((Some(strategy.to_ref(&raw)?), request)),
        None => Ok((None, request)),
    }
}

fn first_param(strategy: ScopeStrategy, path_params: &HashMap<String, String>) -> Option<String> {
    strategy
        .param_names()
        .iter()
        .find_map(|name| path_params.get(*name))
        .filter(|value| !value.is_empty())
        .cloned()
}

/// Body beats query; first non-empty match wins.
fn field_from_body_then_query(
    field: &str,
    body: Option<&Value>,
    query: &HashMap<String, String>,
) -> Option<String> {
    body.and_then(|json| json.get(field))
        .and_then(|value| value.as_str())
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| query.get(field).filter(|value| !value.is_empty()).cloned())
}

fn query_map(request: &Request) -> HashMap<String, String> {
    Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .map(|Query(map)| map)
        .unwrap_or_default()
}

/// Buffers and re-attaches the body so the handler still sees it; only JSON
/// bodies are inspected.
async fn peek_json_body(request: Request) -> Result<(Option<Value>, Request), AppError> {
    let is_json = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false);

    if !is_json {
        return Ok((None, request));
    }

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, usize::MAX)
        .await
        .map_err(|err| AppError::bad_request(format!("failed to read request body: {err}")))?;

    let json = serde_json::from_slice::<Value>(&bytes).ok();
    let request = Request::from_parts(parts, Body::from(bytes));

    Ok((json, request))
}

#[async_trait]
impl<S> FromRequestParts<S> for AccessGrant
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AccessGrant>()
            .copied()
            .ok_or_else(|| AppError::internal("access grant missing; route is not guarded"))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn explicit_gym_param_beats_generic_id() {
        let gym = Uuid::new_v4();
        let other = Uuid::new_v4();
        let params = params(&[("gym_id", &gym.to_string() as &str), ("id", &other.to_string())]);

        let raw = first_param(ScopeStrategy::GymById, &params).unwrap();
        assert_eq!(ScopeStrategy::GymById.to_ref(&raw).unwrap(), ScopeRef::Gym(gym));
    }

    #[test]
    fn id_param_names_the_gym_on_gym_routes() {
        let gym = Uuid::new_v4();
        let params = params(&[("id", &gym.to_string() as &str)]);

        assert_eq!(first_param(ScopeStrategy::GymById, &params), Some(gym.to_string()));
        // Plain Gym strategy does not treat `id` as a gym.
        assert_eq!(first_param(ScopeStrategy::Gym, &params), None);
    }

    #[test]
    fn body_field_beats_query_field() {
        let in_body = Uuid::new_v4().to_string();
        let in_query = Uuid::new_v4().to_string();
        let body = json!({ "gym_id": in_body.clone() });
        let query = params(&[("gym_id", &in_query as &str)]);

        assert_eq!(
            field_from_body_then_query("gym_id", Some(&body), &query),
            Some(in_body)
        );
        assert_eq!(field_from_body_then_query("gym_id", None, &query), Some(in_query));
    }

    #[test]
    fn empty_values_do_not_match() {
        let fallback = Uuid::new_v4().to_string();
        let body = json!({ "gym_id": "" });
        let query = params(&[("gym_id", &fallback as &str)]);

        assert_eq!(
            field_from_body_then_query("gym_id", Some(&body), &query),
            Some(fallback)
        );
        assert_eq!(first_param(ScopeStrategy::Gym, &params(&[("gym_id", "")])), None);
    }

    #[test]
    fn malformed_ids_are_rejected_as_bad_requests() {
        let err = ScopeStrategy::Gym.to_ref("not-a-uuid").unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
