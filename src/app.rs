use std::sync::Arc;

use axum::http::Method;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post, put};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::{
    enforce, AccessPolicy, Authorizer, GymRole, Permission, RoleCatalog, RouteAccess, ScopeStrategy,
    SqlAuthzStore,
};
use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::jwt::JwtConfig;
use crate::routes::{auth, classes, gyms, health, teams};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub authorizer: Arc<Authorizer>,
    pub event_bus: EventBus,
}

// Per-operation access requirements, declared here at registration time and
// handed to the guard middleware alongside the route.
const GYM_DETAIL: RouteAccess =
    RouteAccess::new(AccessPolicy::permissions(&[Permission::GymRead]), ScopeStrategy::GymById);
const GYM_UPDATE: RouteAccess =
    RouteAccess::new(AccessPolicy::permissions(&[Permission::GymUpdate]), ScopeStrategy::GymById);
// Both modes at once: ADMIN rank and the gym:delete grant.
const GYM_DELETE: RouteAccess = RouteAccess::new(
    AccessPolicy::roles_and_permissions(&[GymRole::Admin], &[Permission::GymDelete]),
    ScopeStrategy::GymById,
);
const MEMBER_LIST: RouteAccess =
    RouteAccess::new(AccessPolicy::permissions(&[Permission::UserRead]), ScopeStrategy::GymById);
const MEMBER_MANAGE: RouteAccess = RouteAccess::new(
    AccessPolicy::permissions(&[Permission::GymManageUsers]),
    ScopeStrategy::GymById,
);

const TEAM_CREATE: RouteAccess =
    RouteAccess::new(AccessPolicy::permissions(&[Permission::TeamCreate]), ScopeStrategy::Gym);
const TEAM_LIST_BY_GYM: RouteAccess =
    RouteAccess::new(AccessPolicy::permissions(&[Permission::TeamRead]), ScopeStrategy::Gym);
const TEAM_DETAIL: RouteAccess =
    RouteAccess::new(AccessPolicy::permissions(&[Permission::TeamRead]), ScopeStrategy::Team);
const TEAM_UPDATE: RouteAccess =
    RouteAccess::new(AccessPolicy::permissions(&[Permission::TeamUpdate]), ScopeStrategy::Team);
const TEAM_DELETE: RouteAccess =
    RouteAccess::new(AccessPolicy::permissions(&[Permission::TeamDelete]), ScopeStrategy::Team);

const CLASS_CREATE: RouteAccess =
    RouteAccess::new(AccessPolicy::permissions(&[Permission::ClassCreate]), ScopeStrategy::Team);
const CLASS_LIST_BY_TEAM: RouteAccess =
    RouteAccess::new(AccessPolicy::permissions(&[Permission::ClassRead]), ScopeStrategy::Team);
const CLASS_LIST_BY_GYM: RouteAccess =
    RouteAccess::new(AccessPolicy::permissions(&[Permission::ClassRead]), ScopeStrategy::Gym);
const CLASS_DETAIL: RouteAccess =
    RouteAccess::new(AccessPolicy::permissions(&[Permission::ClassRead]), ScopeStrategy::Class);
const CLASS_UPDATE: RouteAccess =
    RouteAccess::new(AccessPolicy::permissions(&[Permission::ClassUpdate]), ScopeStrategy::Class);
const CLASS_DELETE: RouteAccess =
    RouteAccess::new(AccessPolicy::permissions(&[Permission::ClassDelete]), ScopeStrategy::Class);
const ATTENDANCE_LIST: RouteAccess =
    RouteAccess::new(AccessPolicy::permissions(&[Permission::ClassRead]), ScopeStrategy::Class);
const ATTENDANCE_MARK: RouteAccess = RouteAccess::new(
    AccessPolicy::permissions(&[Permission::ClassManageAttendance]),
    ScopeStrategy::Class,
);

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt = JwtConfig::from_env()?;

    let (event_bus, event_rx) = init_event_bus();
    tokio::spawn(start_activity_listener(event_rx, pool.clone()));

    let authorizer = Arc::new(Authorizer::new(
        RoleCatalog::new(),
        Arc::new(SqlAuthzStore::new(pool.clone())),
    ));

    let state = AppState {
        pool,
        jwt: Arc::new(jwt),
        authorizer,
        event_bus,
    };

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me));

    let gym_routes = Router::new()
        .route("/", post(gyms::create_gym))
        .route("/", get(gyms::list_gyms))
        .route("/:id", get(gyms::get_gym).route_layer(from_fn_with_state((state.clone(), GYM_DETAIL), enforce)))
        .route("/:id", put(gyms::update_gym).route_layer(from_fn_with_state((state.clone(), GYM_UPDATE), enforce)))
        .route("/:id", delete(gyms::delete_gym).route_layer(from_fn_with_state((state.clone(), GYM_DELETE), enforce)))
        .route("/:id/members", get(gyms::list_members).route_layer(from_fn_with_state((state.clone(), MEMBER_LIST), enforce)))
        .route("/:id/members", post(gyms::add_member).route_layer(from_fn_with_state((state.clone(), MEMBER_MANAGE), enforce)))
        .route("/:id/members/:user_id", put(gyms::update_member).route_layer(from_fn_with_state((state.clone(), MEMBER_MANAGE), enforce)))
        .route("/:id/members/:user_id", delete(gyms::remove_member).route_layer(from_fn_with_state((state.clone(), MEMBER_MANAGE), enforce)));

    let team_routes = Router::new()
        .route("/", post(teams::create_team).route_layer(from_fn_with_state((state.clone(), TEAM_CREATE), enforce)))
        .route("/", get(teams::list_teams))
        .route("/gym/:gym_id", get(teams::list_teams_by_gym).route_layer(from_fn_with_state((state.clone(), TEAM_LIST_BY_GYM), enforce)))
        .route("/:id", get(teams::get_team).route_layer(from_fn_with_state((state.clone(), TEAM_DETAIL), enforce)))
        .route("/:id", put(teams::update_team).route_layer(from_fn_with_state((state.clone(), TEAM_UPDATE), enforce)))
        .route("/:id", delete(teams::delete_team).route_layer(from_fn_with_state((state.clone(), TEAM_DELETE), enforce)));

    let class_routes = Router::new()
        .route("/", post(classes::create_class).route_layer(from_fn_with_state((state.clone(), CLASS_CREATE), enforce)))
        .route("/", get(classes::list_classes))
        .route("/team/:team_id", get(classes::list_classes_by_team).route_layer(from_fn_with_state((state.clone(), CLASS_LIST_BY_TEAM), enforce)))
        .route("/gym/:gym_id", get(classes::list_classes_by_gym).route_layer(from_fn_with_state((state.clone(), CLASS_LIST_BY_GYM), enforce)))
        .route("/:id", get(classes::get_class).route_layer(from_fn_with_state((state.clone(), CLASS_DETAIL), enforce)))
        .route("/:id", put(classes::update_class).route_layer(from_fn_with_state((state.clone(), CLASS_UPDATE), enforce)))
        .route("/:id", delete(classes::delete_class).route_layer(from_fn_with_state((state.clone(), CLASS_DELETE), enforce)))
        .route("/:id/attendance", get(classes::list_attendance).route_layer(from_fn_with_state((state.clone(), ATTENDANCE_LIST), enforce)))
        .route("/:id/attendance", post(classes::mark_attendance).route_layer(from_fn_with_state((state.clone(), ATTENDANCE_MARK), enforce)));

    let router = Router::new()
        .route("/api/health", get(health::health))
        .route("/sports", get(gyms::list_sports))
        .nest("/auth", auth_routes)
        .nest("/gyms", gym_routes)
        .nest("/teams", team_routes)
        .nest("/classes", class_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
