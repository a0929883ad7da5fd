use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::openapi::ServerBuilder;
use utoipa::{Modify, OpenApi};

use crate::authz::{GymRole, Permission};
use crate::models;
use crate::routes;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearerAuth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::auth::register,
        routes::auth::login,
        routes::auth::refresh,
        routes::auth::logout,
        routes::auth::me,
        routes::gyms::create_gym,
        routes::gyms::list_gyms,
        routes::gyms::get_gym,
        routes::gyms::update_gym,
        routes::gyms::delete_gym,
        routes::gyms::list_members,
        routes::gyms::add_member,
        routes::gyms::update_member,
        routes::gyms::remove_member,
        routes::gyms::list_sports,
        routes::teams::create_team,
        routes::teams::list_teams,
        routes::teams::list_teams_by_gym,
        routes::teams::get_team,
        routes::teams::update_team,
        routes::teams::delete_team,
        routes::classes::create_class,
        routes::classes::list_classes,
        routes::classes::list_classes_by_team,
        routes::classes::list_classes_by_gym,
        routes::classes::get_class,
        routes::classes::update_class,
        routes::classes::delete_class,
        routes::classes::list_attendance,
        routes::classes::mark_attendance,
        routes::health::health,
    ),
    components(schemas(
        models::user::User,
        models::user::RegisterRequest,
        models::user::LoginRequest,
        models::user::RefreshRequest,
        models::user::LogoutRequest,
        models::user::AuthResponse,
        models::gym::Gym,
        models::gym::GymCreateRequest,
        models::gym::GymUpdateRequest,
        models::gym::Sport,
        models::membership::GymMember,
        models::membership::GymMemberDetail,
        models::membership::MemberAddRequest,
        models::membership::MemberUpdateRequest,
        models::team::Team,
        models::team::TeamCreateRequest,
        models::team::TeamUpdateRequest,
        models::class::Class,
        models::class::ClassVisibility,
        models::class::ClassCreateRequest,
        models::class::ClassUpdateRequest,
        models::class::Attendance,
        models::class::AttendanceMarkRequest,
        routes::auth::MessageResponse,
        routes::health::HealthResponse,
        GymRole,
        Permission,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Authentication and token lifecycle"),
        (name = "Gyms", description = "Gyms and memberships"),
        (name = "Sports", description = "Sport catalog"),
        (name = "Teams", description = "Teams inside a gym and sport"),
        (name = "Classes", description = "Classes and attendance"),
        (name = "Health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

pub fn build_openapi(port: u16) -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.servers = Some(vec![ServerBuilder::new()
        .url(format!("http://localhost:{port}"))
        .build()]);
    doc
}
