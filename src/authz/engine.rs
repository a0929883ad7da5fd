use std::sync::Arc;

use uuid::Uuid;

use crate::errors::AppError;

use super::catalog::{GymRole, Permission, RoleCatalog};
use super::scope::{AuthzStore, Scope, ScopeRef};

/// Access requirement attached to a protected operation. Declared as a
/// constant at route registration and handed to the guard together with a
/// scope strategy; there is no metadata reflection anywhere.
#[derive(Debug, Clone, Copy)]
pub struct AccessPolicy {
    pub public: bool,
    /// Hierarchy mode: the caller's role must rank at least as high as ONE of
    /// these (the lowest bar among alternatives decides).
    pub roles: &'static [GymRole],
    /// Permission mode: the caller's role must hold ALL of these.
    pub permissions: &'static [Permission],
}

impl AccessPolicy {
    /// No checks at all; the operation is reachable without identity.
    pub const fn public() -> Self {
        Self { public: true, roles: &[], permissions: &[] }
    }

    /// Declares no roles and no permissions, which the engine treats as
    /// allow. This default-open behavior is preserved from the original
    /// system deliberately; any route wired with it admits every caller,
    /// authenticated or not, so prefer an explicit requirement.
    pub const fn unrestricted() -> Self {
        Self { public: false, roles: &[], permissions: &[] }
    }

    pub const fn roles(roles: &'static [GymRole]) -> Self {
        Self { public: false, roles, permissions: &[] }
    }

    pub const fn permissions(permissions: &'static [Permission]) -> Self {
        Self { public: false, roles: &[], permissions }
    }

    /// Both checks must pass.
    pub const fn roles_and_permissions(
        roles: &'static [GymRole],
        permissions: &'static [Permission],
    ) -> Self {
        Self { public: false, roles, permissions }
    }

    pub fn has_requirement(&self) -> bool {
        !self.roles.is_empty() || !self.permissions.is_empty()
    }
}

/// The outcome of an allowed, scope-checked evaluation; attached to the
/// request so downstream handlers never re-resolve role or scope.
#[derive(Debug, Clone, Copy)]
pub struct AccessGrant {
    pub role: GymRole,
    pub scope: Scope,
}

/// Single decision engine for both policy styles. Role-hierarchy checks and
/// permission-set checks share one evaluation path so the two models cannot
/// drift apart.
pub struct Authorizer {
    catalog: RoleCatalog,
    store: Arc<dyn AuthzStore>,
}

impl Authorizer {
    pub fn new(catalog: RoleCatalog, store: Arc<dyn AuthzStore>) -> Self {
        Self { catalog, store }
    }

    pub fn catalog(&self) -> &RoleCatalog {
        &self.catalog
    }

    /// Evaluates one request. Returns `Ok(None)` when the operation is
    /// public or carries no requirement (nothing was checked, so there is
    /// nothing to annotate) and `Ok(Some(grant))` on an allowed, scoped
    /// evaluation. Every failure is terminal for the request.
    ///
    /// Evaluation order: public bypass, default-open pass, authentication,
    /// scope presence, scope resolution, membership, role hierarchy,
    /// permission set. Authentication is checked before any lookup runs.
    pub async fn authorize(
        &self,
        caller: Option<Uuid>,
        policy: &AccessPolicy,
        scope: Option<ScopeRef>,
    ) -> Result<Option<AccessGrant>, AppError> {
        if policy.public {
            return Ok(None);
        }

        if !policy.has_requirement() {
            tracing::debug!("no access requirement declared; allowing by default");
            return Ok(None);
        }

        let user_id = caller.ok_or_else(|| AppError::unauthorized("authentication required"))?;

        let scope_ref = scope.ok_or_else(|| AppError::bad_request("no gym scope found in request"))?;
        let scope = self.resolve_scope(scope_ref).await?;

        let role = self
            .store
            .find_role(user_id, scope.gym_id, scope.sport_id)
            .await?
            .ok_or_else(|| AppError::forbidden("no access to this gym"))?;

        if !policy.roles.is_empty() {
            let satisfied = policy
                .roles
                .iter()
                .any(|required| self.catalog.has_higher_or_equal_rank(role, *required));

            if !satisfied {
                return Err(AppError::forbidden(format!(
                    "requires role {} or higher; current role is {role}",
                    join_roles(policy.roles),
                )));
            }
        }

        if !policy.permissions.is_empty() && !self.catalog.holds_all(role, policy.permissions) {
            let missing: Vec<&str> = policy
                .permissions
                .iter()
                .filter(|permission| !self.catalog.permissions_of(role).contains(permission))
                .map(|permission| permission.as_str())
                .collect();

            return Err(AppError::forbidden(format!(
                "role {role} is missing required permissions: {}",
                missing.join(", "),
            )));
        }

        tracing::debug!(user_id = %user_id, role = %role, gym_id = %scope.gym_id, "access granted");

        Ok(Some(AccessGrant { role, scope }))
    }

    async fn resolve_scope(&self, scope_ref: ScopeRef) -> Result<Scope, AppError> {
        match scope_ref {
            ScopeRef::Gym(gym_id) => Ok(Scope::gym_wide(gym_id)),
            ScopeRef::Team(team_id) => self
                .store
                .team_scope(team_id)
                .await?
                .ok_or_else(|| AppError::not_found("team not found")),
            ScopeRef::Class(class_id) => self
                .store
                .class_scope(class_id)
                .await?
                .ok_or_else(|| AppError::not_found("class not found")),
        }
    }
}

fn join_roles(roles: &[GymRole]) -> String {
    roles.iter().map(|role| role.as_str()).collect::<Vec<_>>().join(" or ")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Store over plain maps, counting reads so tests can assert which
    /// lookups ran.
    #[derive(Default)]
    struct MemoryStore {
        teams: HashMap<Uuid, Scope>,
        classes: HashMap<Uuid, Scope>,
        memberships: Vec<(Uuid, Uuid, Uuid, GymRole)>,
        reads: AtomicUsize,
    }

    impl MemoryStore {
        fn with_membership(mut self, user: Uuid, gym: Uuid, sport: Uuid, role: GymRole) -> Self {
            self.memberships.push((user, gym, sport, role));
            self
        }

        fn with_team(mut self, team: Uuid, gym: Uuid, sport: Uuid) -> Self {
            self.teams.insert(team, Scope::of_sport(gym, sport));
            self
        }

        fn read_count(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthzStore for MemoryStore {
        async fn team_scope(&self, team_id: Uuid) -> Result<Option<Scope>, AppError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.teams.get(&team_id).copied())
        }

        async fn class_scope(&self, class_id: Uuid) -> Result<Option<Scope>, AppError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self.classes.get(&class_id).copied())
        }

        async fn find_role(
            &self,
            user_id: Uuid,
            gym_id: Uuid,
            sport_id: Option<Uuid>,
        ) -> Result<Option<GymRole>, AppError> {
            self.reads.fetch_add(1, Ordering::SeqCst);

            if let Some(sport_id) = sport_id {
                let exact = self
                    .memberships
                    .iter()
                    .find(|(u, g, s, _)| *u == user_id && *g == gym_id && *s == sport_id)
                    .map(|(_, _, _, role)| *role);
                if exact.is_some() {
                    return Ok(exact);
                }
            }

            Ok(self
                .memberships
                .iter()
                .filter(|(u, g, _, _)| *u == user_id && *g == gym_id)
                .map(|(_, _, _, role)| *role)
                .max_by_key(|role| role.rank()))
        }
    }

    fn authorizer(store: MemoryStore) -> (Authorizer, Arc<MemoryStore>) {
        let store = Arc::new(store);
        (Authorizer::new(RoleCatalog::new(), store.clone()), store)
    }

    fn ids() -> (Uuid, Uuid, Uuid) {
        (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4())
    }

    #[tokio::test]
    async fn public_operations_skip_everything() {
        let (authz, store) = authorizer(MemoryStore::default());

        let grant = authz.authorize(None, &AccessPolicy::public(), None).await.unwrap();

        assert!(grant.is_none());
        assert_eq!(store.read_count(), 0);
    }

    #[tokio::test]
    async fn unrestricted_operations_default_open() {
        let (authz, store) = authorizer(MemoryStore::default());

        // Deliberately allowed even without identity; see AccessPolicy docs.
        let grant = authz.authorize(None, &AccessPolicy::unrestricted(), None).await.unwrap();

        assert!(grant.is_none());
        assert_eq!(store.read_count(), 0);
    }

    #[tokio::test]
    async fn unauthenticated_denied_before_any_lookup() {
        let (authz, store) = authorizer(MemoryStore::default());
        let policy = AccessPolicy::roles(&[GymRole::Manager]);

        let err = authz
            .authorize(None, &policy, Some(ScopeRef::Gym(Uuid::new_v4())))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Unauthorized(_)));
        assert_eq!(store.read_count(), 0, "no data lookup may run for anonymous callers");
    }

    #[tokio::test]
    async fn missing_scope_is_a_bad_request() {
        let (authz, _) = authorizer(MemoryStore::default());
        let policy = AccessPolicy::permissions(&[Permission::GymRead]);

        let err = authz.authorize(Some(Uuid::new_v4()), &policy, None).await.unwrap_err();

        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn unknown_team_is_not_found() {
        let (authz, _) = authorizer(MemoryStore::default());
        let policy = AccessPolicy::permissions(&[Permission::TeamUpdate]);

        let err = authz
            .authorize(Some(Uuid::new_v4()), &policy, Some(ScopeRef::Team(Uuid::new_v4())))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn outsider_without_membership_is_forbidden() {
        let (user, gym, _) = ids();
        let (authz, _) = authorizer(MemoryStore::default());
        let policy = AccessPolicy::permissions(&[Permission::GymRead]);

        let err = authz
            .authorize(Some(user), &policy, Some(ScopeRef::Gym(gym)))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn role_hierarchy_denies_lower_ranks() {
        let (user, gym, sport) = ids();
        let store = MemoryStore::default().with_membership(user, gym, sport, GymRole::Professor);
        let (authz, _) = authorizer(store);
        let policy = AccessPolicy::roles(&[GymRole::Manager]);

        let err = authz
            .authorize(Some(user), &policy, Some(ScopeRef::Gym(gym)))
            .await
            .unwrap_err();

        match err {
            AppError::Forbidden(message) => {
                assert!(message.contains("MANAGER"));
                assert!(message.contains("PROFESSOR"));
            }
            other => panic!("expected forbidden, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn role_hierarchy_allows_higher_ranks() {
        let (user, gym, sport) = ids();
        let store = MemoryStore::default().with_membership(user, gym, sport, GymRole::Admin);
        let (authz, _) = authorizer(store);
        let policy = AccessPolicy::roles(&[GymRole::Manager]);

        let grant = authz
            .authorize(Some(user), &policy, Some(ScopeRef::Gym(gym)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(grant.role, GymRole::Admin);
    }

    #[tokio::test]
    async fn declared_roles_are_alternatives_not_conjunction() {
        let (user, gym, sport) = ids();
        let store = MemoryStore::default().with_membership(user, gym, sport, GymRole::Manager);
        let (authz, _) = authorizer(store);

        // Anyone ranked at least MANAGER clears {ADMIN, MANAGER}.
        let policy = AccessPolicy::roles(&[GymRole::Admin, GymRole::Manager]);

        let grant = authz
            .authorize(Some(user), &policy, Some(ScopeRef::Gym(gym)))
            .await
            .unwrap();

        assert!(grant.is_some());
    }

    #[tokio::test]
    async fn permission_mode_requires_all_declared() {
        let (user, gym, sport) = ids();
        let store = MemoryStore::default().with_membership(user, gym, sport, GymRole::Student);
        let (authz, _) = authorizer(store);

        let denied = AccessPolicy::permissions(&[
            Permission::ClassCreate,
            Permission::ClassManageAttendance,
        ]);
        let err = authz
            .authorize(Some(user), &denied, Some(ScopeRef::Gym(gym)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let allowed = AccessPolicy::permissions(&[Permission::ClassRead]);
        let grant = authz
            .authorize(Some(user), &allowed, Some(ScopeRef::Gym(gym)))
            .await
            .unwrap();
        assert!(grant.is_some());
    }

    #[tokio::test]
    async fn team_reference_resolves_and_annotates_scope() {
        let (user, gym, sport) = ids();
        let team = Uuid::new_v4();
        let store = MemoryStore::default()
            .with_team(team, gym, sport)
            .with_membership(user, gym, sport, GymRole::Professor);
        let (authz, _) = authorizer(store);
        let policy = AccessPolicy::permissions(&[Permission::ClassCreate]);

        let grant = authz
            .authorize(Some(user), &policy, Some(ScopeRef::Team(team)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(grant.role, GymRole::Professor);
        assert_eq!(grant.scope, Scope::of_sport(gym, sport));
    }

    #[tokio::test]
    async fn combined_mode_needs_both_checks_to_pass() {
        let (user, gym, sport) = ids();
        let store = MemoryStore::default().with_membership(user, gym, sport, GymRole::Manager);
        let (authz, _) = authorizer(store);

        // Rank clears PROFESSOR, but gym:delete is ADMIN-only.
        let policy = AccessPolicy::roles_and_permissions(
            &[GymRole::Professor],
            &[Permission::GymDelete],
        );

        let err = authz
            .authorize(Some(user), &policy, Some(ScopeRef::Gym(gym)))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn gym_wide_check_uses_highest_ranked_membership() {
        let (user, gym, sport_a) = ids();
        let sport_b = Uuid::new_v4();
        let store = MemoryStore::default()
            .with_membership(user, gym, sport_a, GymRole::Student)
            .with_membership(user, gym, sport_b, GymRole::Manager);
        let (authz, _) = authorizer(store);
        let policy = AccessPolicy::permissions(&[Permission::GymUpdate]);

        let grant = authz
            .authorize(Some(user), &policy, Some(ScopeRef::Gym(gym)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(grant.role, GymRole::Manager);
    }

    #[tokio::test]
    async fn sport_scope_prefers_exact_match_then_falls_back() {
        let (user, gym, sport_a) = ids();
        let sport_b = Uuid::new_v4();
        let team_a = Uuid::new_v4();
        let store = MemoryStore::default()
            .with_team(team_a, gym, sport_a)
            .with_membership(user, gym, sport_a, GymRole::Student)
            .with_membership(user, gym, sport_b, GymRole::Manager);
        let (authz, _) = authorizer(store);

        // The exact (gym, sport_a) membership decides, even though a higher
        // role exists elsewhere in the gym.
        let read = AccessPolicy::permissions(&[Permission::TeamRead]);
        let grant = authz
            .authorize(Some(user), &read, Some(ScopeRef::Team(team_a)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grant.role, GymRole::Student);

        // Without an exact match the gym-wide membership applies.
        let team_c = Uuid::new_v4();
        let sport_c = Uuid::new_v4();
        let store = MemoryStore::default()
            .with_team(team_c, gym, sport_c)
            .with_membership(user, gym, sport_b, GymRole::Manager);
        let (authz, _) = authorizer(store);
        let grant = authz
            .authorize(Some(user), &read, Some(ScopeRef::Team(team_c)))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(grant.role, GymRole::Manager);
    }

    #[tokio::test]
    async fn repeated_evaluations_are_deterministic() {
        let (user, gym, sport) = ids();
        let team = Uuid::new_v4();
        let store = MemoryStore::default()
            .with_team(team, gym, sport)
            .with_membership(user, gym, sport, GymRole::Professor);
        let (authz, store) = authorizer(store);
        let policy = AccessPolicy::permissions(&[Permission::ClassCreate]);

        let first = authz
            .authorize(Some(user), &policy, Some(ScopeRef::Team(team)))
            .await
            .unwrap()
            .unwrap();
        let reads_after_first = store.read_count();

        let second = authz
            .authorize(Some(user), &policy, Some(ScopeRef::Team(team)))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.role, second.role);
        assert_eq!(first.scope, second.scope);
        // Same lookups, no hidden state between evaluations.
        assert_eq!(store.read_count(), reads_after_first * 2);
    }
}
