use crate::types::UserSnapshot;

tokio::task_local! {
    static ACTIVE_PRINCIPAL: Option<UserSnapshot>;
}

/// Run `fut` with the given principal installed as the ambient identity.
///
/// External calls made inside the scope (query execution, notification
/// sends) pick the principal up via [`current`]; the scope is popped on
/// every exit path, including panic and cancellation.
pub async fn with_principal<F>(user: Option<UserSnapshot>, fut: F) -> F::Output
where
    F: std::future::Future,
{
    ACTIVE_PRINCIPAL.scope(user, fut).await
}

/// The principal installed by the nearest enclosing [`with_principal`]
/// scope, if any.
pub fn current() -> Option<UserSnapshot> {
    ACTIVE_PRINCIPAL.try_with(|p| p.clone()).ok().flatten()
}
