//! Caller identity for document processing.

use async_trait::async_trait;
use thiserror::Error;

/// Authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No authenticated caller.
    #[error("Unauthorized")]
    Unauthorized,
    /// Caller exists but is inactive, or has no profile.
    #[error("User not found or inactive")]
    UserInactive,
    /// The directory itself failed.
    #[error("User lookup failed: {0}")]
    Lookup(String),
}

/// Profile of the authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    /// Stable user identifier.
    pub user_id: String,
    /// Department used to scope stored chunks.
    pub department: Option<String>,
    /// Inactive users may not process documents.
    pub is_active: bool,
}

impl UserContext {
    /// Active user without a department.
    pub fn active(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            department: None,
            is_active: true,
        }
    }

    /// Set the department.
    pub fn with_department(mut self, department: impl Into<String>) -> Self {
        self.department = Some(department.into());
        self
    }
}

/// Source of the current caller's profile.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Profile of the authenticated caller, or `None` when nobody is signed in.
    async fn current_user(&self) -> Result<Option<UserContext>, AuthError>;
}

/// Resolve the caller and require an active profile.
pub async fn authorize(directory: &dyn UserDirectory) -> Result<UserContext, AuthError> {
    let user = directory.current_user().await?.ok_or(AuthError::Unauthorized)?;
    if !user.is_active {
        tracing::warn!(user_id = %user.user_id, "Rejected inactive user");
        return Err(AuthError::UserInactive);
    }
    Ok(user)
}

/// Directory that always returns the same caller.
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    user: Option<UserContext>,
}

impl StaticUserDirectory {
    /// Directory with `user` signed in.
    pub fn new(user: UserContext) -> Self {
        Self { user: Some(user) }
    }

    /// Directory with nobody signed in.
    pub fn anonymous() -> Self {
        Self { user: None }
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn current_user(&self) -> Result<Option<UserContext>, AuthError> {
        Ok(self.user.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn active_user_is_authorized() {
        let directory = StaticUserDirectory::new(UserContext::active("u1").with_department("ops"));
        let user = authorize(&directory).await.expect("user");
        assert_eq!(user.user_id, "u1");
        assert_eq!(user.department.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn anonymous_is_unauthorized() {
        let error = authorize(&StaticUserDirectory::anonymous()).await.unwrap_err();
        assert_eq!(error, AuthError::Unauthorized);
    }

    #[tokio::test]
    async fn inactive_user_is_rejected() {
        let mut user = UserContext::active("u2");
        user.is_active = false;
        let error = authorize(&StaticUserDirectory::new(user)).await.unwrap_err();
        assert_eq!(error.to_string(), "User not found or inactive");
    }
}
