use uuid::Uuid;

use crate::core::security;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::types::UserRole;
use crate::repositories::{NewUser, UpdateUser};

/// Create the configured admin account, or repair its password, role and
/// active flag if it drifted.
pub(crate) async fn ensure_admin(state: &AppState) -> anyhow::Result<()> {
    let admin = state.settings().admin();
    if admin.first_admin_password.is_empty() {
        tracing::warn!("FIRST_ADMIN_PASSWORD not configured; skipping admin creation");
        return Ok(());
    }

    let username = &admin.first_admin_username;
    let now = primitive_now_utc();

    if let Some(user) = state.store().find_user_by_username(username).await? {
        let verified = security::verify_password(&admin.first_admin_password, &user.hashed_password)
            .unwrap_or(false);

        let mut update = UpdateUser::default();
        if !verified {
            update.hashed_password = Some(security::hash_password(&admin.first_admin_password)?);
        }
        if user.role != UserRole::Admin {
            update.role = Some(UserRole::Admin);
        }
        if !user.is_active {
            update.is_active = Some(true);
        }

        if update.hashed_password.is_some() || update.role.is_some() || update.is_active.is_some() {
            state.store().update_user(&user.id, update, now).await?;
            tracing::info!("Updated default admin {username}");
        } else {
            tracing::info!("Default admin already up to date");
        }

        return Ok(());
    }

    let hashed_password = security::hash_password(&admin.first_admin_password)?;
    let created = state
        .store()
        .create_user(NewUser {
            id: Uuid::new_v4().to_string(),
            username: username.clone(),
            hashed_password,
            role: UserRole::Admin,
            is_active: true,
            created_at: now,
        })
        .await?;

    // Lost a race with another instance; the next start reconciles it.
    if created.is_some() {
        tracing::info!("Created default admin {username}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::config::Settings;
    use crate::test_support::{self, build_state, MemoryStore, RecordingCache};

    async fn settings_with_admin(password: &str) -> Settings {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        std::env::set_var("FIRST_ADMIN_USERNAME", "root");
        std::env::set_var("FIRST_ADMIN_PASSWORD", password);
        let settings = Settings::load().expect("settings");
        std::env::remove_var("FIRST_ADMIN_USERNAME");
        std::env::remove_var("FIRST_ADMIN_PASSWORD");
        settings
    }

    #[tokio::test]
    async fn creates_admin_once() {
        let store = Arc::new(MemoryStore::default());
        let state = build_state(
            settings_with_admin("super-secret").await,
            store,
            Arc::new(RecordingCache::default()),
        );

        ensure_admin(&state).await.expect("first run");
        ensure_admin(&state).await.expect("second run");

        let admin = state.store().find_user_by_username("root").await.expect("load").expect("admin");
        assert_eq!(admin.role, UserRole::Admin);
        assert!(security::verify_password("super-secret", &admin.hashed_password).expect("verify"));
    }

    #[tokio::test]
    async fn promotes_and_reactivates_existing_user() {
        let store = Arc::new(MemoryStore::default());
        let state = build_state(
            settings_with_admin("super-secret").await,
            store,
            Arc::new(RecordingCache::default()),
        );
        let existing =
            test_support::insert_user(state.store(), "root", UserRole::Student, None).await;
        state
            .store()
            .update_user(
                &existing.id,
                UpdateUser { is_active: Some(false), ..UpdateUser::default() },
                primitive_now_utc(),
            )
            .await
            .expect("deactivate");

        ensure_admin(&state).await.expect("bootstrap");

        let admin = state.store().find_user_by_id(&existing.id).await.expect("load").expect("admin");
        assert_eq!(admin.role, UserRole::Admin);
        assert!(admin.is_active);
        assert!(security::verify_password("super-secret", &admin.hashed_password).expect("verify"));
    }

    #[tokio::test]
    async fn skips_without_password() {
        let state = build_state(
            test_support::test_settings().await,
            Arc::new(MemoryStore::default()),
            Arc::new(RecordingCache::default()),
        );

        ensure_admin(&state).await.expect("bootstrap");

        assert!(state.store().find_user_by_username("admin").await.expect("load").is_none());
    }
}
