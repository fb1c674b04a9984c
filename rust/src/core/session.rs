// Session lifecycle: sign-in, teardown and the per-session profile cache.

use std::collections::HashMap;

use campus_backend_traits::{AuthSession, BackendError, UserDisplayInfo};

use super::*;
use crate::state::AuthState;

/// Process-wide state for one signed-in user. Created at sign-in and torn
/// down at sign-out; conversation views read identity and profiles from here.
pub(super) struct Session {
    pub(super) user_id: String,
    pub(super) access_token: String,
    pub(super) profiles: HashMap<String, UserDisplayInfo>,
}

impl AppCore {
    pub(super) fn login(&mut self, email: String, password: String) {
        let email = email.trim().to_string();
        if email.is_empty() || password.is_empty() {
            self.toast("Email and password are required");
            return;
        }
        if self.state.busy.logging_in {
            return;
        }
        self.set_busy(|b| b.logging_in = true);
        let backend = self.backend.clone();
        let tx = self.core_sender.clone();
        let timeout = self.config.request_timeout();
        self.runtime.spawn(async move {
            let result = bounded(timeout, backend.sign_in(&email, &password)).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::SessionStarted {
                result,
            })));
        });
    }

    pub(super) fn restore_session(&mut self, access_token: String) {
        let access_token = access_token.trim().to_string();
        if access_token.is_empty() {
            self.toast("Missing session token");
            return;
        }
        self.set_busy(|b| b.logging_in = true);
        let backend = self.backend.clone();
        let tx = self.core_sender.clone();
        let timeout = self.config.request_timeout();
        self.runtime.spawn(async move {
            let result = bounded(timeout, backend.restore_session(&access_token)).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::SessionStarted {
                result,
            })));
        });
    }

    pub(super) fn handle_session_started(&mut self, result: Result<AuthSession, BackendError>) {
        self.clear_busy();
        match result {
            Ok(auth) => self.start_session(auth),
            Err(e) => {
                tracing::warn!(%e, "sign-in failed");
                self.toast(format!("Login failed: {e}"));
            }
        }
    }

    fn start_session(&mut self, auth: AuthSession) {
        self.stop_session();
        self.session_generation = self.session_generation.wrapping_add(1);
        tracing::info!(
            user_id = %auth.user_id,
            generation = self.session_generation,
            "start_session"
        );
        self.state.auth = AuthState::LoggedIn {
            user_id: auth.user_id.clone(),
        };
        self.session = Some(Session {
            user_id: auth.user_id,
            access_token: auth.access_token,
            profiles: HashMap::new(),
        });
        self.handle_auth_transition(true);
    }

    pub(super) fn stop_session(&mut self) {
        self.unmount_conversation();
        self.profiles_in_flight.clear();
        if let Some(sess) = self.session.take() {
            tracing::info!(user_id = %sess.user_id, "stop_session");
        }
    }

    pub(super) fn logout(&mut self) {
        let had_session = self
            .session
            .as_ref()
            .is_some_and(|s| !s.access_token.is_empty());
        self.stop_session();
        if had_session {
            let backend = self.backend.clone();
            let timeout = self.config.request_timeout();
            self.runtime.spawn(async move {
                if let Err(e) = bounded(timeout, backend.sign_out()).await {
                    tracing::warn!(%e, "sign-out failed");
                }
            });
        }
        self.state.auth = AuthState::LoggedOut;
        self.handle_auth_transition(false);
    }

    fn handle_auth_transition(&mut self, logged_in: bool) {
        if logged_in {
            self.state.router.default_screen = Screen::Home;
            self.state.router.screen_stack.clear();
        } else {
            self.state.router.default_screen = Screen::Login;
            self.state.router.screen_stack.clear();
            self.state.current_chat = None;
            self.state.busy = BusyState::idle();
        }
        self.emit_router();
    }

    /// Look up a user's display attributes once per session.
    pub(super) fn prefetch_profile(&mut self, user_id: &str) {
        if self.session.is_none()
            || self.cached_profile(user_id).is_some()
            || !self.profiles_in_flight.insert(user_id.to_string())
        {
            return;
        }
        let backend = self.backend.clone();
        let tx = self.core_sender.clone();
        let timeout = self.config.request_timeout();
        let generation = self.session_generation;
        let user_id = user_id.to_string();
        self.runtime.spawn(async move {
            let info = match bounded(timeout, backend.resolve_user_display_info(&user_id)).await {
                Ok(info) => Some(info),
                Err(e) => {
                    tracing::debug!(%e, %user_id, "profile lookup failed");
                    None
                }
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ProfileResolved {
                generation,
                user_id,
                info,
            })));
        });
    }

    pub(super) fn handle_profile_resolved(
        &mut self,
        generation: u64,
        user_id: String,
        info: Option<UserDisplayInfo>,
    ) {
        if generation != self.session_generation {
            tracing::debug!(%user_id, generation, "stale profile lookup dropped");
            return;
        }
        self.profiles_in_flight.remove(&user_id);
        let Some(info) = info else {
            return;
        };
        let Some(sess) = self.session.as_mut() else {
            return;
        };
        sess.profiles.insert(user_id.clone(), info.clone());

        let Some(view) = self.conversation.as_mut() else {
            return;
        };
        let changed = view.store.apply_sender_info(
            &user_id,
            info.name.as_deref(),
            info.avatar_url.as_deref(),
        );
        let is_peer = view.peer_id() == Some(user_id.as_str());
        if changed || is_peer {
            self.emit_current_chat();
        }
    }
}
