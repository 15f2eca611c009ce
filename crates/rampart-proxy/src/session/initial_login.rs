use super::auth::AuthSession;
use super::{Inbound, Session};
use crate::auth::{self, HasJoined};
use crate::crypto::{IdentifiedKey, KeyError};
use crate::events::{CookieReceiveEvent, PreLoginEvent, PreLoginResult};
use crate::messages;
use crate::proxy::Proxy;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use rampart_protocol_core::{
    CookieResponse, Disconnect, EncryptionRequest, EncryptionResponse, LoginPluginMessage, LoginPluginResponse,
    Packet, PacketContext, Protocol, ServerLogin,
};
use rampart_types::{GameProfile, TextComponent};
use regex::Regex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

static USERNAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{2,16}$").expect("valid username pattern"));

pub fn valid_username(name: &str) -> bool {
    USERNAME.is_match(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AwaitingLogin,
    AwaitingPluginResponses,
    AwaitingEncryption,
    Done,
}

/// Outcome of the pre-login checks, carried until encryption finishes.
struct PendingLogin {
    username: String,
    key: Option<IdentifiedKey>,
    online: bool,
}

/// Handles `ServerLogin` up to a verified (or offline) profile.
pub struct InitialLoginSession {
    proxy: Arc<Proxy>,
    inbound: Arc<Inbound>,
    stage: Mutex<Stage>,
    pending: Mutex<Option<PendingLogin>>,
    outstanding: Mutex<HashSet<i32>>,
    next_message_id: AtomicI32,
    verify_token: [u8; 4],
}

impl InitialLoginSession {
    pub fn new(proxy: Arc<Proxy>, inbound: Arc<Inbound>) -> Self {
        Self {
            proxy,
            inbound,
            stage: Mutex::new(Stage::AwaitingLogin),
            pending: Mutex::new(None),
            outstanding: Mutex::new(HashSet::new()),
            next_message_id: AtomicI32::new(0),
            verify_token: auth::verify_token(),
        }
    }

    pub async fn handle(self: Arc<Self>, pc: PacketContext) {
        match pc.packet {
            Some(Packet::ServerLogin(login)) => self.handle_login(login).await,
            Some(Packet::EncryptionResponse(response)) => self.handle_encryption_response(response).await,
            Some(Packet::LoginPluginResponse(response)) => self.handle_plugin_response(response).await,
            Some(Packet::CookieResponse(cookie)) => self.handle_cookie(cookie),
            _ => self.inbound.conn().close(),
        }
    }

    pub async fn disconnected(self: Arc<Self>) {
        debug!(addr = %self.inbound.remote_addr(), "disconnected during login");
    }

    async fn kick(&self, reason: TextComponent) {
        self.inbound.conn().close_with(Disconnect::from_text(&reason)).await;
    }

    fn advance(&self, from: Stage, to: Stage) -> bool {
        let mut stage = self.stage.lock();
        if *stage != from {
            return false;
        }
        *stage = to;
        true
    }

    async fn handle_login(&self, login: ServerLogin) {
        if !self.advance(Stage::AwaitingLogin, Stage::Done) {
            self.inbound.conn().close();
            return;
        }
        if !valid_username(&login.username) {
            self.kick(messages::invalid_username()).await;
            return;
        }

        let protocol = self.inbound.protocol();
        let key = match &login.player_key {
            Some(data) => match IdentifiedKey::new(data, protocol, login.holder_uuid) {
                Ok(key) => Some(key),
                Err(KeyError::Expired) => {
                    self.kick(messages::translatable("multiplayer.disconnect.invalid_public_key_signature", Vec::new()))
                        .await;
                    return;
                }
                Err(KeyError::Malformed) => {
                    self.kick(messages::translatable("multiplayer.disconnect.invalid_public_key", Vec::new()))
                        .await;
                    return;
                }
            },
            None => None,
        };
        if key.is_none()
            && self.proxy.config().force_key_authentication
            && protocol >= Protocol::V1_19
            && protocol < Protocol::V1_19_3
        {
            self.kick(messages::translatable("multiplayer.disconnect.missing_public_key", Vec::new()))
                .await;
            return;
        }

        let mut event = PreLoginEvent::new(self.inbound.clone(), login.username.clone(), login.holder_uuid);
        self.proxy.events().fire(&mut event);
        if !self.inbound.active() {
            return;
        }
        let online = match &event.result {
            PreLoginResult::Denied(reason) => {
                info!(addr = %self.inbound.remote_addr(), username = %event.username, "login denied: {}", reason.plain_text());
                self.kick(reason.clone()).await;
                return;
            }
            PreLoginResult::ForceOnlineMode => true,
            PreLoginResult::ForceOfflineMode => false,
            PreLoginResult::Allowed => self.proxy.config().online_mode,
        };
        let pending = PendingLogin {
            username: event.username.clone(),
            key,
            online,
        };

        let messages = event.take_login_plugin_messages();
        if messages.is_empty() || protocol < Protocol::V1_13 {
            self.continue_login(pending).await;
            return;
        }
        *self.pending.lock() = Some(pending);
        *self.stage.lock() = Stage::AwaitingPluginResponses;
        for (channel, data) in messages {
            let id = self.next_message_id.fetch_add(1, Ordering::SeqCst);
            self.outstanding.lock().insert(id);
            let message = LoginPluginMessage { id, channel, data };
            if let Err(e) = self.inbound.conn().write_packet(message).await {
                debug!(addr = %self.inbound.remote_addr(), "could not send login plugin message: {}", e);
                return;
            }
        }
    }

    async fn handle_plugin_response(&self, response: LoginPluginResponse) {
        let finished = {
            let mut outstanding = self.outstanding.lock();
            if !outstanding.remove(&response.id) {
                debug!(id = response.id, "ignoring login plugin response with unknown id");
                return;
            }
            outstanding.is_empty()
        };
        if finished && self.advance(Stage::AwaitingPluginResponses, Stage::Done) {
            if let Some(pending) = self.pending.lock().take() {
                self.continue_login(pending).await;
            }
        }
    }

    async fn continue_login(&self, pending: PendingLogin) {
        if !self.inbound.active() {
            return;
        }
        if !pending.online {
            let profile = GameProfile::offline(&pending.username);
            self.authenticated(profile, false, pending.key).await;
            return;
        }
        let request = EncryptionRequest {
            server_id: String::new(),
            public_key: self.proxy.key_pair().public_der().to_vec(),
            verify_token: self.verify_token.to_vec(),
            should_authenticate: true,
        };
        *self.pending.lock() = Some(pending);
        *self.stage.lock() = Stage::AwaitingEncryption;
        if let Err(e) = self.inbound.conn().write_packet(request).await {
            debug!(addr = %self.inbound.remote_addr(), "could not send encryption request: {}", e);
        }
    }

    fn token_matches(&self, response: &EncryptionResponse, key: Option<&IdentifiedKey>) -> bool {
        match (key, response.salt) {
            (Some(key), Some(salt)) => {
                let mut data = self.verify_token.to_vec();
                data.extend_from_slice(&salt.to_be_bytes());
                key.verify_data_signature(&response.verify_token, &data)
            }
            _ => self
                .proxy
                .key_pair()
                .decrypt(&response.verify_token)
                .is_ok_and(|token| token == self.verify_token),
        }
    }

    async fn handle_encryption_response(&self, response: EncryptionResponse) {
        let conn = self.inbound.conn();
        if !self.advance(Stage::AwaitingEncryption, Stage::Done) {
            conn.close();
            return;
        }
        let Some(pending) = self.pending.lock().take() else {
            conn.close();
            return;
        };
        if !self.token_matches(&response, pending.key.as_ref()) {
            debug!(addr = %conn.remote_addr(), "verify token mismatch");
            conn.close();
            return;
        }
        let secret = match self.proxy.key_pair().decrypt(&response.shared_secret) {
            Ok(secret) => secret,
            Err(e) => {
                debug!(addr = %conn.remote_addr(), "could not decrypt shared secret: {}", e);
                conn.close();
                return;
            }
        };
        let server_id = auth::server_id_hash("", &secret, self.proxy.key_pair().public_der());
        if let Err(e) = conn.enable_encryption(&secret).await {
            error!(addr = %conn.remote_addr(), "could not enable encryption: {}", e);
            conn.close();
            return;
        }

        let ip = self
            .proxy
            .config()
            .prevent_client_proxy_connections
            .then(|| conn.remote_addr().ip());
        match self
            .proxy
            .authenticator()
            .has_joined(&pending.username, &server_id, ip)
            .await
        {
            Ok(HasJoined::Verified(profile)) => {
                if !self.inbound.active() {
                    return;
                }
                self.authenticated(profile, true, pending.key).await;
            }
            Ok(HasJoined::NotAuthenticated) => {
                info!(username = %pending.username, "session server did not verify the player, treating as offline-mode client");
                self.kick(messages::online_mode_only()).await;
            }
            Err(e) => {
                error!(username = %pending.username, "could not authenticate with session server: {}", e);
                self.kick(messages::unable_to_authenticate()).await;
            }
        }
    }

    async fn authenticated(&self, profile: GameProfile, online_mode: bool, key: Option<IdentifiedKey>) {
        debug!(username = %profile.name, id = %profile.uuid, online_mode, "login verified");
        let session = Arc::new(AuthSession::new(
            self.proxy.clone(),
            self.inbound.clone(),
            profile,
            online_mode,
            key,
        ));
        self.inbound
            .conn()
            .set_session_handler(Session::Auth(session.clone()))
            .await;
        session.start().await;
    }

    fn handle_cookie(&self, cookie: CookieResponse) {
        let mut event = CookieReceiveEvent {
            inbound: self.inbound.clone(),
            player: None,
            key: cookie.key,
            payload: cookie.payload,
            forward: false,
        };
        self.proxy.events().fire(&mut event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_validation() {
        assert!(valid_username("Notch"));
        assert!(valid_username("jeb_"));
        assert!(valid_username("ab"));
        assert!(valid_username("ThisNameIs16Char"));
        assert!(!valid_username(""));
        assert!(!valid_username("a"));
        assert!(!valid_username("ThisNameIs17Chars"));
        assert!(!valid_username("dot.name"));
        assert!(!valid_username("with space"));
        assert!(!valid_username("Ünicode"));
    }

    #[test]
    fn test_username_pattern_compiles() {
        let pattern = Lazy::force(&USERNAME);
        assert_eq!(pattern.as_str(), r"^[A-Za-z0-9_]{2,16}$");
        assert!(pattern.is_match("Steve"));
    }
}
