// SPDX-License-Identifier: GPL-3.0-only

//! Camera access authorization
//!
//! The gate asks the platform at most once per process and caches the
//! answer. Outside a Flatpak sandbox device node permissions are the only
//! access control, so the platform reports `Authorized`. Inside a sandbox
//! access goes through the XDG camera portal over D-Bus.

use crate::constants::app_info;
use futures::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};

/// Platform authorization state for camera access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    NotDetermined,
    Authorized,
    Denied,
    Restricted,
}

/// Platform boundary for camera permission
pub trait AccessPlatform: Send + Sync {
    fn authorization_status(&self) -> AuthorizationStatus;

    /// Prompt the user. Resolves to whether access was granted.
    fn request_access(&self) -> impl Future<Output = bool> + Send;
}

/// Resolves camera access once and remembers the answer
pub struct AuthorizationGate<P> {
    platform: P,
    decision: OnceCell<bool>,
}

impl<P: AccessPlatform> AuthorizationGate<P> {
    pub fn new(platform: P) -> Self {
        Self {
            platform,
            decision: OnceCell::new(),
        }
    }

    /// Whether capture may proceed
    ///
    /// Concurrent first callers share a single prompt.
    pub async fn check_or_request_access(&self) -> bool {
        *self
            .decision
            .get_or_init(|| async {
                let status = self.platform.authorization_status();
                let granted = match status {
                    AuthorizationStatus::Authorized => true,
                    AuthorizationStatus::Denied | AuthorizationStatus::Restricted => false,
                    AuthorizationStatus::NotDetermined => {
                        info!("Requesting camera access");
                        self.platform.request_access().await
                    }
                };
                info!(?status, granted, "Camera authorization resolved");
                granted
            })
            .await
    }

    /// The cached decision, if one was made
    pub fn cached(&self) -> Option<bool> {
        self.decision.get().copied()
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }
}

const PORTAL_DESTINATION: &str = "org.freedesktop.portal.Desktop";
const PORTAL_PATH: &str = "/org/freedesktop/portal/desktop";
const CAMERA_INTERFACE: &str = "org.freedesktop.portal.Camera";
const REQUEST_INTERFACE: &str = "org.freedesktop.portal.Request";

/// XDG desktop portal camera access
#[derive(Debug, Clone, Copy)]
pub struct PortalAccess {
    sandboxed: bool,
}

impl PortalAccess {
    pub fn new() -> Self {
        Self {
            sandboxed: app_info::is_flatpak(),
        }
    }

    /// Portal binding with an explicit sandbox decision
    pub fn with_sandbox(sandboxed: bool) -> Self {
        Self { sandboxed }
    }

    async fn access_camera() -> Result<bool, String> {
        let connection = zbus::Connection::session()
            .await
            .map_err(|e| format!("Failed to connect to session D-Bus: {}", e))?;

        let sender = connection
            .unique_name()
            .ok_or("Session bus connection has no unique name")?
            .trim_start_matches(':')
            .replace('.', "_");
        let token = format!("rtp_camera_{}", uuid::Uuid::new_v4().simple());
        let request_path = format!("{}/request/{}/{}", PORTAL_PATH, sender, token);

        // Subscribe before calling so the response cannot be missed
        let request_proxy = zbus::Proxy::new(
            &connection,
            PORTAL_DESTINATION,
            request_path.clone(),
            REQUEST_INTERFACE,
        )
        .await
        .map_err(|e| format!("Failed to create portal request proxy: {}", e))?;
        let mut responses = request_proxy
            .receive_signal("Response")
            .await
            .map_err(|e| format!("Failed to subscribe to portal response: {}", e))?;

        let camera_proxy = zbus::Proxy::new(
            &connection,
            PORTAL_DESTINATION,
            PORTAL_PATH,
            CAMERA_INTERFACE,
        )
        .await
        .map_err(|e| format!("Failed to create camera portal proxy: {}", e))?;

        let mut options: HashMap<&str, Value> = HashMap::new();
        options.insert("handle_token", Value::new(token.as_str()));

        let handle: OwnedObjectPath = camera_proxy
            .call("AccessCamera", &(options,))
            .await
            .map_err(|e| format!("AccessCamera failed: {}", e))?;
        if handle.as_str() != request_path {
            // Older portals return a different handle; the predicted path is what we listen on
            debug!(expected = %request_path, actual = %handle, "Portal request handle differs");
        }

        let message = responses
            .next()
            .await
            .ok_or("Portal request closed without a response")?;
        let (response, _results): (u32, HashMap<String, OwnedValue>) = message
            .body()
            .deserialize()
            .map_err(|e| format!("Malformed portal response: {}", e))?;

        debug!(response, "Camera portal responded");
        Ok(response == 0)
    }
}

impl Default for PortalAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessPlatform for PortalAccess {
    fn authorization_status(&self) -> AuthorizationStatus {
        if self.sandboxed {
            AuthorizationStatus::NotDetermined
        } else {
            AuthorizationStatus::Authorized
        }
    }

    fn request_access(&self) -> impl Future<Output = bool> + Send {
        async {
            match Self::access_camera().await {
                Ok(granted) => granted,
                Err(e) => {
                    warn!(error = %e, "Camera portal request failed, treating as denied");
                    false
                }
            }
        }
    }
}
