//! Scoped content library sessions.
//!
//! Catalog calls run on a secondary REST session that is opened right before
//! use and closed afterwards. `CatalogSession::close` logs out on the normal
//! path; if the guard is dropped without being closed (early return, panic,
//! or a cancelled future) the logout is spawned onto the runtime instead.

use crate::error::{ProviderError, VSphereResultExt};
use std::sync::Arc;
use tracing::{debug, error, warn};
use vsphere_client::{RestSession, VSphereClientTrait};

pub struct CatalogSession {
    client: Arc<dyn VSphereClientTrait>,
    session: RestSession,
    closed: bool,
}

impl CatalogSession {
    pub async fn open(client: &Arc<dyn VSphereClientTrait>) -> Result<Self, ProviderError> {
        let session = client
            .catalog_login()
            .await
            .with_context(|| "failed to log in to content library service".to_string())?;
        debug!("Opened catalog session on {}", client.base_url());
        Ok(Self {
            client: Arc::clone(client),
            session,
            closed: false,
        })
    }

    pub fn rest(&self) -> &RestSession {
        &self.session
    }

    /// Log out. Failures are logged, never returned, so they cannot mask the
    /// result of the work done on the session.
    pub async fn close(mut self) {
        if let Err(e) = self.client.catalog_logout(&self.session).await {
            error!("Failed to log out of catalog session: {}", e);
        }
        // Only now: a close cancelled mid-logout leaves the logout to Drop
        self.closed = true;
    }
}

impl Drop for CatalogSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("Catalog session dropped outside a runtime; it will expire on the server");
            return;
        };
        let client = Arc::clone(&self.client);
        let session = self.session.clone();
        runtime.spawn(async move {
            if let Err(e) = client.catalog_logout(&session).await {
                error!("Failed to log out of abandoned catalog session: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use vsphere_client::{MockOperation, MockVSphereClient};

    async fn wait_for_logout(mock: &MockVSphereClient) {
        for _ in 0..50 {
            if mock.open_catalog_sessions() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn close_logs_out() {
        let mock = MockVSphereClient::new("https://vc.test");
        let client: Arc<dyn VSphereClientTrait> = Arc::new(mock.clone());

        let catalog = CatalogSession::open(&client).await.unwrap();
        assert_eq!(mock.open_catalog_sessions(), 1);
        catalog.close().await;
        assert_eq!(mock.open_catalog_sessions(), 0);
    }

    #[tokio::test]
    async fn dropped_session_is_logged_out_in_background() {
        let mock = MockVSphereClient::new("https://vc.test");
        let client: Arc<dyn VSphereClientTrait> = Arc::new(mock.clone());

        let catalog = CatalogSession::open(&client).await.unwrap();
        drop(catalog);
        wait_for_logout(&mock).await;
        assert_eq!(mock.open_catalog_sessions(), 0);
    }

    #[tokio::test]
    async fn cancelled_close_still_logs_out() {
        let mock = MockVSphereClient::new("https://vc.test");
        mock.delay(MockOperation::CatalogLogout, Duration::from_millis(20));
        let client: Arc<dyn VSphereClientTrait> = Arc::new(mock.clone());

        let catalog = CatalogSession::open(&client).await.unwrap();
        let closed = tokio::time::timeout(Duration::from_millis(1), catalog.close()).await;
        assert!(closed.is_err());
        assert_eq!(mock.open_catalog_sessions(), 1);

        wait_for_logout(&mock).await;
        assert_eq!(mock.open_catalog_sessions(), 0);
    }

    #[tokio::test]
    async fn logout_failure_is_swallowed() {
        let mock = MockVSphereClient::new("https://vc.test");
        mock.fail(MockOperation::CatalogLogout, "session expired");
        let client: Arc<dyn VSphereClientTrait> = Arc::new(mock.clone());

        let catalog = CatalogSession::open(&client).await.unwrap();
        catalog.close().await;
        assert_eq!(mock.calls(MockOperation::CatalogLogout), 1);
    }
}
