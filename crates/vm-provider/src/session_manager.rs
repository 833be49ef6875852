//! Per-tenant session cache.
//!
//! Sessions are built lazily on first use. Construction is single-flight per
//! tenant: concurrent callers share one in-flight build and all receive its
//! session or its error. Failed builds are not cached. A built session stays
//! cached until it is invalidated, which logs it out.
//!
//! The map lock is never held across an await.

use crate::config::{ConfigSource, ProviderConfig};
use crate::error::{ProviderError, VSphereResultExt};
use crate::network::NetworkInterfaceClient;
use crate::session::Session;
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info, warn};
use vsphere_client::{VSphereClient, VSphereClientTrait};

/// Builds an authenticated, configured session for a tenant.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create_session(&self, tenant: &str, config: &ProviderConfig) -> Result<Session, ProviderError>;
}

/// Connects to vCenter over HTTP.
#[derive(Clone, Default)]
pub struct VSphereSessionFactory {
    network_interfaces: Option<Arc<dyn NetworkInterfaceClient>>,
}

impl VSphereSessionFactory {
    pub fn new(network_interfaces: Option<Arc<dyn NetworkInterfaceClient>>) -> Self {
        Self { network_interfaces }
    }
}

#[async_trait]
impl SessionFactory for VSphereSessionFactory {
    async fn create_session(&self, tenant: &str, config: &ProviderConfig) -> Result<Session, ProviderError> {
        let client = VSphereClient::new(config.client_config())
            .with_context(|| "failed to create client for new session".to_string())?;
        client
            .login()
            .await
            .with_context(|| format!("failed to log in to {}:{}", config.vc_pnid, config.vc_port))?;

        let client: Arc<dyn VSphereClientTrait> = Arc::new(client);
        Session::connect(tenant, config, client, self.network_interfaces.clone()).await
    }
}

type BuildResult = Result<Arc<Session>, Arc<ProviderError>>;

enum Slot {
    Ready(Arc<Session>),
    Pending {
        generation: u64,
        build: Shared<BoxFuture<'static, BuildResult>>,
    },
}

enum Settled {
    Session(Arc<Session>),
    /// Built for a slot that was invalidated in the meantime
    Orphaned(Arc<Session>),
    Failed(Arc<ProviderError>),
}

pub struct SessionManager {
    config_source: Arc<dyn ConfigSource>,
    factory: Arc<dyn SessionFactory>,
    slots: Mutex<HashMap<String, Slot>>,
    generation: AtomicU64,
    endpoint: RwLock<Option<(String, u16)>>,
}

impl SessionManager {
    pub fn new(config_source: Arc<dyn ConfigSource>, factory: Arc<dyn SessionFactory>) -> Self {
        Self {
            config_source,
            factory,
            slots: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            endpoint: RwLock::new(None),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of built sessions currently cached.
    pub fn session_count(&self) -> usize {
        self.slots().values().filter(|slot| matches!(slot, Slot::Ready(_))).count()
    }

    /// vCenter endpoint override applied to sessions built from now on.
    pub fn endpoint(&self) -> Option<(String, u16)> {
        self.endpoint.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn start_build(&self, tenant: &str) -> Shared<BoxFuture<'static, BuildResult>> {
        let tenant = tenant.to_string();
        let config_source = Arc::clone(&self.config_source);
        let factory = Arc::clone(&self.factory);
        let endpoint = self.endpoint();

        async move {
            let mut config = config_source.provider_config(&tenant).await.map_err(Arc::new)?;
            if let Some((pnid, port)) = endpoint {
                config.vc_pnid = pnid;
                config.vc_port = port;
            }
            debug!("Building session for {:?} against {}:{}", tenant, config.vc_pnid, config.vc_port);
            factory
                .create_session(&tenant, &config)
                .await
                .map(Arc::new)
                .map_err(Arc::new)
        }
        .boxed()
        .shared()
    }

    /// Cached session of `tenant`, building it if needed.
    pub async fn get_session(&self, tenant: &str) -> Result<Arc<Session>, ProviderError> {
        let (generation, build) = {
            let mut slots = self.slots();
            match slots.get(tenant) {
                Some(Slot::Ready(session)) => return Ok(Arc::clone(session)),
                Some(Slot::Pending { generation, build }) => (*generation, build.clone()),
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst);
                    let build = self.start_build(tenant);
                    slots.insert(
                        tenant.to_string(),
                        Slot::Pending {
                            generation,
                            build: build.clone(),
                        },
                    );
                    (generation, build)
                }
            }
        };

        let result = build.await;

        let settled = {
            let mut slots = self.slots();
            let current = matches!(
                slots.get(tenant),
                Some(Slot::Pending { generation: g, .. }) if *g == generation
            );
            match result {
                Ok(session) if current => {
                    slots.insert(tenant.to_string(), Slot::Ready(Arc::clone(&session)));
                    Settled::Session(session)
                }
                Ok(session) => match slots.get(tenant) {
                    // Another waiter of the same build settled it first
                    Some(Slot::Ready(cached)) if Arc::ptr_eq(cached, &session) => Settled::Session(session),
                    _ => Settled::Orphaned(session),
                },
                Err(e) => {
                    if current {
                        slots.remove(tenant);
                    }
                    Settled::Failed(e)
                }
            }
        };

        match settled {
            Settled::Session(session) => Ok(session),
            Settled::Orphaned(session) => {
                session.logout().await;
                Err(ProviderError::SessionInvalidated(tenant.to_string()))
            }
            Settled::Failed(source) => {
                warn!("Failed to create session for {:?}: {}", tenant, source);
                Err(ProviderError::Session {
                    tenant: tenant.to_string(),
                    source,
                })
            }
        }
    }

    /// Drop the tenant's session, logging it out. A build in flight is
    /// abandoned and its result logged out when it completes.
    pub async fn invalidate(&self, tenant: &str) {
        let removed = self.slots().remove(tenant);
        match removed {
            Some(Slot::Ready(session)) => {
                info!("Invalidating session for {:?}", tenant);
                session.logout().await;
            }
            Some(Slot::Pending { .. }) => info!("Abandoning session build for {:?}", tenant),
            None => {}
        }
    }

    /// Drop and log out every cached session.
    pub async fn invalidate_all(&self) {
        let sessions: Vec<Arc<Session>> = self
            .slots()
            .drain()
            .filter_map(|(_, slot)| match slot {
                Slot::Ready(session) => Some(session),
                Slot::Pending { .. } => None,
            })
            .collect();
        if !sessions.is_empty() {
            info!("Logging out {} cached sessions", sessions.len());
        }
        join_all(sessions.iter().map(|session| session.logout())).await;
    }

    /// Point future sessions at a new vCenter endpoint and drop the current ones.
    pub async fn update_endpoint(&self, pnid: &str, port: u16) {
        *self.endpoint.write().unwrap_or_else(PoisonError::into_inner) = Some((pnid.to_string(), port));
        info!("vCenter endpoint changed to {}:{}", pnid, port);
        self.invalidate_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfigSource;
    use crate::test_utils::{create_test_config, create_test_inventory};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;
    use vsphere_client::{MockOperation, MockVSphereClient};

    struct CountingFactory {
        mock: MockVSphereClient,
        builds: AtomicUsize,
        delay: Duration,
        fail: AtomicBool,
        endpoints: Mutex<Vec<String>>,
    }

    impl CountingFactory {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                mock: create_test_inventory(),
                builds: AtomicUsize::new(0),
                delay,
                fail: AtomicBool::new(false),
                endpoints: Mutex::new(Vec::new()),
            })
        }

        fn builds(&self) -> usize {
            self.builds.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SessionFactory for CountingFactory {
        async fn create_session(&self, tenant: &str, config: &ProviderConfig) -> Result<Session, ProviderError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            self.endpoints.lock().unwrap().push(config.vc_pnid.clone());
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(ProviderError::InvalidConfig("vCenter unreachable".to_string()));
            }
            let client: Arc<dyn VSphereClientTrait> = Arc::new(self.mock.clone());
            client.login().await.unwrap();
            Session::connect(tenant, config, client, None).await
        }
    }

    fn manager(factory: &Arc<CountingFactory>) -> SessionManager {
        SessionManager::new(
            Arc::new(StaticConfigSource::new(create_test_config())),
            Arc::clone(factory) as Arc<dyn SessionFactory>,
        )
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_build() {
        let factory = CountingFactory::new(Duration::from_millis(20));
        let manager = manager(&factory);

        let (a, b, c) = tokio::join!(
            manager.get_session("ns"),
            manager.get_session("ns"),
            manager.get_session("ns")
        );
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());
        assert!(Arc::ptr_eq(&a, &b) && Arc::ptr_eq(&b, &c));
        assert_eq!(factory.builds(), 1);
        assert_eq!(manager.session_count(), 1);

        let again = manager.get_session("ns").await.unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(factory.builds(), 1);
    }

    #[tokio::test]
    async fn tenants_get_independent_sessions() {
        let factory = CountingFactory::new(Duration::from_millis(5));
        let manager = manager(&factory);

        let (a, b) = tokio::join!(manager.get_session("team-a"), manager.get_session("team-b"));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.tenant(), "team-a");
        assert_eq!(b.tenant(), "team-b");
        assert_eq!(factory.builds(), 2);
    }

    #[tokio::test]
    async fn failed_build_is_not_cached() {
        let factory = CountingFactory::new(Duration::ZERO);
        factory.fail.store(true, Ordering::SeqCst);
        let manager = manager(&factory);

        let err = manager.get_session("ns").await.unwrap_err();
        assert!(matches!(err, ProviderError::Session { ref tenant, .. } if tenant == "ns"));
        assert_eq!(manager.session_count(), 0);

        factory.fail.store(false, Ordering::SeqCst);
        manager.get_session("ns").await.unwrap();
        assert_eq!(factory.builds(), 2);
    }

    #[tokio::test]
    async fn unresolvable_inventory_fails_the_build() {
        let factory = CountingFactory::new(Duration::ZERO);
        let mut config = create_test_config();
        config.folder = "missing-folder".to_string();
        let manager = SessionManager::new(
            Arc::new(StaticConfigSource::new(config)),
            Arc::clone(&factory) as Arc<dyn SessionFactory>,
        );

        let err = manager.get_session("ns").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn invalidate_logs_out_and_rebuilds() {
        let factory = CountingFactory::new(Duration::ZERO);
        let manager = manager(&factory);

        let first = manager.get_session("ns").await.unwrap();
        manager.invalidate("ns").await;
        assert!(first.is_logged_out());
        assert_eq!(factory.mock.calls(MockOperation::Logout), 1);

        let second = manager.get_session("ns").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(factory.builds(), 2);
    }

    #[tokio::test]
    async fn session_invalidated_mid_build_is_logged_out() {
        let factory = CountingFactory::new(Duration::from_millis(50));
        let manager = manager(&factory);

        let (result, ()) = tokio::join!(manager.get_session("ns"), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            manager.invalidate("ns").await;
        });
        assert!(matches!(result, Err(ProviderError::SessionInvalidated(_))));
        assert_eq!(factory.mock.calls(MockOperation::Logout), 1);
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn invalidate_all_logs_out_every_session() {
        let factory = CountingFactory::new(Duration::ZERO);
        let manager = manager(&factory);
        manager.get_session("team-a").await.unwrap();
        manager.get_session("team-b").await.unwrap();

        manager.invalidate_all().await;
        assert_eq!(manager.session_count(), 0);
        assert_eq!(factory.mock.calls(MockOperation::Logout), 2);
    }

    #[tokio::test]
    async fn endpoint_update_applies_to_new_sessions() {
        let factory = CountingFactory::new(Duration::ZERO);
        let manager = manager(&factory);
        let old = manager.get_session("ns").await.unwrap();

        manager.update_endpoint("vc2.test", 8443).await;
        assert!(old.is_logged_out());
        manager.get_session("ns").await.unwrap();

        let endpoints = factory.endpoints.lock().unwrap().clone();
        assert_eq!(endpoints, vec!["vc.test".to_string(), "vc2.test".to_string()]);
        assert_eq!(manager.endpoint(), Some(("vc2.test".to_string(), 8443)));
    }
}
