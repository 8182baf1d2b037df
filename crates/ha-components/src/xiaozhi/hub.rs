//! The Xiaozhi hub: keeps the backend's view of the exposed entities and
//! its API token up to date

use chrono::{DateTime, Utc};
use ha_auth::{TokenType, User};
use ha_core::events::{DeviceRegistryUpdatedData, EntityRegistryUpdatedData, HOMEASSISTANT_STARTED};
use ha_event_bus::TypedEventReceiver;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::XiaozhiConfig;
use super::debounce::Debouncer;
use super::error::{XiaozhiError, XiaozhiResult};
use super::exposed::exposed_entities;
use super::mac::main_mac;
use super::socket::LoaderClient;
use super::store::{Snapshot, SnapshotStore, TokenRecord};
use crate::hass::SharedHomeAssistant;

/// Handle to a running Xiaozhi hub; clones share the same hub
#[derive(Clone)]
pub struct XiaozhiHub {
    inner: Arc<HubInner>,
}

struct HubInner {
    hass: SharedHomeAssistant,
    config: XiaozhiConfig,
    mac: String,
    store: SnapshotStore,
    client: LoaderClient,
    debouncer: Debouncer,
    /// One update at a time
    update_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Create the hub and start listening
///
/// If the hub is already running an update is scheduled right away, since
/// `homeassistant_started` has already been fired.
pub fn setup(hass: SharedHomeAssistant, config: XiaozhiConfig) -> XiaozhiHub {
    let hub = XiaozhiHub::new(hass, config);
    hub.start();
    hub
}

impl XiaozhiHub {
    /// Create the hub without starting any background task
    pub fn new(hass: SharedHomeAssistant, config: XiaozhiConfig) -> Self {
        let mac = config
            .mac
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_else(main_mac);
        info!("Xiaozhi hub MAC address: {}", mac);

        let store = SnapshotStore::new(hass.storage(), &mac);
        let client = LoaderClient::new(config.socket_path.clone(), config.request_timeout());
        let debouncer = Debouncer::new(config.debounce());

        Self {
            inner: Arc::new(HubInner {
                hass,
                config,
                mac,
                store,
                client,
                debouncer,
                update_lock: tokio::sync::Mutex::new(()),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn mac(&self) -> &str {
        &self.inner.mac
    }

    pub fn config(&self) -> &XiaozhiConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.inner.store
    }

    /// Subscribe to the bus and start the token check
    pub fn start(&self) {
        let listener = self.spawn_listener();
        let token_task = self.spawn_token_task();
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend([listener, token_task]);

        if self.inner.hass.is_running() {
            self.schedule_update();
        }
    }

    /// Stop listening and drop any pending update
    pub fn stop(&self) {
        info!("Stopping Xiaozhi hub");
        let tasks = std::mem::take(
            &mut *self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            task.abort();
        }
        self.inner.debouncer.cancel();
    }

    /// Recompute and upload once things have been quiet for the debounce delay
    pub fn schedule_update(&self) {
        let hub = self.clone();
        self.inner.debouncer.schedule(move || async move {
            if let Err(err) = hub.update_entities().await {
                warn!("Xiaozhi update failed: {}", err);
            }
        });
    }

    pub fn update_pending(&self) -> bool {
        self.inner.debouncer.is_pending()
    }

    /// Upload the exposed entities if they or the API token changed
    ///
    /// Returns whether an upload happened. The snapshot only moves forward
    /// after the loader accepted the upload.
    pub async fn update_entities(&self) -> XiaozhiResult<bool> {
        let _guard = self.inner.update_lock.lock().await;

        let entities = exposed_entities(&self.inner.hass.registries);
        let snapshot = self.inner.store.load().await;
        let api_key = self.current_api_key(&snapshot).await;

        if snapshot.devices().as_deref() == Some(entities.as_slice())
            && snapshot.api_key() == api_key.as_deref()
        {
            info!("No entity changes to upload");
            return Ok(false);
        }

        debug!("Exposed entities for {}: {:?}", self.inner.mac, entities);
        self.inner
            .client
            .upload(&entities, api_key.as_deref())
            .await?;

        self.inner
            .store
            .update(|s| {
                s.set_devices(&entities);
                s.set_api_key(api_key.as_deref());
            })
            .await?;
        info!("Uploaded {} entities", entities.len());
        Ok(true)
    }

    /// Make sure a long-lived token exists and is not close to expiry
    ///
    /// Returns whether a new token was issued.
    pub async fn check_token(&self) -> XiaozhiResult<bool> {
        self.check_token_at(Utc::now()).await
    }

    pub async fn check_token_at(&self, now: DateTime<Utc>) -> XiaozhiResult<bool> {
        let Some(user) = self.token_user().await else {
            warn!("No user to issue the Xiaozhi token for");
            return Ok(false);
        };

        let auth = &self.inner.hass.auth;
        let config = &self.inner.config;
        let snapshot = self.inner.store.load().await;

        let lifespan = config.token_lifespan();
        let expires_at = now
            .checked_add_signed(lifespan)
            .ok_or(XiaozhiError::InvalidLifespan(lifespan.num_days()))?;

        if let Some(record) = snapshot.token(&user.id) {
            let remaining = record.expire_time - unix_seconds(now);
            let renew_before = config.token_renew_before().num_seconds() as f64;
            let exists = auth.get_refresh_token(&record.token_id).await.is_some();

            if exists && remaining > renew_before {
                debug!(
                    "Token for {} valid for another {} days",
                    user.name,
                    (remaining / 86_400.0).floor()
                );
                return Ok(false);
            }
            auth.remove_refresh_token(&record.token_id).await?;
        }

        // A token with our name may be left over from a lost snapshot
        for stale in auth.refresh_tokens_for_user(&user.id).await {
            if stale.token_type == TokenType::LongLivedAccessToken
                && stale.client_name.as_deref() == Some(config.client_name.as_str())
            {
                debug!("Removing stale token {}", stale.id);
                auth.remove_refresh_token(&stale.id).await?;
            }
        }

        let refresh_token = auth
            .create_refresh_token(
                &user.id,
                Some(config.client_name.as_str()),
                TokenType::LongLivedAccessToken,
                lifespan,
            )
            .await?;
        let access_token = auth.create_access_token_at(&refresh_token, now).await?;

        let record = TokenRecord {
            token_id: refresh_token.id.clone(),
            access_token,
            expire_time: unix_seconds(expires_at),
        };
        self.inner
            .store
            .update(|s| s.set_token(&user.id, &record))
            .await?;

        info!("Issued a new Xiaozhi token for {}", user.name);
        self.schedule_update();
        Ok(true)
    }

    /// The configured user, or the owner
    async fn token_user(&self) -> Option<User> {
        let auth = &self.inner.hass.auth;
        match &self.inner.config.user_id {
            Some(user_id) => {
                let user = auth.get_user(user_id).await;
                if user.is_none() {
                    warn!("Configured Xiaozhi user {} does not exist", user_id);
                }
                user
            }
            None => auth.get_owner().await,
        }
    }

    async fn current_api_key(&self, snapshot: &Snapshot) -> Option<String> {
        let user = self.token_user().await?;
        snapshot.token(&user.id).map(|record| record.access_token)
    }

    fn spawn_listener(&self) -> JoinHandle<()> {
        let hub = self.clone();
        let bus = &self.inner.hass.bus;
        let mut started = bus.subscribe(HOMEASSISTANT_STARTED);
        let mut devices: TypedEventReceiver<DeviceRegistryUpdatedData> = bus.subscribe_typed();
        let mut entities: TypedEventReceiver<EntityRegistryUpdatedData> = bus.subscribe_typed();

        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    event = started.recv() => event.map(|_| info!("Hub started")),
                    event = devices.recv() => event.map(|e| {
                        debug!("Device registry {:?}: {}", e.data.action, e.data.device_id)
                    }),
                    event = entities.recv() => event.map(|e| {
                        debug!("Entity registry {:?}: {}", e.data.action, e.data.entity_id)
                    }),
                };

                match received {
                    Ok(()) => hub.schedule_update(),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Missed {} registry events", skipped);
                        hub.schedule_update();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    fn spawn_token_task(&self) -> JoinHandle<()> {
        let hub = self.clone();
        let period = self.inner.config.token_check_interval();

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(err) = hub.check_token().await {
                    error!("Xiaozhi token check failed: {}", err);
                }
            }
        })
    }
}

fn unix_seconds(time: DateTime<Utc>) -> f64 {
    time.timestamp_millis() as f64 / 1000.0
}
