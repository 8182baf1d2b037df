//! End-to-end behaviour of the Xiaozhi hub against a fake loader socket

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ha_auth::TokenType;
use ha_components::xiaozhi::{self, XiaozhiConfig, XiaozhiError, XiaozhiHub};
use ha_components::HomeAssistant;
use ha_event_bus::EventBus;
use ha_registries::DeviceIdentifier;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const OK: &str = r#"{"success":true,"statusCode":200,"message":"ok"}"#;
const REJECTED: &str = r#"{"success":false,"statusCode":500,"message":"上报失败","error":"update error"}"#;
const MAC: &str = "aa:bb:cc:dd:ee:ff";

/// Records every request and answers each with the same reply
struct FakeLoader {
    requests: mpsc::UnboundedReceiver<Value>,
    task: JoinHandle<()>,
}

impl FakeLoader {
    fn spawn(path: &Path, reply: &'static str) -> Self {
        let listener = UnixListener::bind(path).unwrap();
        let (tx, requests) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut raw = Vec::new();
                stream.read_to_end(&mut raw).await.unwrap();
                let _ = tx.send(serde_json::from_slice(&raw).unwrap());
                stream.write_all(reply.as_bytes()).await.unwrap();
            }
        });
        Self { requests, task }
    }

    async fn next(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.requests.recv())
            .await
            .expect("no upload within 5s")
            .expect("loader stopped")
    }

    async fn assert_quiet(&mut self, window: Duration) {
        let received = tokio::time::timeout(window, self.requests.recv()).await;
        assert!(received.is_err(), "unexpected upload: {:?}", received);
    }

    fn count_pending(&mut self) -> usize {
        let mut count = 0;
        while self.requests.try_recv().is_ok() {
            count += 1;
        }
        count
    }
}

impl Drop for FakeLoader {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Fixture {
    dir: TempDir,
    hass: Arc<HomeAssistant>,
    config: XiaozhiConfig,
}

impl Fixture {
    fn new() -> Self {
        Self::with_bus(EventBus::new())
    }

    fn with_bus(bus: EventBus) -> Self {
        let dir = TempDir::new().unwrap();
        let hass = Arc::new(HomeAssistant::with_bus(dir.path(), Arc::new(bus)));
        let config = XiaozhiConfig {
            socket_path: dir.path().join("loader.sock"),
            debounce_secs: 0.05,
            request_timeout_secs: 2.0,
            mac: Some(MAC.to_uppercase()),
            ..Default::default()
        };
        Self { dir, hass, config }
    }

    fn loader(&self, reply: &'static str) -> FakeLoader {
        FakeLoader::spawn(&self.config.socket_path, reply)
    }

    /// A hub without background tasks
    fn hub(&self) -> XiaozhiHub {
        XiaozhiHub::new(self.hass.clone(), self.config.clone())
    }

    fn add_light(&self, object_id: &str) {
        self.hass.registries.entities.get_or_create(
            "demo",
            &format!("light.{}", object_id),
            None,
            None,
            None,
        );
    }
}

#[tokio::test]
async fn test_mac_override_is_lowercased() {
    let fx = Fixture::new();
    let hub = fx.hub();
    assert_eq!(hub.mac(), MAC);
    assert_eq!(hub.store().key(), "chuguan-xiaozhi.aa:bb:cc:dd:ee:ff");
}

#[tokio::test]
async fn test_burst_of_registry_events_uploads_once() {
    let fx = Fixture::new();
    let mut loader = fx.loader(OK);
    let hub = xiaozhi::setup(fx.hass.clone(), fx.config.clone());

    fx.add_light("a");
    fx.add_light("b");
    fx.add_light("c");

    let request = loader.next().await;
    assert_eq!(
        request,
        json!({"devices": ",a,light.a;,b,light.b;,c,light.c"})
    );
    loader.assert_quiet(Duration::from_millis(300)).await;

    let snapshot = hub.store().load().await;
    assert_eq!(snapshot.devices().unwrap().len(), 3);
    assert!(fx
        .dir
        .path()
        .join(".storage/chuguan-xiaozhi.aa:bb:cc:dd:ee:ff")
        .exists());
    hub.stop();
}

#[tokio::test]
async fn test_started_event_triggers_upload() {
    let fx = Fixture::new();
    let mut loader = fx.loader(OK);
    let hub = xiaozhi::setup(fx.hass.clone(), fx.config.clone());
    loader.assert_quiet(Duration::from_millis(200)).await;

    fx.hass.start();
    assert_eq!(loader.next().await, json!({"devices": ""}));
    hub.stop();
}

#[tokio::test]
async fn test_setup_on_running_hub_uploads_immediately() {
    let fx = Fixture::new();
    let mut loader = fx.loader(OK);
    fx.add_light("porch");
    fx.hass.start();

    let hub = xiaozhi::setup(fx.hass.clone(), fx.config.clone());
    assert_eq!(loader.next().await, json!({"devices": ",porch,light.porch"}));
    hub.stop();
}

#[tokio::test]
async fn test_unchanged_entities_are_not_uploaded_again() {
    let fx = Fixture::new();
    let mut loader = fx.loader(OK);
    let hub = fx.hub();
    fx.add_light("desk");

    assert!(hub.update_entities().await.unwrap());
    assert!(!hub.update_entities().await.unwrap());
    assert_eq!(loader.count_pending(), 1);

    fx.add_light("floor");
    assert!(hub.update_entities().await.unwrap());
    assert_eq!(loader.count_pending(), 1);
}

#[tokio::test]
async fn test_rejected_upload_leaves_snapshot_unchanged() {
    let fx = Fixture::new();
    let mut loader = fx.loader(REJECTED);
    let hub = fx.hub();
    fx.add_light("desk");

    let err = hub.update_entities().await.unwrap_err();
    assert!(matches!(err, XiaozhiError::Rejected { status_code: 500, .. }));
    assert_eq!(hub.store().load().await.devices(), None);

    // The next attempt tries again
    assert!(hub.update_entities().await.is_err());
    assert_eq!(loader.count_pending(), 2);
}

#[tokio::test]
async fn test_missing_loader_is_not_fatal() {
    let fx = Fixture::new();
    let hub = fx.hub();
    fx.add_light("desk");

    let err = hub.update_entities().await.unwrap_err();
    assert!(matches!(err, XiaozhiError::Io(_)));
    assert_eq!(hub.store().load().await.devices(), None);
}

#[tokio::test]
async fn test_no_user_skips_token() {
    let fx = Fixture::new();
    let hub = fx.hub();
    assert!(!hub.check_token().await.unwrap());
    assert_eq!(hub.store().load().await, Default::default());
}

#[tokio::test]
async fn test_token_issued_once_and_sent_with_upload() {
    let mut fx = Fixture::new();
    fx.config.debounce_secs = 60.0;
    let mut loader = fx.loader(OK);
    let owner = fx.hass.auth.create_user("Owner", true).await.unwrap();
    let hub = fx.hub();

    assert!(hub.check_token().await.unwrap());
    assert!(hub.update_pending());

    let record = hub.store().load().await.token(&owner.id).unwrap();
    let refresh = fx
        .hass
        .auth
        .validate_access_token(&record.access_token)
        .await
        .unwrap();
    assert_eq!(refresh.id, record.token_id);
    assert_eq!(refresh.token_type, TokenType::LongLivedAccessToken);
    assert_eq!(refresh.client_name.as_deref(), Some("Xiaozhi"));
    let expected_expiry = (Utc::now() + ChronoDuration::days(3650)).timestamp() as f64;
    assert!((record.expire_time - expected_expiry).abs() < 60.0);

    assert!(!hub.check_token().await.unwrap());

    assert!(hub.update_entities().await.unwrap());
    assert_eq!(
        loader.next().await,
        json!({"devices": "", "api_key": record.access_token.clone()})
    );
    assert_eq!(
        hub.store().load().await.api_key(),
        Some(record.access_token.as_str())
    );
    assert!(!hub.update_entities().await.unwrap());
    hub.stop();
}

#[tokio::test]
async fn test_token_renewed_near_expiry() {
    let mut fx = Fixture::new();
    fx.config.debounce_secs = 60.0;
    let owner = fx.hass.auth.create_user("Owner", true).await.unwrap();
    let hub = fx.hub();
    let now = Utc::now();

    assert!(hub.check_token_at(now).await.unwrap());
    let first = hub.store().load().await.token(&owner.id).unwrap();

    // 31 days left: still fine
    let later = now + ChronoDuration::days(3650 - 31);
    assert!(!hub.check_token_at(later).await.unwrap());

    // 29 days left: renew
    let later = now + ChronoDuration::days(3650 - 29);
    assert!(hub.check_token_at(later).await.unwrap());
    let second = hub.store().load().await.token(&owner.id).unwrap();

    assert_ne!(first.token_id, second.token_id);
    assert!(fx.hass.auth.get_refresh_token(&first.token_id).await.is_none());
    assert_eq!(fx.hass.auth.refresh_tokens_for_user(&owner.id).await.len(), 1);
    hub.stop();
}

#[tokio::test]
async fn test_revoked_token_is_replaced() {
    let mut fx = Fixture::new();
    fx.config.debounce_secs = 60.0;
    let owner = fx.hass.auth.create_user("Owner", true).await.unwrap();
    let hub = fx.hub();

    assert!(hub.check_token().await.unwrap());
    let first = hub.store().load().await.token(&owner.id).unwrap();
    fx.hass
        .auth
        .remove_refresh_token(&first.token_id)
        .await
        .unwrap();

    assert!(hub.check_token().await.unwrap());
    let second = hub.store().load().await.token(&owner.id).unwrap();
    assert_ne!(first.access_token, second.access_token);
    hub.stop();
}

#[tokio::test]
async fn test_stale_token_with_same_name_is_replaced() {
    let mut fx = Fixture::new();
    fx.config.debounce_secs = 60.0;
    let owner = fx.hass.auth.create_user("Owner", true).await.unwrap();
    let stale = fx
        .hass
        .auth
        .create_refresh_token(
            &owner.id,
            Some("Xiaozhi"),
            TokenType::LongLivedAccessToken,
            ChronoDuration::days(10),
        )
        .await
        .unwrap();
    let other = fx
        .hass
        .auth
        .create_refresh_token(
            &owner.id,
            Some("Phone"),
            TokenType::LongLivedAccessToken,
            ChronoDuration::days(10),
        )
        .await
        .unwrap();
    let hub = fx.hub();

    assert!(hub.check_token().await.unwrap());

    let auth = &fx.hass.auth;
    assert!(auth.get_refresh_token(&stale.id).await.is_none());
    assert!(auth.get_refresh_token(&other.id).await.is_some());
    let named: Vec<_> = auth
        .refresh_tokens_for_user(&owner.id)
        .await
        .into_iter()
        .filter(|t| t.client_name.as_deref() == Some("Xiaozhi"))
        .collect();
    assert_eq!(named.len(), 1);
    hub.stop();
}

#[tokio::test]
async fn test_configured_user() {
    let mut fx = Fixture::new();
    fx.config.debounce_secs = 60.0;
    fx.hass.auth.create_user("Owner", true).await.unwrap();
    let speaker = fx.hass.auth.create_user("Speaker", false).await.unwrap();
    fx.config.user_id = Some(speaker.id.clone());
    let hub = fx.hub();

    assert!(hub.check_token().await.unwrap());
    assert!(hub.store().load().await.token(&speaker.id).is_some());

    fx.config.user_id = Some("missing".to_string());
    let hub = fx.hub();
    assert!(!hub.check_token().await.unwrap());
}

#[tokio::test]
async fn test_new_token_at_startup_is_uploaded() {
    let fx = Fixture::new();
    let mut loader = fx.loader(OK);
    let owner = fx.hass.auth.create_user("Owner", true).await.unwrap();

    let hub = xiaozhi::setup(fx.hass.clone(), fx.config.clone());
    let request = loader.next().await;

    let record = hub.store().load().await.token(&owner.id).unwrap();
    assert_eq!(request["api_key"], json!(record.access_token));
    hub.stop();
}

#[tokio::test]
async fn test_stop_cancels_pending_and_future_updates() {
    let fx = Fixture::new();
    let mut loader = fx.loader(OK);
    let hub = xiaozhi::setup(fx.hass.clone(), fx.config.clone());

    fx.add_light("a");
    tokio::task::yield_now().await;
    hub.stop();
    assert!(!hub.update_pending());

    fx.add_light("b");
    loader.assert_quiet(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_lagged_listener_still_uploads_once() {
    let fx = Fixture::with_bus(EventBus::with_capacity(1));
    let mut loader = fx.loader(OK);
    let hub = xiaozhi::setup(fx.hass.clone(), fx.config.clone());

    // No await in between, so the listener falls behind the channel
    for object_id in ["a", "b", "c", "d", "e"] {
        fx.add_light(object_id);
    }

    let request = loader.next().await;
    assert_eq!(
        request,
        json!({"devices": ",a,light.a;,b,light.b;,c,light.c;,d,light.d;,e,light.e"})
    );
    loader.assert_quiet(Duration::from_millis(300)).await;
    hub.stop();
}

#[tokio::test]
async fn test_device_area_change_is_uploaded() {
    let fx = Fixture::new();
    let mut loader = fx.loader(OK);
    let kitchen = fx.hass.registries.areas.create("Kitchen");
    let hub = xiaozhi::setup(fx.hass.clone(), fx.config.clone());

    let device = fx.hass.registries.devices.get_or_create(
        &[DeviceIdentifier::new("demo", "strip-1")],
        &[],
        None,
        Some("LED strip"),
    );
    fx.hass.registries.entities.get_or_create(
        "demo",
        "light.strip",
        None,
        None,
        Some(&device.id),
    );
    assert_eq!(loader.next().await, json!({"devices": ",strip,light.strip"}));

    fx.hass
        .registries
        .devices
        .update(&device.id, |d| d.area_id = Some(kitchen.id.clone()))
        .unwrap();
    assert_eq!(
        loader.next().await,
        json!({"devices": "Kitchen,strip,light.strip"})
    );
    hub.stop();
}

#[tokio::test]
async fn test_oversized_lifespan_is_capped() {
    let mut fx = Fixture::new();
    fx.config.debounce_secs = 60.0;
    fx.config.token_lifespan_days = 200_000_000;
    let owner = fx.hass.auth.create_user("Owner", true).await.unwrap();
    let hub = fx.hub();
    let now = Utc::now();

    assert!(hub.check_token_at(now).await.unwrap());

    let record = hub.store().load().await.token(&owner.id).unwrap();
    let capped = now + ChronoDuration::days(i64::from(xiaozhi::MAX_TOKEN_LIFESPAN_DAYS));
    assert!((record.expire_time - capped.timestamp() as f64).abs() < 1.0);
    hub.stop();
}

#[tokio::test]
async fn test_expiry_out_of_range_touches_no_tokens() {
    let mut fx = Fixture::new();
    fx.config.debounce_secs = 60.0;
    let owner = fx.hass.auth.create_user("Owner", true).await.unwrap();
    let hub = fx.hub();
    let end_of_time = DateTime::<Utc>::MAX_UTC - ChronoDuration::days(1);

    let err = hub.check_token_at(end_of_time).await.unwrap_err();
    assert!(matches!(err, XiaozhiError::InvalidLifespan(3650)));
    assert!(fx
        .hass
        .auth
        .refresh_tokens_for_user(&owner.id)
        .await
        .is_empty());
    assert!(!hub.update_pending());
}
