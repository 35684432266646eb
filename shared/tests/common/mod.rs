#![allow(dead_code)]

use async_trait::async_trait;
use safety_core::capabilities::PositionError;
use safety_core::model::{Coordinate, Endpoint};
use safety_core::{Dispatcher, LocationProvider, PermissionStatus, TransportError, Zone, ZoneLookup};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Stands in for the backend: records delivered bodies per route and refuses
/// everything while "offline".
pub struct FakeServer {
    online: AtomicBool,
    received: Mutex<Vec<(String, String)>>,
    zone: Mutex<Option<Zone>>,
}

impl FakeServer {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            received: Mutex::default(),
            zone: Mutex::new(Some(Zone::Safe)),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_zone(&self, zone: Option<Zone>) {
        *self.zone.lock().expect("zone lock") = zone;
    }

    pub fn received(&self) -> Vec<(String, String)> {
        self.received.lock().expect("received lock").clone()
    }

    pub fn bodies_for(&self, route: &str) -> Vec<serde_json::Value> {
        self.received()
            .into_iter()
            .filter(|(r, _)| r == route)
            .map(|(_, body)| serde_json::from_str(&body).expect("json body"))
            .collect()
    }

    fn unreachable() -> TransportError {
        TransportError::Connection {
            message: "offline".into(),
        }
    }
}

#[async_trait]
impl Dispatcher for FakeServer {
    async fn send(&self, target: &Endpoint, payload: &str) -> Result<(), TransportError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(Self::unreachable());
        }
        self.received
            .lock()
            .expect("received lock")
            .push((target.route.clone(), payload.to_string()));
        Ok(())
    }
}

#[async_trait]
impl ZoneLookup for FakeServer {
    async fn lookup_zone(&self, _coordinate: Coordinate) -> Result<Zone, TransportError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(Self::unreachable());
        }
        let zone = *self.zone.lock().expect("zone lock");
        zone.ok_or(TransportError::HttpStatus { status: 503 })
    }
}

/// Device GPS walking through a fixed list of fixes, repeating the last one.
pub struct ScriptedGps {
    permission: PermissionStatus,
    fixes: Mutex<Vec<(f64, f64)>>,
}

impl ScriptedGps {
    pub fn granted(fixes: Vec<(f64, f64)>) -> Self {
        Self {
            permission: PermissionStatus::Granted,
            fixes: Mutex::new(fixes),
        }
    }

    pub fn denied() -> Self {
        Self {
            permission: PermissionStatus::Denied,
            fixes: Mutex::default(),
        }
    }
}

#[async_trait]
impl LocationProvider for ScriptedGps {
    async fn request_permission(&self) -> PermissionStatus {
        self.permission
    }

    async fn current_position(&self) -> Result<(f64, f64), PositionError> {
        let mut fixes = self.fixes.lock().expect("fixes lock");
        match fixes.len() {
            0 => Err(PositionError::new("no fix")),
            1 => Ok(fixes[0]),
            _ => Ok(fixes.remove(0)),
        }
    }
}
