use serde::{Deserialize, Serialize};

pub type DriverId = i64;
pub type RestaurantId = i64;

/// Status as the server spells it. Values this client never sets are kept
/// verbatim so a profile re-serializes unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum DriverStatus {
    #[default]
    Ready,
    PickingUp,
    Other(String),
}

impl DriverStatus {
    pub fn as_str(&self) -> &str {
        match self {
            DriverStatus::Ready => "READY",
            DriverStatus::PickingUp => "PICKING_UP",
            DriverStatus::Other(raw) => raw,
        }
    }
}

impl From<String> for DriverStatus {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "READY" => DriverStatus::Ready,
            "PICKING_UP" => DriverStatus::PickingUp,
            _ => DriverStatus::Other(raw),
        }
    }
}

impl From<DriverStatus> for String {
    fn from(status: DriverStatus) -> Self {
        match status {
            DriverStatus::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Driver {
    pub driver_id: DriverId,
    #[serde(default)]
    pub driver_full_name: String,
    #[serde(default)]
    pub driver_phone: String,
    #[serde(default)]
    pub driver_city: String,
    #[serde(default)]
    pub driver_type: String,
    #[serde(default)]
    pub driver_status: DriverStatus,
    #[serde(rename = "is_baned", default)]
    pub is_banned: bool,
    #[serde(default)]
    pub stationed_at: Option<RestaurantId>,
    #[serde(default)]
    pub id_number: String,
    #[serde(default)]
    pub plate_number: String,
    #[serde(default)]
    pub license_photo: String,
    #[serde(default)]
    pub rate: Option<f64>,
    #[serde(default)]
    pub created_at: String,
}

impl Driver {
    /// Minimal profile, mostly useful for tests and offline tooling.
    pub fn with_id(driver_id: DriverId) -> Self {
        Self {
            driver_id,
            driver_full_name: String::new(),
            driver_phone: String::new(),
            driver_city: String::new(),
            driver_type: String::new(),
            driver_status: DriverStatus::Ready,
            is_banned: false,
            stationed_at: None,
            id_number: String::new(),
            plate_number: String::new(),
            license_photo: String::new(),
            rate: None,
            created_at: String::new(),
        }
    }
}
