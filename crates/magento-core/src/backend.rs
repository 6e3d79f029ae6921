//! # Backend Configuration Types
//!
//! Operator-managed settings for one remote platform instance, plus the
//! per-record policy objects (payment modes) that can override them.
//!
//! ## Setting Precedence for Invoice Export
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Payment mode `create_invoice_on`     (record-specific override)    │
//! │  2. Store `create_invoice_on`            (store the order came from)   │
//! │  3. Backend `create_invoice_on`          (backend-wide default)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{BackendId, EntityKind, ExternalId};

// =============================================================================
// API Version
// =============================================================================

/// Remote API generation. Selects the payload shape of every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ApiVersion {
    /// Positional RPC (`catalog_category.info`, `sales_order_invoice.create`).
    #[serde(rename = "1.7")]
    V1_7,

    /// REST (`GET categories/{id}`, `POST order/{id}/invoice`).
    #[default]
    #[serde(rename = "2.0")]
    V2_0,
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiVersion::V1_7 => write!(f, "1.7"),
            ApiVersion::V2_0 => write!(f, "2.0"),
        }
    }
}

impl FromStr for ApiVersion {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.7" => Ok(ApiVersion::V1_7),
            "2.0" => Ok(ApiVersion::V2_0),
            other => Err(CoreError::UnknownVersion(other.to_string())),
        }
    }
}

// =============================================================================
// Invoice Trigger
// =============================================================================

/// When a local invoice is pushed to the remote platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceTrigger {
    /// Export once the invoice is fully paid.
    #[default]
    Paid,

    /// Export as soon as the invoice is validated (posted).
    Open,
}

impl fmt::Display for InvoiceTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvoiceTrigger::Paid => write!(f, "paid"),
            InvoiceTrigger::Open => write!(f, "open"),
        }
    }
}

impl FromStr for InvoiceTrigger {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "paid" => Ok(InvoiceTrigger::Paid),
            "open" | "validated" | "posted" => Ok(InvoiceTrigger::Open),
            other => Err(CoreError::invalid(
                "create_invoice_on",
                format!("'{}' (valid options: paid, open)", other),
            )),
        }
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// API user credentials. The password never appears in `Debug` output.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,

    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Store / Storeview / Payment Mode
// =============================================================================

/// Settings of one remote store (a sales channel of the backend).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Store id on the remote platform.
    pub id: ExternalId,

    #[serde(default)]
    pub name: String,

    /// Overrides the backend default when set.
    #[serde(default)]
    pub create_invoice_on: Option<InvoiceTrigger>,

    /// Ask the platform to email the customer when a shipment is created.
    #[serde(default)]
    pub send_picking_done_mail: bool,

    /// Ask the platform to email the customer when an invoice is created.
    #[serde(default)]
    pub send_invoice_paid_mail: bool,
}

/// A storeview whose translated values are imported into the local record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreviewSettings {
    /// Storeview id on the remote platform.
    pub id: ExternalId,

    /// Storeview code (`default`, `fr`, ...).
    #[serde(default)]
    pub code: String,

    /// Local language the translated values are stored under (`fr_FR`).
    pub lang: String,
}

/// Per payment method policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentModePolicy {
    /// Payment method code as it appears on remote orders (`checkmo`).
    pub name: String,

    #[serde(default)]
    pub create_invoice_on: Option<InvoiceTrigger>,
}

// =============================================================================
// Backend Configuration
// =============================================================================

/// Configuration for one remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub id: BackendId,

    #[serde(default)]
    pub name: String,

    /// Base URL of the remote platform.
    pub location: String,

    #[serde(default)]
    pub credentials: Credentials,

    #[serde(default)]
    pub version: ApiVersion,

    /// Backend-wide default for invoice export.
    #[serde(default)]
    pub create_invoice_on: InvoiceTrigger,

    #[serde(default)]
    pub stores: Vec<StoreSettings>,

    #[serde(default)]
    pub storeviews: Vec<StoreviewSettings>,

    /// Lower bound of the next category batch import.
    #[serde(default)]
    pub import_categories_from_date: Option<DateTime<Utc>>,

    #[serde(default)]
    pub import_products_from_date: Option<DateTime<Utc>>,

    #[serde(default)]
    pub import_partners_from_date: Option<DateTime<Utc>>,
}

impl BackendConfig {
    /// Creates a configuration with defaults for everything but id and URL.
    pub fn new(id: impl Into<String>, location: impl Into<String>, version: ApiVersion) -> Self {
        BackendConfig {
            id: BackendId::new(id),
            name: String::new(),
            location: location.into(),
            credentials: Credentials::default(),
            version,
            create_invoice_on: InvoiceTrigger::default(),
            stores: Vec::new(),
            storeviews: Vec::new(),
            import_categories_from_date: None,
            import_products_from_date: None,
            import_partners_from_date: None,
        }
    }

    /// Looks up a store by remote id.
    pub fn store(&self, store_id: &ExternalId) -> Option<&StoreSettings> {
        self.stores.iter().find(|s| &s.id == store_id)
    }

    /// Store-level invoice trigger, falling back to the backend default.
    pub fn store_invoice_trigger(&self, store_id: Option<&ExternalId>) -> InvoiceTrigger {
        store_id
            .and_then(|id| self.store(id))
            .and_then(|s| s.create_invoice_on)
            .unwrap_or(self.create_invoice_on)
    }

    /// Start of the import window configured for a kind, if any.
    pub fn import_from_date(&self, kind: EntityKind) -> Option<DateTime<Utc>> {
        match kind {
            EntityKind::ProductCategory => self.import_categories_from_date,
            EntityKind::Product => self.import_products_from_date,
            EntityKind::Partner => self.import_partners_from_date,
            _ => None,
        }
    }
}
