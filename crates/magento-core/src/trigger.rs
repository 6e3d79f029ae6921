//! # Invoice Export Trigger
//!
//! Decides whether a local invoice state change should produce an export.
//!
//! ## Decision Table
//! ```text
//! ┌──────────────┬──────────────────────────────┬─────────────────────────┐
//! │ trigger      │ invoice validated (posted)   │ invoice paid            │
//! ├──────────────┼──────────────────────────────┼─────────────────────────┤
//! │ open         │ export                       │ already bound → skip    │
//! │ paid         │ no                           │ export                  │
//! └──────────────┴──────────────────────────────┴─────────────────────────┘
//! ```
//! The rule looks at the invoice *state*, not at which transition fired:
//! a paid invoice is still posted, so under `open` the paid event matches
//! again and the existing binding is what prevents a second export.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::InvoiceTrigger;

/// Accounting state of a local invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceState {
    Draft,
    Posted,
    Cancel,
}

/// Payment state of a local invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    NotPaid,
    InPayment,
    Partial,
    Paid,
    /// Cancelled by a credit note.
    Reversed,
    /// Imported from a previous accounting; never exported.
    InvoicingLegacy,
}

/// Local invoice transitions the connector listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceTransition {
    Validated,
    Paid,
}

impl fmt::Display for InvoiceTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvoiceTransition::Validated => write!(f, "validated"),
            InvoiceTransition::Paid => write!(f, "paid"),
        }
    }
}

/// Snapshot of an invoice's state at the time an event fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceStatus {
    pub state: InvoiceState,
    pub payment_state: PaymentState,
}

impl InvoiceStatus {
    pub fn new(state: InvoiceState, payment_state: PaymentState) -> Self {
        InvoiceStatus {
            state,
            payment_state,
        }
    }
}

impl InvoiceTrigger {
    /// Whether an invoice in `status` satisfies this trigger.
    pub fn matches(&self, status: &InvoiceStatus) -> bool {
        match self {
            InvoiceTrigger::Paid => status.payment_state == PaymentState::Paid,
            InvoiceTrigger::Open => status.state == InvoiceState::Posted,
        }
    }
}

/// Resolves the effective trigger.
///
/// The record-specific override wins, then the store setting, then the
/// backend-wide default.
pub fn resolve_invoice_trigger(
    payment_mode: Option<InvoiceTrigger>,
    store: Option<InvoiceTrigger>,
    backend_default: InvoiceTrigger,
) -> InvoiceTrigger {
    payment_mode.or(store).unwrap_or(backend_default)
}
