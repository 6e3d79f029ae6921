//! # Picking Classification
//!
//! A delivered picking is exported as a shipment. When every ordered
//! quantity went out the shipment is `complete` and the remote platform is
//! asked to ship everything; otherwise it is `partial` and only the delivered
//! quantities are sent, keyed by remote order item id.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Tolerance when comparing done and ordered quantities.
const QTY_EPSILON: f64 = 1e-6;

/// How a done picking relates to the order it ships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickingMethod {
    Complete,
    Partial,
}

impl PickingMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PickingMethod::Complete => "complete",
            PickingMethod::Partial => "partial",
        }
    }
}

impl fmt::Display for PickingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PickingMethod {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "complete" => Ok(PickingMethod::Complete),
            "partial" => Ok(PickingMethod::Partial),
            other => Err(CoreError::invalid(
                "picking_method",
                format!("'{}' (valid options: complete, partial)", other),
            )),
        }
    }
}

/// One move line of a picking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PickingLine {
    /// Remote id of the order item this line delivers.
    pub order_item_id: String,

    pub ordered_qty: f64,

    #[serde(default)]
    pub done_qty: f64,
}

impl PickingLine {
    pub fn new(order_item_id: impl Into<String>, ordered_qty: f64, done_qty: f64) -> Self {
        PickingLine {
            order_item_id: order_item_id.into(),
            ordered_qty,
            done_qty,
        }
    }

    fn is_fulfilled(&self) -> bool {
        self.done_qty + QTY_EPSILON >= self.ordered_qty
    }
}

/// Classifies a done picking.
pub fn classify(lines: &[PickingLine]) -> PickingMethod {
    if lines.iter().all(PickingLine::is_fulfilled) {
        PickingMethod::Complete
    } else {
        PickingMethod::Partial
    }
}

/// Items argument of the shipment creation call.
///
/// Empty for a complete picking (the platform ships everything).
pub fn shipment_items(method: PickingMethod, lines: &[PickingLine]) -> BTreeMap<String, f64> {
    match method {
        PickingMethod::Complete => BTreeMap::new(),
        PickingMethod::Partial => {
            let mut items = BTreeMap::new();
            for line in lines.iter().filter(|l| l.done_qty > QTY_EPSILON) {
                *items.entry(line.order_item_id.clone()).or_insert(0.0) += line.done_qty;
            }
            items
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_lines_one_fulfilled_is_partial() {
        let lines = vec![
            PickingLine::new("543", 1.0, 1.0),
            PickingLine::new("544", 1.0, 0.0),
        ];
        assert_eq!(classify(&lines), PickingMethod::Partial);

        let items = shipment_items(PickingMethod::Partial, &lines);
        assert_eq!(items.len(), 1);
        assert_eq!(items.get("543"), Some(&1.0));
    }

    #[test]
    fn test_all_fulfilled_is_complete_with_empty_items() {
        let lines = vec![
            PickingLine::new("543", 1.0, 1.0),
            PickingLine::new("544", 2.0, 2.0),
        ];
        assert_eq!(classify(&lines), PickingMethod::Complete);
        assert!(shipment_items(PickingMethod::Complete, &lines).is_empty());
    }

    #[test]
    fn test_no_lines_is_complete() {
        assert_eq!(classify(&[]), PickingMethod::Complete);
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("partial".parse::<PickingMethod>().unwrap(), PickingMethod::Partial);
        assert!("half".parse::<PickingMethod>().is_err());
    }
}
