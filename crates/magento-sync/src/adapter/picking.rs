//! Remote shipments and tracking numbers.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::{info, instrument};

use magento_core::{EntityKind, ExternalId};

use super::{AdapterStrategy, MagentoAdapter};
use crate::error::SyncResult;
use crate::remote::RemoteCall;

impl MagentoAdapter {
    /// Ships a remote order. An empty `items` map ships everything.
    #[instrument(skip(self, items, comment))]
    pub async fn create_shipment(
        &self,
        order_id: &ExternalId,
        items: &BTreeMap<String, f64>,
        comment: &str,
        email: bool,
        include_comment: bool,
    ) -> SyncResult<ExternalId> {
        let call = match self.strategy {
            AdapterStrategy::V1_7 => RemoteCall::positional(
                "sales_order_shipment.create",
                vec![
                    json!(order_id.as_str()),
                    json!(items),
                    json!(comment),
                    json!(email),
                    json!(include_comment),
                ],
            ),
            AdapterStrategy::V2_0 => {
                let lines: Vec<Value> = items
                    .iter()
                    .map(|(item, qty)| json!({"order_item_id": item, "qty": qty}))
                    .collect();
                RemoteCall::post(
                    format!("order/{}/ship", order_id),
                    json!({
                        "items": lines,
                        "notify": email,
                        "appendComment": include_comment,
                        "comment": {"comment": comment, "is_visible_on_front": 0},
                    }),
                )
            }
        };

        let answer = self.call_about(call, EntityKind::SaleOrder, order_id).await?;
        let shipment_id = self.returned_id(&answer, "entity_id")?;
        info!(order = %order_id, shipment = %shipment_id, "Remote shipment created");
        Ok(shipment_id)
    }

    /// Carrier codes the remote order accepts.
    ///
    /// 2.0 has no such listing and accepts any code; it returns `None`.
    #[instrument(skip(self))]
    pub async fn get_carriers(&self, order_id: &ExternalId) -> SyncResult<Option<Vec<String>>> {
        match self.strategy {
            AdapterStrategy::V1_7 => {
                let call = RemoteCall::positional(
                    "sales_order_shipment.getCarriers",
                    vec![json!(order_id.as_str())],
                );
                let answer = self.call_about(call, EntityKind::SaleOrder, order_id).await?;
                let codes = match answer {
                    Value::Object(map) => map.keys().cloned().collect(),
                    Value::Array(items) => items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                    _ => Vec::new(),
                };
                Ok(Some(codes))
            }
            AdapterStrategy::V2_0 => Ok(None),
        }
    }

    /// Attaches a tracking number to a remote shipment.
    #[instrument(skip(self))]
    pub async fn add_tracking(
        &self,
        shipment_id: &ExternalId,
        order_id: &ExternalId,
        carrier_code: &str,
        title: &str,
        number: &str,
    ) -> SyncResult<()> {
        let call = match self.strategy {
            AdapterStrategy::V1_7 => RemoteCall::positional(
                "sales_order_shipment.addTrack",
                vec![
                    json!(shipment_id.as_str()),
                    json!(carrier_code),
                    json!(title),
                    json!(number),
                ],
            ),
            AdapterStrategy::V2_0 => RemoteCall::post(
                "shipment/track",
                json!({"entity": {
                    "parent_id": shipment_id.as_str(),
                    "order_id": order_id.as_str(),
                    "track_number": number,
                    "title": title,
                    "carrier_code": carrier_code,
                }}),
            ),
        };

        self.call_about(call, EntityKind::Picking, shipment_id).await?;
        info!(shipment = %shipment_id, carrier = carrier_code, "Tracking number sent");
        Ok(())
    }
}
