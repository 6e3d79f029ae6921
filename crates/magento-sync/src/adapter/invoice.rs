//! Remote invoice creation.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::{info, instrument};

use magento_core::{EntityKind, ExternalId};

use super::{AdapterStrategy, MagentoAdapter};
use crate::error::SyncResult;
use crate::remote::RemoteCall;

impl MagentoAdapter {
    /// Invoices a remote order.
    ///
    /// `items` maps remote order item ids to quantities; an empty map
    /// invoices the whole order. A missing order is reported as
    /// `RecordNotFound` for the sale order.
    #[instrument(skip(self, items, comment))]
    pub async fn create_invoice(
        &self,
        order_id: &ExternalId,
        items: &BTreeMap<String, f64>,
        comment: &str,
        email: bool,
        include_comment: bool,
    ) -> SyncResult<ExternalId> {
        let call = match self.strategy {
            AdapterStrategy::V1_7 => RemoteCall::positional(
                "sales_order_invoice.create",
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
                    .map(|(item, qty)| json!({"orderItemId": item, "qty": qty}))
                    .collect();
                RemoteCall::post(
                    format!("order/{}/invoice", order_id),
                    json!({
                        "capture": false,
                        "items": lines,
                        "notify": email,
                        "comment": {"comment": comment, "isVisibleOnFront": 0},
                        "appendComment": include_comment,
                    }),
                )
            }
        };

        let answer = self.call_about(call, EntityKind::SaleOrder, order_id).await?;
        let invoice_id = self.returned_id(&answer, "entity_id")?;
        info!(order = %order_id, invoice = %invoice_id, "Remote invoice created");
        Ok(invoice_id)
    }
}
