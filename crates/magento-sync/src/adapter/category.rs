//! Category hierarchy listing.

use serde_json::Value;
use tracing::{debug, instrument};

use magento_core::category::CategoryTree;
use magento_core::EntityKind;

use super::{AdapterStrategy, MagentoAdapter};
use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteCall;

impl MagentoAdapter {
    /// Fetches the whole category forest.
    #[instrument(skip(self))]
    pub async fn tree(&self) -> SyncResult<CategoryTree> {
        if self.kind != EntityKind::ProductCategory {
            return Err(SyncError::InvalidConfig(format!(
                "category tree requested from a {} adapter",
                self.kind
            )));
        }

        let tree = match self.strategy {
            AdapterStrategy::V1_7 => {
                let answer = self
                    .call(RemoteCall::positional("catalog_category.tree", Vec::new()), None)
                    .await?;
                CategoryTree::from_v1_value(&answer)?
            }
            AdapterStrategy::V2_0 => {
                let answer = self
                    .call(RemoteCall::get("categories", Default::default()), None)
                    .await?;
                if answer == Value::Null {
                    CategoryTree::default()
                } else {
                    CategoryTree::from_v2_value(&answer)?
                }
            }
        };

        debug!(nodes = tree.len(), "Category tree fetched");
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMagento;
    use magento_core::ExternalId;
    use serde_json::json;

    #[tokio::test]
    async fn test_v1_tree() {
        let fake = FakeMagento::new();
        fake.respond(
            "catalog_category.tree",
            json!({"category_id": "1", "children": [
                {"category_id": "2", "children": [{"category_id": "3", "children": []}]}
            ]}),
        );
        let adapter =
            MagentoAdapter::new(fake.api(), AdapterStrategy::V1_7, EntityKind::ProductCategory);

        let tree = adapter.tree().await.unwrap();
        let ids: Vec<ExternalId> = tree.walk().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["1".into(), "2".into(), "3".into()]);
    }

    #[tokio::test]
    async fn test_v2_tree() {
        let fake = FakeMagento::new();
        fake.respond(
            "categories",
            json!({"id": 1, "children_data": [{"id": 2, "children_data": []}]}),
        );
        let adapter =
            MagentoAdapter::new(fake.api(), AdapterStrategy::V2_0, EntityKind::ProductCategory);

        assert_eq!(adapter.tree().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_tree_needs_category_adapter() {
        let fake = FakeMagento::new();
        let adapter = MagentoAdapter::new(fake.api(), AdapterStrategy::V1_7, EntityKind::Product);
        assert!(adapter.tree().await.is_err());
        assert!(fake.calls().is_empty());
    }
}
