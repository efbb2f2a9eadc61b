//! Shopify stream registry
//!
//! The registration table of every stream the tap knows. Descriptors are
//! built from [`RegistryOptions`] so page size and start date flow into
//! the pagination strategies.

use crate::context::{ConditionalContext, FieldContext};
use crate::error::Result;
use crate::pagination::{BookmarkFilter, CursorTokenPaginator, PathTemplatePaginator};
use crate::record::DecimalFields;
use crate::stream::{StreamDescriptor, StreamGraph};

/// Monetary fields of an order coerced to exact decimals
pub const ORDER_DECIMAL_FIELDS: &[&str] = &[
    "subtotal_price",
    "total_price",
    "total_discounts",
    "total_line_items_price",
    "total_tax",
    "total_outstanding",
    "current_subtotal_price",
    "current_total_discounts",
    "current_total_price",
    "current_total_tax",
];

/// Options shaping the registered descriptors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryOptions {
    /// Records per page for list endpoints
    pub page_size: u32,
    /// Lower bound for `updated_at` streams without a bookmark
    pub start_date: Option<String>,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            page_size: crate::config::MAX_PAGE_SIZE,
            start_date: None,
        }
    }
}

impl RegistryOptions {
    /// Set the page size
    #[must_use]
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the start date
    #[must_use]
    pub fn with_start_date(mut self, start_date: impl Into<String>) -> Self {
        self.start_date = Some(start_date.into());
        self
    }

    fn list(&self) -> CursorTokenPaginator {
        CursorTokenPaginator::shopify(self.page_size)
    }

    fn updated_since(&self) -> CursorTokenPaginator {
        self.list()
            .with_filter(BookmarkFilter::updated_at_min(self.start_date.clone()))
    }
}

/// All Shopify streams, parents before children
pub fn shopify_streams(options: &RegistryOptions) -> Vec<StreamDescriptor> {
    let metafields = StreamDescriptor::new("metafields", "/metafields.json", "$.metafields[*]")
        .with_replication_key("updated_at")
        .with_pagination(options.updated_since());

    let order_metafields = metafields
        .reuse_as(
            "order_metafields",
            "/orders/{order_id}/metafields.json",
            Some("orders"),
        )
        .ignoring_parent_replication_key();

    vec![
        StreamDescriptor::new("abandoned_checkouts", "/checkouts.json", "$.checkouts[*]")
            .with_replication_key("updated_at")
            .with_pagination(options.updated_since()),
        // Collects have no updated_at filter; ids only grow
        StreamDescriptor::new("collects", "/collects.json", "$.collects[*]")
            .with_replication_key("id")
            .with_pagination(options.list().with_filter(BookmarkFilter::since_id())),
        StreamDescriptor::new(
            "custom_collections",
            "/custom_collections.json",
            "$.custom_collections[*]",
        )
        .with_replication_key("updated_at")
        .with_pagination(options.updated_since()),
        StreamDescriptor::new("customers", "/customers.json", "$.customers[*]")
            .with_replication_key("updated_at")
            .with_pagination(options.updated_since()),
        StreamDescriptor::new("locations", "/locations.json", "$.locations[*]")
            .with_pagination(options.list())
            .with_context_rule(FieldContext::new("location_id", "id")),
        StreamDescriptor::new(
            "inventory_levels",
            "/inventory_levels.json",
            "$.inventory_levels[*]",
        )
        .with_primary_key(["inventory_item_id"])
        .with_parent("locations")
        .with_pagination(options.list().with_context_param("location_ids", "location_id"))
        .with_context_rule(FieldContext::new("inventory_item_id", "inventory_item_id")),
        StreamDescriptor::new(
            "inventory_items",
            "/inventory_items/{inventory_item_id}.json",
            "$.inventory_item",
        )
        .with_parent("inventory_levels"),
        metafields,
        StreamDescriptor::new("orders", "/orders.json", "$.orders[*]")
            .with_replication_key("updated_at")
            .with_pagination(
                options
                    .updated_since()
                    .with_first_page_param("status", "any"),
            )
            .with_normalizer(DecimalFields::new(ORDER_DECIMAL_FIELDS.iter().copied()))
            .with_context_rule(ConditionalContext::when_decimals_differ(
                "current_total_price",
                "total_price",
                FieldContext::new("order_id", "id"),
            )),
        StreamDescriptor::new("refunds", "/orders/{order_id}/refunds.json", "$.refunds[*]")
            .with_replication_key("created_at")
            .with_parent("orders")
            .with_pagination(PathTemplatePaginator::new().follow_shopify()),
        order_metafields,
        StreamDescriptor::new("products", "/products.json", "$.products[*]")
            .with_replication_key("updated_at")
            .with_pagination(options.updated_since()),
        StreamDescriptor::new(
            "transactions",
            "/orders/{order_id}/transactions.json",
            "$.transactions[*]",
        )
        .with_parent("orders"),
        StreamDescriptor::new("users", "/users.json", "$.users[*]").with_pagination(options.list()),
    ]
}

/// The validated Shopify stream graph
pub fn shopify_graph(options: &RegistryOptions) -> Result<StreamGraph> {
    StreamGraph::new(shopify_streams(options))
}
