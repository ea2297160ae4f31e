//! # Stock Service
//!
//! Cart-driven stock movements: reserve when a line is added, restore when
//! it is removed. The arithmetic lives in `dukan_core::inventory`; this
//! module fetches products and persists the results through the offline
//! writer.
//!
//! ## Reservation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  reserve(shop, product, selector, qty)                                 │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  fetch: local cache ──miss──► remote point read (when online)          │
//! │       │                                                   │ miss        │
//! │       ▼                                                   ▼             │
//! │  plan_reservation ──InsufficientStock──►  ReserveOutcome::NotFound     │
//! │       │                  │                                              │
//! │       │                  ▼                                              │
//! │       │        ReserveOutcome::InsufficientStock { available }         │
//! │       ▼                                                                 │
//! │  aggregate ≤ 0 ? ──yes──► writer.delete  ──► SoldOut { line }          │
//! │       │ no                                                              │
//! │       ▼                                                                 │
//! │  writer.update(quantity + touched arrays) ──► Reserved { line, .. }    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Restoration Flow
//! ```text
//!   no product reference ──► Skipped
//!   product by id, else by code ──found──► apply_restoration ──► Restored
//!                                 └─none──► recreate from line ──► Recreated
//!   any error ──► logged, Failed
//! ```

use std::sync::Arc;

use dukan_core::inventory::{apply_restoration, plan_reservation, recreate_from_cart_line};
use dukan_core::validation::{validate_reference, validate_shop};
use dukan_core::{
    same_shop, CacheEntry, CartLine, CoreError, EntityKind, Product, VariantSelector,
};
use serde_json::{Map, Value};
use tracing::{debug, error, info};

use crate::connectivity::Connectivity;
use crate::error::{SyncError, SyncResult};
use crate::outbox::OfflineWriter;
use crate::remote::{QueryFilter, RemoteStore};

// =============================================================================
// Outcomes
// =============================================================================

/// Result of adding a line to the cart.
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    /// Stock was reserved; `remaining` is the product's new aggregate.
    Reserved { line: CartLine, remaining: i64 },
    /// The reservation took the last units and the product was deleted.
    SoldOut { line: CartLine },
    NotFound,
    InsufficientStock { available: i64 },
    Failed { reason: String },
}

impl ReserveOutcome {
    /// The cart line when stock was taken.
    pub fn line(&self) -> Option<&CartLine> {
        match self {
            ReserveOutcome::Reserved { line, .. } | ReserveOutcome::SoldOut { line } => Some(line),
            _ => None,
        }
    }

    pub fn is_reserved(&self) -> bool {
        self.line().is_some()
    }
}

/// Result of returning a line's stock.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    /// The line had no originating product.
    Skipped,
    /// Stock was added back; `quantity` is the product's new aggregate.
    Restored { quantity: i64 },
    /// The product had been deleted and was rebuilt from the line.
    Recreated { id: String },
    Failed { reason: String },
}

// =============================================================================
// Stock Service
// =============================================================================

/// Reserves and restores product stock.
pub struct StockService {
    writer: Arc<OfflineWriter>,
    remote: Arc<dyn RemoteStore>,
    connectivity: Arc<Connectivity>,
}

impl StockService {
    pub fn new(
        writer: Arc<OfflineWriter>,
        remote: Arc<dyn RemoteStore>,
        connectivity: Arc<Connectivity>,
    ) -> Self {
        StockService {
            writer,
            remote,
            connectivity,
        }
    }

    /// Reserves `quantity` units of `selector` from the product answering to
    /// `product_ref`. Never partially reserves.
    pub async fn reserve(
        &self,
        shop: &str,
        product_ref: &str,
        selector: &VariantSelector,
        quantity: i64,
    ) -> ReserveOutcome {
        match self.try_reserve(shop, product_ref, selector, quantity).await {
            Ok(outcome) => outcome,
            Err(SyncError::Core(CoreError::ProductNotFound(_))) => ReserveOutcome::NotFound,
            Err(SyncError::Core(CoreError::InsufficientStock { available, .. })) => {
                debug!(product = %product_ref, selector = %selector, quantity, available, "Insufficient stock");
                ReserveOutcome::InsufficientStock { available }
            }
            Err(err) => {
                error!(product = %product_ref, selector = %selector, error = %err, "Reservation failed");
                ReserveOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Returns a cart line's stock to its product. Never fails: errors are
    /// logged and reported as [`RestoreOutcome::Failed`].
    pub async fn restore(&self, line: &CartLine, shop: &str) -> RestoreOutcome {
        let Some(product_ref) = line.product_id.as_deref().filter(|id| !id.trim().is_empty())
        else {
            debug!(line = %line.line_id, "Cart line has no product; nothing to restore");
            return RestoreOutcome::Skipped;
        };

        match self.try_restore(line, shop, product_ref).await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(line = %line.line_id, product = %product_ref, error = %err, "Restoration failed");
                RestoreOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }

    async fn try_reserve(
        &self,
        shop: &str,
        product_ref: &str,
        selector: &VariantSelector,
        quantity: i64,
    ) -> SyncResult<ReserveOutcome> {
        validate_shop(shop)?;
        validate_reference(product_ref)?;

        let product = self
            .fetch(shop, product_ref)
            .await?
            .ok_or_else(|| CoreError::ProductNotFound(product_ref.to_string()))?;
        let plan = plan_reservation(&product, selector, quantity)?;
        let line = CartLine::from_product(&product, selector, quantity);
        let reference = product.reference().unwrap_or(product_ref).to_string();

        if plan.deletes_product() {
            self.writer
                .delete(EntityKind::Products, shop, &reference)
                .await?;
            info!(shop = %shop, product = %reference, code = %product.code, "Product sold out; deleted");
            return Ok(ReserveOutcome::SoldOut { line });
        }

        self.writer
            .update(EntityKind::Products, shop, &reference, plan.patch()?)
            .await?;
        debug!(product = %reference, selector = %selector, quantity, remaining = plan.quantity, "Stock reserved");
        Ok(ReserveOutcome::Reserved {
            line,
            remaining: plan.quantity,
        })
    }

    async fn try_restore(
        &self,
        line: &CartLine,
        shop: &str,
        product_ref: &str,
    ) -> SyncResult<RestoreOutcome> {
        validate_shop(shop)?;

        let existing = match self.fetch(shop, product_ref).await? {
            Some(product) => Some(product),
            None => self.find_by_code(shop, &line.code).await?,
        };

        let Some(mut product) = existing else {
            let product = recreate_from_cart_line(line, shop);
            let record = product.to_record()?;
            let ack = self
                .writer
                .add(EntityKind::Products, shop, record.fields)
                .await?;
            info!(shop = %shop, code = %line.code, id = %ack.id, "Product recreated from cart line");
            return Ok(RestoreOutcome::Recreated { id: ack.id });
        };

        let selector = line.selector();
        let reference = product.reference().unwrap_or(product_ref).to_string();
        apply_restoration(&mut product, &selector, line.quantity)?;

        self.writer
            .update(
                EntityKind::Products,
                shop,
                &reference,
                restoration_patch(&product, &selector)?,
            )
            .await?;
        debug!(product = %reference, selector = %selector, quantity = line.quantity, "Stock restored");
        Ok(RestoreOutcome::Restored {
            quantity: product.quantity,
        })
    }

    /// Local cache first, then a remote point read when online.
    ///
    /// A product found remotely is cached so the follow-up write can find it.
    async fn fetch(&self, shop: &str, product_ref: &str) -> SyncResult<Option<Product>> {
        let cache = self.writer.cache();
        if let Some(entry) = cache.find(EntityKind::Products, shop, product_ref).await? {
            return Ok(Some(Product::from_record(&entry.record)?));
        }
        if !self.connectivity.is_online() {
            return Ok(None);
        }

        match self.remote.get(EntityKind::Products, product_ref).await? {
            Some(record) if same_shop(&record, shop) => {
                cache
                    .upsert(EntityKind::Products, CacheEntry::confirmed(record.clone()))
                    .await?;
                Ok(Some(Product::from_record(&record)?))
            }
            _ => Ok(None),
        }
    }

    async fn find_by_code(&self, shop: &str, code: &str) -> SyncResult<Option<Product>> {
        if code.trim().is_empty() {
            return Ok(None);
        }

        let cache = self.writer.cache();
        if let Some(entry) = cache
            .find_by(EntityKind::Products, shop, |r| r.get_str("code") == Some(code))
            .await?
        {
            return Ok(Some(Product::from_record(&entry.record)?));
        }
        if !self.connectivity.is_online() {
            return Ok(None);
        }

        let filter = QueryFilter::for_kind(EntityKind::Products, shop).with("code", code);
        let Some(record) = self
            .remote
            .query(EntityKind::Products, &filter)
            .await?
            .into_iter()
            .next()
        else {
            return Ok(None);
        };
        cache
            .upsert(EntityKind::Products, CacheEntry::confirmed(record.clone()))
            .await?;
        Ok(Some(Product::from_record(&record)?))
    }
}

/// Quantity plus the variant arrays a restoration touched.
fn restoration_patch(product: &Product, selector: &VariantSelector) -> SyncResult<Map<String, Value>> {
    let mut patch = Map::new();
    patch.insert("quantity".to_string(), Value::from(product.quantity));
    match selector {
        VariantSelector::Whole => {}
        VariantSelector::Size(_) => {
            patch.insert("sizes".to_string(), serde_json::to_value(&product.sizes)?);
        }
        VariantSelector::Color(_) | VariantSelector::ColorSize { .. } => {
            patch.insert("colors".to_string(), serde_json::to_value(&product.colors)?);
        }
    }
    Ok(patch)
}

// =============================================================================
// Cart Session
// =============================================================================

/// Cart lines of one checkout session.
///
/// Adding reserves, removing restores. Lines are never persisted.
pub struct CartSession {
    shop: String,
    stock: Arc<StockService>,
    lines: Vec<CartLine>,
}

impl CartSession {
    pub fn new(shop: impl Into<String>, stock: Arc<StockService>) -> Self {
        CartSession {
            shop: shop.into(),
            stock,
            lines: Vec::new(),
        }
    }

    pub fn shop(&self) -> &str {
        &self.shop
    }

    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Sum of sell price × quantity.
    pub fn total(&self) -> f64 {
        self.lines
            .iter()
            .map(|l| l.sell_price.unwrap_or(0.0) * l.quantity as f64)
            .sum()
    }

    /// Reserves stock and, on success, adds the line.
    pub async fn add(
        &mut self,
        product_ref: &str,
        selector: VariantSelector,
        quantity: i64,
    ) -> ReserveOutcome {
        let outcome = self
            .stock
            .reserve(&self.shop, product_ref, &selector, quantity)
            .await;
        if let Some(line) = outcome.line() {
            self.lines.push(line.clone());
        }
        outcome
    }

    /// Removes a line and restores its stock. `None` for an unknown line.
    pub async fn remove(&mut self, line_id: &str) -> Option<RestoreOutcome> {
        let position = self.lines.iter().position(|l| l.line_id == line_id)?;
        let line = self.lines.remove(position);
        Some(self.stock.restore(&line, &self.shop).await)
    }

    /// Removes every line, restoring newest first.
    pub async fn clear(&mut self) -> Vec<RestoreOutcome> {
        let mut outcomes = Vec::with_capacity(self.lines.len());
        while let Some(line) = self.lines.pop() {
            outcomes.push(self.stock.restore(&line, &self.shop).await);
        }
        outcomes
    }

    /// Ends the session keeping the reservations. Returns the sold lines.
    pub fn checkout(&mut self) -> Vec<CartLine> {
        let lines = std::mem::take(&mut self.lines);
        info!(shop = %self.shop, lines = lines.len(), total = lines.iter().map(|l| l.quantity).sum::<i64>(), "Checkout");
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemote;
    use dukan_core::Record;
    use dukan_store::{CacheStore, ChangeNotifier, MemoryStorage};
    use serde_json::json;

    struct Fixture {
        stock: Arc<StockService>,
        cache: Arc<CacheStore>,
        storage: Arc<MemoryStorage>,
        remote: Arc<MemoryRemote>,
    }

    fn fixture(online: bool) -> Fixture {
        let notifier = ChangeNotifier::default();
        let storage = Arc::new(MemoryStorage::new());
        let cache = Arc::new(CacheStore::new(storage.clone(), notifier.clone()));
        let remote = Arc::new(MemoryRemote::new());
        let connectivity = Arc::new(Connectivity::new(online, notifier));
        let writer = Arc::new(OfflineWriter::new(cache.clone(), remote.clone(), connectivity.clone()));
        Fixture {
            stock: Arc::new(StockService::new(writer, remote.clone(), connectivity)),
            cache,
            storage,
            remote,
        }
    }

    fn product_record(id: &str, value: Value) -> Record {
        let mut product: Product = serde_json::from_value(value).unwrap();
        product.shop = "main".to_string();
        product.product_type = Some("product".to_string());
        product.to_record().unwrap().with_id(id)
    }

    async fn put(f: &Fixture, id: &str, value: Value) {
        f.cache
            .upsert(EntityKind::Products, CacheEntry::confirmed(product_record(id, value)))
            .await
            .unwrap();
    }

    async fn product(f: &Fixture, reference: &str) -> Option<Product> {
        f.cache
            .find(EntityKind::Products, "main", reference)
            .await
            .unwrap()
            .map(|e| Product::from_record(&e.record).unwrap())
    }

    fn red_m(qty: i64) -> Value {
        json!({
            "code": "A1",
            "name": "Shirt",
            "quantity": 10,
            "sellPrice": 25.0,
            "colors": [{ "color": "red", "sizes": [{ "size": "M", "qty": qty }] }]
        })
    }

    fn red(size: &str) -> VariantSelector {
        VariantSelector::from_parts(Some("red"), Some(size))
    }

    #[tokio::test]
    async fn test_reserving_last_units_deletes_product() {
        let f = fixture(false);
        put(&f, "p1", red_m(3)).await;

        let outcome = f.stock.reserve("main", "p1", &red("M"), 3).await;
        assert!(matches!(outcome, ReserveOutcome::SoldOut { .. }));
        assert!(product(&f, "p1").await.is_none());
    }

    #[tokio::test]
    async fn test_insufficient_stock_leaves_product_unchanged() {
        let f = fixture(false);
        put(&f, "p1", red_m(5)).await;
        let before = product(&f, "p1").await;

        let outcome = f.stock.reserve("main", "p1", &red("M"), 7).await;
        assert_eq!(outcome, ReserveOutcome::InsufficientStock { available: 5 });
        assert_eq!(product(&f, "p1").await, before);
    }

    #[tokio::test]
    async fn test_unknown_product() {
        let f = fixture(false);
        let outcome = f.stock.reserve("main", "ghost", &VariantSelector::Whole, 1).await;
        assert_eq!(outcome, ReserveOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_invalid_quantity_fails() {
        let f = fixture(false);
        put(&f, "p1", red_m(5)).await;
        let outcome = f.stock.reserve("main", "p1", &red("M"), 0).await;
        assert!(matches!(outcome, ReserveOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_reserve_then_restore_round_trips() {
        let f = fixture(false);
        put(
            &f,
            "p1",
            json!({
                "code": "A1",
                "quantity": 7,
                "colors": [{ "color": "red", "sizes": [{ "size": "M", "qty": 5 }, { "size": "L", "qty": 2 }] }]
            }),
        )
        .await;

        let outcome = f.stock.reserve("main", "p1", &red("M"), 2).await;
        let line = match outcome {
            ReserveOutcome::Reserved { line, remaining } => {
                assert_eq!(remaining, 5);
                line
            }
            other => panic!("unexpected outcome {:?}", other),
        };
        let reserved = product(&f, "p1").await.unwrap();
        assert_eq!(reserved.quantity, 5);

        let restored = f.stock.restore(&line, "main").await;
        assert_eq!(restored, RestoreOutcome::Restored { quantity: 7 });

        let after = product(&f, "p1").await.unwrap();
        let sizes = match &after.color("red").unwrap().stock {
            dukan_core::ColorStock::Sized(sizes) => sizes.clone(),
            other => panic!("unexpected stock {:?}", other),
        };
        assert_eq!(sizes.iter().find(|s| s.size == "M").unwrap().qty, 5);
        assert_eq!(sizes.iter().find(|s| s.size == "L").unwrap().qty, 2);
    }

    #[tokio::test]
    async fn test_restore_recreates_sold_out_product() {
        let f = fixture(false);
        put(&f, "p1", json!({ "code": "B2", "name": "Scarf", "quantity": 2, "sellPrice": 40.0 })).await;

        let outcome = f.stock.reserve("main", "p1", &VariantSelector::Whole, 2).await;
        let line = outcome.line().cloned().unwrap();
        assert!(matches!(outcome, ReserveOutcome::SoldOut { .. }));

        let restored = f.stock.restore(&line, "main").await;
        let id = match restored {
            RestoreOutcome::Recreated { id } => id,
            other => panic!("unexpected outcome {:?}", other),
        };

        let recreated = product(&f, &id).await.unwrap();
        assert_eq!(recreated.code, "B2");
        assert_eq!(recreated.quantity, 2);
        assert_eq!(recreated.sell_price, Some(40.0));
        assert!(recreated.is_saleable());
    }

    #[tokio::test]
    async fn test_restore_without_product_is_skipped() {
        let f = fixture(false);
        let line = CartLine {
            line_id: "l1".into(),
            product_id: None,
            code: "A1".into(),
            name: "Shirt".into(),
            color: None,
            size: None,
            quantity: 1,
            buy_price: None,
            sell_price: None,
        };
        assert_eq!(f.stock.restore(&line, "main").await, RestoreOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_restore_falls_back_to_code() {
        let f = fixture(false);
        put(&f, "p2", json!({ "code": "A1", "quantity": 4 })).await;
        let line = CartLine {
            line_id: "l1".into(),
            product_id: Some("old-id".into()),
            code: "A1".into(),
            name: "Shirt".into(),
            color: None,
            size: None,
            quantity: 3,
            buy_price: None,
            sell_price: None,
        };

        assert_eq!(
            f.stock.restore(&line, "main").await,
            RestoreOutcome::Restored { quantity: 7 }
        );
    }

    #[tokio::test]
    async fn test_restore_failure_is_reported() {
        let f = fixture(false);
        put(&f, "p1", json!({ "code": "A1", "quantity": 4 })).await;
        let outcome = f.stock.reserve("main", "p1", &VariantSelector::Whole, 1).await;
        let line = outcome.line().cloned().unwrap();

        f.storage.fail_writes(true);
        assert!(matches!(
            f.stock.restore(&line, "main").await,
            RestoreOutcome::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_online_reserve_reads_remote() {
        let f = fixture(true);
        f.remote.seed(EntityKind::Products, [product_record("p9", json!({ "code": "C3", "quantity": 6 }))]);

        let outcome = f.stock.reserve("main", "p9", &VariantSelector::Whole, 2).await;
        assert!(matches!(outcome, ReserveOutcome::Reserved { remaining: 4, .. }));

        let remote = f.remote.records(EntityKind::Products);
        assert_eq!(remote[0].get("quantity"), Some(&json!(4)));
    }

    #[tokio::test]
    async fn test_cart_session_lifecycle() {
        let f = fixture(false);
        put(&f, "p1", json!({ "code": "A1", "quantity": 5, "sellPrice": 10.0 })).await;
        put(&f, "p2", json!({ "code": "B1", "quantity": 3, "sellPrice": 4.0 })).await;

        let mut cart = CartSession::new("main", f.stock.clone());
        assert!(cart.add("p1", VariantSelector::Whole, 2).await.is_reserved());
        assert!(cart.add("p2", VariantSelector::Whole, 1).await.is_reserved());
        assert!(!cart.add("p2", VariantSelector::Whole, 9).await.is_reserved());
        assert_eq!(cart.lines().len(), 2);
        assert_eq!(cart.total(), 24.0);

        let first = cart.lines()[0].line_id.clone();
        assert_eq!(
            cart.remove(&first).await,
            Some(RestoreOutcome::Restored { quantity: 5 })
        );
        assert!(cart.remove("missing").await.is_none());

        let sold = cart.checkout();
        assert_eq!(sold.len(), 1);
        assert!(cart.is_empty());
        assert_eq!(product(&f, "p2").await.unwrap().quantity, 2);
    }

    #[tokio::test]
    async fn test_cart_clear_restores_everything() {
        let f = fixture(false);
        put(&f, "p1", json!({ "code": "A1", "quantity": 5 })).await;

        let mut cart = CartSession::new("main", f.stock.clone());
        cart.add("p1", VariantSelector::Whole, 2).await;
        cart.add("p1", VariantSelector::Whole, 3).await;
        assert!(product(&f, "p1").await.is_none());

        let outcomes = cart.clear().await;
        assert_eq!(outcomes.len(), 2);
        assert!(cart.is_empty());

        let restored = f
            .cache
            .find_by(EntityKind::Products, "main", |r| r.get_str("code") == Some("A1"))
            .await
            .unwrap()
            .map(|e| Product::from_record(&e.record).unwrap())
            .unwrap();
        assert_eq!(restored.quantity, 5);
    }
}
