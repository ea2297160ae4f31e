//! # Inventory Quantity Engine
//!
//! Variant-aware stock math. Everything here is pure: the stock service in
//! `dukan-sync` fetches the product, asks this module what the new variant
//! structure should be, and writes the result through the offline queue.
//!
//! ## Reservation Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  plan_reservation(product, selector, q)                 │
//! │                                                                         │
//! │  validate q ──► available_quantity(product, selector)                   │
//! │                        │                                                │
//! │            q > available? ──yes──► Err(InsufficientStock{available})    │
//! │                        │ no                                             │
//! │                        ▼                                                │
//! │  decrement the selected branch, drop entries that reach 0               │
//! │                        │                                                │
//! │                        ▼                                                │
//! │  recompute_aggregate(colors, sizes, fallback)                           │
//! │                        │                                                │
//! │                        ▼                                                │
//! │  StockPlan { quantity, colors?, sizes? }                                │
//! │     quantity ≤ 0  ──► delete the product                                │
//! │     otherwise     ──► patch { quantity, <touched arrays> }              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Aggregate Rule
//! `quantity` mirrors whichever variant structure is populated. When a
//! product carries both colors and bare sizes with positive stock the
//! aggregate is the larger of the two sums, never their total.

use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::product::{CartLine, Color, ColorStock, Product, Size, VariantSelector};
use crate::validation::validate_quantity;
use crate::{DEFAULT_SIZE_LABEL, PRODUCT_TYPE};

// =============================================================================
// Availability
// =============================================================================

/// Stock available for `selector`, never negative.
///
/// Only the exact branch named by the selector is consulted: a flat color
/// cannot satisfy a sized query and a bare size never looks inside colors.
pub fn available_quantity(product: &Product, selector: &VariantSelector) -> i64 {
    let raw = match selector {
        VariantSelector::Whole => product.quantity,
        VariantSelector::Size(size) => product.size(size).map_or(0, |s| s.qty),
        VariantSelector::Color(color) => product.color(color).map_or(0, Color::total),
        VariantSelector::ColorSize { color, size } => match product.color(color) {
            Some(Color {
                stock: ColorStock::Sized(sizes),
                ..
            }) => sizes.iter().find(|s| &s.size == size).map_or(0, |s| s.qty),
            _ => 0,
        },
    };
    raw.max(0)
}

/// Recomputes the aggregate quantity from the variant structure.
///
/// Returns `fallback` when neither colors nor sizes hold positive stock.
pub fn recompute_aggregate(colors: &[Color], sizes: &[Size], fallback: i64) -> i64 {
    let colors_sum: i64 = colors.iter().map(Color::total).sum();
    let sizes_sum: i64 = sizes.iter().map(|s| s.qty).sum();

    match (colors_sum > 0, sizes_sum > 0) {
        (true, true) => colors_sum.max(sizes_sum),
        (true, false) => colors_sum,
        (false, true) => sizes_sum,
        (false, false) => fallback,
    }
}

// =============================================================================
// Stock Plan
// =============================================================================

/// The new stock state of a product after a reservation.
///
/// `colors` / `sizes` are `Some` only for the arrays the reservation touched,
/// so the resulting patch never clobbers untouched variant data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockPlan {
    pub quantity: i64,
    pub colors: Option<Vec<Color>>,
    pub sizes: Option<Vec<Size>>,
}

impl StockPlan {
    /// True when the product is out of stock and must be removed.
    pub fn deletes_product(&self) -> bool {
        self.quantity <= 0
    }

    /// Partial update holding the quantity and the touched arrays.
    pub fn patch(&self) -> serde_json::Result<Map<String, Value>> {
        let mut patch = Map::new();
        patch.insert("quantity".to_string(), Value::from(self.quantity));
        if let Some(colors) = &self.colors {
            patch.insert("colors".to_string(), serde_json::to_value(colors)?);
        }
        if let Some(sizes) = &self.sizes {
            patch.insert("sizes".to_string(), serde_json::to_value(sizes)?);
        }
        Ok(patch)
    }

    /// Applies the plan to an in-memory product.
    pub fn apply_to(&self, product: &mut Product) {
        product.quantity = self.quantity;
        if let Some(colors) = &self.colors {
            product.colors = colors.clone();
        }
        if let Some(sizes) = &self.sizes {
            product.sizes = sizes.clone();
        }
    }
}

// =============================================================================
// Reservation
// =============================================================================

/// Plans the reservation of `quantity` units of `selector`.
///
/// `Whole` only moves stock on flat products. When the product tracks colors
/// or sizes the aggregate is recomputed from those untouched arrays, so the
/// plan reports the same quantity as before; reserve a specific variant to
/// take stock from such a product.
///
/// ## Errors
/// - `Validation` when `quantity` is not positive
/// - `InsufficientStock` when `quantity` exceeds the available stock; the
///   product is left untouched
pub fn plan_reservation(
    product: &Product,
    selector: &VariantSelector,
    quantity: i64,
) -> CoreResult<StockPlan> {
    validate_quantity(quantity)?;

    let available = available_quantity(product, selector);
    if quantity > available {
        return Err(CoreError::InsufficientStock {
            code: product.code.clone(),
            available,
            requested: quantity,
        });
    }

    let mut colors = product.colors.clone();
    let mut sizes = product.sizes.clone();
    let mut colors_touched = false;
    let mut sizes_touched = false;

    match selector {
        VariantSelector::Whole => {}
        VariantSelector::Size(size) => {
            take_from_size(&mut sizes, size, quantity);
            sizes_touched = true;
        }
        VariantSelector::Color(color) => {
            if let Some(idx) = colors.iter().position(|c| &c.color == color) {
                match &mut colors[idx].stock {
                    ColorStock::Flat(current) => *current = (*current - quantity).max(0),
                    ColorStock::Sized(color_sizes) => take_first_fit(color_sizes, quantity),
                }
                drop_if_empty(&mut colors, idx);
            }
            colors_touched = true;
        }
        VariantSelector::ColorSize { color, size } => {
            if let Some(idx) = colors.iter().position(|c| &c.color == color) {
                if let ColorStock::Sized(color_sizes) = &mut colors[idx].stock {
                    take_from_size(color_sizes, size, quantity);
                }
                drop_if_empty(&mut colors, idx);
            }
            colors_touched = true;
        }
    }

    let fallback = match selector {
        VariantSelector::Whole => product.quantity - quantity,
        _ => 0,
    };
    let aggregate = recompute_aggregate(&colors, &sizes, fallback);

    Ok(StockPlan {
        quantity: aggregate,
        colors: colors_touched.then_some(colors),
        sizes: sizes_touched.then_some(sizes),
    })
}

fn take_from_size(sizes: &mut Vec<Size>, name: &str, quantity: i64) {
    if let Some(entry) = sizes.iter_mut().find(|s| s.size == name) {
        entry.qty = (entry.qty - quantity).max(0);
    }
    sizes.retain(|s| s.qty > 0);
}

/// Consumes `quantity` from sizes in array order.
fn take_first_fit(sizes: &mut Vec<Size>, mut quantity: i64) {
    for entry in sizes.iter_mut() {
        if quantity == 0 {
            break;
        }
        let taken = entry.qty.max(0).min(quantity);
        entry.qty -= taken;
        quantity -= taken;
    }
    sizes.retain(|s| s.qty > 0);
}

fn drop_if_empty(colors: &mut Vec<Color>, idx: usize) {
    let empty = match &colors[idx].stock {
        ColorStock::Flat(quantity) => *quantity <= 0,
        ColorStock::Sized(sizes) => sizes.is_empty(),
    };
    if empty {
        colors.remove(idx);
    }
}

// =============================================================================
// Restoration
// =============================================================================

/// Adds `quantity` units of `selector` back into `product`.
///
/// Missing color and size entries are created rather than rejected. The
/// aggregate is recomputed afterwards.
pub fn apply_restoration(
    product: &mut Product,
    selector: &VariantSelector,
    quantity: i64,
) -> CoreResult<()> {
    validate_quantity(quantity)?;

    match selector {
        VariantSelector::Whole => {}
        VariantSelector::Size(size) => add_to_size(&mut product.sizes, size, quantity),
        VariantSelector::Color(color) => match product.colors.iter_mut().find(|c| &c.color == color) {
            Some(entry) => match &mut entry.stock {
                ColorStock::Flat(current) => *current += quantity,
                ColorStock::Sized(sizes) => add_to_size(sizes, DEFAULT_SIZE_LABEL, quantity),
            },
            None => product.colors.push(Color::flat(color.clone(), quantity)),
        },
        VariantSelector::ColorSize { color, size } => {
            match product.colors.iter_mut().find(|c| &c.color == color) {
                Some(entry) => {
                    if let ColorStock::Flat(current) = entry.stock {
                        let carried = if current > 0 {
                            vec![Size::new(DEFAULT_SIZE_LABEL, current)]
                        } else {
                            Vec::new()
                        };
                        entry.stock = ColorStock::Sized(carried);
                    }
                    if let ColorStock::Sized(sizes) = &mut entry.stock {
                        add_to_size(sizes, size, quantity);
                    }
                }
                None => product
                    .colors
                    .push(Color::sized(color.clone(), vec![Size::new(size.clone(), quantity)])),
            }
        }
    }

    let fallback = match selector {
        VariantSelector::Whole => product.quantity + quantity,
        _ => product.quantity,
    };
    product.quantity = recompute_aggregate(&product.colors, &product.sizes, fallback);
    Ok(())
}

fn add_to_size(sizes: &mut Vec<Size>, name: &str, quantity: i64) {
    match sizes.iter_mut().find(|s| s.size == name) {
        Some(entry) => entry.qty += quantity,
        None => sizes.push(Size::new(name, quantity)),
    }
}

/// Rebuilds a product deleted at zero stock from the cart line snapshot.
///
/// A color captured without a size is seeded under [`DEFAULT_SIZE_LABEL`].
pub fn recreate_from_cart_line(line: &CartLine, shop: &str) -> Product {
    let quantity = line.quantity;
    let mut product = Product {
        shop: shop.to_string(),
        code: line.code.clone(),
        name: line.name.clone(),
        product_type: Some(PRODUCT_TYPE.to_string()),
        quantity,
        buy_price: line.buy_price,
        sell_price: line.sell_price,
        ..Default::default()
    };

    match line.selector() {
        VariantSelector::Whole => {}
        VariantSelector::Size(size) => product.sizes = vec![Size::new(size, quantity)],
        VariantSelector::Color(color) => {
            product.colors = vec![Color::sized(
                color,
                vec![Size::new(DEFAULT_SIZE_LABEL, quantity)],
            )]
        }
        VariantSelector::ColorSize { color, size } => {
            product.colors = vec![Color::sized(color, vec![Size::new(size, quantity)])]
        }
    }
    product
}

// =============================================================================
// Unit Tests
// =============================================================================
