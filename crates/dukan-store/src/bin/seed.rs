//! # Seed Data Generator
//!
//! Populates a local cache with sample variant products for development.
//!
//! ## Usage
//! ```bash
//! # 60 products for shop "main" (default)
//! cargo run -p dukan-store --bin seed
//!
//! # Custom amount, shop and database
//! cargo run -p dukan-store --bin seed -- --count 200 --shop north --db ./data/dukan.db
//! ```
//!
//! ## Generated Products
//! Cycles through the four stock shapes so every reservation branch has
//! data to work against:
//! - flat quantity
//! - bare sizes
//! - flat colors
//! - colors with sizes

use std::env;
use std::sync::Arc;

use dukan_core::inventory::recompute_aggregate;
use dukan_core::validation::{validate_code, validate_shop};
use dukan_core::{CacheEntry, Color, EntityKind, Product, Size, PRODUCT_TYPE};
use dukan_store::{CacheStore, ChangeNotifier, SqliteStorage, StorageConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Sample garments: (code prefix, name).
const GARMENTS: &[(&str, &str)] = &[
    ("SHR", "قميص قطن"),
    ("TSH", "تيشيرت"),
    ("PNT", "بنطلون جينز"),
    ("DRS", "فستان"),
    ("JKT", "جاكيت"),
    ("SCF", "إيشارب"),
];

const COLORS: &[&str] = &["أحمر", "أزرق", "أسود", "أبيض"];

const SIZES: &[&str] = &["S", "M", "L", "XL"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut count: usize = 60;
    let mut db_path = String::from("./dukan_dev.db");
    let mut shop = String::from("main");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(60);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--shop" | "-s" => {
                if i + 1 < args.len() {
                    shop = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Dukan Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>     Number of products to generate (default: 60)");
                println!("  -s, --shop <SHOP>   Shop to seed (default: main)");
                println!("  -d, --db <PATH>     Database file path (default: ./dukan_dev.db)");
                println!("  -h, --help          Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    validate_shop(&shop)?;

    println!("🌱 Dukan Seed Data Generator");
    println!("============================");
    println!("Database: {}", db_path);
    println!("Shop:     {}", shop);
    println!("Products: {}", count);
    println!();

    let storage = SqliteStorage::new(StorageConfig::new(&db_path)).await?;
    let cache = CacheStore::new(Arc::new(storage), ChangeNotifier::default());

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = cache.entries_for_shop(EntityKind::Products, &shop).await?;
    if !existing.is_empty() {
        println!("⚠ Shop '{}' already has {} cached products", shop, existing.len());
        println!("  Skipping seed to avoid duplicates.");
        return Ok(());
    }

    let start = std::time::Instant::now();
    let mut entries = Vec::with_capacity(count);
    for seed in 0..count {
        let product = generate_product(&shop, seed);
        validate_code(&product.code)?;
        entries.push(CacheEntry::confirmed(product.to_record()?));
    }
    cache
        .replace_all(EntityKind::Products, &shop, entries)
        .await?;

    let elapsed = start.elapsed();
    info!(shop = %shop, count, "Seeded products");
    println!();
    println!("✓ Generated {} products in {:?}", count, elapsed);
    println!("✓ Seed complete!");

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dukan=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Generates one product; the stock shape cycles with `seed`.
fn generate_product(shop: &str, seed: usize) -> Product {
    let (prefix, name) = GARMENTS[seed % GARMENTS.len()];
    let stock = 1 + (seed * 7 % 12) as i64;

    let mut product = Product {
        id: Some(Uuid::new_v4().to_string()),
        shop: shop.to_string(),
        code: format!("{}-{:04}", prefix, seed),
        name: name.to_string(),
        product_type: Some(PRODUCT_TYPE.to_string()),
        buy_price: Some(50.0 + (seed % 10) as f64 * 5.0),
        sell_price: Some(90.0 + (seed % 10) as f64 * 10.0),
        ..Default::default()
    };

    match seed % 4 {
        0 => {}
        1 => {
            product.sizes = SIZES.iter().map(|size| Size::new(*size, stock)).collect();
        }
        2 => {
            product.colors = COLORS
                .iter()
                .take(2)
                .map(|color| Color::flat(*color, stock))
                .collect();
        }
        _ => {
            product.colors = COLORS
                .iter()
                .take(3)
                .map(|color| {
                    Color::sized(
                        *color,
                        SIZES.iter().take(3).map(|size| Size::new(*size, stock)).collect(),
                    )
                })
                .collect();
        }
    }

    product.quantity = recompute_aggregate(&product.colors, &product.sizes, stock);
    product
}
