//! # Seed Data Generator
//!
//! Populates the database with demo products and serialized units.
//!
//! ## Usage
//! ```bash
//! # 12 units per serialized product (default)
//! cargo run -p keystock-db --bin seed
//!
//! # Custom unit count and database path
//! cargo run -p keystock-db --bin seed -- --units 40 --db ./data/keystock.db
//!
//! # Plant one of every auditor finding
//! cargo run -p keystock-db --bin seed -- --with-drift
//! ```
//!
//! ## Generated Data
//! - Serialized products (phones, laptops, tablets) with units in mixed states
//! - Non-serialized accessories with a direct stock figure
//! - Registry barcodes for every entity that needs one
//!
//! ## `--with-drift`
//! Writes around the coordinator to leave one of each condition the
//! auditor looks for: stock drift, a missing unit barcode, an inconsistent
//! serialized flag, a stale registry entry and an orphaned unit.

use chrono::Utc;
use std::env;
use tracing_subscriber::EnvFilter;

use keystock_core::{
    BarcodeEntry, Ean13Symbology, EntityType, Metadata, Product, ProductAttrs, Symbology, Unit,
    UnitAttrs, UnitStatus,
};
use keystock_db::repository::barcode::BARCODE_KEY;
use keystock_db::repository::generate_id;
use keystock_db::{Database, DbConfig, DbError};

/// Serialized catalog: (brand, model, category, price cents)
const SERIALIZED: &[(&str, &str, &str, i64)] = &[
    ("Acme", "X1", "phones", 49_900),
    ("Acme", "X1 Pro", "phones", 69_900),
    ("Northwind", "Book 14", "laptops", 119_900),
    ("Northwind", "Book 16", "laptops", 149_900),
    ("Contoso", "Slate 11", "tablets", 39_900),
];

/// Accessory catalog: (brand, model, category, price cents, stock)
const ACCESSORIES: &[(&str, &str, &str, i64, i64)] = &[
    ("Acme", "USB-C Cable 1m", "accessories", 1_499, 120),
    ("Acme", "65W Charger", "accessories", 3_999, 45),
    ("Contoso", "Slate Sleeve", "accessories", 2_499, 18),
];

const COLORS: &[&str] = &["black", "silver", "blue", "green"];
const STORAGE: &[i32] = &[128, 256, 512];

/// Barcode allocation attempts before giving up on an entity.
const MAX_ATTEMPTS: u32 = 8;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut units_per_product: usize = 12;
    let mut db_path = String::from("./keystock_dev.db");
    let mut with_drift = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--units" | "-u" => {
                if i + 1 < args.len() {
                    units_per_product = args[i + 1].parse().unwrap_or(12);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--with-drift" => with_drift = true,
            "--help" | "-h" => {
                println!("keystock Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -u, --units <N>    Units per serialized product (default: 12)");
                println!("  -d, --db <PATH>    Database file path (default: ./keystock_dev.db)");
                println!("      --with-drift   Plant one of every integrity finding");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 keystock Seed Data Generator");
    println!("===============================");
    println!("Database: {}", db_path);
    println!("Units per serialized product: {}", units_per_product);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.products().count().await?;
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let symbology = Ean13Symbology::default();
    let start = std::time::Instant::now();
    let mut serialized_ids = Vec::new();
    let mut accessory_ids = Vec::new();
    let mut unit_total = 0;

    println!();
    println!("Generating serialized products...");
    for (p_idx, (brand, model, category, price)) in SERIALIZED.iter().enumerate() {
        let attrs = ProductAttrs {
            has_serialized_units: true,
            threshold: 3,
            price_cents: Some(*price),
            min_price_cents: Some(price * 90 / 100),
            max_price_cents: Some(price * 110 / 100),
            category: Some(category.to_string()),
            supplier: Some("Demo Distribution".to_string()),
            year: Some(2024),
            ..ProductAttrs::default()
        };
        let product = Product::from_attrs(generate_id(), brand, model, &attrs, Utc::now());
        db.products().insert(&product).await?;

        for u_idx in 0..units_per_product {
            let unit = generate_unit(&product.id, p_idx, u_idx);
            db.units().insert(&unit).await?;
            register(&db, &symbology, EntityType::Unit, &unit.id).await?;
            unit_total += 1;
        }

        db.products().recompute_stock(&product.id).await?;
        serialized_ids.push(product.id);
    }
    println!("  ✓ {} products, {} units", SERIALIZED.len(), unit_total);

    println!("Generating accessories...");
    for (brand, model, category, price, stock) in ACCESSORIES {
        let attrs = ProductAttrs {
            stock: *stock,
            threshold: 10,
            price_cents: Some(*price),
            category: Some(category.to_string()),
            ..ProductAttrs::default()
        };
        let product = Product::from_attrs(generate_id(), brand, model, &attrs, Utc::now());
        db.products().insert(&product).await?;
        register(&db, &symbology, EntityType::Product, &product.id).await?;
        accessory_ids.push(product.id);
    }
    println!("  ✓ {} accessories", ACCESSORIES.len());

    if with_drift {
        println!();
        println!("Planting drift...");
        plant_drift(&db, &serialized_ids, &accessory_ids).await?;
    }

    println!();
    println!("✓ Seed complete in {:?}", start.elapsed());
    println!("  Registry entries: {}", db.barcodes().count().await?);

    db.close().await;
    Ok(())
}

/// Builds a unit with varied attributes and status.
fn generate_unit(product_id: &str, p_idx: usize, u_idx: usize) -> Unit {
    let seed = p_idx * 1000 + u_idx;
    let attrs = UnitAttrs {
        color: Some(COLORS[seed % COLORS.len()].to_string()),
        storage_gb: Some(STORAGE[seed % STORAGE.len()]),
        ram_gb: Some(8),
        battery_level: Some(80 + (seed % 21) as i32),
        supplier_id: Some("SUP-DEMO".to_string()),
        purchase_cost_cents: Some(20_000 + (seed as i64 % 50) * 100),
        ..UnitAttrs::default()
    };

    let serial = format!("SN{:02}{:05}", p_idx, u_idx);
    let mut unit = Unit::from_attrs(generate_id(), product_id, &serial, &attrs, Utc::now());

    // Roughly one in five sold, one in ten reserved, one in twenty damaged
    unit.status = match seed % 20 {
        0..=3 => UnitStatus::Sold,
        4 | 5 => UnitStatus::Reserved,
        6 => UnitStatus::Damaged,
        _ => UnitStatus::Available,
    };
    unit
}

/// Registers a barcode for an entity and mirrors it onto the entity row.
async fn register(
    db: &Database,
    symbology: &Ean13Symbology,
    entity_type: EntityType,
    entity_id: &str,
) -> Result<String, DbError> {
    for attempt in 0..MAX_ATTEMPTS {
        let entry = BarcodeEntry {
            barcode: symbology.encode(entity_id, attempt),
            entity_type,
            entity_id: entity_id.to_string(),
            format: symbology.format().to_string(),
            metadata: Metadata::default(),
            created_at: Utc::now(),
        };

        match db.barcodes().insert(&entry).await {
            Ok(()) => {
                match entity_type {
                    EntityType::Product => db.products().set_barcode(entity_id, Some(&entry.barcode)).await?,
                    EntityType::Unit => db.units().set_barcode(entity_id, Some(&entry.barcode)).await?,
                }
                return Ok(entry.barcode);
            }
            Err(e) if e.violates(BARCODE_KEY) => continue,
            Err(e) => return Err(e),
        }
    }

    Err(DbError::QueryFailed(format!(
        "no free barcode for {} {} after {} attempts",
        entity_type, entity_id, MAX_ATTEMPTS
    )))
}

/// Writes one of each integrity finding around the coordinator.
async fn plant_drift(
    db: &Database,
    serialized_ids: &[String],
    accessory_ids: &[String],
) -> Result<(), Box<dyn std::error::Error>> {
    let (Some(serialized), Some(accessory)) = (serialized_ids.first(), accessory_ids.first()) else {
        return Ok(());
    };

    // Stock drift: stored stock no longer matches available units
    sqlx::query("UPDATE products SET stock = stock + 3 WHERE id = ?1")
        .bind(serialized)
        .execute(db.pool())
        .await?;
    println!("  ✓ stock drift on {}", serialized);

    // Missing barcode: unit inserted without a registry entry
    let bare = Unit::from_attrs(generate_id(), serialized, "SN-NO-BARCODE", &UnitAttrs::default(), Utc::now());
    db.units().insert(&bare).await?;
    println!("  ✓ unit {} without barcode", bare.id);

    // Inconsistent flag: non-serialized product that owns a unit
    let stray = Unit::from_attrs(generate_id(), accessory, "SN-STRAY", &UnitAttrs::default(), Utc::now());
    db.units().insert(&stray).await?;
    println!("  ✓ accessory {} owns a unit", accessory);

    // Stale barcode: entry for an entity that never existed
    let ghost = generate_id();
    let symbology = Ean13Symbology::default();
    db.barcodes()
        .insert(&BarcodeEntry {
            barcode: symbology.encode(&ghost, 0),
            entity_type: EntityType::Unit,
            entity_id: ghost.clone(),
            format: symbology.format().to_string(),
            metadata: Metadata::default(),
            created_at: Utc::now(),
        })
        .await?;
    println!("  ✓ stale registry entry for {}", ghost);

    // Orphaned unit: foreign keys off on one connection
    let mut conn = db.pool().acquire().await?;
    sqlx::query("PRAGMA foreign_keys = OFF").execute(&mut *conn).await?;
    let orphan = Unit::from_attrs(generate_id(), "deleted-product", "SN-ORPHAN", &UnitAttrs::default(), Utc::now());
    sqlx::query(
        r#"
        INSERT INTO units (id, product_id, serial_number, status, created_at, updated_at)
        VALUES (?1, ?2, ?3, 'available', ?4, ?4)
        "#,
    )
    .bind(&orphan.id)
    .bind(&orphan.product_id)
    .bind(&orphan.serial_number)
    .bind(orphan.created_at)
    .execute(&mut *conn)
    .await?;
    sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
    println!("  ✓ orphaned unit {}", orphan.id);

    Ok(())
}
