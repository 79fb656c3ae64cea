//! Both write paths racing on the same natural keys.

mod common;

use std::collections::HashSet;

use keystock_core::{EntityType, ProductAttrs, Source, UnitAttrs};
use keystock_coord::{ProductSubmission, UnitSubmission};

use common::TempDb;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_product_resolution_creates_one_row() {
    let file = TempDb::new();
    let supplier = file.coordinator().await;
    let inventory = file.coordinator().await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let coordinator = if i % 2 == 0 { supplier.clone() } else { inventory.clone() };
        let source = if i % 2 == 0 { Source::Supplier } else { Source::Inventory };
        tasks.push(tokio::spawn(async move {
            let ctx = coordinator.context(source);
            coordinator
                .resolve_product(&ctx, "Acme", "X1", &ProductAttrs::serialized())
                .await
        }));
    }

    let mut ids = HashSet::new();
    let mut created = 0;
    for task in tasks {
        let (product, was_created) = task.await.unwrap().unwrap();
        ids.insert(product.id);
        if was_created {
            created += 1;
        }
    }

    assert_eq!(ids.len(), 1);
    assert_eq!(created, 1);
    assert_eq!(supplier.database().products().count().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_unit_resolution_creates_one_unit() {
    let file = TempDb::new();
    let supplier = file.coordinator().await;
    let inventory = file.coordinator().await;

    let ctx = supplier.context(Source::Supplier);
    let (product, _) = supplier
        .resolve_product(&ctx, "Acme", "X1", &ProductAttrs::serialized())
        .await
        .unwrap();

    let supplier_ctx = supplier.context(Source::Supplier);
    let inventory_ctx = inventory.context(Source::Inventory);
    let unit_attrs = UnitAttrs::default();
    let (a, b) = tokio::join!(
        supplier.resolve_unit(&supplier_ctx, &product.id, "SN1", &unit_attrs),
        inventory.resolve_unit(&inventory_ctx, &product.id, "SN1", &unit_attrs),
    );
    let (a, a_created) = a.unwrap();
    let (b, b_created) = b.unwrap();

    assert_eq!(a.id, b.id);
    assert!(a_created ^ b_created);

    let db = supplier.database();
    assert_eq!(db.units().count().await.unwrap(), 1);
    assert_eq!(db.barcodes().count().await.unwrap(), 1);
    assert_eq!(common::stock_and_available(db, &product.id).await, (1, 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_intakes_converge() {
    let file = TempDb::new();
    let supplier = file.coordinator().await;
    let inventory = file.coordinator().await;

    let submission = |serials: &[&str]| ProductSubmission {
        brand: "Acme".into(),
        model: "X1".into(),
        attrs: ProductAttrs::default(),
        units: serials
            .iter()
            .map(|s| UnitSubmission {
                serial_number: s.to_string(),
                attrs: UnitAttrs::default(),
            })
            .collect(),
    };
    let delivery = submission(&["SN1", "SN2", "SN3", "SN4", "SN5"]);
    let recount = submission(&["SN3", "SN4", "SN5", "SN6", "SN7", "SN8"]);

    let supplier_ctx = supplier.context(Source::Supplier);
    let inventory_ctx = inventory.context(Source::Inventory);
    let (a, b) = tokio::join!(
        supplier.intake(&supplier_ctx, &delivery),
        inventory.intake(&inventory_ctx, &recount),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.product.id, b.product.id);
    assert!(a.is_complete() && b.is_complete());
    assert_eq!(a.created_count + b.created_count, 8);
    assert_eq!(a.existing_count + b.existing_count, 3);

    let db = supplier.database();
    assert_eq!(db.units().count().await.unwrap(), 8);
    assert_eq!(common::stock_and_available(db, &a.product.id).await, (8, 8));

    let ctx = supplier.context(Source::Admin);
    assert!(supplier.scan(&ctx).await.unwrap().is_clean());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_allocations_never_share_a_value() {
    let file = TempDb::new();
    let supplier = file.coordinator().await;
    let inventory = file.coordinator().await;

    let ctx = supplier.context(Source::Supplier);
    let (product, _) = supplier
        .resolve_product(&ctx, "Acme", "X1", &ProductAttrs::serialized())
        .await
        .unwrap();

    // Units without barcodes, allocated below from both paths at once
    let db = supplier.database().clone();
    let mut unit_ids = Vec::new();
    for i in 0..12 {
        unit_ids.push(common::raw_unit(&db, &product.id, &format!("SN{}", i)).await.id);
    }

    let mut tasks = Vec::new();
    for (i, unit_id) in unit_ids.iter().enumerate() {
        for coordinator in [supplier.clone(), inventory.clone()] {
            let unit_id = unit_id.clone();
            let source = if i % 2 == 0 { Source::Supplier } else { Source::Inventory };
            tasks.push(tokio::spawn(async move {
                let ctx = coordinator.context(source);
                let barcode = coordinator
                    .allocate(&ctx, EntityType::Unit, &unit_id, None)
                    .await
                    .unwrap();
                (unit_id, barcode)
            }));
        }
    }

    let mut by_unit = std::collections::HashMap::new();
    for task in tasks {
        let (unit_id, barcode) = task.await.unwrap();
        // Both calls for one unit return the same value
        let previous = by_unit.insert(unit_id, barcode.clone());
        if let Some(previous) = previous {
            assert_eq!(previous, barcode);
        }
    }

    let values: HashSet<&String> = by_unit.values().collect();
    assert_eq!(values.len(), unit_ids.len());
    assert_eq!(db.barcodes().count().await.unwrap(), unit_ids.len() as i64);

    for (unit_id, barcode) in &by_unit {
        let entry = db.barcodes().lookup(barcode).await.unwrap().unwrap();
        assert_eq!(&entry.entity_id, unit_id);
    }
}
