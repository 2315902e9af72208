use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{Duration, Utc};
use gemledger_core::{
    Carats, Money, PacketId, ReferenceId, SourceDocumentId, SourceItemId, WarehouseId,
};
use gemledger_infra::{
    AllocateRequest, AllocationLine, EngineConfig, InMemoryInventoryEngine, PostReceipt,
    ReceiptLine, SplitRequest,
};
use gemledger_inventory::{
    CostSource, LayerId, LayerStack, NewPacketSpec, PacketTarget, Provenance, ProvenanceKind,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// A stack of `layers` receipt layers of 1.000 ct each at rising prices.
fn stack_with(layers: u64) -> LayerStack {
    let mut stack = LayerStack::new(PacketId::new(), WarehouseId::new());
    let t0 = Utc::now();
    let provenance = Provenance {
        kind: ProvenanceKind::Receipt,
        reference: ReferenceId::new(),
        source_item_id: SourceItemId::new(),
        parent_layer: None,
    };
    for i in 0..layers {
        stack
            .produce(
                LayerId(i + 1),
                Carats::new(dec!(1)),
                Money::new(Decimal::from(100 + i)),
                provenance.clone(),
                t0 + Duration::seconds(i as i64),
            )
            .unwrap();
    }
    stack
}

/// Consume that has to walk half the stack.
fn bench_layer_consume(c: &mut Criterion) {
    let mut group = c.benchmark_group("fifo_consume");

    for layers in [8u64, 64, 512] {
        group.throughput(Throughput::Elements(layers / 2));
        group.bench_with_input(BenchmarkId::from_parameter(layers), &layers, |b, &layers| {
            let stack = stack_with(layers);
            let half = Carats::new(Decimal::from(layers / 2));
            b.iter(|| {
                let mut stack = stack.clone();
                black_box(stack.consume(black_box(half)).unwrap());
            });
        });
    }

    group.finish();
}

fn engine_with_bulk_packet(carats: Decimal) -> (InMemoryInventoryEngine, WarehouseId, PacketId) {
    let engine = InMemoryInventoryEngine::in_memory(&EngineConfig::default());
    let warehouse = engine.create_warehouse("Bench vault", true).unwrap().id;
    let grn = engine
        .post_receipt(&PostReceipt {
            source_document_id: SourceDocumentId::new(),
            warehouse_id: warehouse,
            reference: "GRN-BENCH".to_string(),
            lines: vec![ReceiptLine {
                received_qty: Carats::new(carats),
                unit_price: Money::new(dec!(5000)),
                description: None,
            }],
            occurred_at: Utc::now(),
        })
        .unwrap();
    let allocated = engine
        .allocate(&AllocateRequest {
            source_document_id: grn.id,
            lines: vec![AllocationLine {
                source_item_id: grn.item_ids[0],
                target: PacketTarget::New(NewPacketSpec::raw("BULK")),
                quantity: Carats::new(carats),
            }],
            occurred_at: Utc::now(),
        })
        .unwrap();
    (engine, warehouse, allocated.lines[0].packet_id)
}

/// Full split path: validate, lock, stage, commit, publish.
fn bench_engine_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_split");
    group.throughput(Throughput::Elements(1));

    group.bench_function("split_0.001ct", |b| {
        let (engine, warehouse, bulk) = engine_with_bulk_packet(dec!(1000000));
        let mut n = 0u64;
        b.iter(|| {
            n += 1;
            let result = engine
                .split(&SplitRequest {
                    source_packet_id: bulk,
                    warehouse_id: warehouse,
                    quantity: Carats::new(dec!(0.001)),
                    target: PacketTarget::New(NewPacketSpec::raw(format!("S-{n}"))),
                    occurred_at: Utc::now(),
                })
                .unwrap();
            black_box(result);
        });
    });

    group.bench_function("warehouse_valuation", |b| {
        let (engine, warehouse, bulk) = engine_with_bulk_packet(dec!(1000));
        for n in 0..200 {
            engine
                .split(&SplitRequest {
                    source_packet_id: bulk,
                    warehouse_id: warehouse,
                    quantity: Carats::new(dec!(1)),
                    target: PacketTarget::New(NewPacketSpec::raw(format!("V-{n}"))),
                    occurred_at: Utc::now(),
                })
                .unwrap();
        }
        b.iter(|| black_box(engine.warehouse_valuation(warehouse).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_layer_consume, bench_engine_split);
criterion_main!(benches);
