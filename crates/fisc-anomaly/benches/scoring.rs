//! Criterion benchmarks for anomaly scoring.
//!
//! Graph sizes: 100, 1 000 and 5 000 contracts spread over 20 agencies and
//! 200 suppliers. Near-duplicate detection is the quadratic part.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fisc_anomaly::{gini, AnomalyScorer};
use fisc_core::{CallParams, SourceAdapterResult, SourceCall};
use fisc_graph::{EntityGraph, EntityGraphBuilder};
use serde_json::{json, Value};
use std::time::Duration;

const OBJECTS: [&str; 6] = [
    "Aquisição de medicamentos de uso hospitalar",
    "Serviços de limpeza e conservação predial",
    "Locação de veículos para transporte de equipes",
    "Manutenção preventiva de equipamentos de imagem",
    "Fornecimento de refeições para unidades de saúde",
    "Consultoria em gestão de contratos públicos",
];

fn make_graph(contracts: u64) -> EntityGraph {
    let records: Vec<Value> = (0..contracts)
        .map(|i| {
            json!({
                "numero_contrato": format!("CT-{}/2024", i),
                "objeto": format!("{} lote {}", OBJECTS[(i % 6) as usize], i % 17),
                "valor_global": 10_000.0 + ((i * 7_919) % 50_000) as f64,
                "data_assinatura": format!("{:02}/{:02}/2024", 1 + i % 28, 1 + i % 12),
                "categoria": OBJECTS[(i % 3) as usize],
                "cnpj_fornecedor": format!("{:014}", 10_000_000_000_000u64 + i % 200),
                "codigo_orgao": format!("{}", 20_000 + (i % 20) * 1_000),
            })
        })
        .collect();

    let call = SourceCall::new("bench", CallParams::new());
    let mut builder = EntityGraphBuilder::new();
    builder.merge(&SourceAdapterResult::success(
        &call,
        Value::from(records),
        Duration::ZERO,
    ));
    builder.into_graph()
}

fn bench_score(c: &mut Criterion) {
    let scorer = AnomalyScorer::default();
    let mut group = c.benchmark_group("score");
    group.sample_size(10);
    for size in [100u64, 1_000, 5_000] {
        let graph = make_graph(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &graph, |b, graph| {
            b.iter(|| scorer.score(black_box(graph)))
        });
    }
    group.finish();
}

fn bench_gini(c: &mut Criterion) {
    let values: Vec<f64> = (1..=10_000).map(|i| (i * i % 997) as f64 + 1.0).collect();
    c.bench_function("gini_10k", |b| b.iter(|| gini(black_box(&values))));
}

criterion_group!(benches, bench_score, bench_gini);
criterion_main!(benches);
