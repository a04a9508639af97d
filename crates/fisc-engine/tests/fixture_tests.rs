//! The shipped configurations and fixture sources, end to end

use fisc_anomaly::FindingKind;
use fisc_core::{EngineConfig, SourceAdapter};
use fisc_engine::{InvestigationRequest, InvestigationStatus, Investigator};
use fisc_federation::load_fixture_dir;
use std::path::PathBuf;
use std::sync::Arc;

fn repo_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
}

fn fixture_investigator() -> Investigator {
    let root = repo_root();
    let config_path = root.join("testing/fixtures/config.yaml");
    let config = EngineConfig::load(&config_path.to_string_lossy()).unwrap();
    let adapters = load_fixture_dir(root.join("testing/fixtures/sources"))
        .unwrap()
        .into_iter()
        .map(|a| Arc::new(a) as Arc<dyn SourceAdapter>);
    Investigator::builder(config)
        .with_adapters(adapters)
        .build()
        .unwrap()
}

#[test]
fn test_live_config_is_valid() {
    let path = repo_root().join("config/fisc.yaml");
    let config = EngineConfig::load(&path.to_string_lossy()).unwrap();
    assert!(config.source("portal_transparencia.contratos").unwrap().required);
    assert_eq!(
        config.circuit_breaker.thresholds_for("tce_sp.despesas").failure_threshold,
        3
    );
}

#[tokio::test(start_paused = true)]
async fn test_fixture_investigation() {
    let investigator = fixture_investigator();
    let result = investigator
        .investigate(InvestigationRequest::new("contratos suspeitos do Ministério da Saúde"))
        .await;

    assert_eq!(result.status, InvestigationStatus::Completed);
    assert_eq!(result.stages.len(), 2);
    // Supplier lookups fan out over harvested CNPJs
    let lookups = result.source("receita_cnpj");
    assert_eq!(lookups.len(), 5);
    assert!(lookups.iter().all(|r| r.stage == 1));

    // The contract both portals publish is one node
    assert_eq!(result.contracts_scored, 17);

    let kinds: Vec<FindingKind> = result.findings.iter().map(|f| f.kind).collect();
    assert!(kinds.contains(&FindingKind::PriceOutlier));
    assert!(kinds.contains(&FindingKind::SupplierConcentration));
    assert!(kinds.contains(&FindingKind::TemporalCluster));
    let outlier = result
        .findings
        .iter()
        .find(|f| f.kind == FindingKind::PriceOutlier)
        .unwrap();
    assert!(outlier.references("contract:112023"));

    // Evidence never points outside the graph
    for finding in &result.findings {
        for evidence in &finding.evidence {
            let id = evidence.id();
            let known = result.entity_graph.nodes().any(|n| n.id.as_str() == id)
                || result.entity_graph.edges().any(|e| e.id == id);
            assert!(known, "{} in {}", id, finding.id);
        }
    }
}
