//! Panel Builder contract tests against a counting, optionally slow warehouse.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use ei_core::{
    AnalysisRequest, EntityFilter, EntityInfo, Error, Method, PanelQuery, Result, SourceTables,
    Warehouse, WarehouseRow,
};
use ei_panel::{PanelBuilder, SnapshotWarehouse, WarehouseSnapshot};

struct CountingWarehouse {
    inner: SnapshotWarehouse,
    calls: AtomicUsize,
    delay: Duration,
}

impl CountingWarehouse {
    fn new(delay: Duration) -> Self {
        let mut snap = WarehouseSnapshot::default();
        for year in 2010..=2020 {
            for (k, id) in ["3550308", "3509502", "3304557"].iter().enumerate() {
                let base = 10.0 + k as f64;
                snap.push_row(
                    SourceTables::Mart,
                    id,
                    year,
                    &[("pib", (base + 0.1 * (year - 2010) as f64).exp()), ("royalties", year as f64)],
                );
            }
        }
        Self { inner: SnapshotWarehouse::new("counting", snap), calls: AtomicUsize::new(0), delay }
    }
}

#[async_trait]
impl Warehouse for CountingWarehouse {
    async fn fetch_panel_rows(&self, query: &PanelQuery) -> Result<Vec<WarehouseRow>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.fetch_panel_rows(query).await
    }

    async fn list_entities(&self, filter: &EntityFilter) -> Result<Vec<EntityInfo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list_entities(filter).await
    }

    fn name(&self) -> &str {
        "counting"
    }
}

fn request(method: Method) -> AnalysisRequest {
    AnalysisRequest::new(
        method,
        vec!["3550308".into()],
        vec!["3509502".into(), "3304557".into()],
        vec!["pib_log".into()],
        2015,
        2010,
        2020,
    )
}

#[tokio::test]
async fn iv_without_instrument_fails_before_warehouse_access() {
    let warehouse = Arc::new(CountingWarehouse::new(Duration::ZERO));
    let builder = PanelBuilder::new(warehouse.clone());
    for method in [Method::Iv, Method::PanelIv] {
        let err = builder.build(&request(method)).await.unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "got {err:?}");
    }
    assert_eq!(warehouse.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn instrument_column_is_fetched_with_outcomes() {
    let warehouse = Arc::new(CountingWarehouse::new(Duration::ZERO));
    let builder = PanelBuilder::new(warehouse.clone());
    let panel = builder.build(&request(Method::Iv).with_instrument("royalties")).await.unwrap();
    let z = panel.column("royalties").unwrap();
    assert_eq!(z.len(), 33);
    assert_eq!(z[0], 2010.0);
    assert_eq!(warehouse.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn slow_warehouse_surfaces_timeout_kind() {
    let warehouse = Arc::new(CountingWarehouse::new(Duration::from_millis(200)));
    let builder = PanelBuilder::new(warehouse).with_timeout(Duration::from_millis(20));
    let err = builder.build(&request(Method::Did)).await.unwrap_err();
    match err {
        Error::WarehouseTimeout { operation, timeout_ms } => {
            assert_eq!(operation, "fetch_panel_rows");
            assert_eq!(timeout_ms, 20);
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn identical_requests_build_identical_panels() {
    let warehouse = Arc::new(CountingWarehouse::new(Duration::ZERO));
    let builder = PanelBuilder::new(warehouse);
    let mut req = request(Method::Compare);
    req.outcomes.push("royalties".into());
    let a = builder.build(&req).await.unwrap();
    let b = builder.build(&req).await.unwrap();
    assert!(a.same_rows(&b));
    assert_eq!(a.column_names().collect::<Vec<_>>(), vec!["pib_log", "royalties"]);
}
