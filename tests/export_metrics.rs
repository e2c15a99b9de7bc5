#![cfg(unix)]

mod support;

use std::collections::HashSet;

use diarender::domain::types::{RequestedSize, SourceRef};
use metrics_util::debugging::DebuggingRecorder;
use support::{BOOK, FAILING_CONVERTER, Fixture, confirming_converter};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn export_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let size = RequestedSize::new(Some(200), None);
    let source = SourceRef::new(BOOK, "/flow.dia");

    let fixture = Fixture::new(&confirming_converter("0.3"));
    fixture.write_source("/flow.dia");
    let (first, second) = tokio::join!(
        fixture.renderer.export(&source, size),
        fixture.renderer.export(&source, size)
    );
    first.expect("first export");
    second.expect("second export");
    fixture
        .renderer
        .export(&source, size)
        .await
        .expect("fresh export");

    let failing = Fixture::new(FAILING_CONVERTER);
    failing.write_source("/flow.dia");
    failing
        .renderer
        .export(&source, size)
        .await
        .expect_err("failing export");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for metric in [
        "diarender_export_converted_total",
        "diarender_export_fresh_total",
        "diarender_export_failed_total",
        "diarender_convert_ms",
    ] {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
