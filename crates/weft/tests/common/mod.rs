//! Shared fixtures: the diamond workflow and its catalogs.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use weft::{
    Catalog, CatalogBuilder, Container, ContainerKind, Job, Transformation, Workflow,
    WorkflowBuilder,
};
use weft_tracker::TrackerConfig;

pub const LIMIT: Option<Duration> = Some(Duration::from_secs(10));

/// Catalog with `f.a` registered under `input_lfn` on the local site.
pub fn catalog(input_lfn: &str) -> Arc<Catalog> {
    let mut builder = CatalogBuilder::new();
    builder
        .add_container(Container::new(
            "centos-base",
            ContainerKind::Singularity,
            "docker://centos:7",
        ))
        .add_replica("local", input_lfn, "file:///home/wf/input/f.a");
    for name in ["preprocess", "findrange", "analyze"] {
        builder.add_transformation(
            Transformation::new(name, "condorpool", "/usr/bin/pegasus-keg")
                .with_container("centos-base"),
        );
    }
    Arc::new(builder.finalize().unwrap())
}

pub fn diamond(analyze_args: &[&str]) -> Workflow {
    let mut wf = WorkflowBuilder::new("diamond");
    wf.add_job(
        Job::new("preprocess")
            .with_id("preprocess")
            .add_args(["-a", "preprocess", "-T", "60", "-i", "f.a", "-o", "f.b1", "f.b2"])
            .add_inputs(["f.a"])
            .add_outputs(["f.b1", "f.b2"], false, false),
    )
    .unwrap();
    for (id, input, output) in [("findrange_1", "f.b1", "f.c1"), ("findrange_2", "f.b2", "f.c2")] {
        wf.add_job(
            Job::new("findrange")
                .with_id(id)
                .add_args(["-a", "findrange", "-T", "60", "-i", input, "-o", output])
                .add_inputs([input])
                .add_outputs([output], false, false),
        )
        .unwrap();
    }
    wf.add_job(
        Job::new("analyze")
            .with_id("analyze")
            .add_args(analyze_args.iter().copied())
            .add_inputs(["f.c1", "f.c2"])
            .add_outputs(["f.d"], true, true),
    )
    .unwrap();
    wf.build().unwrap()
}

pub fn tracker_config(dir: &tempfile::TempDir) -> TrackerConfig {
    TrackerConfig {
        poll_interval: Duration::from_millis(5),
        backend_backoff: Duration::from_millis(1),
        runs_dir: dir.path().to_path_buf(),
        ..Default::default()
    }
}
