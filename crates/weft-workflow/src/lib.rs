//! Abstract workflow model.
//!
//! A workflow is a DAG of logical [`Job`]s. Edges are not declared by hand;
//! they are derived from file usage: whenever one job declares an output
//! [`LogicalFile`](weft_catalog::LogicalFile) that another job declares as an
//! input, the producer runs before the consumer. Explicit dependencies can be
//! added on top.
//!
//! Construction is two-phase. Jobs are accumulated (and may still be edited)
//! in a [`WorkflowBuilder`]; [`WorkflowBuilder::build`] derives the graph,
//! validates it and returns an immutable [`Workflow`].
//!
//! ```
//! use weft_workflow::{Job, WorkflowBuilder};
//!
//! let mut wf = WorkflowBuilder::new("diamond");
//! wf.add_job(Job::new("preprocess").with_id("pre").add_inputs(["f.a"]).add_outputs(["f.b1", "f.b2"], true, false)).unwrap();
//! wf.add_job(Job::new("findrange").with_id("left").add_inputs(["f.b1"]).add_outputs(["f.c1"], true, false)).unwrap();
//! let workflow = wf.build().unwrap();
//! assert_eq!(workflow.parents("left"), vec!["pre"]);
//! ```

pub mod builder;
pub mod error;
pub mod job;
pub mod workflow;

pub use builder::WorkflowBuilder;
pub use error::{Result, WorkflowError, WorkflowViolation};
pub use job::{Argument, Job, OutputFile};
pub use workflow::Workflow;
