//! Run command handler.

use crate::config::{Connections, Project};
use crate::partition::CancelFlag;
use crate::printer::Printer;
use crate::runner;
use std::path::PathBuf;

pub fn run(
    project: String,
    connections: Option<PathBuf>,
    target: Option<String>,
    json: bool,
) -> anyhow::Result<i32> {
    let connections = Connections::load(connections.as_deref(), target.as_deref())?;
    let project = Project::load(&project)?;

    // SIGINT stops new jobs from being scheduled; in-flight jobs finish and
    // the run exits with code 2.
    let interrupt = CancelFlag::new();
    let handler_flag = interrupt.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_flag.cancel()) {
        tracing::debug!(error = %e, "could not install interrupt handler");
    }

    let printer = Printer::new(!json);
    let summary = runner::run_project(&project, &connections, &interrupt, &printer)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }
    Ok(summary.exit_code())
}
