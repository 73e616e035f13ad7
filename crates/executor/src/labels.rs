//! Labeler — canonical label set identifying the containers, volumes and
//! networks belonging to one job instance.

use std::collections::HashMap;

use crate::job::JobSpec;

const LABEL_PREFIX: &str = "io.forgerunner.runner";

/// Pure mapping from key/value pairs to the canonical label set. Every
/// resource the executor creates carries these labels so that orphaned
/// resources can be traced back to a job.
#[derive(Debug, Clone)]
pub struct Labeler {
    base: HashMap<String, String>,
}

impl Labeler {
    pub fn new(job: &JobSpec) -> Self {
        let mut base = HashMap::new();
        base.insert(format!("{}.managed", LABEL_PREFIX), "true".to_string());
        base.insert(format!("{}.job.id", LABEL_PREFIX), job.job_id.to_string());
        base.insert(
            format!("{}.project.id", LABEL_PREFIX),
            job.project_id.to_string(),
        );
        base.insert(
            format!("{}.pipeline.id", LABEL_PREFIX),
            job.pipeline_id.to_string(),
        );
        base.insert(format!("{}.runner.id", LABEL_PREFIX), job.runner_id.clone());

        Self { base }
    }

    /// The base labels merged with per-call extras. Extra keys are namespaced
    /// under the same prefix; extras win on collision.
    pub fn labels(&self, extras: &[(&str, &str)]) -> HashMap<String, String> {
        let mut out = self.base.clone();
        for (key, value) in extras {
            out.insert(format!("{}.{}", LABEL_PREFIX, key), (*value).to_string());
        }
        out
    }
}
