use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use pricewatch_config::{CategoryConfig, PricewatchConfig};
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::pipeline::{CategoryJob, CategoryOutcome, Pipeline};

/// Command-line narrowing of what the config schedules.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub categories: Vec<String>,
    pub input: Option<PathBuf>,
    pub threshold_percent: Option<f64>,
}

#[derive(Debug)]
pub struct CategoryResult {
    pub category: String,
    pub outcome: Result<CategoryOutcome>,
}

impl CategoryResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Resolves the categories to run, each at most once, in request order (or
/// config order when nothing was requested).
pub fn plan_jobs(
    workspace: &Path,
    config: &PricewatchConfig,
    request: &RunRequest,
) -> Result<Vec<CategoryJob>> {
    if let Some(threshold) = request.threshold_percent
        && !(threshold.is_finite() && threshold >= 0.0)
    {
        bail!("threshold must be a non-negative number, got {threshold}");
    }

    let names: Vec<String> = if request.categories.is_empty() {
        config
            .categories
            .iter()
            .map(|category| category.name.clone())
            .collect()
    } else {
        let mut seen = BTreeSet::new();
        let mut names = Vec::new();
        for name in &request.categories {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            if seen.insert(name.to_owned()) {
                names.push(name.to_owned());
            } else {
                tracing::warn!(
                    category = name,
                    "category requested more than once, running it once"
                );
            }
        }
        names
    };

    if request.input.is_some() && names.len() != 1 {
        bail!("--input needs exactly one category, got {}", names.len());
    }

    let requested = !request.categories.is_empty();
    let mut jobs = Vec::with_capacity(names.len());
    for name in names {
        let configured = config.category(&name);
        let has_input =
            request.input.is_some() || configured.is_some_and(|category| category.input.is_some());
        if !requested && !has_input {
            tracing::warn!(category = %name, "category has no input configured, skipping");
            continue;
        }
        jobs.push(plan_job(workspace, config, configured, name, request)?);
    }
    Ok(jobs)
}

fn plan_job(
    workspace: &Path,
    config: &PricewatchConfig,
    configured: Option<&CategoryConfig>,
    name: String,
    request: &RunRequest,
) -> Result<CategoryJob> {
    let configured_input = configured.and_then(|category| category.input.as_ref());
    let input = match (&request.input, configured_input) {
        (Some(path), _) => path.clone(),
        (None, Some(path)) => workspace.join(path),
        (None, None) if configured.is_none() => {
            bail!("unknown category '{name}', add it to the config or pass --input")
        }
        (None, None) => bail!("category '{name}' has no input configured"),
    };

    let threshold_percent = request.threshold_percent.unwrap_or_else(|| {
        configured
            .map(|category| category.effective_threshold(config))
            .unwrap_or(config.threshold_percent)
    });

    Ok(CategoryJob {
        base_url: configured.and_then(|category| category.url.clone()),
        name,
        input,
        threshold_percent,
    })
}

/// Runs categories concurrently on its own runtime, at most
/// `max_concurrent` at a time. One category failing never stops another.
pub struct Runner {
    runtime: Runtime,
    pipeline: Arc<Pipeline>,
    max_concurrent: usize,
}

impl Runner {
    pub fn new(pipeline: Pipeline, max_concurrent: usize) -> Result<Self> {
        let max_concurrent = max_concurrent.max(1);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(max_concurrent)
            .enable_all()
            .build()
            .context("failed to build category runtime")?;

        Ok(Self {
            runtime,
            pipeline: Arc::new(pipeline),
            max_concurrent,
        })
    }

    /// Results come back in job order.
    pub fn run_once(&self, jobs: Vec<CategoryJob>, now: DateTime<Utc>) -> Vec<CategoryResult> {
        self.runtime.block_on(run_jobs(
            self.pipeline.clone(),
            jobs,
            self.max_concurrent,
            now,
        ))
    }
}

async fn run_jobs(
    pipeline: Arc<Pipeline>,
    jobs: Vec<CategoryJob>,
    max_concurrent: usize,
    now: DateTime<Utc>,
) -> Vec<CategoryResult> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut join_set = JoinSet::new();
    let names: Vec<String> = jobs.iter().map(|job| job.name.clone()).collect();

    for (index, job) in jobs.into_iter().enumerate() {
        let pipeline = pipeline.clone();
        let semaphore = semaphore.clone();

        join_set.spawn(async move {
            let permit = semaphore.acquire_owned().await;
            let outcome = match permit {
                Ok(_permit) => pipeline.run_category(&job, now).await,
                Err(_) => Err(anyhow!("category semaphore closed")),
            };
            (index, outcome)
        });
    }

    let mut outcomes: Vec<Option<Result<CategoryOutcome>>> =
        names.iter().map(|_| None).collect();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((index, outcome)) => outcomes[index] = Some(outcome),
            Err(err) => tracing::error!(error = %err, "category task failed to complete"),
        }
    }

    names
        .into_iter()
        .zip(outcomes)
        .map(|(category, outcome)| CategoryResult {
            outcome: outcome.unwrap_or_else(|| Err(anyhow!("category task did not complete"))),
            category,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PricewatchConfig {
        PricewatchConfig {
            threshold_percent: 5.0,
            categories: vec![
                CategoryConfig {
                    name: "Architecture".to_owned(),
                    url: Some("https://lego.tr/themes/architecture".to_owned()),
                    input: Some("raw/architecture.json".to_owned()),
                    threshold_percent: None,
                },
                CategoryConfig {
                    name: "City".to_owned(),
                    url: None,
                    input: Some("raw/city.json".to_owned()),
                    threshold_percent: Some(10.0),
                },
                CategoryConfig {
                    name: "Ideas".to_owned(),
                    url: None,
                    input: None,
                    threshold_percent: None,
                },
            ],
            ..PricewatchConfig::default()
        }
    }

    #[test]
    fn requested_categories_are_deduplicated() {
        let request = RunRequest {
            categories: vec![
                "City".to_owned(),
                " City ".to_owned(),
                "Architecture".to_owned(),
            ],
            ..RunRequest::default()
        };

        let jobs = plan_jobs(Path::new("/ws"), &config(), &request).expect("plan");

        let names: Vec<&str> = jobs.iter().map(|job| job.name.as_str()).collect();
        assert_eq!(names, vec!["City", "Architecture"]);
        assert_eq!(jobs[0].input, Path::new("/ws/raw/city.json"));
        assert_eq!(jobs[0].threshold_percent, 10.0);
        assert_eq!(jobs[1].threshold_percent, 5.0);
        assert_eq!(
            jobs[1].base_url.as_deref(),
            Some("https://lego.tr/themes/architecture")
        );
    }

    #[test]
    fn input_override_requires_a_single_category() {
        let request = RunRequest {
            input: Some(PathBuf::from("listings.json")),
            ..RunRequest::default()
        };

        let err = plan_jobs(Path::new("/ws"), &config(), &request).expect_err("three categories");
        assert!(err.to_string().contains("exactly one category"));

        let request = RunRequest {
            categories: vec!["Star Wars".to_owned()],
            input: Some(PathBuf::from("listings.json")),
            threshold_percent: Some(1.5),
        };
        let jobs = plan_jobs(Path::new("/ws"), &config(), &request).expect("ad hoc category");
        assert_eq!(jobs[0].input, PathBuf::from("listings.json"));
        assert_eq!(jobs[0].threshold_percent, 1.5);
        assert_eq!(jobs[0].base_url, None);
    }

    #[test]
    fn categories_without_input_are_rejected() {
        let missing = RunRequest {
            categories: vec!["Ideas".to_owned()],
            ..RunRequest::default()
        };
        let err = plan_jobs(Path::new("/ws"), &config(), &missing).expect_err("no input");
        assert!(err.to_string().contains("no input configured"));

        let unknown = RunRequest {
            categories: vec!["Technic".to_owned()],
            ..RunRequest::default()
        };
        let err = plan_jobs(Path::new("/ws"), &config(), &unknown).expect_err("unknown");
        assert!(err.to_string().contains("unknown category"));
    }

    #[test]
    fn unrequested_categories_without_input_are_skipped() {
        let jobs = plan_jobs(Path::new("/ws"), &config(), &RunRequest::default()).expect("plan");

        let names: Vec<&str> = jobs.iter().map(|job| job.name.as_str()).collect();
        assert_eq!(names, vec!["Architecture", "City"]);
    }

    #[test]
    fn negative_threshold_override_is_rejected() {
        let request = RunRequest {
            categories: vec!["City".to_owned()],
            threshold_percent: Some(-1.0),
            ..RunRequest::default()
        };

        assert!(plan_jobs(Path::new("/ws"), &config(), &request).is_err());
    }
}
