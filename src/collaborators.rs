//! External collaborator seams and their bundled implementations.
//!
//! The decision core never owns a forecast model, an advisory language
//! model, or a report store — it calls them through the traits here, always
//! under a caller-supplied timeout. Bundled implementations:
//!
//! - [`LinearForecast`]: deterministic trend extrapolation for demos and
//!   pipeline tests (no model dependency)
//! - [`HttpAdvisoryWriter`]: OpenAI-compatible chat endpoint for report
//!   prose; its output is advisory text only and never feeds a decision
//! - [`NullAdvisory`]: no prose
//! - [`MarkdownFileSink`]: renders the plant report and writes it to disk
//! - [`MemorySink`]: captures published reports for assertions
//!
//! ## Environment Variables
//!
//! - `ADVISORY_API_KEY`: required for [`HttpAdvisoryWriter`]
//! - `ADVISORY_API_URL`: endpoint base (default: `https://api.openai.com/v1`)

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::diagnostic::HealthLevel;
use crate::pipeline::{PipelineResult, UnitOutcome, UnitResult};
use crate::router::DecisionUnit;
use crate::strategy::{FurnaceMode, SubsystemCommand};
use crate::DecisionError;

// ============================================================================
// Forecast collaborator
// ============================================================================

/// Opaque numeric producer feeding the toxicity unit.
///
/// Implementations must be thread-safe (Send + Sync) for use across tasks.
/// The trait is object-safe to allow dynamic dispatch via
/// `Arc<dyn ForecastModel>`.
#[async_trait]
pub trait ForecastModel: Send + Sync {
    /// Predict the reading `horizon_hours` ahead of `current`, given the
    /// recent `history` (oldest first).
    ///
    /// # Errors
    ///
    /// Implementations report their own failures as
    /// [`DecisionError::ExternalFailure`]; the pipeline adds
    /// [`DecisionError::ExternalTimeout`] around the call.
    async fn forecast(
        &self,
        history: &[f64],
        current: f64,
        horizon_hours: u32,
    ) -> Result<f64, DecisionError>;
}

/// Deterministic trend-extrapolation forecast for demos and tests.
///
/// Projects the mean step of the history onto the horizon; with fewer than
/// two points it returns the current reading unchanged. The optional delay
/// simulates a slow model server so timeout paths can be exercised.
#[derive(Debug, Clone, Default)]
pub struct LinearForecast {
    /// Simulated inference delay in milliseconds.
    pub delay_ms: u64,
}

impl LinearForecast {
    /// Forecast with a simulated delay.
    pub fn with_delay(delay_ms: u64) -> Self {
        Self { delay_ms }
    }
}

#[async_trait]
impl ForecastModel for LinearForecast {
    async fn forecast(
        &self,
        history: &[f64],
        current: f64,
        horizon_hours: u32,
    ) -> Result<f64, DecisionError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }

        if history.len() < 2 {
            return Ok(current);
        }

        let first = history[0];
        let last = history[history.len() - 1];
        let step = (last - first) / (history.len() - 1) as f64;
        // One history step per hour of horizon, floored at zero: toxicity
        // cannot go negative.
        let predicted = current + step * f64::from(horizon_hours);
        Ok(predicted.max(0.0))
    }
}

// ============================================================================
// Advisory-text collaborator
// ============================================================================

/// LLM-backed prose writer for the report's advisory section.
///
/// The core never depends on this output for control decisions — it is
/// attached to the report as supplementary text only.
#[async_trait]
pub trait AdvisoryWriter: Send + Sync {
    /// Produce operator-readable prose for the given outcome context.
    ///
    /// # Errors
    ///
    /// [`DecisionError::ExternalFailure`] on transport or API errors.
    async fn explain(&self, context: &str) -> Result<String, DecisionError>;
}

/// Advisory writer that produces no prose. The default for tests and for
/// air-gapped deployments.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAdvisory;

#[async_trait]
impl AdvisoryWriter for NullAdvisory {
    async fn explain(&self, _context: &str) -> Result<String, DecisionError> {
        Ok(String::new())
    }
}

/// Chat-completion request payload (OpenAI-compatible).
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

/// One chat message.
#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Chat-completion response payload.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// Advisory writer backed by an OpenAI-compatible chat endpoint.
///
/// ## Example
///
/// ```no_run
/// # use plantmind::collaborators::HttpAdvisoryWriter;
/// # fn example() -> Result<(), plantmind::config::ConfigError> {
/// let writer = HttpAdvisoryWriter::from_env("qwen-plus")?
///     .with_max_tokens(512)
///     .with_temperature(0.3);
/// # Ok(()) }
/// ```
pub struct HttpAdvisoryWriter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
}

impl HttpAdvisoryWriter {
    /// System prompt framing the writer as a plant operations engineer.
    const SYSTEM_PROMPT: &'static str = "You are a senior wastewater-treatment \
        operations engineer. Given the outcome summary of an automated control \
        pass, write a short plain-language advisory for the shift operator. Do \
        not invent measurements.";

    /// Build a writer from the `ADVISORY_API_KEY` / `ADVISORY_API_URL`
    /// environment variables.
    ///
    /// # Errors
    ///
    /// [`crate::config::ConfigError::MissingEnv`] when the API key is not
    /// set, so misconfiguration surfaces at construction rather than at the
    /// first request.
    pub fn from_env(model: impl Into<String>) -> Result<Self, crate::config::ConfigError> {
        let api_key = std::env::var("ADVISORY_API_KEY").map_err(|_| {
            crate::config::ConfigError::MissingEnv {
                var: "ADVISORY_API_KEY".to_string(),
            }
        })?;
        let base_url = std::env::var("ADVISORY_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            model: model.into(),
            max_tokens: 512,
            temperature: 0.3,
            timeout: Duration::from_secs(30),
        })
    }

    /// Set the maximum tokens to generate.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AdvisoryWriter for HttpAdvisoryWriter {
    async fn explain(&self, context: &str) -> Result<String, DecisionError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Self::SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: context.to_string(),
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                DecisionError::ExternalFailure(format!("advisory request failed: {e}"))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(DecisionError::ExternalFailure(format!(
                "advisory API error {status}: {error_text}"
            )));
        }

        let api_response: ChatResponse = response.json().await.map_err(|e| {
            DecisionError::ExternalFailure(format!("failed to parse advisory response: {e}"))
        })?;

        let Some(choice) = api_response.choices.into_iter().next() else {
            return Err(DecisionError::ExternalFailure(
                "no choices in advisory response".to_string(),
            ));
        };
        Ok(choice.message.content)
    }
}

// ============================================================================
// Report sink
// ============================================================================

/// Destination for completed pipeline reports.
///
/// Called exactly once per completed run; returns an opaque location
/// string (a path, a URL, a queue offset).
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Publish one completed result.
    ///
    /// # Errors
    ///
    /// [`DecisionError::ExternalFailure`] on I/O or transport errors.
    async fn publish(&self, result: &PipelineResult) -> Result<String, DecisionError>;
}

/// Sink that renders the report as markdown and writes one file per run.
#[derive(Debug, Clone)]
pub struct MarkdownFileSink {
    dir: PathBuf,
}

impl MarkdownFileSink {
    /// Sink writing `Report_<timestamp>_<request-id>.md` under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ReportSink for MarkdownFileSink {
    async fn publish(&self, result: &PipelineResult) -> Result<String, DecisionError> {
        let rendered = render_markdown(result);
        let stamp = result.completed_at.format("%Y%m%d_%H%M%S");
        let path = self
            .dir
            .join(format!("Report_{stamp}_{}.md", result.request_id));

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| DecisionError::ExternalFailure(format!("report dir: {e}")))?;
        tokio::fs::write(&path, rendered)
            .await
            .map_err(|e| DecisionError::ExternalFailure(format!("report write: {e}")))?;

        Ok(path.display().to_string())
    }
}

/// A published-report record captured by [`MemorySink`].
#[derive(Debug, Clone)]
pub struct PublishedReport {
    /// Request the report answers.
    pub request_id: String,
    /// Units in the order they were aggregated.
    pub unit_order: Vec<DecisionUnit>,
    /// Whether the run carried partial failures.
    pub partial: bool,
    /// The rendered markdown body.
    pub body: String,
}

/// In-memory sink for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    published: Mutex<Vec<PublishedReport>>,
}

impl MemorySink {
    /// All reports published so far.
    pub fn published(&self) -> Vec<PublishedReport> {
        match self.published.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ReportSink for MemorySink {
    async fn publish(&self, result: &PipelineResult) -> Result<String, DecisionError> {
        let record = PublishedReport {
            request_id: result.request_id.as_str().to_string(),
            unit_order: result.units.iter().map(|u| u.unit).collect(),
            partial: result.partial,
            body: render_markdown(result),
        };
        match self.published.lock() {
            Ok(mut guard) => guard.push(record),
            Err(poisoned) => poisoned.into_inner().push(record),
        }
        Ok(format!("memory://{}", result.request_id))
    }
}

// ============================================================================
// Markdown rendering
// ============================================================================

/// Render one completed result as the operator-facing markdown report.
///
/// The report always states which units succeeded, which failed and why
/// (error kind), and which were skipped — data is never silently omitted.
pub fn render_markdown(result: &PipelineResult) -> String {
    let mut md = format!(
        "# Plant Control Report\nrequest: {}\ngenerated: {}\n\n",
        result.request_id,
        result.completed_at.to_rfc3339()
    );

    if result.partial {
        md.push_str("**Partial results** — some units did not complete; see below.\n\n");
    }

    for (i, u) in result.units.iter().enumerate() {
        md.push_str(&format!("## {}. {}\n", i + 1, u.unit));
        match &u.outcome {
            UnitOutcome::Failed(e) => {
                md.push_str(&format!("- status: FAILED ({})\n- detail: {e}\n\n", e.kind()));
            }
            UnitOutcome::Skipped => {
                md.push_str("- status: SKIPPED (cancelled before dispatch)\n\n");
            }
            UnitOutcome::Succeeded(r) => {
                md.push_str("- status: ok\n");
                render_unit_result(&mut md, r);
                md.push('\n');
            }
        }
    }

    if let Some(advisory) = &result.advisory {
        md.push_str("## Advisory\n");
        md.push_str(advisory);
        md.push('\n');
    }

    md
}

fn render_unit_result(md: &mut String, result: &UnitResult) {
    match result {
        UnitResult::Toxicity { predicted, risk } => {
            md.push_str(&format!(
                "- predicted toxicity: {predicted:.2}\n- risk level: {risk}\n"
            ));
        }
        UnitResult::Command(SubsystemCommand::Adsorption {
            frequency_hz,
            rotation_rpm,
            active_reactors,
            standby_triggered,
            expected_removal_pct,
            alarm_level,
            ..
        }) => {
            md.push_str(&format!(
                "- frequency: {frequency_hz:.1} Hz ({rotation_rpm:.0} rpm)\n\
                 - active reactors: {active_reactors}\n\
                 - standby line: {}\n\
                 - expected removal: {expected_removal_pct:.1} %\n\
                 - alarm level: {alarm_level}\n",
                if *standby_triggered { "engaged" } else { "idle" },
            ));
        }
        UnitResult::Command(SubsystemCommand::Mbr {
            aeration_m3_h,
            flux_lmh,
            backwash,
            chemical_clean,
            alarm_level,
            ..
        }) => {
            md.push_str(&format!(
                "- aeration: {aeration_m3_h:.1} m³/h\n\
                 - flux target: {flux_lmh:.1} LMH\n\
                 - backwash: {}\n\
                 - chemical clean: {}\n\
                 - alarm level: {alarm_level}\n",
                if *backwash { "yes" } else { "no" },
                if *chemical_clean { "yes" } else { "no" },
            ));
        }
        UnitResult::Command(SubsystemCommand::Furnace {
            mode,
            temperature_c,
            feed_rate_kg_h,
        }) => {
            let mode_label = match mode {
                FurnaceMode::Standby => "standby",
                FurnaceMode::ActiveHeating => "active heating",
            };
            md.push_str(&format!(
                "- mode: {mode_label}\n\
                 - furnace temperature: {temperature_c:.0} °C\n\
                 - feed rate: {feed_rate_kg_h:.1} kg/h\n",
            ));
        }
        UnitResult::Diagnostic(report) => {
            md.push_str(&format!(
                "- overall health: {} ({:.1}/100)\n",
                report.overall_health, report.overall_score
            ));
            for s in &report.subsystems {
                md.push_str(&format!("  - {}: {} ({:.0})\n", s.name, s.health, s.score));
                for issue in &s.issues {
                    md.push_str(&format!("    - issue: {issue}\n"));
                }
            }
            if report.overall_health == HealthLevel::NoData {
                md.push_str("  - no measurements were available this pass\n");
            }
        }
    }
}
