use std::io::{Cursor, ErrorKind};
use std::process::Stdio;

use async_stream::try_stream;
use futures::Stream;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::col::ColumnAdapter;
use crate::config::{FilterRegistry, FilterStep, FilterType};
use crate::data_model::{FilterOutput, Sample};
use crate::error::{PipelineError, Result};

/// Executes a single filter step: builds the effective command, exports the
/// step's parameters as environment variables, launches the external process
/// and streams the sample through it.
pub struct StepRunner<'a> {
    registry: &'a FilterRegistry,
}

impl<'a> StepRunner<'a> {
    pub fn new(registry: &'a FilterRegistry) -> Self {
        StepRunner { registry }
    }

    /// Run one step against a sample, returning the transformed sample plus
    /// the process's diagnostic output. The exit-status check runs only
    /// after both output streams are fully drained, and takes precedence
    /// over any stream error captured while draining: the process's own exit
    /// code is the authoritative failure signal.
    pub async fn run(&self, index: usize, step: &FilterStep, sample: &Sample) -> Result<FilterOutput> {
        let definition = self.registry.validate_step(step)?;

        // Resolve the target column before anything launches.
        let column = match definition.kind {
            FilterType::Bilingual => None,
            FilterType::Monolingual => {
                let language = step
                    .language
                    .as_deref()
                    .ok_or_else(|| PipelineError::UnknownLanguage(String::new()))?;
                let column = sample
                    .columns
                    .iter()
                    .position(|label| label == language)
                    .ok_or_else(|| PipelineError::UnknownLanguage(language.to_string()))?;
                Some(column)
            }
        };

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&definition.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(basedir) = &definition.basedir {
            command.current_dir(basedir);
        }
        for (name, parameter) in &definition.parameters {
            // validate_step guarantees the value is present.
            command.env(name, parameter.export(&step.parameters[name]));
        }

        debug!(index, filter = %step.filter, ?column, "Launching filter process");
        let mut child = command.spawn()?;

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| PipelineError::Unexpected("child process stderr is not piped".into()))?;
        let stderr_task = tokio::spawn(async move {
            let mut buffer = Vec::new();
            stderr.read_to_end(&mut buffer).await.map(|_| buffer)
        });

        // Feed and drain concurrently; writing the sample and reading the
        // output sequentially can deadlock on full OS pipe buffers.
        let stdout_result = match column {
            Some(column) => {
                let adapter = ColumnAdapter::new(column);
                let input = Cursor::new(sample.bytes.clone());
                adapter.run(input, &mut child, Vec::new()).await
            }
            None => self.stream_through(&mut child, &sample.bytes).await,
        };

        let status = child.wait().await?;
        let stderr_bytes = stderr_task.await??;
        let stderr_text = String::from_utf8_lossy(&stderr_bytes).into_owned();

        if !status.success() {
            return Err(PipelineError::ProcessFailed {
                index,
                filter: step.filter.clone(),
                code: status.code().unwrap_or(-1),
                stderr: stderr_text,
            });
        }

        let bytes = stdout_result?;
        let result = Sample::new(sample.columns.clone(), bytes);
        debug!(index, filter = %step.filter, records = result.record_count(), "Filter process finished");

        Ok(FilterOutput {
            sample: result,
            stderr: Some(stderr_text),
        })
    }

    /// Bilingual path: the whole sample goes straight through the process.
    async fn stream_through(&self, child: &mut tokio::process::Child, input: &[u8]) -> Result<Vec<u8>> {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::Unexpected("child process stdin is not piped".into()))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::Unexpected("child process stdout is not piped".into()))?;

        let payload = input.to_vec();
        let feeder = tokio::spawn(async move {
            match stdin.write_all(&payload).await {
                // The process may legitimately stop reading early; its exit
                // status tells us whether that was a failure.
                Err(e) if e.kind() == ErrorKind::BrokenPipe => return Ok(()),
                Err(e) => return Err(e),
                Ok(()) => {}
            }
            match stdin.shutdown().await {
                Err(e) if e.kind() == ErrorKind::BrokenPipe => Ok(()),
                other => other,
            }
        });

        let mut buffer = Vec::new();
        let read_result = stdout.read_to_end(&mut buffer).await;
        feeder.await??;
        read_result?;
        Ok(buffer)
    }
}

/// Sequences an ordered list of filter steps over an initial sample, feeding
/// each step's output into the next.
pub struct PipelineExecutor {
    registry: FilterRegistry,
}

impl PipelineExecutor {
    pub fn new(registry: FilterRegistry) -> Self {
        if registry.is_empty() {
            warn!("Pipeline executor created with an empty filter registry.");
        }
        PipelineExecutor { registry }
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    /// Schema validation for a whole chain, run before anything launches:
    /// every step must match its definition and every monolingual step's
    /// language must resolve to a column of the sample.
    fn preflight(&self, sample: &Sample, steps: &[FilterStep]) -> Result<()> {
        for step in steps {
            let definition = self.registry.validate_step(step)?;
            if definition.kind == FilterType::Monolingual {
                let language = step.language.as_deref().unwrap_or_default();
                if !sample.columns.iter().any(|label| label == language) {
                    return Err(PipelineError::UnknownLanguage(language.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Lazily produce the sequence of intermediate results: the untouched
    /// initial sample first, then one `FilterOutput` per completed step. The
    /// stream is finite (at most `steps.len() + 1` elements); the first
    /// failing step terminates it with a single error and no further steps
    /// run.
    ///
    /// Schema errors (unknown filter, parameter mismatch, unresolvable
    /// column label) surface before any result is yielded and before any
    /// process launches.
    pub fn execute<'a>(
        &'a self,
        sample: Sample,
        steps: &'a [FilterStep],
    ) -> impl Stream<Item = Result<FilterOutput>> + 'a {
        try_stream! {
            self.preflight(&sample, steps)?;

            info!(steps = steps.len(), records = sample.record_count(), "Starting filter pipeline");

            yield FilterOutput {
                sample: sample.clone(),
                stderr: None,
            };

            let runner = StepRunner::new(&self.registry);
            let mut current = sample;
            for (index, step) in steps.iter().enumerate() {
                debug!(index, filter = %step.filter, "Running pipeline step");
                let output = runner.run(index, step, &current).await?;
                current = output.sample.clone();
                yield output;
            }
        }
    }
}
