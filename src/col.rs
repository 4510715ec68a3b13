//! Column isolation: lets a subprocess that only understands a single
//! uninterrupted line-stream operate on one column of a tab-delimited
//! multi-column record stream, while every other column passes through
//! untouched and row alignment is preserved exactly.
//!
//! Two concurrent roles cooperate over one FIFO queue of side tuples: the
//! splitter feeds the selected column to the subprocess and queues the rest
//! of each record; the merger reads the subprocess output line by line and
//! splices it back into position. Because the queue is strict FIFO and both
//! roles advance row-synchronously, output row `i` always corresponds to
//! input row `i` without explicit row ids.

use std::io::ErrorKind;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use crate::error::{PipelineError, Result};

/// The fields of a record other than the one routed to the subprocess, in
/// their original order.
pub type SideTuple = Vec<Vec<u8>>;

fn is_broken_pipe(e: &std::io::Error) -> bool {
    e.kind() == ErrorKind::BrokenPipe
}

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, field: &[u8]) -> std::io::Result<()> {
    out.write_all(field).await?;
    out.write_all(b"\n").await
}

/// Splitter role: read records from `input`, write field `column`
/// (newline-terminated) to the subprocess stdin, queue the remaining fields.
/// Closes the stdin endpoint at end of input so the subprocess sees EOF;
/// dropping the sender marks the end of the queue.
pub async fn split_records<R, W>(
    column: usize,
    queue: UnboundedSender<SideTuple>,
    input: R,
    mut child_stdin: W,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(input);
    let mut line: Vec<u8> = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        while matches!(line.last(), Some(b'\n') | Some(b'\r')) {
            line.pop();
        }

        let mut fields: SideTuple = line.split(|&b| b == b'\t').map(<[u8]>::to_vec).collect();
        // Select the column before touching the queue, so a short record
        // fails here without leaving a partial row behind.
        if column >= fields.len() {
            return Err(PipelineError::StreamIntegrity(format!(
                "record has only {} fields, cannot select column {}",
                fields.len(),
                column
            )));
        }
        let field = fields.remove(column);

        if queue.send(fields).is_err() {
            // Merger stopped early; the coordinating caller decides whether
            // that was fatal.
            return Ok(());
        }
        if let Err(e) = write_line(&mut child_stdin, &field).await {
            if is_broken_pipe(&e) {
                return Ok(());
            }
            return Err(e.into());
        }
    }

    if let Err(e) = child_stdin.shutdown().await {
        if !is_broken_pipe(&e) {
            return Err(e.into());
        }
    }
    Ok(())
}

/// Merger role: read the subprocess stdout one line at a time, pop one side
/// tuple per line, and write the reassembled record to `output`. Returns the
/// output writer so in-memory buffers can be recovered by the caller.
///
/// Row-count mismatches are fatal in both directions: a line with no queued
/// side tuple means the subprocess produced more output than it was given,
/// and a leftover side tuple after stdout ends means it dropped rows.
pub async fn merge_records<R, W>(
    column: usize,
    mut queue: UnboundedReceiver<SideTuple>,
    child_stdout: R,
    mut output: W,
) -> Result<W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(child_stdout);
    let mut line: Vec<u8> = Vec::new();

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }

        let Some(mut fields) = queue.recv().await else {
            return Err(PipelineError::StreamIntegrity(
                "subprocess produced more lines of output than it was given".to_string(),
            ));
        };
        fields.insert(column, line.clone());

        let mut record = fields.join(&b"\t"[..]);
        record.push(b'\n');
        if let Err(e) = output.write_all(&record).await {
            if is_broken_pipe(&e) {
                return Ok(output);
            }
            return Err(e.into());
        }
    }

    if queue.recv().await.is_some() {
        return Err(PipelineError::StreamIntegrity(
            "subprocess produced fewer lines of output than it was given".to_string(),
        ));
    }

    if let Err(e) = output.flush().await {
        if !is_broken_pipe(&e) {
            return Err(e.into());
        }
    }
    Ok(output)
}

/// Drives both roles against an already-launched single-column subprocess.
pub struct ColumnAdapter {
    column: usize,
}

impl ColumnAdapter {
    pub fn new(column: usize) -> Self {
        ColumnAdapter { column }
    }

    /// Pipe `input` through the child's stdin/stdout, reassembling full
    /// records into `output`. The child must have been spawned with both
    /// endpoints piped. Errors from either role are re-raised here once both
    /// have finished, splitter first, so a background failure never passes
    /// undetected. The child's exit status is left for the caller to check.
    pub async fn run<R, W>(&self, input: R, child: &mut Child, output: W) -> Result<W>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let child_stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::Unexpected("child process stdin is not piped".into()))?;
        let child_stdout = child
            .stdout
            .take()
            .ok_or_else(|| PipelineError::Unexpected("child process stdout is not piped".into()))?;

        let (sender, receiver) = mpsc::unbounded_channel();
        debug!(column = self.column, "Starting splitter and merger roles");

        let splitter = tokio::spawn(split_records(self.column, sender, input, child_stdin));
        let merger = tokio::spawn(merge_records(self.column, receiver, child_stdout, output));

        // Join both roles before raising anything; the splitter's error wins
        // because it is the first one encountered in stream order.
        let split_result = splitter.await?;
        let merge_result = merger.await?;

        split_result?;
        merge_result
    }
}
