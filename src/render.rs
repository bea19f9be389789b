//! Output Renderer
//!
//! Turns invocation results and failures into text for a notebook cell.
//! Formatting only: no decisions about sessions or retries happen here.

use std::borrow::Cow;
use std::io::{self, Write};

use crate::exec::{ExecError, InvocationResult, OutputSink, StreamKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Prefix stdout/stderr sections with `[stdout]` / `[stderr]`
    pub label_streams: bool,
    /// Remove terminal escape sequences
    pub strip_ansi: bool,
    /// Print the exit status footer even for exit status 0
    pub always_show_exit_status: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            label_streams: true,
            strip_ansi: false,
            always_show_exit_status: false,
        }
    }
}

impl RenderOptions {
    /// Raw output, no labels
    pub fn plain() -> Self {
        Self {
            label_streams: false,
            ..Default::default()
        }
    }
}

fn decode(bytes: &[u8], strip_ansi: bool) -> String {
    let text: Cow<'_, [u8]> = if strip_ansi {
        Cow::Owned(strip_ansi_escapes::strip(bytes))
    } else {
        Cow::Borrowed(bytes)
    };
    String::from_utf8_lossy(&text).into_owned()
}

fn push_section(out: &mut String, label: &str, body: &str, truncated: bool, options: &RenderOptions) {
    if body.is_empty() && !truncated {
        return;
    }
    if options.label_streams {
        out.push_str(label);
        out.push('\n');
    }
    out.push_str(body);
    if !body.ends_with('\n') && !body.is_empty() {
        out.push('\n');
    }
    if truncated {
        out.push_str("... output truncated\n");
    }
}

/// Render a completed invocation
pub fn render_result(result: &InvocationResult, options: &RenderOptions) -> String {
    let mut out = String::new();
    push_section(
        &mut out,
        "[stdout]",
        &decode(&result.stdout, options.strip_ansi),
        result.stdout_truncated,
        options,
    );
    push_section(
        &mut out,
        "[stderr]",
        &decode(&result.stderr, options.strip_ansi),
        result.stderr_truncated,
        options,
    );
    if !result.is_success() || options.always_show_exit_status {
        out.push_str(&format!("[exit status: {}]\n", result.exit_status));
    }
    out
}

/// Render a failed invocation; the transport's reason is kept verbatim
pub fn render_error(error: &ExecError) -> String {
    format!("[error] {}\n", error)
}

/// Streams chunks straight to a writer (stdout of the notebook process, usually)
pub struct WriterSink<W> {
    writer: W,
    strip_ansi: bool,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W, strip_ansi: bool) -> Self {
        Self { writer, strip_ansi }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        if self.strip_ansi {
            self.writer.write_all(&strip_ansi_escapes::strip(chunk))?;
        } else {
            self.writer.write_all(chunk)?;
        }
        self.writer.flush()
    }
}

impl<W: Write + Send> OutputSink for WriterSink<W> {
    fn on_chunk(&mut self, _stream: StreamKind, chunk: &[u8]) {
        if let Err(e) = self.write_chunk(chunk) {
            tracing::debug!("[render] Failed to write output chunk: {}", e);
        }
    }
}
