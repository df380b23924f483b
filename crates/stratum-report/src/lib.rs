use std::fmt::Write;

use console::Style;
use stratum_domain::{
    CallKind, PlanDescription, PlannedStep, ProvisionReport, StepOutcome, StepResult,
};

mod error;
mod options;
mod redaction;

pub use error::ReportError;
pub use options::{ColorChoice, OutputFormat, RenderOptions};
pub use redaction::redact_sensitive;

/// Render a plan description in the requested output format.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_plan(
    description: &PlanDescription,
    format: OutputFormat,
    options: &RenderOptions,
) -> std::result::Result<String, ReportError> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(description)
            .map_err(|source| ReportError::PlanJson { source }),
        OutputFormat::Text => Ok(render_plan_text(description, options)),
    }
}

/// Render the report of an executed plan in the requested output format.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn render_report(
    report: &ProvisionReport,
    format: OutputFormat,
    options: &RenderOptions,
) -> std::result::Result<String, ReportError> {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(report)
            .map_err(|source| ReportError::ReportJson { source }),
        OutputFormat::Text => Ok(render_report_text(report, options)),
    }
}

// ---------------------------------------------------------------------------
// Plan text
// ---------------------------------------------------------------------------

fn render_plan_text(description: &PlanDescription, options: &RenderOptions) -> String {
    let mut output = String::new();
    let style = TextStyle::new(options.color);

    append_header(&mut output, "preview", options.stack.as_deref(), &style);

    if description.steps.is_empty() {
        let _ = writeln!(output, "  Nothing to do.");
        append_errors(&mut output, &description.errors, &style);
        return output;
    }

    append_errors(&mut output, &description.errors, &style);
    let _ = writeln!(output);

    // An invalid graph has no execution order; fall back to registration order.
    let ordered: Vec<&PlannedStep> = if description.execution_order.is_empty() {
        description.steps.iter().collect()
    } else {
        description
            .execution_order
            .iter()
            .filter_map(|id| description.step(id))
            .collect()
    };
    for step in ordered {
        append_planned_step(&mut output, step, options, &style);
    }

    if !description.exports.is_empty() {
        let _ = writeln!(output);
        for name in &description.exports {
            let _ = writeln!(output, "  {} {}", style.dim("export"), style.primary_text(name));
        }
    }

    let _ = writeln!(output);
    let tally = PlanTally::from_steps(&description.steps);
    let _ = writeln!(output, "{}", tally.format(&style));

    output
}

fn append_planned_step(
    output: &mut String,
    step: &PlannedStep,
    options: &RenderOptions,
    style: &TextStyle,
) {
    let (symbol, label) = match step.call {
        CallKind::Create => (
            style.add_symbol("+"),
            TextStyle::pad_label(&style.add_label("create")),
        ),
        CallKind::Read => (
            style.change_symbol("?"),
            TextStyle::pad_label(&style.change_label("read")),
        ),
    };
    let _ = writeln!(output, "  {symbol} {label}{}", style.primary_text(&step.id.to_string()));

    if options.verbose && !step.depends_on.is_empty() {
        let after: Vec<String> = step.depends_on.iter().map(ToString::to_string).collect();
        let _ = writeln!(
            output,
            "    {}",
            style.dim(&format!("after: {}", after.join(", ")))
        );
    }
}

// ---------------------------------------------------------------------------
// Report text
// ---------------------------------------------------------------------------

fn render_report_text(report: &ProvisionReport, options: &RenderOptions) -> String {
    let mut output = String::new();
    let style = TextStyle::new(options.color);

    append_header(&mut output, "up", options.stack.as_deref(), &style);

    if report.results.is_empty() {
        let _ = writeln!(output, "  Nothing to do.");
        append_errors(&mut output, &report.errors, &style);
        return output;
    }

    let (active, unchanged): (Vec<&StepResult>, Vec<&StepResult>) = report
        .results
        .iter()
        .partition(|result| result.outcome != StepOutcome::Unchanged);

    append_errors(&mut output, &report.errors, &style);
    let _ = writeln!(output);
    for result in &active {
        append_result_line(&mut output, result, options, &style);
    }
    if options.verbose {
        for result in &unchanged {
            append_result_line(&mut output, result, options, &style);
        }
    } else if !unchanged.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "  {}",
            style.dim(&format!("{} unchanged", unchanged.len()))
        );
    }

    if !report.exports.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "{}", style.tally_label("Outputs:"));
        for (name, value) in &report.exports {
            let _ = writeln!(output, "  {} {}", style.primary_text(name), style.dim(value));
        }
    }

    let _ = writeln!(output);
    let tally = OutcomeTally::from_results(&report.results);
    let _ = writeln!(output, "{}", tally.format(&style));

    output
}

fn append_result_line(
    output: &mut String,
    result: &StepResult,
    options: &RenderOptions,
    style: &TextStyle,
) {
    let (symbol, label) = outcome_symbol_and_label(result.outcome, style);
    let _ = writeln!(
        output,
        "  {symbol} {label}{}",
        style.primary_text(&result.step.to_string())
    );

    let Some(error) = &result.error else {
        return;
    };
    match result.outcome {
        StepOutcome::Failed => {
            let _ = writeln!(output, "                     {}", style.error_detail(error));
        }
        _ if options.verbose => {
            let _ = writeln!(output, "    {}", style.dim(error));
        }
        _ => {}
    }
}

fn outcome_symbol_and_label(outcome: StepOutcome, style: &TextStyle) -> (String, String) {
    match outcome {
        StepOutcome::Created => (
            style.add_symbol("+"),
            TextStyle::pad_label(&style.add_label("created")),
        ),
        StepOutcome::Read => (
            style.change_symbol("?"),
            TextStyle::pad_label(&style.change_label("read")),
        ),
        StepOutcome::Unchanged => (
            style.noop_symbol("="),
            TextStyle::pad_label(&style.noop_label("unchanged")),
        ),
        StepOutcome::Failed => (
            style.error_op_symbol("!"),
            TextStyle::pad_label(&style.error_op_label("failed")),
        ),
        StepOutcome::Skipped => (
            style.abort_symbol("-"),
            TextStyle::pad_label(&style.abort_label("skipped")),
        ),
        StepOutcome::Discarded => (
            style.abort_symbol("x"),
            TextStyle::pad_label(&style.abort_label("discarded")),
        ),
    }
}

// ---------------------------------------------------------------------------
// Shared lines
// ---------------------------------------------------------------------------

fn append_header(output: &mut String, command: &str, stack: Option<&str>, style: &TextStyle) {
    let _ = write!(output, "{}", style.header_command(command));
    if let Some(stack) = stack {
        let _ = write!(output, " {}", style.header_stack(stack));
    }
    let _ = writeln!(output);
}

fn append_errors(output: &mut String, errors: &[String], style: &TextStyle) {
    if errors.is_empty() {
        return;
    }
    let _ = writeln!(output);
    for e in errors {
        let _ = writeln!(output, "  {} {e}", style.error_prefix("error:"));
    }
}

// ---------------------------------------------------------------------------
// Tallies
// ---------------------------------------------------------------------------

struct PlanTally {
    creates: usize,
    reads: usize,
}

impl PlanTally {
    fn from_steps(steps: &[PlannedStep]) -> Self {
        let creates = steps
            .iter()
            .filter(|step| step.call == CallKind::Create)
            .count();
        Self {
            creates,
            reads: steps.len() - creates,
        }
    }

    fn format(&self, style: &TextStyle) -> String {
        let mut parts = Vec::new();
        if self.creates > 0 {
            parts.push(style.add_label(&format!("{} to create", self.creates)));
        }
        if self.reads > 0 {
            parts.push(style.change_label(&format!("{} to read", self.reads)));
        }
        if parts.is_empty() {
            format!("{} nothing to do", style.tally_label("Plan:"))
        } else {
            format!("{} {}", style.tally_label("Plan:"), parts.join(", "))
        }
    }
}

struct OutcomeTally {
    created: usize,
    read: usize,
    unchanged: usize,
    failed: usize,
    skipped: usize,
    discarded: usize,
}

impl OutcomeTally {
    fn from_results(results: &[StepResult]) -> Self {
        let mut tally = Self {
            created: 0,
            read: 0,
            unchanged: 0,
            failed: 0,
            skipped: 0,
            discarded: 0,
        };
        for r in results {
            match r.outcome {
                StepOutcome::Created => tally.created += 1,
                StepOutcome::Read => tally.read += 1,
                StepOutcome::Unchanged => tally.unchanged += 1,
                StepOutcome::Failed => tally.failed += 1,
                StepOutcome::Skipped => tally.skipped += 1,
                StepOutcome::Discarded => tally.discarded += 1,
            }
        }
        tally
    }

    fn format(&self, style: &TextStyle) -> String {
        let mut parts = Vec::new();
        if self.created > 0 {
            parts.push(style.add_label(&format!("{} created", self.created)));
        }
        if self.read > 0 {
            parts.push(style.change_label(&format!("{} read", self.read)));
        }
        if self.failed > 0 {
            parts.push(style.error_op_label(&format!("{} failed", self.failed)));
        }
        if self.skipped > 0 {
            parts.push(style.abort_label(&format!("{} skipped", self.skipped)));
        }
        if self.discarded > 0 {
            parts.push(style.abort_label(&format!("{} discarded", self.discarded)));
        }
        if self.unchanged > 0 {
            parts.push(style.dim(&format!("{} unchanged", self.unchanged)));
        }
        if parts.is_empty() {
            format!("{} nothing to do", style.tally_label("Provisioned:"))
        } else {
            format!("{} {}", style.tally_label("Provisioned:"), parts.join(", "))
        }
    }
}

// ---------------------------------------------------------------------------
// TextStyle
// ---------------------------------------------------------------------------

const LABEL_WIDTH: usize = 12;

#[derive(Debug, Clone)]
struct TextStyle {
    color_enabled: bool,
    // Symbols
    add_sym_style: Style,
    change_sym_style: Style,
    abort_sym_style: Style,
    error_sym_style: Style,
    noop_sym_style: Style,
    // Labels
    add_label_style: Style,
    change_label_style: Style,
    abort_label_style: Style,
    error_label_style: Style,
    noop_label_style: Style,
    // Content
    primary_style: Style,
    dim_style: Style,
    error_detail_style: Style,
    // Header
    header_cmd_style: Style,
    header_stack_style: Style,
    error_prefix_style: Style,
    tally_label_style: Style,
}

impl TextStyle {
    fn new(choice: ColorChoice) -> Self {
        let enabled = choice.enabled();
        Self {
            color_enabled: enabled,
            add_sym_style: Style::new().green().bold(),
            change_sym_style: Style::new().cyan().bold(),
            abort_sym_style: Style::new().yellow().bold(),
            error_sym_style: Style::new().red().bold(),
            noop_sym_style: Style::new().dim(),
            add_label_style: Style::new().green(),
            change_label_style: Style::new().cyan(),
            abort_label_style: Style::new().yellow(),
            error_label_style: Style::new().red(),
            noop_label_style: Style::new().dim(),
            primary_style: Style::new().white(),
            dim_style: Style::new().dim(),
            error_detail_style: Style::new().red(),
            header_cmd_style: Style::new().white().bold(),
            header_stack_style: Style::new().dim(),
            error_prefix_style: Style::new().red().bold(),
            tally_label_style: Style::new().white().bold(),
        }
    }

    fn paint<T: std::fmt::Display>(&self, style: &Style, text: T) -> String {
        if self.color_enabled {
            style.clone().force_styling(true).apply_to(text).to_string()
        } else {
            text.to_string()
        }
    }

    fn pad_label(painted: &str) -> String {
        // Visible width, ANSI codes excluded.
        let visible_len = console::measure_text_width(painted);
        if visible_len < LABEL_WIDTH {
            format!("{painted}{}", " ".repeat(LABEL_WIDTH - visible_len))
        } else {
            format!("{painted} ")
        }
    }

    fn add_symbol(&self, s: &str) -> String {
        self.paint(&self.add_sym_style, s)
    }
    fn change_symbol(&self, s: &str) -> String {
        self.paint(&self.change_sym_style, s)
    }
    fn abort_symbol(&self, s: &str) -> String {
        self.paint(&self.abort_sym_style, s)
    }
    fn error_op_symbol(&self, s: &str) -> String {
        self.paint(&self.error_sym_style, s)
    }
    fn noop_symbol(&self, s: &str) -> String {
        self.paint(&self.noop_sym_style, s)
    }

    fn add_label(&self, s: &str) -> String {
        self.paint(&self.add_label_style, s)
    }
    fn change_label(&self, s: &str) -> String {
        self.paint(&self.change_label_style, s)
    }
    fn abort_label(&self, s: &str) -> String {
        self.paint(&self.abort_label_style, s)
    }
    fn error_op_label(&self, s: &str) -> String {
        self.paint(&self.error_label_style, s)
    }
    fn noop_label(&self, s: &str) -> String {
        self.paint(&self.noop_label_style, s)
    }

    fn primary_text(&self, s: &str) -> String {
        self.paint(&self.primary_style, s)
    }
    fn dim(&self, s: &str) -> String {
        self.paint(&self.dim_style, s)
    }
    fn error_detail(&self, s: &str) -> String {
        self.paint(&self.error_detail_style, s)
    }

    fn header_command(&self, s: &str) -> String {
        self.paint(&self.header_cmd_style, s)
    }
    fn header_stack(&self, s: &str) -> String {
        self.paint(&self.header_stack_style, s)
    }
    fn error_prefix(&self, s: &str) -> String {
        self.paint(&self.error_prefix_style, s)
    }
    fn tally_label(&self, s: &str) -> String {
        self.paint(&self.tally_label_style, s)
    }
}
