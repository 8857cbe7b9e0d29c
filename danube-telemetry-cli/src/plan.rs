use anyhow::{Context, Result};
use clap::Args;
use danube_telemetry::{parse_duration, PollOption, SamplePlan, SpanOption};

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Visible time window, e.g. 30m, 1h30m, 2w
    #[arg(long, default_value = "30m")]
    pub span: String,

    /// Finest step the backend serves
    #[arg(long, default_value = "30s")]
    pub min_step: String,

    /// Explicit sample count, overrides planning
    #[arg(long)]
    pub samples: Option<usize>,
}

pub fn handle(args: PlanArgs) -> Result<()> {
    let span = parse_duration(&args.span)
        .with_context(|| format!("invalid --span {:?}", args.span))?;
    let min_step = parse_duration(&args.min_step)
        .with_context(|| format!("invalid --min-step {:?}", args.min_step))?;

    let plan = SamplePlan::new(span, min_step, args.samples);
    println!("{}", render_plan(&plan));
    Ok(())
}

fn render_plan(plan: &SamplePlan) -> String {
    format!(
        "span:    {}s\nsamples: {}\nstep:    {}ms",
        plan.span.as_secs(),
        plan.samples,
        plan.step.as_millis()
    )
}

pub fn print_options() {
    let polls: Vec<String> = PollOption::ALL.iter().map(|o| o.to_string()).collect();
    let spans: Vec<String> = SpanOption::ALL.iter().map(|o| o.to_string()).collect();
    println!("refresh: {}", polls.join(", "));
    println!("span:    {} (default {})", spans.join(", "), SpanOption::DEFAULT);
}
