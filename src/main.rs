use anyhow::{Context, Result};
use parkflow::Runner;
use parkflow::config::Config;
use parkflow::io::jsonl::{JsonlTopicSink, JsonlTopicSource};
use parkflow::observability::init_logging;

fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(config.log_format);

    tracing::info!(
        bootstrap = %config.bootstrap.display(),
        input = %config.input_topic,
        output = %config.output_topic,
        workers = config.pipeline.workers,
        follow = config.follow,
        checkpointing = config.pipeline.checkpoint.enabled,
        "Starting parkflow"
    );

    let source = JsonlTopicSource::open(&config.bootstrap, &config.input_topic, config.follow)
        .context("failed to open input topic")?;
    let sink = JsonlTopicSink::create(&config.bootstrap, &config.output_topic)
        .context("failed to open output topic")?;

    let runner = Runner::new(config.pipeline.clone())?;

    // SIGINT/SIGTERM stop ingestion; workers still drain, flush and checkpoint
    let shutdown = runner.shutdown_handle();
    ctrlc::set_handler(move || {
        tracing::info!("shutdown signal received");
        shutdown.trigger();
    })
    .context("failed to install signal handler")?;

    let report = runner.run(source, sink)?;

    let errors = runner.errors();
    if errors.error_count() > 0 {
        tracing::warn!(rejected = errors.error_count(), "input contained malformed events");
    }
    tracing::info!(
        received = report.ingress.received,
        emitted = report.records_emitted(),
        slots = report.slots(),
        recovered = report.recovered_slots,
        "Done"
    );

    if let Some(path) = &config.metrics_out {
        runner
            .metrics()
            .save_to_file(path)
            .with_context(|| format!("failed to write metrics to {}", path.display()))?;
    }
    if let Some(path) = &config.errors_out {
        errors
            .write_to_file(path)
            .with_context(|| format!("failed to write rejected records to {}", path.display()))?;
    }
    Ok(())
}
