use std::env;

use tracing::info;

use ledgerflow::prelude::*;

/// Default config file, mirroring the pipeline's deployment layout
const CONFIG_PATH: &str = "ledgerflow.json";

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    CliApp::new("ledgerflow").run(run_import_topology).await
}

/// Wire and run the ledger-import pipeline.
///
/// With no argument the topology runs in-process for development; with a
/// topology name it is submitted to a pool of `workers` dedicated worker
/// threads, with the per-tuple timeout from the config file.
async fn run_import_topology() -> Result<(), AppError> {
    let args: Vec<String> = env::args().collect();
    if args.len() > 2 {
        return Err(AppError::InvalidArguments(
            "Usage: ledgerflow [topology-name]".to_string(),
        ));
    }

    let config = match TopologyConfig::load(CONFIG_PATH) {
        Ok(config) => config,
        Err(ConfigError::Read { .. }) => {
            info!(path = CONFIG_PATH, "no config file found, using defaults");
            TopologyConfig::default()
        }
        Err(error) => return Err(error.into()),
    };

    let topology = build_import_topology(&config)?;

    let placement = match args.get(1) {
        Some(name) => {
            info!(
                topology = %name,
                workers = config.workers,
                timeout_secs = config.timeout_secs,
                "submitting to worker pool"
            );
            Placement::Pool(config.workers)
        }
        None => {
            info!("running in-process topology");
            Placement::Local
        }
    };

    let _running = TopologyExecutor::new(topology)
        .with_timeout(config.timeout())
        .with_placement(placement)
        .source("ledger-stream", ShellSource::factory("node", "ledgerStreamSpout.js"))
        .task("transactions", ShellTask::factory("node", "transactionBolt.js"))
        .task("exchanges", ShellTask::factory("node", "exchangesBolt.js"))
        .task("payments", ShellTask::factory("node", "paymentsBolt.js"))
        .task("stats", ShellTask::factory("node", "statsBolt.js"))
        .task(
            "account-payments",
            ShellTask::factory("node", "accountPaymentsBolt.js"),
        )
        .submit()?;

    // Run until a signal arrives; CliApp turns it into a clean exit.
    std::future::pending::<()>().await;
    Ok(())
}

/// The ledger-import topology: one ledger source feeding the transaction
/// parser, with keyed aggregation stages fanning out behind it.
///
/// The stage graph is example configuration for this deployment, not part
/// of the orchestration core.
fn build_import_topology(config: &TopologyConfig) -> Result<Topology, ValidationError> {
    Topology::builder()
        .stage(
            StageDef::source("ledger-stream")
                .declares("txStream", ["tx"])
                .declares("statsAggregation", ["stat", "label"])
                .declares("feeSummaryStream", ["feeSummary"]),
        )
        .stage(
            StageDef::processor("transactions")
                .with_parallelism(config.parallelism_for("transactions"))
                .declares("exchangeAggregation", ["exchange", "pair"])
                .declares("paymentsAggregation", ["payment", "key"])
                .declares("statsAggregation", ["stat", "label"])
                .declares("accountPaymentsAggregation", ["payment", "account"]),
        )
        .stage(
            StageDef::processor("exchanges").with_parallelism(config.parallelism_for("exchanges")),
        )
        .stage(
            StageDef::processor("payments").with_parallelism(config.parallelism_for("payments")),
        )
        .stage(StageDef::processor("stats").with_parallelism(config.parallelism_for("stats")))
        .stage(
            StageDef::processor("account-payments")
                .with_parallelism(config.parallelism_for("account-payments")),
        )
        .edge("ledger-stream", "txStream", "transactions", Grouping::Shuffle)
        .edge(
            "transactions",
            "exchangeAggregation",
            "exchanges",
            Grouping::fields(["pair"]),
        )
        .edge(
            "transactions",
            "paymentsAggregation",
            "payments",
            Grouping::fields(["key"]),
        )
        .edge(
            "transactions",
            "statsAggregation",
            "stats",
            Grouping::fields(["label"]),
        )
        .edge(
            "ledger-stream",
            "statsAggregation",
            "stats",
            Grouping::fields(["label"]),
        )
        .edge(
            "transactions",
            "accountPaymentsAggregation",
            "account-payments",
            Grouping::fields(["account"]),
        )
        .build()
}
