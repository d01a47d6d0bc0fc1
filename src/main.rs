use clap::Parser;
use project_transfer::utils::error::{ErrorSeverity, TransferError};
use project_transfer::utils::{logger, validation::Validate};
use project_transfer::{
    CliArgs, CsvLedgerStore, HttpSourceApi, HttpTargetApi, RunReport, TransferConfig,
    TransferEngine, TransferLedger,
};
use tokio::sync::watch;

fn exit_code(severity: ErrorSeverity) -> i32 {
    match severity {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}

fn fail(e: &TransferError) -> ! {
    tracing::error!(
        "❌ Transfer failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());
    std::process::exit(exit_code(e.severity()).max(1));
}

fn print_summary(report: &RunReport, dry_run: bool) {
    let verb = if dry_run { "planned" } else { "transferred" };
    let done = if dry_run {
        report.requests.len() - report.skipped().count() - report.failed().count()
    } else {
        report.committed().count()
    };
    println!(
        "✅ {} {}, {} skipped, {} failed",
        done,
        verb,
        report.skipped().count(),
        report.failed().count()
    );
    for dangling in &report.dangling {
        println!(
            "🧟 Rolled back project {} left by request {}",
            dangling.project_id, dangling.request_id
        );
    }
    for orphan in report.orphans() {
        println!(
            "⚠️ Orphan {} from request {} needs manual cleanup: {}",
            orphan.object, orphan.request_id, orphan.error
        );
    }
}

async fn run(args: &CliArgs, config: &TransferConfig) -> Result<RunReport, TransferError> {
    let source = HttpSourceApi::new(&config.source)?;
    let target = HttpTargetApi::new(&config.target)?;
    let ledger = TransferLedger::open(CsvLedgerStore::new(&config.ledger.path)).await?;

    let mut engine = TransferEngine::new(source, target, ledger, config)?;
    if let Some(concurrency) = args.concurrency {
        engine = engine.with_concurrency(concurrency);
    }

    if args.dry_run {
        return engine.plan().await;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("🛑 Interrupt received, finishing requests in flight");
            let _ = shutdown_tx.send(true);
        }
    });
    engine.with_shutdown(shutdown_rx).run().await
}

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    if args.json_logs {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose);
    }
    tracing::info!("Starting project-transfer");
    if args.verbose {
        tracing::debug!("CLI args: {:?}", args);
    }

    let config = match TransferConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => fail(&e),
    };
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        fail(&e);
    }

    let report = match run(&args, &config).await {
        Ok(report) => report,
        Err(e) => fail(&e),
    };
    print_summary(&report, args.dry_run);

    // 根據結果決定退出碼：轉移紀錄無法寫入最嚴重，其次是需要人工處理的孤兒物件
    if report.halted {
        std::process::exit(exit_code(ErrorSeverity::Critical));
    }
    if !report.orphans().is_empty() {
        std::process::exit(exit_code(ErrorSeverity::High));
    }
}
