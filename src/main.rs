use casesync::core::{RunOptions, RunStatus, SyncOrchestrator, SyncProgress};
use casesync::logging::{LogConfig, SizeRotatingWriter};
use casesync::{ArtifactSource, ExecutorConfig, SearchRoot, Settings};
use clap::Parser;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing_subscriber::prelude::*;

/// 把按套件导出的测试用例文件同步到远程对象存储
#[derive(Parser, Debug)]
#[command(name = "casesync", version, about)]
struct Cli {
    /// 配置文件路径
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    /// 搜索根目录（可多次给出，按顺序扫描）；
    /// 缺省为当前目录加 test_cases_by_suite 子目录
    #[arg(long = "root")]
    roots: Vec<PathBuf>,

    /// 文件名通配模式（可多次给出，缺省 *.xlsx 和 *.xls）
    #[arg(long = "pattern")]
    patterns: Vec<String>,

    /// 只上传这些 identity（可多次给出）
    #[arg(long = "select")]
    selection: Vec<String>,

    /// 上传前清空远程命名空间
    #[arg(long)]
    clear: bool,

    /// 只计算并展示传输计划，不触碰远程
    #[arg(long)]
    dry_run: bool,

    /// 覆盖配置中的最大尝试次数
    #[arg(long)]
    max_attempts: Option<u32>,

    /// 覆盖配置中的最大并发上传数
    #[arg(long)]
    concurrency: Option<usize>,

    /// 没有发现任何构件时按失败处理
    #[arg(long)]
    fail_when_empty: bool,

    /// 日志目录（缺省 ./logs）
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
}

/// 初始化日志系统：文件 + 控制台双输出
fn init_logging(config: &LogConfig, log_dir: &std::path::Path) {
    let level = config.tracing_level();
    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("opendal=warn".parse().unwrap())
        .add_directive("hyper=warn".parse().unwrap());

    if config.enabled {
        if let Ok(file_writer) = SizeRotatingWriter::new(log_dir, config.max_size_mb) {
            let console_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);

            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);

            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(console_layer);

            let _ = tracing::subscriber::set_global_default(subscriber);
            return;
        }
    }

    // 文件日志禁用或创建失败，回退到控制台
    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn build_options(cli: &Cli, settings: &Settings) -> RunOptions {
    let roots = if cli.roots.is_empty() {
        // 原工具的约定：当前目录必选，按套件导出目录可选
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        vec![
            SearchRoot::required(cwd.clone()),
            SearchRoot::optional(cwd.join("test_cases_by_suite")),
        ]
    } else {
        cli.roots
            .iter()
            .map(|p| SearchRoot::required(p.clone()))
            .collect()
    };

    let patterns = if cli.patterns.is_empty() {
        ArtifactSource::default_patterns()
    } else {
        cli.patterns.clone()
    };

    let selection: Option<BTreeSet<String>> = if cli.selection.is_empty() {
        None
    } else {
        Some(cli.selection.iter().cloned().collect())
    };

    let mut executor = ExecutorConfig::from(&settings.transfer);
    if let Some(attempts) = cli.max_attempts {
        executor.max_attempts = attempts.max(1);
    }
    if let Some(concurrency) = cli.concurrency {
        executor.max_concurrent_uploads = concurrency.max(1);
    }

    RunOptions {
        roots,
        patterns,
        clear_existing: cli.clear,
        selection,
        dry_run: cli.dry_run,
        fail_when_empty: cli.fail_when_empty,
        executor,
    }
}

fn print_summary(report: &casesync::RunReport) {
    println!();
    println!("==================== 同步汇总 ====================");
    println!("运行 ID:   {}", report.run_id);
    println!("状态:      {:?}", report.status);
    println!("计划任务:  {}", report.total_planned);
    println!("成功:      {}", report.succeeded.len());
    println!("失败:      {}", report.failed.len());
    println!("传输字节:  {}", report.total_bytes);
    println!("耗时:      {}s", report.duration_secs());

    if report.dropped_selections > 0 {
        println!("忽略的选择项: {}", report.dropped_selections);
    }

    if !report.planned_deletes.is_empty() || !report.planned_uploads.is_empty() {
        println!();
        println!("计划删除 ({}):", report.planned_deletes.len());
        for identity in &report.planned_deletes {
            println!("  - {}", identity);
        }
        println!("计划上传 ({}):", report.planned_uploads.len());
        for identity in &report.planned_uploads {
            println!("  - {}", identity);
        }
    }

    if !report.failed.is_empty() {
        println!();
        println!("失败明细:");
        for item in &report.failed {
            println!("  - {} [{}] {}", item.identity, item.category, item.message);
        }
    }

    if !report.errors.is_empty() {
        println!();
        for err in &report.errors {
            println!("错误: {}", err);
        }
    }
}

#[tokio::main]
async fn main() {
    // 尽早加载 .env，缺失则忽略
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let settings = match Settings::load(&cli.config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("错误: {}", e);
            std::process::exit(RunStatus::Aborted.exit_code());
        }
    };

    init_logging(&settings.log, &cli.log_dir);

    let storage = match casesync::create_storage(&settings.storage).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("错误: 创建存储失败: {}", e);
            std::process::exit(RunStatus::Aborted.exit_code());
        }
    };

    let options = build_options(&cli, &settings);

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel::<SyncProgress>(64);
    let orchestrator = SyncOrchestrator::new(storage).with_progress(progress_tx);

    // Ctrl-C 请求协作式取消：进行中的传输自然结束
    let cancel_flag = orchestrator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("收到中断信号，正在取消...");
            cancel_flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    });

    let printer = tokio::spawn(async move {
        while let Some(progress) = progress_rx.recv().await {
            println!("[{:?}] {}", progress.phase, progress.message);
        }
    });

    let report = orchestrator.run(&options).await;
    drop(orchestrator);
    let _ = printer.await;

    print_summary(&report);
    std::process::exit(report.status.exit_code());
}
