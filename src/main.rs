use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use itertools::Itertools;
use portfolio_query::config::AppConfig;
use portfolio_query::execution::PolarsClient;
use portfolio_query::execution_loop::ExecutionLoop;
use portfolio_query::fallback::FallbackGenerator;
use portfolio_query::guardrail::LlmInputGuard;
use portfolio_query::history::ConversationHistory;
use portfolio_query::llm::LlmClient;
use portfolio_query::planner::QueryPlanner;
use portfolio_query::service::QueryService;
use portfolio_query::templates::TemplateCatalog;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portfolio-query")]
#[command(about = "Ask questions about trades and holdings in plain English")]
struct Args {
    /// Trades CSV (default: $TRADES_CSV or data/trades.csv)
    #[arg(long, global = true)]
    trades: Option<PathBuf>,

    /// Holdings CSV (default: $HOLDINGS_CSV or data/holdings.csv)
    #[arg(long, global = true)]
    holdings: Option<PathBuf>,

    /// LIMIT appended to queries that have none
    #[arg(long, global = true)]
    row_cap: Option<usize>,

    /// Execution attempts per question
    #[arg(long, global = true)]
    max_attempts: Option<u8>,

    /// Templates only, never call the LLM
    #[arg(long, global = true)]
    no_llm: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Plan, execute and print the response as JSON
    Ask { question: String },
    /// Plan only and print the plan as JSON
    Plan { question: String },
    /// Interactive session with conversation history
    Chat,
    /// List templates
    Templates {
        /// Render every template with its example values and validate it
        #[arg(long)]
        check: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(trades) = args.trades {
        config.trades_csv = trades;
    }
    if let Some(holdings) = args.holdings {
        config.holdings_csv = holdings;
    }
    if let Some(row_cap) = args.row_cap {
        config.row_cap = row_cap;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts;
    }
    if args.no_llm {
        config.llm = None;
    }

    match args.command {
        Command::Templates { check } => {
            let catalog = TemplateCatalog::standard();
            if check {
                let checks = catalog.self_check();
                let failed = checks.iter().filter(|c| !c.ok).count();
                println!("{}", serde_json::to_string_pretty(&checks)?);
                if failed > 0 {
                    anyhow::bail!("{} template(s) failed validation", failed);
                }
            } else {
                for (name, description) in catalog.list_templates() {
                    println!("{:<28} {}", name, description);
                }
            }
        }
        Command::Plan { question } => {
            let planner = build_planner(&config, llm_client(&config));
            let plan = planner.plan(&question, &ConversationHistory::new()).await?;
            match plan {
                Some(plan) => println!("{}", serde_json::to_string_pretty(&plan)?),
                None => anyhow::bail!("No SQL generated for: {}", question),
            }
        }
        Command::Ask { question } => {
            let service = build_service(&config)?;
            let response = service.ask(&question, &ConversationHistory::new()).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Chat => {
            let service = build_service(&config)?;
            run_chat(&service).await?;
        }
    }

    Ok(())
}

fn llm_client(config: &AppConfig) -> Option<Arc<LlmClient>> {
    match config.llm.as_ref().filter(|llm| llm.is_available()) {
        Some(llm_config) => {
            info!(
                "LLM enabled ({:?}, model {})",
                llm_config.backend, llm_config.model
            );
            Some(Arc::new(LlmClient::from_config(llm_config)))
        }
        None => {
            warn!("No LLM configured; only template questions can be answered");
            None
        }
    }
}

fn build_planner(config: &AppConfig, llm: Option<Arc<LlmClient>>) -> QueryPlanner {
    let catalog = TemplateCatalog::standard();
    match llm {
        Some(llm) => {
            let fallback = FallbackGenerator::with_attempts(llm, config.generation_attempts);
            QueryPlanner::with_fallback(catalog, Arc::new(fallback))
        }
        None => QueryPlanner::new(catalog),
    }
}

fn build_service(config: &AppConfig) -> Result<QueryService> {
    let client = PolarsClient::open(&config.trades_csv, &config.holdings_csv)
        .context("failed to open the trades/holdings datasets")?;
    let llm = llm_client(config);
    let service = QueryService::new(
        build_planner(config, llm.clone()),
        ExecutionLoop::new(config.max_attempts, config.row_cap),
        Arc::new(client),
    );
    Ok(match llm {
        Some(llm) => service.with_guard(Arc::new(LlmInputGuard::new(llm))),
        None => service,
    })
}

async fn run_chat(service: &QueryService) -> Result<()> {
    let mut history = ConversationHistory::new();
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if matches!(question, "exit" | "quit") {
            break;
        }

        let response = service.ask(question, &history).await;
        println!("{}", response.answer);
        if let Some(sql) = &response.sql {
            println!("SQL: {}", sql);
        }
        if let Some(result) = response.result.as_ref().filter(|r| r.is_success()) {
            println!("{}", result.columns.join(" | "));
            for row in &result.rows {
                println!("{}", row.iter().join(" | "));
            }
        }

        history.push(response.to_turn(question));
    }

    Ok(())
}
