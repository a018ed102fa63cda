//! Quarry CLI — the thin terminal shell around the agentic engine.
//!
//! Run without a subcommand to enter the interactive REPL; `quarry run
//! <message>` performs a single turn and exits non-zero on failure.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use quarry::agent::{
    ApprovalCallback, ApprovalDecision, AutoApproval, AgentLoop, CancelToken, LoopConfig,
};
use quarry::agents::{AgentDeps, AgentManager, IntentRouter};
use quarry::ai::providers::{OpenAiCompatibleClient, OpenAiCompatibleConfig};
use quarry::ai::StreamingClient;
use quarry::config::{load_config, load_default_config, AppConfig};
use quarry::governance::PatternGovernance;
use quarry::history::ConversationHistory;
use quarry::sandbox::{ExecutionLimits, SandboxExecutor};
use quarry::security::{CommandAllowList, CommandValidator};
use quarry::tools::{register_builtin_tools, ToolContext, ToolInvoker, ToolRegistry, ToolScheduler};

// ---------------------------------------------------------------------------
// CLI surface
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "quarry",
    about = "Agentic coding assistant for the terminal",
    version,
    long_about = "Run without a subcommand to enter the interactive REPL."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to a config file (default: ~/.quarry/config.toml).
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Skip approval prompts: side-effecting tools run unattended.
    #[arg(long, global = true)]
    auto: bool,

    /// Enable audit mode: strict-mode command checks are bypassed (loudly).
    #[arg(long, global = true)]
    audit: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Process a single message and exit.
    Run {
        /// The request to process.
        message: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Engine assembly
// ---------------------------------------------------------------------------

struct Engine {
    loop_: AgentLoop,
}

fn build_engine(cfg: &AppConfig, interactive: bool, auto: bool, audit: bool) -> Engine {
    let allow_list = Arc::new(CommandAllowList::new(&cfg.security.extra_allowed));
    let validator = Arc::new(CommandValidator::new(cfg.security.strict_mode, allow_list));
    if audit {
        validator.set_audit_mode(true);
    }

    let limits = ExecutionLimits::from_config(&cfg.sandbox, cfg.tools.default_timeout_s);
    let executor = Arc::new(SandboxExecutor::new(limits));

    let workspace_root = cfg
        .security
        .workspace_root
        .as_ref()
        .map(PathBuf::from)
        .or_else(|| std::env::current_dir().ok());

    let mut registry = ToolRegistry::new();
    register_builtin_tools(
        &mut registry,
        &ToolContext {
            validator: validator.clone(),
            executor,
            workspace_root,
            backups_enabled: cfg.approval.persist_allow_always,
            warn_requires_approval: cfg.security.warn_requires_approval,
        },
    );

    let invoker = Arc::new(ToolInvoker::new(
        Arc::new(registry),
        cfg.circuit_breaker,
        cfg.tools,
    ));
    let scheduler = ToolScheduler::new(invoker.clone(), cfg.tools.max_parallel);

    let provider: Arc<dyn StreamingClient> = Arc::new(OpenAiCompatibleClient::new(
        OpenAiCompatibleConfig::from_llm_config(&cfg.llm),
        cfg.llm.provider.clone(),
    )
    .with_sampling(cfg.llm.temperature, cfg.llm.max_output_tokens, cfg.llm.top_p));

    let manager = Arc::new(AgentManager::new(AgentDeps {
        provider: provider.clone(),
        invoker: invoker.clone(),
        model: cfg.llm.model_name.clone(),
    }));

    let approval: Arc<dyn ApprovalCallback> = if interactive && !auto {
        Arc::new(TerminalApproval)
    } else {
        Arc::new(AutoApproval::new(cfg.approval.side_effecting_auto_deny))
    };

    let loop_config = LoopConfig {
        model: cfg.llm.model_name.clone(),
        max_tool_iterations: cfg.tools.max_iterations,
        show_provider_banner: true,
        surface_governance: cfg.governance.surface_high_or_critical,
        ..Default::default()
    };

    let loop_ = AgentLoop::new(
        provider,
        invoker,
        scheduler,
        IntentRouter::with_builtin_table(cfg.router),
        manager,
        Arc::new(ConversationHistory::new()),
        Arc::new(PatternGovernance::new()),
        approval,
        validator,
        loop_config,
    );

    Engine { loop_ }
}

// ---------------------------------------------------------------------------
// Terminal approval prompt
// ---------------------------------------------------------------------------

/// Interactive y/n/a prompt on the controlling terminal.  The `a`
/// (always) answer is turned into a session allow-list grant by the loop.
struct TerminalApproval;

#[async_trait]
impl ApprovalCallback for TerminalApproval {
    async fn request_approval(&self, tool_name: &str, summary: &str) -> ApprovalDecision {
        println!("\n⚠️  Approval required: {summary}");
        let tool = tool_name.to_string();
        let answer = tokio::task::spawn_blocking(move || loop {
            print!("Allow {tool}? [y/n/a]: ");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            if std::io::stdin().read_line(&mut line).is_err() {
                return ApprovalDecision::Deny;
            }
            match line.trim().to_lowercase().as_str() {
                "y" | "yes" => return ApprovalDecision::AllowOnce,
                "n" | "no" => return ApprovalDecision::Deny,
                "a" | "always" => return ApprovalDecision::AllowAlways,
                _ => println!("Please answer y, n, or a."),
            }
        })
        .await
        .unwrap_or(ApprovalDecision::Deny);

        if answer == ApprovalDecision::Deny {
            println!("❌ Denied");
        }
        answer
    }
}

// ---------------------------------------------------------------------------
// Turn driver
// ---------------------------------------------------------------------------

/// Stream one turn to stdout; returns `true` when no error chunk appeared.
async fn run_turn(loop_: &AgentLoop, message: String) -> bool {
    let cancel = CancelToken::new();
    let mut stream = loop_.chat(message, cancel.clone());
    let mut clean = true;
    loop {
        tokio::select! {
            chunk = stream.next() => match chunk {
                Some(chunk) => {
                    if chunk.contains("❌") {
                        clean = false;
                    }
                    print!("{chunk}");
                    let _ = std::io::stdout().flush();
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
            }
        }
    }
    println!();
    clean
}

// ---------------------------------------------------------------------------
// REPL
// ---------------------------------------------------------------------------

const HELP: &str = "\
Commands:
  /help          show this help
  /clear         start a fresh conversation
  /agents        list available agents
  /permissions   list allow-listed commands
  /metrics       show tool health telemetry
  /quit          exit
Anything else is sent to the assistant.";

async fn repl(engine: Engine) {
    println!("quarry — type /help for commands, /quit to exit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) | Err(_) => break,
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        match input {
            "/quit" | "/exit" => break,
            "/help" => println!("{HELP}"),
            "/clear" => {
                engine.loop_.history().clear();
                println!("history cleared");
            }
            "/agents" => {
                for descriptor in engine.loop_.manager().descriptors() {
                    println!("  {:<10} {}", descriptor.name, descriptor.description);
                }
            }
            "/permissions" => {
                for name in engine.loop_.invoker().registry().names() {
                    let tag = if engine.loop_.invoker().registry().is_side_effecting(&name) {
                        "side-effecting"
                    } else {
                        "read-only"
                    };
                    println!("  {name:<16} {tag}");
                }
            }
            "/metrics" => {
                let health = engine.loop_.invoker().health();
                println!("breaker: {:?}", health.breaker);
                for (tool, stats) in &health.stats {
                    println!(
                        "  {tool:<16} calls={} ok={} failed={} total={:.2}s",
                        stats.calls, stats.successes, stats.failures, stats.total_duration_s
                    );
                }
            }
            other if other.starts_with('/') => {
                println!("unknown command '{other}' — try /help");
            }
            message => {
                run_turn(&engine.loop_, message.to_string()).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("error: {e}");
                std::process::exit(2);
            }
        },
        None => load_default_config(),
    };

    match cli.command {
        Some(Commands::Run { message }) => {
            let message = message.join(" ");
            if message.trim().is_empty() {
                eprintln!("error: empty message");
                std::process::exit(2);
            }
            let engine = build_engine(&cfg, false, cli.auto, cli.audit);
            let clean = run_turn(&engine.loop_, message).await;
            std::process::exit(if clean { 0 } else { 1 });
        }
        None => {
            let engine = build_engine(&cfg, true, cli.auto, cli.audit);
            repl(engine).await;
        }
    }
}
